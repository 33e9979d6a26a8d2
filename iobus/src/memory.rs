//! Core memory, as seen from the data-break channel.
//!
//! The PDP-8 can have up to eight 4K fields of 12-bit words.  This
//! model is only ever the target of data breaks and of explicit
//! load/save requests from the surrounding system; nothing here
//! executes instructions.
//!
//! The persisted form of memory is a raw array of little-endian
//! 16-bit words, word `(field << 12) | offset` at byte offset
//! `2 * ((field << 12) | offset)`.
use std::error;
use std::fmt::{self, Debug, Display, Formatter};

use tracing::{event, Level};

use base::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryOpFailure {
    /// The address is in a field which is not fitted.
    NotMapped(Address),
}

impl Display for MemoryOpFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            MemoryOpFailure::NotMapped(addr) => {
                write!(f, "address {addr} is not mapped to installed memory")
            }
        }
    }
}

impl error::Error for MemoryOpFailure {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryConfiguration {
    /// Number of 4K fields fitted, 1 to 8.
    pub fields: usize,
}

impl Default for MemoryConfiguration {
    fn default() -> Self {
        MemoryConfiguration { fields: MAX_FIELDS }
    }
}

pub struct CoreMemory {
    words: Vec<Unsigned12Bit>,
}

impl CoreMemory {
    #[must_use]
    pub fn new(config: &MemoryConfiguration) -> CoreMemory {
        let fields = config.fields.clamp(1, MAX_FIELDS);
        CoreMemory {
            words: vec![Unsigned12Bit::ZERO; fields * FIELD_SIZE],
        }
    }

    /// Number of words installed.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.words.len()
    }

    #[must_use]
    pub fn contains(&self, addr: &Address) -> bool {
        addr.extended() < self.words.len()
    }

    pub fn peek_word(&self, addr: &Address) -> Result<Unsigned12Bit, MemoryOpFailure> {
        self.words
            .get(addr.extended())
            .copied()
            .ok_or(MemoryOpFailure::NotMapped(*addr))
    }

    pub fn poke_word(&mut self, addr: &Address, value: Unsigned12Bit) -> Result<(), MemoryOpFailure> {
        match self.words.get_mut(addr.extended()) {
            Some(w) => {
                *w = value;
                Ok(())
            }
            None => Err(MemoryOpFailure::NotMapped(*addr)),
        }
    }

    /// Store consecutive words starting at `start`.  Nothing is
    /// written unless all of the fragment fits.
    pub fn write_fragment(
        &mut self,
        start: &Address,
        words: &[Unsigned12Bit],
    ) -> Result<(), MemoryOpFailure> {
        let begin = start.extended();
        match self.words.get_mut(begin..begin + words.len()) {
            Some(dest) => {
                dest.copy_from_slice(words);
                Ok(())
            }
            None => Err(MemoryOpFailure::NotMapped(*start)),
        }
    }

    #[must_use]
    pub fn dump(&self) -> Vec<Unsigned12Bit> {
        self.words.clone()
    }

    /// Replace the whole of memory.  Input longer than the installed
    /// memory is truncated, and shorter input is padded with zeroes.
    pub fn load(&mut self, words: &[Unsigned12Bit]) {
        let n = words.len().min(self.words.len());
        if words.len() > self.words.len() {
            event!(
                Level::DEBUG,
                "memory load of {} words truncated to {}",
                words.len(),
                self.words.len()
            );
        }
        self.words[..n].copy_from_slice(&words[..n]);
        self.words[n..].fill(Unsigned12Bit::ZERO);
    }

    pub fn clear(&mut self) {
        self.words.fill(Unsigned12Bit::ZERO);
    }

    #[must_use]
    pub fn to_le_bytes(&self) -> Vec<u8> {
        words_to_le_bytes(&self.words)
    }

    /// Load from the persisted form; see [`CoreMemory::load`] for the
    /// treatment of input of the wrong size.
    pub fn load_le_bytes(&mut self, bytes: &[u8]) {
        self.load(&words_from_le_bytes(bytes));
    }
}

impl Debug for CoreMemory {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_struct("CoreMemory")
            .field("capacity", &self.words.len())
            .finish_non_exhaustive()
    }
}

/// Serialise words as little-endian 16-bit values.
#[must_use]
pub fn words_to_le_bytes(words: &[Unsigned12Bit]) -> Vec<u8> {
    words
        .iter()
        .flat_map(|w| u16::from(*w).to_le_bytes())
        .collect()
}

/// Deserialise little-endian 16-bit values.  The top four bits of
/// each value are ignored, and a trailing odd byte is dropped.
#[must_use]
pub fn words_from_le_bytes(bytes: &[u8]) -> Vec<Unsigned12Bit> {
    bytes
        .chunks_exact(2)
        .map(|pair| Unsigned12Bit::truncating_from(u32::from(u16::from_le_bytes([pair[0], pair[1]]))))
        .collect()
}

#[cfg(test)]
fn addr(extended: usize) -> Address {
    Address::try_from(extended).expect("test address should be valid")
}

#[test]
fn test_peek_poke() {
    let mut mem = CoreMemory::new(&MemoryConfiguration::default());
    assert_eq!(mem.capacity(), 32768);
    mem.poke_word(&addr(0o17750), u12!(0o1234)).expect("poke should succeed");
    assert_eq!(mem.peek_word(&addr(0o17750)), Ok(u12!(0o1234)));
    assert_eq!(mem.peek_word(&addr(0o7750)), Ok(Unsigned12Bit::ZERO));
}

#[test]
fn test_missing_field_is_not_mapped() {
    let mut mem = CoreMemory::new(&MemoryConfiguration { fields: 2 });
    let a = addr(0o20000);
    assert_eq!(mem.peek_word(&a), Err(MemoryOpFailure::NotMapped(a)));
    assert!(mem.poke_word(&a, Unsigned12Bit::ONE).is_err());
    assert!(!mem.contains(&a));
}

#[test]
fn test_load_truncates_and_pads() {
    let mut mem = CoreMemory::new(&MemoryConfiguration { fields: 1 });
    mem.poke_word(&addr(0o7777), u12!(0o77)).expect("poke should succeed");
    mem.load(&[u12!(1), u12!(2)]);
    assert_eq!(mem.peek_word(&addr(1)), Ok(u12!(2)));
    assert_eq!(mem.peek_word(&addr(0o7777)), Ok(Unsigned12Bit::ZERO));

    let too_long = vec![u12!(5); FIELD_SIZE + 10];
    mem.load(&too_long);
    assert_eq!(mem.dump().len(), FIELD_SIZE);
    assert_eq!(mem.peek_word(&addr(0o7777)), Ok(u12!(5)));
}

#[test]
fn test_write_fragment() {
    let mut mem = CoreMemory::new(&MemoryConfiguration { fields: 1 });
    mem.write_fragment(&addr(0o200), &[u12!(0o7300), u12!(0o7402)])
        .expect("fragment fits");
    assert_eq!(mem.peek_word(&addr(0o201)), Ok(u12!(0o7402)));
    assert!(mem
        .write_fragment(&addr(0o7777), &[u12!(1), u12!(2)])
        .is_err());
    mem.clear();
    assert_eq!(mem.peek_word(&addr(0o200)), Ok(Unsigned12Bit::ZERO));
}

#[test]
fn test_le_bytes_round_trip() {
    let mut mem = CoreMemory::new(&MemoryConfiguration { fields: 1 });
    mem.poke_word(&addr(1), u12!(0o7001)).expect("poke should succeed");
    let bytes = mem.to_le_bytes();
    assert_eq!(bytes.len(), 2 * FIELD_SIZE);
    assert_eq!(&bytes[2..4], &[0x01, 0x0E]);
    let mut other = CoreMemory::new(&MemoryConfiguration { fields: 1 });
    other.load_le_bytes(&bytes);
    assert_eq!(other.dump(), mem.dump());
}
