//! Backing store for disk and tape units.
//!
//! An image is an opaque byte buffer the size of the real medium,
//! two bytes (little endian) per 12-bit word.  Peripherals only ever
//! index into it; uploads and downloads move the bytes unchanged, so
//! an uploaded dump reads back byte-for-byte.
use std::error::Error;
use std::fmt::{self, Debug, Display, Formatter};

use tracing::{event, Level};

use base::prelude::*;

const BYTES_PER_WORD: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageError {
    TooLarge { size: usize, capacity: usize },
}

impl Display for ImageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            ImageError::TooLarge { size, capacity } => write!(
                f,
                "image of {size} bytes is larger than the {capacity} bytes the unit holds"
            ),
        }
    }
}

impl Error for ImageError {}

#[derive(Clone, PartialEq, Eq)]
pub struct UnitImage {
    bytes: Vec<u8>,
}

impl UnitImage {
    /// A zero-filled image of `words` words.
    #[must_use]
    pub fn blank(words: usize) -> UnitImage {
        UnitImage {
            bytes: vec![0; words * BYTES_PER_WORD],
        }
    }

    #[must_use]
    pub fn capacity_words(&self) -> usize {
        self.bytes.len() / BYTES_PER_WORD
    }

    #[must_use]
    pub fn capacity_bytes(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn word(&self, index: usize) -> Option<Unsigned12Bit> {
        let start = index.checked_mul(BYTES_PER_WORD)?;
        match self.bytes.get(start..start + BYTES_PER_WORD) {
            Some([lo, hi]) => Some(Unsigned12Bit::truncating_from(u32::from(
                u16::from_le_bytes([*lo, *hi]),
            ))),
            _ => None,
        }
    }

    /// Store a word, returning false if `index` is beyond the end of
    /// the medium.
    pub fn set_word(&mut self, index: usize, value: Unsigned12Bit) -> bool {
        let Some(start) = index.checked_mul(BYTES_PER_WORD) else {
            return false;
        };
        match self.bytes.get_mut(start..start + BYTES_PER_WORD) {
            Some(dest) => {
                dest.copy_from_slice(&u16::from(value).to_le_bytes());
                true
            }
            None => false,
        }
    }

    /// Replace the contents of the image.  Data larger than the
    /// medium is rejected and the image is left unchanged; shorter
    /// data is padded with zeroes.
    pub fn upload(&mut self, data: &[u8]) -> Result<(), ImageError> {
        if data.len() > self.bytes.len() {
            return Err(ImageError::TooLarge {
                size: data.len(),
                capacity: self.bytes.len(),
            });
        }
        if data.len() < self.bytes.len() {
            event!(
                Level::DEBUG,
                "image of {} bytes padded to {} bytes",
                data.len(),
                self.bytes.len()
            );
        }
        self.bytes[..data.len()].copy_from_slice(data);
        self.bytes[data.len()..].fill(0);
        Ok(())
    }

    #[must_use]
    pub fn download(&self) -> Vec<u8> {
        self.bytes.clone()
    }
}

impl Debug for UnitImage {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_struct("UnitImage")
            .field("capacity_words", &self.capacity_words())
            .finish_non_exhaustive()
    }
}

#[test]
fn test_words_are_little_endian() {
    let mut image = UnitImage::blank(4);
    assert!(image.set_word(1, u12!(0o7001)));
    assert_eq!(&image.download()[2..4], &[0x01, 0x0E]);
    assert_eq!(image.word(1), Some(u12!(0o7001)));
    assert_eq!(image.word(4), None);
    assert!(!image.set_word(4, u12!(1)));
}

#[test]
fn test_upload_is_opaque() {
    let mut image = UnitImage::blank(16 * 2048);
    let dump = vec![0x55_u8; 65536];
    image.upload(&dump).expect("dump fits exactly");
    assert_eq!(image.download(), dump);
    // The top four bits of each stored value are not part of the word.
    assert_eq!(image.word(0), Some(u12!(0o2525)));
}

#[test]
fn test_oversized_upload_keeps_previous_contents() {
    let mut image = UnitImage::blank(2);
    image.upload(&[1, 0, 2, 0]).expect("fits");
    assert_eq!(
        image.upload(&[9; 5]),
        Err(ImageError::TooLarge {
            size: 5,
            capacity: 4
        })
    );
    assert_eq!(image.download(), vec![1, 0, 2, 0]);
    image.upload(&[7]).expect("short upload is padded");
    assert_eq!(image.download(), vec![7, 0, 0, 0]);
}
