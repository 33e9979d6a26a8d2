//! Extended (15-bit) memory addresses.
//!
//! A PDP-8 address within a field is 12 bits wide.  The memory
//! extension control adds a 3-bit field number, giving up to eight
//! fields of 4096 words each.
use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use super::error::ConversionFailed;
use super::unsigned::{Unsigned12Bit, Unsigned3Bit};

/// The number of words in a memory field.
pub const FIELD_SIZE: usize = 4096;

/// The largest number of fields the memory extension can select.
pub const MAX_FIELDS: usize = 8;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address {
    field: Unsigned3Bit,
    offset: Unsigned12Bit,
}

impl Address {
    pub const ZERO: Address = Address {
        field: Unsigned3Bit::ZERO,
        offset: Unsigned12Bit::ZERO,
    };

    #[must_use]
    pub const fn new(field: Unsigned3Bit, offset: Unsigned12Bit) -> Address {
        Address { field, offset }
    }

    /// An address in field 0.  Three-cycle data breaks keep their
    /// word count and current address registers here.
    #[must_use]
    pub const fn in_field_zero(offset: Unsigned12Bit) -> Address {
        Address {
            field: Unsigned3Bit::ZERO,
            offset,
        }
    }

    #[must_use]
    pub const fn field(&self) -> Unsigned3Bit {
        self.field
    }

    #[must_use]
    pub const fn offset(&self) -> Unsigned12Bit {
        self.offset
    }

    /// The 15-bit extended address, field in bits 12-14.
    #[must_use]
    pub fn extended(&self) -> usize {
        (usize::from(self.field) << 12) | usize::from(self.offset)
    }

    /// The next address within the same field.  The current-address
    /// register of a data break wraps within its field; it does not
    /// carry into the field bits.
    #[must_use]
    pub fn wrapping_next_in_field(&self) -> Address {
        Address {
            field: self.field,
            offset: self.offset.wrapping_add(Unsigned12Bit::ONE),
        }
    }
}

impl TryFrom<usize> for Address {
    type Error = ConversionFailed;

    fn try_from(extended: usize) -> Result<Address, ConversionFailed> {
        let field = Unsigned3Bit::try_from(extended >> 12)?;
        Ok(Address {
            field,
            offset: Unsigned12Bit::truncating_from((extended & 0o7777) as u32),
        })
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "{:o}{:04o}", self.field, self.offset)
    }
}

#[test]
fn test_extended_address_round_trip() {
    let a = Address::try_from(0o57750_usize).expect("test data should be in range");
    assert_eq!(u8::from(a.field()), 5);
    assert_eq!(u16::from(a.offset()), 0o7750);
    assert_eq!(a.extended(), 0o57750);
    assert_eq!(a.to_string(), "57750");
}

#[test]
fn test_extended_address_out_of_range() {
    assert!(Address::try_from(0o100000_usize).is_err());
}

#[test]
fn test_next_address_stays_in_field() {
    let a = Address::try_from(0o37777_usize).expect("test data should be in range");
    let next = a.wrapping_next_in_field();
    assert_eq!(next.extended(), 0o30000);
}
