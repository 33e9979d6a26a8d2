//! The prelude exports the structs which are useful in representing
//! things on the PDP-8 I/O bus.  Providing this prelude is the main
//! purpose of the base crate.
pub use super::address::{Address, FIELD_SIZE, MAX_FIELDS};
pub use super::error::ConversionFailed;
pub use super::unsigned::{Unsigned12Bit, Unsigned3Bit, Unsigned6Bit};
pub use super::{u12, u3, u6};
