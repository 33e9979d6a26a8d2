//! Fixed-width unsigned types for the quantities which appear on the
//! PDP-8 I/O bus: 3-bit memory fields, 6-bit device codes and 12-bit
//! machine words.
//!
//! The PDP-8 is a two's-complement machine, so (unlike a general
//! purpose integer) these types wrap at their own width.  A word
//! count of -N is stored as 4096-N, and incrementing it N times
//! brings it back to zero.

use std::fmt::{self, Debug, Display, Formatter, Octal};

use serde::{Deserialize, Serialize};

use super::error::ConversionFailed;

#[cfg(test)]
mod tests;

/// This macro implements conversions from native types to
/// Unsigned*Bit which are always possible (e.g. `From<u8>` for
/// `Unsigned12Bit`).
macro_rules! from_native_type_to_self {
    ($SelfT:ty, $($from:ty)*) => {
        $(
            impl From<$from> for $SelfT {
                fn from(n: $from) -> Self {
                    Self {
                        bits: n.into(),
                    }
                }
            }
        )*
    }
}

/// This macro implements conversions from Unsigned*Bit to native
/// types which are always possible (e.g. `From<Unsigned6Bit>` for
/// `u32`).
macro_rules! from_self_to_native_type {
    ($SelfT:ty, $($to:ty)*) => {
        $(
            impl From<$SelfT> for $to {
                fn from(n: $SelfT) -> $to {
                    <$to>::from(n.bits)
                }
            }
        )*
    }
}

/// This macro implements conversions from native types to
/// Unsigned*Bit where the value may not fit.  For example
/// `TryFrom<u32>` for `Unsigned12Bit`.
macro_rules! try_from_native_type_to_self {
    ($SelfT:ty, $InnerT:ty, $($from:ty)*) => {
        $(
            impl TryFrom<$from> for $SelfT {
                type Error = ConversionFailed;
                fn try_from(n: $from) -> Result<Self, ConversionFailed> {
                    // Some of the source types are unsigned, so this
                    // comparison is sometimes always false.
                    #[allow(unused_comparisons)]
                    if n < 0 {
                        return Err(ConversionFailed::TooSmall);
                    }
                    match <$InnerT>::try_from(n) {
                        Ok(bits) if bits <= Self::VALUE_BITS => Ok(Self { bits }),
                        _ => Err(ConversionFailed::TooLarge),
                    }
                }
            }
        )*
    }
}

/// This macro implements the base functionality of the unsigned
/// types.  `SelfT` is the type being defined, `BITS` its width and
/// `InnerT` the native type which stores those bits.
macro_rules! unsigned_word_impl {
    ($SelfT:ty, $BITS:expr, $InnerT:ty) => {
        impl $SelfT {
            const MODULUS: u32 = 1 << $BITS;
            const VALUE_BITS: $InnerT = (Self::MODULUS - 1) as $InnerT;

            pub const MAX: Self = Self {
                bits: Self::VALUE_BITS,
            };
            pub const ZERO: Self = Self { bits: 0 };
            pub const ONE: Self = Self { bits: 1 };

            // Out of range values fail at compile time.  This is pub
            // so that it can be used in u12!() and similar.
            pub const fn new<const N: $InnerT>() -> $SelfT {
                type Word = $SelfT;
                struct Helper<const M: $InnerT>;
                impl<const M: $InnerT> Helper<M> {
                    const U: Word = {
                        if M > Word::MAX.bits {
                            panic!("input value is out of range")
                        } else {
                            Word { bits: M }
                        }
                    };
                }
                Helper::<N>::U
            }

            /// Keep only the low `BITS` bits of `n`.  This is how a
            /// value is taken from a wider register.
            #[must_use]
            pub const fn truncating_from(n: u32) -> Self {
                Self {
                    bits: (n & (Self::MODULUS - 1)) as $InnerT,
                }
            }

            #[must_use]
            pub const fn is_zero(&self) -> bool {
                self.bits == 0
            }

            #[must_use]
            pub const fn wrapping_add(self, rhs: $SelfT) -> $SelfT {
                Self::truncating_from(self.bits as u32 + rhs.bits as u32)
            }

            /// Add one, reporting whether the result wrapped around
            /// to zero (the carry out of the top bit).
            #[must_use]
            pub const fn overflowing_increment(self) -> ($SelfT, bool) {
                let result = self.wrapping_add(Self::ONE);
                (result, result.is_zero())
            }
        }

        impl Display for $SelfT {
            fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
                Octal::fmt(&self.bits, f)
            }
        }

        impl Octal for $SelfT {
            fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
                Octal::fmt(&self.bits, f)
            }
        }

        impl Debug for $SelfT {
            fn fmt(&self, f: &mut Formatter) -> fmt::Result {
                write!(f, concat!(stringify!($SelfT), "{{bits: {:#o}}}"), self.bits)
            }
        }
    };
}

/// `Unsigned3Bit` is a memory field number or a DECtape unit
/// number.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Unsigned3Bit {
    pub(crate) bits: u8,
}

/// `Unsigned6Bit` is an I/O device code (the `dd` in an IOT
/// instruction `6ddp`).
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Unsigned6Bit {
    pub(crate) bits: u8,
}

/// `Unsigned12Bit` is a PDP-8 machine word, and also a memory
/// address within a field.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct Unsigned12Bit {
    pub(crate) bits: u16,
}

unsigned_word_impl!(Unsigned3Bit, 3, u8);
from_self_to_native_type!(Unsigned3Bit, u8 u16 u32 u64 usize i32);
try_from_native_type_to_self!(Unsigned3Bit, u8, u8 u16 u32 u64 usize i32);

unsigned_word_impl!(Unsigned6Bit, 6, u8);
from_self_to_native_type!(Unsigned6Bit, u8 u16 u32 u64 usize i32);
try_from_native_type_to_self!(Unsigned6Bit, u8, u8 u16 u32 u64 usize i32);

unsigned_word_impl!(Unsigned12Bit, 12, u16);
from_native_type_to_self!(Unsigned12Bit, u8);
from_self_to_native_type!(Unsigned12Bit, u16 u32 u64 usize i32);
try_from_native_type_to_self!(Unsigned12Bit, u16, u16 u32 u64 usize i32);

impl From<Unsigned3Bit> for Unsigned6Bit {
    fn from(n: Unsigned3Bit) -> Unsigned6Bit {
        Unsigned6Bit { bits: n.bits }
    }
}

impl From<Unsigned3Bit> for Unsigned12Bit {
    fn from(n: Unsigned3Bit) -> Unsigned12Bit {
        Unsigned12Bit {
            bits: u16::from(n.bits),
        }
    }
}

impl From<Unsigned6Bit> for Unsigned12Bit {
    fn from(n: Unsigned6Bit) -> Unsigned12Bit {
        Unsigned12Bit {
            bits: u16::from(n.bits),
        }
    }
}

impl TryFrom<Unsigned12Bit> for Unsigned6Bit {
    type Error = ConversionFailed;
    fn try_from(n: Unsigned12Bit) -> Result<Unsigned6Bit, ConversionFailed> {
        Unsigned6Bit::try_from(n.bits)
    }
}

impl TryFrom<Unsigned12Bit> for Unsigned3Bit {
    type Error = ConversionFailed;
    fn try_from(n: Unsigned12Bit) -> Result<Unsigned3Bit, ConversionFailed> {
        Unsigned3Bit::try_from(n.bits)
    }
}
