//! The `base` crate defines the PDP-8 related things which are useful
//! in both the peripheral simulation and associated tools.  The idea
//! is that a front-end (or a CPU emulation) can depend on the base
//! crate without needing to depend on the peripheral bus library
//! itself.

mod address;
mod error;
mod unsigned;

pub mod collections;
pub mod prelude;
pub use crate::unsigned::*;

#[macro_export]
macro_rules! u3 {
    ($n:expr) => {
        $crate::prelude::Unsigned3Bit::new::<{ $n }>()
    };
}

#[macro_export]
macro_rules! u6 {
    ($n:expr) => {
        $crate::prelude::Unsigned6Bit::new::<{ $n }>()
    };
}

#[macro_export]
macro_rules! u12 {
    ($n:expr) => {
        $crate::prelude::Unsigned12Bit::new::<{ $n }>()
    };
}

#[test]
fn test_u12() {
    use prelude::Unsigned12Bit;
    let m: Unsigned12Bit = u12!(0o7750);
    let n: Unsigned12Bit = Unsigned12Bit::try_from(0o7750_u32).expect("test data should be in range");
    assert_eq!(m, n);
}

#[test]
fn test_u6() {
    use prelude::Unsigned6Bit;
    let p: Unsigned6Bit = u6!(0o77);
    assert_eq!(p, Unsigned6Bit::MAX);
}
