use super::*;

#[test]
fn test_conversions_in_range() {
    assert_eq!(u16::from(Unsigned12Bit::try_from(0o7777_u32).unwrap()), 0o7777);
    assert_eq!(u8::from(Unsigned6Bit::try_from(0o77_u8).unwrap()), 0o77);
    assert_eq!(u32::from(Unsigned3Bit::try_from(7_i32).unwrap()), 7);
}

#[test]
fn test_conversions_out_of_range() {
    assert_eq!(
        Unsigned12Bit::try_from(0o10000_u32),
        Err(ConversionFailed::TooLarge)
    );
    assert_eq!(Unsigned6Bit::try_from(0o100_u16), Err(ConversionFailed::TooLarge));
    assert_eq!(Unsigned3Bit::try_from(-1_i32), Err(ConversionFailed::TooSmall));
}

#[test]
fn test_truncating_from() {
    assert_eq!(Unsigned12Bit::truncating_from(0o17777), Unsigned12Bit::MAX);
    assert_eq!(Unsigned3Bit::truncating_from(0o12), Unsigned3Bit::try_from(2_u8).unwrap());
}

#[test]
fn test_wrapping_arithmetic() {
    let one = Unsigned12Bit::ONE;
    assert_eq!(Unsigned12Bit::MAX.wrapping_add(one), Unsigned12Bit::ZERO);
    assert_eq!(
        Unsigned12Bit::MAX.wrapping_add(Unsigned12Bit::MAX),
        Unsigned12Bit::truncating_from(0o7776)
    );
    assert_eq!(Unsigned3Bit::MAX.wrapping_add(Unsigned3Bit::ONE), Unsigned3Bit::ZERO);
}

#[test]
fn test_overflowing_increment() {
    assert_eq!(
        Unsigned12Bit::MAX.overflowing_increment(),
        (Unsigned12Bit::ZERO, true)
    );
    assert_eq!(
        Unsigned12Bit::ZERO.overflowing_increment(),
        (Unsigned12Bit::ONE, false)
    );
}

#[test]
fn test_display_is_octal() {
    let w = Unsigned12Bit::try_from(0o7750_u16).unwrap();
    assert_eq!(w.to_string(), "7750");
    assert_eq!(format!("{w:04o}"), "7750");
    assert_eq!(format!("{:?}", w), "Unsigned12Bit{bits: 0o7750}");
}

#[cfg(test)]
mod u12_proptests {
    use super::super::Unsigned12Bit;
    use test_strategy::{proptest, Arbitrary};

    #[derive(Debug, Arbitrary)]
    struct WordCountInput {
        #[strategy(1..=0o7777u16)]
        count: u16,
    }

    #[proptest]
    fn negated_count_overflows_after_exactly_count_increments(input: WordCountInput) {
        let mut wc = Unsigned12Bit::truncating_from(0o10000 - u32::from(input.count));
        for i in 1..=input.count {
            let (next, overflow) = wc.overflowing_increment();
            assert_eq!(overflow, i == input.count);
            wc = next;
        }
        assert!(wc.is_zero());
    }

    #[proptest]
    fn addition_wraps_at_twelve_bits(a: u16, b: u16) {
        let sum = Unsigned12Bit::truncating_from(u32::from(a))
            .wrapping_add(Unsigned12Bit::truncating_from(u32::from(b)));
        assert_eq!(u32::from(sum), (u32::from(a) + u32::from(b)) % 0o10000);
    }

    #[proptest]
    fn truncation_agrees_with_checked_conversion(n: u32) {
        let checked = Unsigned12Bit::try_from(n).ok();
        assert_eq!(checked.is_some(), n <= 0o7777);
        if let Some(word) = checked {
            assert_eq!(word, Unsigned12Bit::truncating_from(n));
        }
    }
}
