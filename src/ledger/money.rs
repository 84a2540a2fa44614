use rust_decimal::{Decimal, RoundingStrategy};

/// Quantize to agorot (2 fractional digits), rounding half away from zero.
///
/// The result always carries scale 2, so `dec!(200)` comes back as `200.00`.
pub fn quantize(value: Decimal) -> Decimal {
    let mut out = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    out.rescale(2);
    out
}

/// Quantized sum.
pub fn sum<I>(values: I) -> Decimal
where
    I: IntoIterator<Item = Decimal>,
{
    quantize(values.into_iter().fold(Decimal::ZERO, |acc, v| acc + v))
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::{quantize, sum};

    #[test]
    fn quantize_rounds_half_up() {
        assert_eq!(quantize(dec!(1.005)), dec!(1.01));
        assert_eq!(quantize(dec!(1.004)), dec!(1.00));
        assert_eq!(quantize(dec!(-1.005)), dec!(-1.01));
        assert_eq!(quantize(dec!(1105.65)), dec!(1105.65));
    }

    #[test]
    fn quantize_pads_to_two_places() {
        assert_eq!(quantize(dec!(200)).to_string(), "200.00");
        assert_eq!(quantize(dec!(0.5)).to_string(), "0.50");
    }

    #[test]
    fn sum_is_quantized() {
        assert_eq!(sum([dec!(0.333), dec!(0.333)]).to_string(), "0.67");
        assert_eq!(sum(Vec::<rust_decimal::Decimal>::new()).to_string(), "0.00");
    }
}
