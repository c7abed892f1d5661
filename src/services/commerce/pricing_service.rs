//! Money arithmetic shared by carts, orders and checkout.
//!
//! Every computed total is rounded half-away-from-zero to two decimal places
//! before it is compared, persisted or sent to the payment provider.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::errors::ServiceError;

pub const MONEY_SCALE: u32 = 2;

/// Round a monetary value to cents.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// `unit_price * quantity`, rounded to cents.
pub fn line_total(unit_price: Decimal, quantity: i32) -> Decimal {
    round_money(unit_price * Decimal::from(quantity))
}

/// Sum of the rounded line totals, so a subtotal always equals the lines it lists.
pub fn lines_total<I>(lines: I) -> Decimal
where
    I: IntoIterator<Item = (Decimal, i32)>,
{
    lines
        .into_iter()
        .map(|(unit_price, quantity)| line_total(unit_price, quantity))
        .sum()
}

/// Orders pay one shipping fee: the largest among their lines.
pub fn max_shipping<I>(fees: I) -> Decimal
where
    I: IntoIterator<Item = Decimal>,
{
    round_money(fees.into_iter().max().unwrap_or(Decimal::ZERO))
}

/// Validated pricing breakdown of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub shipping_total: Decimal,
    pub tax_total: Decimal,
    pub discount_total: Decimal,
    pub grand_total: Decimal,
}

impl OrderTotals {
    /// `grand_total = subtotal + shipping + tax - discount`. Negative
    /// components and a discount larger than the rest are rejected.
    pub fn compute(
        subtotal: Decimal,
        shipping_total: Decimal,
        tax_total: Decimal,
        discount_total: Decimal,
    ) -> Result<Self, ServiceError> {
        if tax_total.is_sign_negative() && !tax_total.is_zero() {
            return Err(ServiceError::ValidationError(
                "tax must not be negative".to_string(),
            ));
        }
        if discount_total.is_sign_negative() && !discount_total.is_zero() {
            return Err(ServiceError::ValidationError(
                "discount must not be negative".to_string(),
            ));
        }

        let subtotal = round_money(subtotal);
        let shipping_total = round_money(shipping_total);
        let tax_total = round_money(tax_total);
        let discount_total = round_money(discount_total);
        let grand_total = subtotal + shipping_total + tax_total - discount_total;

        if grand_total.is_sign_negative() && !grand_total.is_zero() {
            return Err(ServiceError::ValidationError(
                "discount exceeds the order total".to_string(),
            ));
        }

        Ok(Self {
            subtotal,
            shipping_total,
            tax_total,
            discount_total,
            grand_total,
        })
    }
}

/// Two-decimal string as PayPal expects in `amount.value`.
pub fn format_amount(value: Decimal) -> String {
    let mut rounded = round_money(value);
    rounded.rescale(MONEY_SCALE);
    rounded.to_string()
}

/// Parse a provider amount string; `None` when it is not a decimal number.
pub fn parse_amount(value: &str) -> Option<Decimal> {
    value.trim().parse::<Decimal>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    #[test]
    fn rounding_is_half_away_from_zero() {
        assert_eq!(round_money(dec!(10.005)), dec!(10.01));
        assert_eq!(round_money(dec!(10.004)), dec!(10.00));
    }

    #[test]
    fn lines_total_multiplies_and_rounds() {
        let total = lines_total(vec![(dec!(125.00), 2), (dec!(49.50), 1), (dec!(0.333), 3)]);
        assert_eq!(total, dec!(300.50));
    }

    #[test]
    fn subtotal_sums_lines_already_rounded() {
        let lines = vec![(dec!(0.333), 1), (dec!(0.333), 1)];
        let rounded: Decimal = lines.iter().map(|(p, q)| line_total(*p, *q)).sum();
        assert_eq!(line_total(dec!(0.333), 1), dec!(0.33));
        assert_eq!(lines_total(lines), dec!(0.66));
        assert_eq!(rounded, dec!(0.66));
    }

    #[test]
    fn shipping_is_the_maximum_not_the_sum() {
        assert_eq!(max_shipping(vec![dec!(5), dec!(12.5), dec!(7)]), dec!(12.50));
        assert_eq!(max_shipping(Vec::<Decimal>::new()), Decimal::ZERO);
    }

    #[test]
    fn totals_follow_the_invariant() {
        let totals =
            OrderTotals::compute(dec!(200.00), dec!(15.00), dec!(16.50), dec!(20.00)).unwrap();
        assert_eq!(totals.grand_total, dec!(211.50));
        assert_eq!(
            totals.grand_total,
            totals.subtotal + totals.shipping_total + totals.tax_total - totals.discount_total
        );
    }

    #[test]
    fn negative_overrides_are_rejected() {
        assert_matches!(
            OrderTotals::compute(dec!(10), dec!(0), dec!(-1), dec!(0)),
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            OrderTotals::compute(dec!(10), dec!(0), dec!(0), dec!(-1)),
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            OrderTotals::compute(dec!(10), dec!(0), dec!(0), dec!(10.01)),
            Err(ServiceError::ValidationError(_))
        );
    }

    #[test]
    fn amounts_are_formatted_with_two_decimals() {
        assert_eq!(format_amount(dec!(125)), "125.00");
        assert_eq!(format_amount(dec!(49.5)), "49.50");
        assert_eq!(format_amount(dec!(0.125)), "0.13");
    }

    #[test]
    fn provider_amounts_parse() {
        assert_eq!(parse_amount("174.50"), Some(dec!(174.50)));
        assert_eq!(parse_amount(" 3 "), Some(dec!(3)));
        assert_eq!(parse_amount("abc"), None);
    }
}
