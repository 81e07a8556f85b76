//! Net position per symbol and the weighted-average fill rule.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Aggregate net exposure to one symbol (positive = long, negative = short)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: Decimal,
    /// Volume-weighted average entry price; meaningless while flat
    pub average_price: Decimal,
    pub unrealized_pnl: Decimal,
    /// Realized PnL for the symbol, cumulative across closes and reopens
    pub realized_pnl: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    pub fn flat(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            quantity: Decimal::ZERO,
            average_price: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            updated_at: Utc::now(),
        }
    }

    pub fn is_flat(&self) -> bool {
        self.quantity.is_zero()
    }

    pub fn is_long(&self) -> bool {
        self.quantity.is_sign_positive() && !self.quantity.is_zero()
    }

    /// Cost basis of the open quantity (signed)
    pub fn cost_basis(&self) -> Decimal {
        self.quantity.saturating_mul(self.average_price)
    }

    /// Apply a signed fill (`delta` > 0 buys, < 0 sells) at `price`.
    ///
    /// Returns the realized PnL booked by this fill, or `None` when the
    /// arithmetic leaves `Decimal` range; the position is untouched then.
    pub fn apply_fill(&mut self, delta: Decimal, price: Decimal) -> Option<Decimal> {
        let q0 = self.quantity;
        let p0 = self.average_price;
        let q1 = q0.checked_add(delta)?;

        let (average_price, realized) = if q0.is_zero() {
            (price, Decimal::ZERO)
        } else if q1.is_zero() {
            // Closed: the whole prior quantity is realized
            (Decimal::ZERO, price.checked_sub(p0)?.checked_mul(q0)?)
        } else if same_sign(q0, q1) {
            if same_sign(q0, delta) {
                let held = q0.checked_mul(p0)?;
                let added = delta.checked_mul(price)?;
                (held.checked_add(added)?.checked_div(q1)?, Decimal::ZERO)
            } else {
                // Reduction keeps the cost basis of what is left
                (p0, price.checked_sub(p0)?.checked_mul(-delta)?)
            }
        } else {
            // Flip: close all of q0, open the remainder at the fill price
            (price, price.checked_sub(p0)?.checked_mul(q0)?)
        };
        // Cost basis must stay representable for valuation
        q1.checked_mul(average_price)?;
        let realized_total = self.realized_pnl.checked_add(realized)?;

        self.quantity = q1;
        self.average_price = average_price;
        self.realized_pnl = realized_total;
        self.updated_at = Utc::now();
        Some(realized)
    }

    /// Recompute unrealized PnL against `price`.
    ///
    /// `None` (and the previous value kept) if the product overflows.
    pub fn mark_to_market(&mut self, price: Decimal) -> Option<Decimal> {
        let unrealized = if self.is_flat() {
            Decimal::ZERO
        } else if self.is_long() {
            price.checked_sub(self.average_price)?.checked_mul(self.quantity)?
        } else {
            self.average_price
                .checked_sub(price)?
                .checked_mul(self.quantity.abs())?
        };
        self.unrealized_pnl = unrealized;
        self.updated_at = Utc::now();
        Some(unrealized)
    }
}

fn same_sign(a: Decimal, b: Decimal) -> bool {
    a.is_sign_positive() == b.is_sign_positive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_open_from_flat() {
        let mut pos = Position::flat("EURUSD");
        let realized = pos.apply_fill(dec!(10), dec!(100)).unwrap();
        assert_eq!(realized, Decimal::ZERO);
        assert_eq!(pos.quantity, dec!(10));
        assert_eq!(pos.average_price, dec!(100));
    }

    #[test]
    fn test_same_direction_averaging() {
        let mut pos = Position::flat("EURUSD");
        pos.apply_fill(dec!(10), dec!(100));
        pos.apply_fill(dec!(10), dec!(110));
        assert_eq!(pos.quantity, dec!(20));
        assert_eq!(pos.average_price, dec!(105));
    }

    #[test]
    fn test_short_averaging() {
        let mut pos = Position::flat("EURUSD");
        pos.apply_fill(dec!(-4), dec!(50));
        pos.apply_fill(dec!(-6), dec!(60));
        assert_eq!(pos.quantity, dec!(-10));
        // (-4*50 + -6*60) / -10 = 56
        assert_eq!(pos.average_price, dec!(56));
    }

    #[test]
    fn test_direction_flip() {
        let mut pos = Position::flat("EURUSD");
        pos.apply_fill(dec!(10), dec!(100));
        let realized = pos.apply_fill(dec!(-15), dec!(120)).unwrap();
        assert_eq!(realized, dec!(200));
        assert_eq!(pos.quantity, dec!(-5));
        assert_eq!(pos.average_price, dec!(120));
    }

    #[test]
    fn test_close_long_books_pnl() {
        let mut pos = Position::flat("EURUSD");
        pos.apply_fill(dec!(10), dec!(100));
        let realized = pos.apply_fill(dec!(-10), dec!(95)).unwrap();
        assert_eq!(realized, dec!(-50));
        assert!(pos.is_flat());
    }

    #[test]
    fn test_close_short_books_pnl() {
        let mut pos = Position::flat("EURUSD");
        pos.apply_fill(dec!(-10), dec!(100));
        let realized = pos.apply_fill(dec!(10), dec!(90)).unwrap();
        // Short from 100 covered at 90 earns 10 per unit
        assert_eq!(realized, dec!(100));
        assert!(pos.is_flat());
    }

    #[test]
    fn test_partial_reduction_keeps_average() {
        let mut pos = Position::flat("EURUSD");
        pos.apply_fill(dec!(10), dec!(100));
        let realized = pos.apply_fill(dec!(-4), dec!(110)).unwrap();
        assert_eq!(realized, dec!(40));
        assert_eq!(pos.quantity, dec!(6));
        assert_eq!(pos.average_price, dec!(100));
        assert_eq!(pos.realized_pnl, dec!(40));
    }

    #[test]
    fn test_mark_to_market_long_and_short() {
        let mut long = Position::flat("A");
        long.apply_fill(dec!(2), dec!(10));
        assert_eq!(long.mark_to_market(dec!(12)), Some(dec!(4)));

        let mut short = Position::flat("B");
        short.apply_fill(dec!(-2), dec!(10));
        assert_eq!(short.mark_to_market(dec!(12)), Some(dec!(-4)));
        assert_eq!(short.mark_to_market(dec!(7)), Some(dec!(6)));
    }

    #[test]
    fn test_overflowing_fill_leaves_position_untouched() {
        let mut pos = Position::flat("EURUSD");
        pos.apply_fill(dec!(10), dec!(100)).unwrap();
        let huge = Decimal::MAX / dec!(2);
        assert_eq!(pos.apply_fill(huge, huge), None);
        assert_eq!(pos.quantity, dec!(10));
        assert_eq!(pos.average_price, dec!(100));
        assert_eq!(pos.realized_pnl, Decimal::ZERO);
    }

    #[test]
    fn test_overflowing_mark_keeps_previous_value() {
        let mut pos = Position::flat("EURUSD");
        let size = dec!(10000000000000000000000000000);
        pos.apply_fill(size, dec!(1)).unwrap();
        assert_eq!(pos.mark_to_market(dec!(2)), Some(size));
        assert_eq!(pos.mark_to_market(dec!(100)), None);
        assert_eq!(pos.unrealized_pnl, size);
    }
}
