//! Per-order-type fill decisions.

use rust_decimal::Decimal;

use crate::domain::{Order, OrderKind, OrderSide};

/// Outcome of evaluating one order against one market price
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FillDecision {
    /// Execute at this price
    Fill(Decimal),
    /// Conditions not met yet; the order keeps resting
    NotFillable,
    /// The order can never be filled against this input
    Rejected(String),
}

/// Stateless fill engine; the caller owns the order and the outcome.
#[derive(Debug, Clone, Copy)]
pub struct FillEngine {
    slippage_rate: Decimal,
}

impl FillEngine {
    pub fn new(slippage_rate: Decimal) -> Self {
        Self { slippage_rate }
    }

    pub fn slippage_rate(&self) -> Decimal {
        self.slippage_rate
    }

    /// Market price moved against the taker by the slippage rate.
    ///
    /// `None` if the slipped price leaves `Decimal` range.
    pub fn slipped_price(&self, side: OrderSide, market_price: Decimal) -> Option<Decimal> {
        let slippage = market_price.checked_mul(self.slippage_rate)?;
        match side {
            OrderSide::Buy => market_price.checked_add(slippage),
            OrderSide::Sell => market_price.checked_sub(slippage),
        }
    }

    fn taker_fill(&self, side: OrderSide, market_price: Decimal) -> FillDecision {
        match self.slipped_price(side, market_price) {
            Some(price) => FillDecision::Fill(price),
            None => FillDecision::Rejected(format!("market price {market_price} out of range")),
        }
    }

    pub fn evaluate(&self, order: &Order, market_price: Decimal) -> FillDecision {
        if market_price <= Decimal::ZERO {
            return FillDecision::Rejected(format!("invalid market price {market_price}"));
        }

        let side = order.side;
        match order.kind {
            OrderKind::Market => self.taker_fill(side, market_price),
            OrderKind::Limit { price } => {
                if limit_crossed(side, market_price, price) {
                    FillDecision::Fill(price)
                } else {
                    FillDecision::NotFillable
                }
            }
            OrderKind::Stop { stop_price } => {
                if stop_triggered(side, market_price, stop_price) {
                    self.taker_fill(side, market_price)
                } else {
                    FillDecision::NotFillable
                }
            }
            OrderKind::StopLimit { price, stop_price } => {
                if stop_triggered(side, market_price, stop_price)
                    && limit_crossed(side, market_price, price)
                {
                    FillDecision::Fill(price)
                } else {
                    FillDecision::NotFillable
                }
            }
        }
    }
}

fn limit_crossed(side: OrderSide, market: Decimal, limit: Decimal) -> bool {
    match side {
        OrderSide::Buy => market <= limit,
        OrderSide::Sell => market >= limit,
    }
}

fn stop_triggered(side: OrderSide, market: Decimal, stop: Decimal) -> bool {
    match side {
        OrderSide::Buy => market >= stop,
        OrderSide::Sell => market <= stop,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn engine() -> FillEngine {
        FillEngine::new(dec!(0.0001))
    }

    fn order(side: OrderSide, kind: OrderKind) -> Order {
        Order::new(
            "c".to_string(),
            "EURUSD".to_string(),
            side,
            kind,
            dec!(1),
            None,
        )
    }

    #[test]
    fn test_market_slippage_worsens_price() {
        let buy = order(OrderSide::Buy, OrderKind::Market);
        let sell = order(OrderSide::Sell, OrderKind::Market);

        assert_eq!(engine().evaluate(&buy, dec!(100)), FillDecision::Fill(dec!(100.0100)));
        assert_eq!(engine().evaluate(&sell, dec!(100)), FillDecision::Fill(dec!(99.9900)));
    }

    #[test]
    fn test_market_fill_bounds_hold_across_prices() {
        let buy = order(OrderSide::Buy, OrderKind::Market);
        let sell = order(OrderSide::Sell, OrderKind::Market);
        for market in [dec!(0.00001), dec!(1.0842), dec!(65000.5)] {
            match engine().evaluate(&buy, market) {
                FillDecision::Fill(p) => assert!(p >= market),
                other => panic!("unexpected {other:?}"),
            }
            match engine().evaluate(&sell, market) {
                FillDecision::Fill(p) => assert!(p <= market),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_limit_fills_at_limit_price() {
        let buy = order(OrderSide::Buy, OrderKind::Limit { price: dec!(1.10) });
        assert_eq!(engine().evaluate(&buy, dec!(1.09)), FillDecision::Fill(dec!(1.10)));
        assert_eq!(engine().evaluate(&buy, dec!(1.10)), FillDecision::Fill(dec!(1.10)));
        assert_eq!(engine().evaluate(&buy, dec!(1.11)), FillDecision::NotFillable);

        let sell = order(OrderSide::Sell, OrderKind::Limit { price: dec!(1.10) });
        assert_eq!(engine().evaluate(&sell, dec!(1.11)), FillDecision::Fill(dec!(1.10)));
        assert_eq!(engine().evaluate(&sell, dec!(1.09)), FillDecision::NotFillable);
    }

    #[test]
    fn test_stop_triggers_with_slippage() {
        let buy = order(OrderSide::Buy, OrderKind::Stop { stop_price: dec!(100) });
        assert_eq!(engine().evaluate(&buy, dec!(99)), FillDecision::NotFillable);
        assert_eq!(engine().evaluate(&buy, dec!(100)), FillDecision::Fill(dec!(100.0100)));

        let sell = order(OrderSide::Sell, OrderKind::Stop { stop_price: dec!(100) });
        assert_eq!(engine().evaluate(&sell, dec!(101)), FillDecision::NotFillable);
        assert_eq!(engine().evaluate(&sell, dec!(100)), FillDecision::Fill(dec!(99.9900)));
    }

    #[test]
    fn test_stop_limit_needs_trigger_and_limit() {
        let buy = order(
            OrderSide::Buy,
            OrderKind::StopLimit {
                price: dec!(102),
                stop_price: dec!(100),
            },
        );
        // Not triggered
        assert_eq!(engine().evaluate(&buy, dec!(99)), FillDecision::NotFillable);
        // Triggered and inside the limit
        assert_eq!(engine().evaluate(&buy, dec!(101)), FillDecision::Fill(dec!(102)));
        // Triggered but through the limit
        assert_eq!(engine().evaluate(&buy, dec!(103)), FillDecision::NotFillable);

        let sell = order(
            OrderSide::Sell,
            OrderKind::StopLimit {
                price: dec!(98),
                stop_price: dec!(100),
            },
        );
        assert_eq!(engine().evaluate(&sell, dec!(99)), FillDecision::Fill(dec!(98)));
        assert_eq!(engine().evaluate(&sell, dec!(97)), FillDecision::NotFillable);
    }

    #[test]
    fn test_non_positive_market_price_rejects() {
        let buy = order(OrderSide::Buy, OrderKind::Market);
        assert!(matches!(
            engine().evaluate(&buy, Decimal::ZERO),
            FillDecision::Rejected(_)
        ));
    }

    #[test]
    fn test_zero_slippage() {
        let buy = order(OrderSide::Buy, OrderKind::Market);
        let engine = FillEngine::new(Decimal::ZERO);
        assert_eq!(engine.evaluate(&buy, dec!(1.5)), FillDecision::Fill(dec!(1.5)));
    }

    #[test]
    fn test_slipped_price_out_of_range_rejects() {
        let buy = order(OrderSide::Buy, OrderKind::Market);
        assert!(matches!(
            engine().evaluate(&buy, Decimal::MAX),
            FillDecision::Rejected(_)
        ));
        let sell = order(OrderSide::Sell, OrderKind::Market);
        assert!(matches!(
            engine().evaluate(&sell, Decimal::MAX),
            FillDecision::Fill(p) if p < Decimal::MAX
        ));
    }
}
