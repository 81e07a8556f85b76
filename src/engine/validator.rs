//! Order validation: turns a flat [`OrderRequest`] into an [`OrderKind`].
//!
//! Rules run in a fixed order and the first failure wins:
//! quantity, limit price, stop price, then any other supplied price and
//! the symbol itself.

use rust_decimal::Decimal;

use crate::domain::{OrderKind, OrderRequest, OrderType};
use crate::error::{BrokerError, Result};

pub const NON_POSITIVE_QUANTITY: &str = "non-positive quantity";
pub const INVALID_LIMIT_PRICE: &str = "missing/invalid limit price";
pub const INVALID_STOP_PRICE: &str = "missing/invalid stop price";
pub const NON_POSITIVE_PRICE: &str = "non-positive price";
pub const EMPTY_SYMBOL: &str = "empty symbol";

fn positive(value: Option<Decimal>) -> Option<Decimal> {
    value.filter(|v| *v > Decimal::ZERO)
}

fn invalid(reason: &str) -> BrokerError {
    BrokerError::InvalidOrder(reason.to_string())
}

/// Validate `request` without side effects.
pub fn validate(request: &OrderRequest) -> Result<OrderKind> {
    if request.quantity <= Decimal::ZERO {
        return Err(invalid(NON_POSITIVE_QUANTITY));
    }

    let needs_limit = matches!(request.order_type, OrderType::Limit | OrderType::StopLimit);
    let needs_stop = matches!(request.order_type, OrderType::Stop | OrderType::StopLimit);

    let limit = positive(request.price);
    if needs_limit && limit.is_none() {
        return Err(invalid(INVALID_LIMIT_PRICE));
    }

    let stop = positive(request.stop_price);
    if needs_stop && stop.is_none() {
        return Err(invalid(INVALID_STOP_PRICE));
    }

    // Prices the type ignores must still be sane when supplied
    let bad_extra = |value: Option<Decimal>| value.map_or(false, |v| v <= Decimal::ZERO);
    if bad_extra(request.price) || bad_extra(request.stop_price) {
        return Err(invalid(NON_POSITIVE_PRICE));
    }

    if request.symbol.trim().is_empty() {
        return Err(invalid(EMPTY_SYMBOL));
    }

    let kind = match (request.order_type, limit, stop) {
        (OrderType::Market, _, _) => OrderKind::Market,
        (OrderType::Limit, Some(price), _) => OrderKind::Limit { price },
        (OrderType::Stop, _, Some(stop_price)) => OrderKind::Stop { stop_price },
        (OrderType::StopLimit, Some(price), Some(stop_price)) => {
            OrderKind::StopLimit { price, stop_price }
        }
        _ => return Err(BrokerError::Internal("validated order lost a price".into())),
    };
    Ok(kind)
}
