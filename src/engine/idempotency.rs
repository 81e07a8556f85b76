//! Client token to order id bindings.
//!
//! A token, once bound, stays bound to its order for the life of the
//! account, whatever state that order later reaches. Resubmitting the same
//! token always returns the original order id.
//!
//! The table is not synchronized on its own: it lives inside the ledger's
//! account state, so `register` followed by `bind` run under the same lock
//! and behave as a compare-and-set.

use std::collections::HashMap;

use uuid::Uuid;

use crate::error::{BrokerError, Result};

#[derive(Debug, Default)]
pub struct IdempotencyTable {
    bindings: HashMap<String, String>,
}

impl IdempotencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing order id for `token`, if it was bound before.
    pub fn register(&self, token: &str) -> Option<String> {
        self.bindings.get(token).cloned()
    }

    /// Bind `token` to `order_id`.
    ///
    /// Rebinding a token to the same order is a no-op; binding it to a
    /// different order is an internal error.
    pub fn bind(&mut self, token: &str, order_id: &str) -> Result<()> {
        match self.bindings.get(token) {
            Some(existing) if existing == order_id => Ok(()),
            Some(existing) => Err(BrokerError::Internal(format!(
                "client token {token} already bound to order {existing}"
            ))),
            None => {
                self.bindings.insert(token.to_string(), order_id.to_string());
                Ok(())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Fresh token for callers that did not supply one
pub fn generate_token() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_token_is_not_registered() {
        let table = IdempotencyTable::new();
        assert!(table.register("t1").is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn bound_token_returns_order_id() {
        let mut table = IdempotencyTable::new();
        table.bind("t1", "order-1").unwrap();
        assert_eq!(table.register("t1").as_deref(), Some("order-1"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn rebinding_same_order_is_noop() {
        let mut table = IdempotencyTable::new();
        table.bind("t1", "order-1").unwrap();
        table.bind("t1", "order-1").unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn rebinding_other_order_fails() {
        let mut table = IdempotencyTable::new();
        table.bind("t1", "order-1").unwrap();
        assert!(table.bind("t1", "order-2").is_err());
        assert_eq!(table.register("t1").as_deref(), Some("order-1"));
    }

    #[test]
    fn generated_tokens_are_unique() {
        assert_ne!(generate_token(), generate_token());
    }
}
