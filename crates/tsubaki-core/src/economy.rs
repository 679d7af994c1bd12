//! Economy collaborator interface.
//!
//! Handlers may declare an invocation cost. The dispatcher checks balances
//! and deducts through this trait; the ledger itself lives in a collaborator.

use std::sync::Arc;

/// Balance lookup and deduction for cost-gated handlers.
pub trait Economy: Send + Sync {
    /// Current balance of `user_id`, optionally scoped to a group.
    fn balance(&self, user_id: i64, group_id: Option<i64>) -> u64;

    /// Deducts `amount` from the balance. Returns `false` without deducting
    /// when the balance is insufficient.
    fn deduct(&self, user_id: i64, group_id: Option<i64>, amount: u64) -> bool;
}

/// A shared economy trait object.
pub type BoxedEconomy = Arc<dyn Economy>;

/// Economy that grants everything for free. Used when no ledger is wired.
#[derive(Default)]
pub struct FreeEconomy;

impl Economy for FreeEconomy {
    fn balance(&self, _user_id: i64, _group_id: Option<i64>) -> u64 {
        u64::MAX
    }

    fn deduct(&self, _user_id: i64, _group_id: Option<i64>, _amount: u64) -> bool {
        true
    }
}
