//! Data models for accounts

use rust_decimal::Decimal;
use serde::Serialize;

use crate::core_types::AccountId;
use crate::store::VersionedRecord;

/// Balance-holding account.
///
/// Never deleted; deactivation clears `is_active`. The row version lives
/// beside the record in [`crate::store::Versioned`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    pub id: AccountId,
    pub balance: Decimal,
    pub is_active: bool,
}

impl Account {
    /// Whether `amount` can be debited without going negative
    pub fn can_debit(&self, amount: Decimal) -> bool {
        self.balance >= amount
    }
}

impl VersionedRecord for Account {
    const ENTITY: &'static str = "account";

    fn id(&self) -> i64 {
        self.id
    }
}
