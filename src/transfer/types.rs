//! Transfer core types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::state::TransferStatus;
use crate::core_types::{AccountId, TransferId};
use crate::store::Version;

/// Concurrency-control strategy for a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum TransferStrategy {
    /// Version check at write time, read-committed, caller retries conflicts
    Optimistic = 1,
    /// Ordered exclusive row locks, serializable
    Pessimistic = 2,
}

impl TransferStrategy {
    /// Numeric ID for storage
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(TransferStrategy::Optimistic),
            2 => Some(TransferStrategy::Pessimistic),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStrategy::Optimistic => "optimistic",
            TransferStrategy::Pessimistic => "pessimistic",
        }
    }
}

impl fmt::Display for TransferStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransferStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "optimistic" => Ok(TransferStrategy::Optimistic),
            "pessimistic" => Ok(TransferStrategy::Pessimistic),
            other => Err(format!("unknown transfer strategy: {}", other)),
        }
    }
}

/// Transfer row to insert (always starts `Pending`)
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransfer {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: Decimal,
    pub strategy: TransferStrategy,
}

/// Persisted transfer row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transfer {
    pub id: TransferId,
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: Decimal,
    pub strategy: TransferStrategy,
    pub status: TransferStatus,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Post-transfer view of one side
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceSnapshot {
    pub account_id: AccountId,
    pub balance: Decimal,
    pub version: Version,
}

/// Success payload of a transfer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferReceipt {
    pub transfer: Transfer,
    pub from: BalanceSnapshot,
    pub to: BalanceSnapshot,
}
