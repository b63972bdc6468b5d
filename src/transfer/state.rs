//! Transfer status definitions
//!
//! Status IDs are stored as SMALLINT in `transfers_tb.status`.

use serde::Serialize;
use std::fmt;

/// Transfer lifecycle
///
/// ```text
/// PENDING ─┬─▶ COMPLETED
///          └─▶ FAILED
/// ```
/// A row leaves `Pending` exactly once and is immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(i16)]
pub enum TransferStatus {
    /// Recorded, balances not yet moved
    Pending = 0,

    /// Terminal: both balances moved atomically
    Completed = 40,

    /// Terminal: no balance moved
    Failed = -10,
}

impl TransferStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Failed)
    }

    /// Numeric ID for storage
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(TransferStatus::Pending),
            40 => Some(TransferStatus::Completed),
            -10 => Some(TransferStatus::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "PENDING",
            TransferStatus::Completed => "COMPLETED",
            TransferStatus::Failed => "FAILED",
        }
    }

    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: TransferStatus) -> bool {
        matches!(
            (self, next),
            (TransferStatus::Pending, TransferStatus::Completed)
                | (TransferStatus::Pending, TransferStatus::Failed)
        )
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for TransferStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        TransferStatus::from_id(value).ok_or(())
    }
}
