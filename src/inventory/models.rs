//! Data models for products and the inventory audit trail

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core_types::{AuditId, ProductId};
use crate::store::{Version, VersionedRecord};

/// Stocked product. Stock never goes below zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub stock: i64,
}

impl Product {
    /// Stock after applying `delta`, or `None` if it would go negative or overflow
    pub fn stock_after(&self, delta: i64) -> Option<i64> {
        self.stock.checked_add(delta).filter(|s| *s >= 0)
    }
}

impl VersionedRecord for Product {
    const ENTITY: &'static str = "product";

    fn id(&self) -> i64 {
        self.id
    }
}

/// Reason for a stock movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum AuditKind {
    Purchase = 1,
    Sale = 2,
    Adjustment = 3,
    Return = 4,
}

impl AuditKind {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(AuditKind::Purchase),
            2 => Some(AuditKind::Sale),
            3 => Some(AuditKind::Adjustment),
            4 => Some(AuditKind::Return),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::Purchase => "PURCHASE",
            AuditKind::Sale => "SALE",
            AuditKind::Adjustment => "ADJUSTMENT",
            AuditKind::Return => "RETURN",
        }
    }
}

impl fmt::Display for AuditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AuditKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PURCHASE" => Ok(AuditKind::Purchase),
            "SALE" => Ok(AuditKind::Sale),
            "ADJUSTMENT" => Ok(AuditKind::Adjustment),
            "RETURN" => Ok(AuditKind::Return),
            other => Err(format!("unknown audit kind: {}", other)),
        }
    }
}

/// Audit row to append
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInventoryAudit {
    pub product_id: ProductId,
    pub delta: i64,
    pub previous_stock: i64,
    pub new_stock: i64,
    pub kind: AuditKind,
}

/// Append-only audit row; never updated or deleted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InventoryAudit {
    pub id: AuditId,
    pub product_id: ProductId,
    pub delta: i64,
    pub previous_stock: i64,
    pub new_stock: i64,
    pub kind: AuditKind,
    pub created_at: DateTime<Utc>,
}

/// Success payload of a stock adjustment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockReceipt {
    pub product_id: ProductId,
    pub previous_stock: i64,
    pub new_stock: i64,
    pub version: Version,
    pub audit: InventoryAudit,
}
