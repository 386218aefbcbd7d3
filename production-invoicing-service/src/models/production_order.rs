//! Production order model. The table is owned by the wider ERP; this service
//! only flips payment flags and status.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::ParseEnumError;

/// Lifecycle of a production order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductionOrderStatus {
    Pending,
    InProgress,
    QualityCheck,
    Completed,
    FinalPaid,
    Shipped,
    Delivered,
    Cancelled,
}

impl ProductionOrderStatus {
    pub const ALL: [ProductionOrderStatus; 8] = [
        ProductionOrderStatus::Pending,
        ProductionOrderStatus::InProgress,
        ProductionOrderStatus::QualityCheck,
        ProductionOrderStatus::Completed,
        ProductionOrderStatus::FinalPaid,
        ProductionOrderStatus::Shipped,
        ProductionOrderStatus::Delivered,
        ProductionOrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProductionOrderStatus::Pending => "pending",
            ProductionOrderStatus::InProgress => "in_progress",
            ProductionOrderStatus::QualityCheck => "quality_check",
            ProductionOrderStatus::Completed => "completed",
            ProductionOrderStatus::FinalPaid => "final_paid",
            ProductionOrderStatus::Shipped => "shipped",
            ProductionOrderStatus::Delivered => "delivered",
            ProductionOrderStatus::Cancelled => "cancelled",
        }
    }

    /// Position in the production flow. `Cancelled` sits outside it.
    fn stage(&self) -> Option<u8> {
        match self {
            ProductionOrderStatus::Pending => Some(0),
            ProductionOrderStatus::InProgress => Some(1),
            ProductionOrderStatus::QualityCheck => Some(2),
            ProductionOrderStatus::Completed => Some(3),
            ProductionOrderStatus::FinalPaid => Some(4),
            ProductionOrderStatus::Shipped => Some(5),
            ProductionOrderStatus::Delivered => Some(6),
            ProductionOrderStatus::Cancelled => None,
        }
    }

    /// `target` if it is further along than `self`, otherwise `self`. A
    /// cancelled order stays cancelled.
    pub fn advance_to(self, target: ProductionOrderStatus) -> ProductionOrderStatus {
        match (self.stage(), target.stage()) {
            (Some(current), Some(next)) if next > current => target,
            _ => self,
        }
    }
}

impl FromStr for ProductionOrderStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("production order status", s))
    }
}

impl TryFrom<String> for ProductionOrderStatus {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for ProductionOrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ProductionOrder {
    pub production_order_id: Uuid,
    pub order_number: String,
    pub order_id: Uuid,
    pub project_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    pub item_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total_cost: Decimal,
    pub deposit_paid: bool,
    pub final_payment_paid: bool,
    #[sqlx(try_from = "String")]
    pub status: ProductionOrderStatus,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Flag and status change applied when an invoice covering the order is paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductionOrderPaymentUpdate {
    pub deposit_paid: Option<bool>,
    pub final_payment_paid: Option<bool>,
    pub status: ProductionOrderStatus,
}

impl ProductionOrderPaymentUpdate {
    pub fn apply(&self, order: &mut ProductionOrder) {
        if let Some(flag) = self.deposit_paid {
            order.deposit_paid = flag;
        }
        if let Some(flag) = self.final_payment_paid {
            order.final_payment_paid = flag;
        }
        order.status = self.status;
    }
}
