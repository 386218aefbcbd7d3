//! Per-unit tracked items created when production starts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const UNIT_INITIAL_STATUS: &str = "pending";
pub const UNIT_INITIAL_QC_STATUS: &str = "pending";

/// One physical unit of a production order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct OrderedItem {
    pub ordered_item_id: Uuid,
    pub production_order_id: Uuid,
    pub item_number: i32,
    pub sku: String,
    pub status: String,
    pub qc_status: String,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewOrderedItem {
    pub ordered_item_id: Uuid,
    pub production_order_id: Uuid,
    pub item_number: i32,
    pub sku: String,
    pub status: &'static str,
    pub qc_status: &'static str,
}
