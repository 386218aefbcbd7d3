//! Expands a production order into one tracked item per physical unit.

use service_core::error::AppError;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::models::{NewOrderedItem, ProductionOrder, UNIT_INITIAL_QC_STATUS, UNIT_INITIAL_STATUS};
use crate::services::repository::RepositoryTx;

/// Rows per insert statement. Each row binds 6 parameters and Postgres
/// allows at most 65535 per statement.
pub const INSERT_BATCH_SIZE: usize = 1_000;

/// `<order_number>-<3-digit index>`, e.g. `PO-1042-007`.
pub fn sku(order_number: &str, item_number: i32) -> String {
    format!("{}-{:03}", order_number, item_number)
}

/// Unit rows for every piece of `order`, numbered from 1.
pub fn plan_units(order: &ProductionOrder) -> Vec<NewOrderedItem> {
    (1..=order.quantity.max(0))
        .map(|item_number| NewOrderedItem {
            ordered_item_id: Uuid::new_v4(),
            production_order_id: order.production_order_id,
            item_number,
            sku: sku(&order.order_number, item_number),
            status: UNIT_INITIAL_STATUS,
            qc_status: UNIT_INITIAL_QC_STATUS,
        })
        .collect()
}

/// Create the units for `order` inside `tx`. Returns how many were created.
///
/// Runs at most once per order: if any unit already exists nothing is
/// inserted and 0 is returned. The unique `(production_order_id,
/// item_number)` constraint backs this up in the database.
///
/// Rows go in batches of [`INSERT_BATCH_SIZE`], all inside `tx`.
#[instrument(skip_all, fields(production_order_id = %order.production_order_id, quantity = order.quantity))]
pub async fn expand(tx: &mut dyn RepositoryTx, order: &ProductionOrder) -> Result<u64, AppError> {
    let existing = tx.count_ordered_items(order.production_order_id).await?;
    if existing > 0 {
        warn!(
            order_number = %order.order_number,
            existing = existing,
            "Units already exist for production order, skipping expansion"
        );
        return Ok(0);
    }

    let units = plan_units(order);
    if units.is_empty() {
        return Ok(0);
    }

    let mut created = 0;
    for batch in units.chunks(INSERT_BATCH_SIZE) {
        created += tx.insert_ordered_items(batch).await?;
    }

    info!(
        order_number = %order.order_number,
        created = created,
        "Ordered items created"
    );

    Ok(created)
}
