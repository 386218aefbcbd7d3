//! Derives a deposit or final invoice from every production order of a
//! commercial order.

use chrono::{Datelike, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::models::{Invoice, InvoiceType, LineItem, NewInvoice, NewLineItem, ProductionOrder};
use crate::services::metrics::INVOICES_CREATED_TOTAL;
use crate::services::pricing::{self, format_decimal};
use crate::services::repository::InvoiceRepository;
use crate::services::sequence::{self, SequenceKind};

/// A newly created invoice with its line items.
#[derive(Debug, Clone)]
pub struct InvoiceCreated {
    pub invoice: Invoice,
    pub line_items: Vec<LineItem>,
    pub message: String,
}

/// One line per production order, each billed at its own tranche.
pub fn plan_line_items(
    invoice_id: Uuid,
    invoice_type: InvoiceType,
    orders: &[ProductionOrder],
) -> Vec<NewLineItem> {
    let label = match invoice_type {
        InvoiceType::Deposit => "Deposit",
        InvoiceType::Final => "Final payment",
    };

    orders
        .iter()
        .zip(1..)
        .map(|(order, line_number)| {
            let subtotal = pricing::tranche(order.total_cost);
            NewLineItem {
                line_item_id: Uuid::new_v4(),
                invoice_id,
                line_number,
                description: format!(
                    "{} (50%) - {} {}",
                    label, order.order_number, order.item_name
                ),
                quantity: order.quantity,
                unit_price: pricing::tranche(order.unit_price),
                subtotal,
                tax: Decimal::ZERO,
                total: subtotal,
                production_order_id: order.production_order_id,
                production_order_number: order.order_number.clone(),
            }
        })
        .collect()
}

#[instrument(skip(repo, created_by), fields(order_id = %order_id, invoice_type = %invoice_type))]
pub async fn create_for_order(
    repo: &dyn InvoiceRepository,
    order_id: Uuid,
    invoice_type: InvoiceType,
    created_by: Option<String>,
) -> Result<InvoiceCreated, AppError> {
    let now = Utc::now();
    let today = now.date_naive();
    let mut tx = repo.begin().await?;

    // Locking the orders serialises concurrent creation for the same order.
    let orders = tx.lock_production_orders_for_order(order_id).await?;
    let Some(primary) = orders.first() else {
        return Err(AppError::NotFound(anyhow::anyhow!(
            "No production orders found for order {}",
            order_id
        )));
    };

    if let Some(existing) = tx.find_active_invoice_for_order(order_id, invoice_type).await? {
        return Err(AppError::Conflict(anyhow::anyhow!(
            "Order {} already has {} invoice {}",
            order_id,
            invoice_type,
            existing.invoice_number
        )));
    }

    let total_cost: Decimal = orders.iter().map(|o| o.total_cost).sum();
    let totals = pricing::invoice_totals(invoice_type, total_cost);

    let invoice_number = sequence::next_number(tx.as_mut(), SequenceKind::Invoice, today.year()).await?;

    let invoice = tx
        .insert_invoice(&NewInvoice {
            invoice_id: Uuid::new_v4(),
            invoice_number,
            invoice_type,
            order_id,
            production_order_id: primary.production_order_id,
            project_id: primary.project_id,
            customer_id: primary.customer_id,
            subtotal: totals.subtotal,
            tax: totals.tax,
            shipping: totals.shipping,
            total: totals.total,
            payment_terms: invoice_type.default_payment_terms().to_string(),
            due_date: Some(invoice_type.due_date(today)),
            created_by,
        })
        .await?;

    let planned = plan_line_items(invoice.invoice_id, invoice_type, &orders);
    let line_items = tx.insert_line_items(&planned).await?;

    tx.commit().await?;

    INVOICES_CREATED_TOTAL
        .with_label_values(&[invoice_type.as_str()])
        .inc();

    info!(
        invoice_id = %invoice.invoice_id,
        invoice_number = %invoice.invoice_number,
        total = %invoice.total,
        line_items = line_items.len(),
        "Invoice created"
    );

    let message = format!(
        "Created {} invoice {} for {} production order(s), total {}",
        invoice_type,
        invoice.invoice_number,
        line_items.len(),
        format_decimal(invoice.total)
    );

    Ok(InvoiceCreated {
        invoice,
        line_items,
        message,
    })
}
