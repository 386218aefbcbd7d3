//! Invoice status transitions and the production side effects of entering
//! `paid`.
//!
//! Every status change goes through [`TRANSITIONS`]. A change that is not
//! listed for its trigger is refused with `PreconditionFailed`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::models::{
    Invoice, InvoiceStatus, InvoiceType, InvoiceUpdate, ProductionOrderPaymentUpdate,
    ProductionOrderStatus,
};
use crate::services::metrics::SIDE_EFFECTS_TOTAL;
use crate::services::pricing::{
    amount_due, check_payment_amount, format_decimal, MAX_AMOUNT,
};
use crate::services::repository::RepositoryTx;
use crate::services::units;

/// What caused a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Payment,
    Manual,
    Cancel,
}

use InvoiceStatus::{Cancelled, Overdue, Paid, PartialPayment, PendingPayment};

/// Allowed `(from, to, trigger)` triples.
pub const TRANSITIONS: &[(InvoiceStatus, InvoiceStatus, Trigger)] = &[
    (PendingPayment, PartialPayment, Trigger::Payment),
    (PendingPayment, Paid, Trigger::Payment),
    (PartialPayment, PartialPayment, Trigger::Payment),
    (PartialPayment, Paid, Trigger::Payment),
    (Overdue, PartialPayment, Trigger::Payment),
    (Overdue, Paid, Trigger::Payment),
    (Paid, Paid, Trigger::Payment),
    (PendingPayment, Overdue, Trigger::Manual),
    (PartialPayment, Overdue, Trigger::Manual),
    (Overdue, PendingPayment, Trigger::Manual),
    (Overdue, PartialPayment, Trigger::Manual),
    (PendingPayment, Cancelled, Trigger::Cancel),
    (PartialPayment, Cancelled, Trigger::Cancel),
    (Overdue, Cancelled, Trigger::Cancel),
];

pub fn is_allowed(from: InvoiceStatus, to: InvoiceStatus, trigger: Trigger) -> bool {
    TRANSITIONS
        .iter()
        .any(|&(f, t, tr)| f == from && t == to && tr == trigger)
}

fn ensure_allowed(
    invoice: &Invoice,
    to: InvoiceStatus,
    trigger: Trigger,
) -> Result<(), AppError> {
    if is_allowed(invoice.status, to, trigger) {
        Ok(())
    } else {
        Err(AppError::PreconditionFailed(anyhow::anyhow!(
            "Invoice {} cannot move from {} to {}",
            invoice.invoice_number,
            invoice.status,
            to
        )))
    }
}

/// Status implied by the running totals. `current` is kept when nothing
/// has been paid yet.
pub fn derive_payment_status(
    current: InvoiceStatus,
    total: Decimal,
    amount_paid: Decimal,
) -> InvoiceStatus {
    if amount_due(total, amount_paid) <= Decimal::ZERO {
        Paid
    } else if amount_paid > Decimal::ZERO {
        PartialPayment
    } else {
        current
    }
}

/// Invoice after a payment has been applied in memory.
#[derive(Debug, Clone)]
pub struct PaymentApplied {
    pub invoice: Invoice,
    pub previous_status: InvoiceStatus,
    pub entered_paid: bool,
}

/// Apply `amount` to the running totals and derive the new status.
pub fn apply_payment(
    invoice: &Invoice,
    amount: Decimal,
    now: DateTime<Utc>,
) -> Result<PaymentApplied, AppError> {
    check_payment_amount(amount)?;
    if invoice.status == Cancelled {
        return Err(AppError::PreconditionFailed(anyhow::anyhow!(
            "Invoice {} is cancelled and cannot accept payments",
            invoice.invoice_number
        )));
    }

    let amount_paid = invoice.amount_paid + amount;
    if amount_paid > MAX_AMOUNT {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Invoice {} cannot take {} more; amount paid would exceed {}",
            invoice.invoice_number,
            format_decimal(amount),
            format_decimal(MAX_AMOUNT)
        )));
    }
    let status = derive_payment_status(invoice.status, invoice.total, amount_paid);
    ensure_allowed(invoice, status, Trigger::Payment)?;

    let entered_paid = status == Paid && invoice.status != Paid;

    let mut updated = invoice.clone();
    updated.amount_paid = amount_paid;
    updated.amount_due = amount_due(invoice.total, amount_paid);
    updated.status = status;
    updated.updated_utc = now;
    if entered_paid {
        updated.paid_utc = Some(now);
    }

    Ok(PaymentApplied {
        invoice: updated,
        previous_status: invoice.status,
        entered_paid,
    })
}

/// Apply a manual edit. Status may only move into or out of `overdue`, and
/// leaving `overdue` must land on the status the totals imply.
pub fn apply_update(
    invoice: &Invoice,
    update: &InvoiceUpdate,
    now: DateTime<Utc>,
) -> Result<Invoice, AppError> {
    let mut updated = invoice.clone();

    if let Some(status) = update.status.filter(|s| *s != invoice.status) {
        match status {
            Paid | PartialPayment if invoice.status != Overdue => {
                return Err(AppError::PreconditionFailed(anyhow::anyhow!(
                    "Status {} is set by recording payments, not manually",
                    status
                )));
            }
            Cancelled => {
                return Err(AppError::PreconditionFailed(anyhow::anyhow!(
                    "Use cancel to cancel invoice {}",
                    invoice.invoice_number
                )));
            }
            _ => {}
        }

        ensure_allowed(invoice, status, Trigger::Manual)?;

        if invoice.status == Overdue {
            let derived =
                derive_payment_status(PendingPayment, invoice.total, invoice.amount_paid);
            if derived != status {
                return Err(AppError::PreconditionFailed(anyhow::anyhow!(
                    "Invoice {} has {} paid of {}; its status must be {}",
                    invoice.invoice_number,
                    format_decimal(invoice.amount_paid),
                    format_decimal(invoice.total),
                    derived
                )));
            }
        }

        updated.status = status;
    }

    if let Some(due_date) = update.due_date {
        updated.due_date = Some(due_date);
    }
    if let Some(terms) = &update.payment_terms {
        updated.payment_terms = terms.clone();
    }
    if let Some(notes) = &update.notes {
        updated.notes = Some(notes.clone());
    }
    updated.updated_utc = now;

    Ok(updated)
}

/// Cancel an invoice that has no money against it.
pub fn apply_cancel(invoice: &Invoice, now: DateTime<Utc>) -> Result<Invoice, AppError> {
    if invoice.status == Cancelled {
        return Err(AppError::PreconditionFailed(anyhow::anyhow!(
            "Invoice {} is already cancelled",
            invoice.invoice_number
        )));
    }
    if invoice.amount_paid > Decimal::ZERO {
        return Err(AppError::PreconditionFailed(anyhow::anyhow!(
            "Invoice {} has {} paid; refund the payments before cancelling",
            invoice.invoice_number,
            format_decimal(invoice.amount_paid)
        )));
    }
    ensure_allowed(invoice, Cancelled, Trigger::Cancel)?;

    let mut updated = invoice.clone();
    updated.status = Cancelled;
    updated.cancelled_utc = Some(now);
    updated.updated_utc = now;
    Ok(updated)
}

/// Production order change applied when an invoice of `invoice_type` is paid
/// for an order currently in `current`. The status only moves forward, so a
/// deposit settled after the final invoice leaves the order `final_paid`.
pub fn settlement_for(
    invoice_type: InvoiceType,
    current: ProductionOrderStatus,
) -> ProductionOrderPaymentUpdate {
    match invoice_type {
        InvoiceType::Deposit => ProductionOrderPaymentUpdate {
            deposit_paid: Some(true),
            final_payment_paid: None,
            status: current.advance_to(ProductionOrderStatus::InProgress),
        },
        InvoiceType::Final => ProductionOrderPaymentUpdate {
            deposit_paid: None,
            final_payment_paid: Some(true),
            status: current.advance_to(ProductionOrderStatus::FinalPaid),
        },
    }
}

/// Result of the `paid` hooks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SideEffects {
    pub orders_updated: usize,
    pub units_created: u64,
}

/// Run the hooks for an invoice that just entered `paid`, inside `tx`.
///
/// Every production order the invoice bills (its primary order plus every
/// order on a line item) is settled. Deposit invoices also expand each order
/// into units.
#[instrument(skip_all, fields(invoice_id = %invoice.invoice_id, invoice_type = %invoice.invoice_type))]
pub async fn on_paid(tx: &mut dyn RepositoryTx, invoice: &Invoice) -> Result<SideEffects, AppError> {
    let order_ids = billed_production_orders(tx, invoice).await?;

    let mut effects = SideEffects::default();
    for production_order_id in order_ids {
        let Some(order) = tx.lock_production_order(production_order_id).await? else {
            warn!(
                production_order_id = %production_order_id,
                "Production order referenced by paid invoice no longer exists"
            );
            continue;
        };

        let settlement = settlement_for(invoice.invoice_type, order.status);
        let order = tx
            .update_production_order_payment(order.production_order_id, &settlement)
            .await?;
        effects.orders_updated += 1;

        if invoice.invoice_type == InvoiceType::Deposit {
            effects.units_created += units::expand(tx, &order).await?;
        }

        info!(
            production_order_id = %order.production_order_id,
            order_number = %order.order_number,
            status = %order.status,
            "Production order settled"
        );
    }

    SIDE_EFFECTS_TOTAL
        .with_label_values(&[invoice.invoice_type.as_str(), "orders_settled"])
        .inc_by(effects.orders_updated as f64);
    SIDE_EFFECTS_TOTAL
        .with_label_values(&[invoice.invoice_type.as_str(), "units_created"])
        .inc_by(effects.units_created as f64);

    Ok(effects)
}

async fn billed_production_orders(
    tx: &mut dyn RepositoryTx,
    invoice: &Invoice,
) -> Result<Vec<Uuid>, AppError> {
    let mut ids = vec![invoice.production_order_id];
    for id in tx.line_item_production_order_ids(invoice.invoice_id).await? {
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

/// Caller-facing summary of a recorded payment.
pub fn payment_message(
    payment_number: &str,
    applied: &PaymentApplied,
    effects: &SideEffects,
) -> String {
    let invoice = &applied.invoice;
    if !applied.entered_paid {
        if applied.previous_status == Paid {
            return format!(
                "Payment {} recorded. Invoice {} was already paid in full",
                payment_number, invoice.invoice_number
            );
        }
        return format!(
            "Payment {} recorded. Remaining balance on {} is {}",
            payment_number,
            invoice.invoice_number,
            format_decimal(invoice.amount_due)
        );
    }

    match invoice.invoice_type {
        InvoiceType::Deposit => format!(
            "Deposit invoice {} paid in full. Production started for {} order(s), {} item(s) created",
            invoice.invoice_number, effects.orders_updated, effects.units_created
        ),
        InvoiceType::Final => format!(
            "Final invoice {} paid in full. {} order(s) released for shipping",
            invoice.invoice_number, effects.orders_updated
        ),
    }
}
