//! Payment recording.
//!
//! One transaction covers the whole operation: the invoice row lock, the
//! payment number, the payment row, the new totals and status, and the
//! production side effects of entering `paid`. Any failure rolls all of it
//! back.

use chrono::{Datelike, Utc};
use rust_decimal::prelude::ToPrimitive;
use service_core::error::AppError;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::models::{Invoice, NewPayment, Payment, RecordPayment};
use crate::services::metrics::{PAYMENTS_TOTAL, PAYMENT_AMOUNT_TOTAL};
use crate::services::pricing;
use crate::services::repository::InvoiceRepository;
use crate::services::sequence::{self, SequenceKind};
use crate::services::state_machine::{self, SideEffects};

/// Outcome of a recorded payment.
#[derive(Debug, Clone)]
pub struct PaymentRecorded {
    pub payment: Payment,
    pub invoice: Invoice,
    pub units_created: u64,
    pub message: String,
}

#[instrument(skip(repo, input), fields(invoice_id = %input.invoice_id, amount = %input.amount))]
pub async fn record_payment(
    repo: &dyn InvoiceRepository,
    input: &RecordPayment,
) -> Result<PaymentRecorded, AppError> {
    input.validate()?;
    pricing::check_payment_amount(input.amount)?;

    let now = Utc::now();
    let mut tx = repo.begin().await?;

    let invoice = tx
        .lock_invoice(input.invoice_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Invoice {} not found", input.invoice_id))
        })?;

    let applied = state_machine::apply_payment(&invoice, input.amount, now)?;

    let payment_number =
        sequence::next_number(tx.as_mut(), SequenceKind::Payment, now.year()).await?;

    let payment = tx
        .insert_payment(&NewPayment {
            payment_id: Uuid::new_v4(),
            payment_number,
            invoice_id: invoice.invoice_id,
            amount: input.amount,
            payment_method: input.payment_method,
            transaction_id: input.transaction_id.clone(),
            notes: input.notes.clone(),
            payment_date: now.date_naive(),
            created_by: input.created_by.clone(),
        })
        .await?;

    let stored = tx.update_invoice(&applied.invoice).await?;

    let effects = if applied.entered_paid {
        state_machine::on_paid(tx.as_mut(), &stored).await?
    } else {
        SideEffects::default()
    };

    tx.commit().await?;

    PAYMENTS_TOTAL
        .with_label_values(&[payment.payment_method.as_str()])
        .inc();
    PAYMENT_AMOUNT_TOTAL
        .with_label_values(&[payment.payment_method.as_str()])
        .inc_by(payment.amount.to_f64().unwrap_or(0.0));

    info!(
        payment_id = %payment.payment_id,
        payment_number = %payment.payment_number,
        invoice_number = %stored.invoice_number,
        from_status = %applied.previous_status,
        to_status = %stored.status,
        units_created = effects.units_created,
        "Payment recorded"
    );

    let message = state_machine::payment_message(&payment.payment_number, &applied, &effects);

    Ok(PaymentRecorded {
        payment,
        invoice: stored,
        units_created: effects.units_created,
        message,
    })
}
