//! Operations exposed over gRPC, composed from the ledger, factory and state
//! machine. Sync jobs are queued here, after the owning transaction commits.

use std::sync::Arc;

use chrono::Utc;
use service_core::error::AppError;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::models::{
    Invoice, InvoicePage, InvoiceType, InvoiceUpdate, LineItem, ListInvoicesFilter,
    OutstandingInvoicesFilter, Payment, RecordPayment,
};
use crate::services::accounting::{SyncJob, SyncQueue};
use crate::services::factory::{self, InvoiceCreated};
use crate::services::ledger::{self, PaymentRecorded};
use crate::services::metrics::INVOICE_TRANSITIONS_TOTAL;
use crate::services::repository::InvoiceRepository;
use crate::services::state_machine;

/// Invoice with its line items and payments (newest first).
#[derive(Debug, Clone)]
pub struct InvoiceDetail {
    pub invoice: Invoice,
    pub line_items: Vec<LineItem>,
    pub payments: Vec<Payment>,
}

#[derive(Clone)]
pub struct InvoiceService {
    repo: Arc<dyn InvoiceRepository>,
    sync: SyncQueue,
}

impl InvoiceService {
    pub fn new(repo: Arc<dyn InvoiceRepository>, sync: SyncQueue) -> Self {
        Self { repo, sync }
    }

    pub fn repository(&self) -> &Arc<dyn InvoiceRepository> {
        &self.repo
    }

    pub async fn list(&self, filter: &ListInvoicesFilter) -> Result<InvoicePage, AppError> {
        self.repo.list_invoices(filter).await
    }

    pub async fn get(&self, invoice_id: Uuid) -> Result<InvoiceDetail, AppError> {
        let invoice = self.require_invoice(invoice_id).await?;
        let line_items = self.repo.get_line_items(invoice_id).await?;
        let payments = self.repo.list_payments(invoice_id).await?;
        Ok(InvoiceDetail {
            invoice,
            line_items,
            payments,
        })
    }

    pub async fn list_for_production_order(
        &self,
        production_order_id: Uuid,
    ) -> Result<Vec<Invoice>, AppError> {
        self.repo
            .list_invoices_for_production_order(production_order_id)
            .await
    }

    pub async fn record_payment(&self, input: &RecordPayment) -> Result<PaymentRecorded, AppError> {
        let recorded = ledger::record_payment(self.repo.as_ref(), input).await?;
        self.sync.enqueue(SyncJob::payment(
            recorded.invoice.invoice_id,
            recorded.payment.payment_id,
        ));
        Ok(recorded)
    }

    #[instrument(skip(self, update), fields(invoice_id = %invoice_id))]
    pub async fn update(&self, invoice_id: Uuid, update: &InvoiceUpdate) -> Result<Invoice, AppError> {
        update.validate()?;

        let mut tx = self.repo.begin().await?;
        let current = tx.lock_invoice(invoice_id).await?.ok_or_else(|| not_found(invoice_id))?;
        if update.is_empty() {
            return Ok(current);
        }

        let next = state_machine::apply_update(&current, update, Utc::now())?;
        let stored = tx.update_invoice(&next).await?;
        tx.commit().await?;

        if stored.status != current.status {
            INVOICE_TRANSITIONS_TOTAL
                .with_label_values(&[current.status.as_str(), stored.status.as_str()])
                .inc();
            info!(
                invoice_number = %stored.invoice_number,
                from_status = %current.status,
                to_status = %stored.status,
                "Invoice status changed"
            );
        }

        Ok(stored)
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn cancel(&self, invoice_id: Uuid) -> Result<Invoice, AppError> {
        let mut tx = self.repo.begin().await?;
        let current = tx.lock_invoice(invoice_id).await?.ok_or_else(|| not_found(invoice_id))?;

        let next = state_machine::apply_cancel(&current, Utc::now())?;
        let stored = tx.update_invoice(&next).await?;
        tx.commit().await?;

        INVOICE_TRANSITIONS_TOTAL
            .with_label_values(&[current.status.as_str(), stored.status.as_str()])
            .inc();
        info!(invoice_number = %stored.invoice_number, "Invoice cancelled");

        Ok(stored)
    }

    pub async fn payment_history(&self, invoice_id: Uuid) -> Result<Vec<Payment>, AppError> {
        self.require_invoice(invoice_id).await?;
        self.repo.list_payments(invoice_id).await
    }

    pub async fn outstanding(
        &self,
        filter: &OutstandingInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError> {
        self.repo.list_outstanding_invoices(filter).await
    }

    pub async fn create_for_order(
        &self,
        order_id: Uuid,
        invoice_type: InvoiceType,
        created_by: Option<String>,
    ) -> Result<InvoiceCreated, AppError> {
        let created =
            factory::create_for_order(self.repo.as_ref(), order_id, invoice_type, created_by)
                .await?;
        self.sync.enqueue(SyncJob::invoice(created.invoice.invoice_id));
        Ok(created)
    }

    async fn require_invoice(&self, invoice_id: Uuid) -> Result<Invoice, AppError> {
        self.repo
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| not_found(invoice_id))
    }
}

fn not_found(invoice_id: Uuid) -> AppError {
    AppError::NotFound(anyhow::anyhow!("Invoice {} not found", invoice_id))
}
