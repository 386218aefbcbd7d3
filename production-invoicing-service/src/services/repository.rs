//! Typed persistence seam for the invoicing core.
//!
//! [`InvoiceRepository`] serves plain reads and opens transactions.
//! Everything that must be atomic (number generation, payment recording,
//! invoice creation, order side effects) goes through a [`RepositoryTx`].
//! Dropping a transaction without calling [`RepositoryTx::commit`] rolls it
//! back, and transaction-scoped locks are released with it.

use async_trait::async_trait;
use service_core::error::AppError;
use uuid::Uuid;

use crate::models::{
    AccountingCredentials, AccountingTokens, EntityMapping, EntityType, Invoice, InvoicePage,
    InvoiceType, LineItem, ListInvoicesFilter, NewInvoice, NewLineItem, NewOrderedItem,
    NewPayment, OrderedItem, OutstandingInvoicesFilter, Payment, ProductionOrder,
    ProductionOrderPaymentUpdate,
};
use crate::services::sequence::SequenceKind;

#[async_trait]
pub trait InvoiceRepository: Send + Sync {
    /// Start a unit of work.
    async fn begin(&self) -> Result<Box<dyn RepositoryTx>, AppError>;

    async fn health_check(&self) -> Result<(), AppError>;

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError>;

    /// Newest first.
    async fn list_invoices(&self, filter: &ListInvoicesFilter) -> Result<InvoicePage, AppError>;

    /// Invoices whose primary production order is `production_order_id` or
    /// that carry a line item for it. Newest first.
    async fn list_invoices_for_production_order(
        &self,
        production_order_id: Uuid,
    ) -> Result<Vec<Invoice>, AppError>;

    /// Pending, partially paid and overdue invoices, oldest due date first.
    async fn list_outstanding_invoices(
        &self,
        filter: &OutstandingInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError>;

    /// Ordered by line number.
    async fn get_line_items(&self, invoice_id: Uuid) -> Result<Vec<LineItem>, AppError>;

    /// Newest first.
    async fn list_payments(&self, invoice_id: Uuid) -> Result<Vec<Payment>, AppError>;

    async fn get_payment(&self, payment_id: Uuid) -> Result<Option<Payment>, AppError>;

    async fn get_production_order(
        &self,
        production_order_id: Uuid,
    ) -> Result<Option<ProductionOrder>, AppError>;

    /// Ordered by item number.
    async fn list_ordered_items(
        &self,
        production_order_id: Uuid,
    ) -> Result<Vec<OrderedItem>, AppError>;

    async fn active_accounting_credentials(
        &self,
    ) -> Result<Option<AccountingCredentials>, AppError>;

    /// Replace the tokens on `credential_id`. A missing refresh token keeps
    /// the stored one.
    async fn update_accounting_tokens(
        &self,
        credential_id: Uuid,
        tokens: &AccountingTokens,
    ) -> Result<AccountingCredentials, AppError>;

    async fn get_entity_mapping(
        &self,
        entity_type: EntityType,
        local_id: Uuid,
    ) -> Result<Option<EntityMapping>, AppError>;

    /// Insert or refresh the mapping for `(entity_type, local_id)`.
    async fn save_entity_mapping(
        &self,
        entity_type: EntityType,
        local_id: Uuid,
        external_id: &str,
    ) -> Result<EntityMapping, AppError>;
}

#[async_trait]
pub trait RepositoryTx: Send {
    /// Block until the transaction-scoped advisory lock `key` is held.
    async fn advisory_lock(&mut self, key: i64) -> Result<(), AppError>;

    /// Highest numeric suffix among `<PREFIX>-<year>-NNNN` numbers, 0 if none.
    async fn max_sequence(&mut self, kind: SequenceKind, year: i32) -> Result<i32, AppError>;

    /// Fetch the invoice and hold its row lock until the transaction ends.
    async fn lock_invoice(&mut self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError>;

    async fn insert_invoice(&mut self, input: &NewInvoice) -> Result<Invoice, AppError>;

    async fn insert_line_items(&mut self, items: &[NewLineItem])
        -> Result<Vec<LineItem>, AppError>;

    async fn insert_payment(&mut self, input: &NewPayment) -> Result<Payment, AppError>;

    /// Persist the mutable invoice fields (totals, status, terms, notes,
    /// dates) and return the stored row.
    async fn update_invoice(&mut self, invoice: &Invoice) -> Result<Invoice, AppError>;

    /// Non-cancelled invoice of `invoice_type` already billed for the
    /// commercial order, if any.
    async fn find_active_invoice_for_order(
        &mut self,
        order_id: Uuid,
        invoice_type: InvoiceType,
    ) -> Result<Option<Invoice>, AppError>;

    /// All production orders of a commercial order, locked, by order number.
    async fn lock_production_orders_for_order(
        &mut self,
        order_id: Uuid,
    ) -> Result<Vec<ProductionOrder>, AppError>;

    /// Distinct production orders referenced by the invoice's line items, in
    /// line order.
    async fn line_item_production_order_ids(
        &mut self,
        invoice_id: Uuid,
    ) -> Result<Vec<Uuid>, AppError>;

    async fn lock_production_order(
        &mut self,
        production_order_id: Uuid,
    ) -> Result<Option<ProductionOrder>, AppError>;

    async fn update_production_order_payment(
        &mut self,
        production_order_id: Uuid,
        update: &ProductionOrderPaymentUpdate,
    ) -> Result<ProductionOrder, AppError>;

    async fn count_ordered_items(&mut self, production_order_id: Uuid) -> Result<i64, AppError>;

    /// Batch insert; returns the number of rows written.
    async fn insert_ordered_items(&mut self, items: &[NewOrderedItem]) -> Result<u64, AppError>;

    async fn commit(self: Box<Self>) -> Result<(), AppError>;
}
