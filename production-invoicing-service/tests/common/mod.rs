//! Test helper module for production-invoicing-service integration tests.
//!
//! Provides an in-memory repository with transactional semantics, accounting
//! client doubles, and a helper that serves the gRPC API on a random port.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use production_invoicing_service::grpc::proto::production_invoicing_service_client::ProductionInvoicingServiceClient;
use production_invoicing_service::grpc::proto::production_invoicing_service_server::ProductionInvoicingServiceServer;
use production_invoicing_service::grpc::{trace_context_interceptor, ProductionInvoicingServiceImpl};
use production_invoicing_service::models::{
    AccountingCredentials, AccountingTokens, EntityMapping, EntityType, Invoice, InvoicePage,
    InvoiceStatus, InvoiceType, LineItem, ListInvoicesFilter, NewInvoice, NewLineItem,
    NewOrderedItem, NewPayment, OrderedItem, OutstandingInvoicesFilter, Payment,
    ProductionOrder, ProductionOrderPaymentUpdate, ProductionOrderStatus,
    PAYMENT_STATUS_COMPLETED,
};
use production_invoicing_service::services::accounting::{
    AccountingClient, InvoiceDocument, PaymentDocument, SyncError, SyncJob, SyncQueue,
};
use production_invoicing_service::services::init_metrics;
use production_invoicing_service::services::pricing::MAX_AMOUNT;
use production_invoicing_service::services::sequence::SequenceKind;
use production_invoicing_service::services::{InvoiceRepository, InvoiceService, RepositoryTx};
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Once};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tonic::transport::Channel;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,production_invoicing_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub const TEST_PROJECT_ID: &str = "11111111-1111-1111-1111-111111111111";
pub const TEST_CUSTOMER_ID: &str = "22222222-2222-2222-2222-222222222222";

pub fn project_id() -> Uuid {
    Uuid::parse_str(TEST_PROJECT_ID).unwrap()
}

pub fn customer_id() -> Uuid {
    Uuid::parse_str(TEST_CUSTOMER_ID).unwrap()
}

pub fn dec(value: &str) -> Decimal {
    Decimal::from_str(value).unwrap()
}

// =============================================================================
// In-memory repository
// =============================================================================

/// Everything the repository stores.
#[derive(Debug, Clone, Default)]
pub struct State {
    pub invoices: Vec<Invoice>,
    pub line_items: Vec<LineItem>,
    pub payments: Vec<Payment>,
    pub production_orders: Vec<ProductionOrder>,
    pub ordered_items: Vec<OrderedItem>,
    pub credentials: Vec<AccountingCredentials>,
    pub mappings: Vec<EntityMapping>,
    /// Row count of every committed `insert_ordered_items` call, in order.
    pub ordered_item_batches: Vec<usize>,
}

impl State {
    pub fn invoice(&self, invoice_id: Uuid) -> Option<&Invoice> {
        self.invoices.iter().find(|i| i.invoice_id == invoice_id)
    }

    pub fn production_order(&self, production_order_id: Uuid) -> Option<&ProductionOrder> {
        self.production_orders
            .iter()
            .find(|o| o.production_order_id == production_order_id)
    }

    pub fn units_for(&self, production_order_id: Uuid) -> Vec<&OrderedItem> {
        let mut units: Vec<&OrderedItem> = self
            .ordered_items
            .iter()
            .filter(|u| u.production_order_id == production_order_id)
            .collect();
        units.sort_by_key(|u| u.item_number);
        units
    }

    fn bills_production_order(&self, invoice: &Invoice, production_order_id: Uuid) -> bool {
        invoice.production_order_id == production_order_id
            || self.line_items.iter().any(|li| {
                li.invoice_id == invoice.invoice_id && li.production_order_id == production_order_id
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Fails with `DatabaseError`.
    Database,
    /// Fails with `Contention`, as a serialization failure would.
    Contention,
}

/// Operation name to injected failure.
#[derive(Default)]
pub struct Faults {
    armed: StdMutex<HashMap<&'static str, Fault>>,
}

impl Faults {
    fn check(&self, operation: &'static str) -> Result<(), AppError> {
        match self.armed.lock().unwrap().get(operation) {
            None => Ok(()),
            Some(Fault::Database) => Err(AppError::DatabaseError(anyhow::anyhow!(
                "injected failure in {}",
                operation
            ))),
            Some(Fault::Contention) => Err(AppError::Contention(anyhow::anyhow!(
                "could not serialize access in {}",
                operation
            ))),
        }
    }
}

/// Largest statement Postgres accepts, in bind parameters.
pub const MAX_BIND_PARAMS: usize = 65_535;

/// Columns bound per row by `insert_ordered_items`.
const ORDERED_ITEM_COLUMNS: usize = 6;

/// Reject a value a `NUMERIC(14, 2)` column could not store as-is.
fn money_column(column: &'static str, value: Decimal) -> Result<(), AppError> {
    if value.round_dp(2) != value || value.abs() > MAX_AMOUNT {
        return Err(AppError::DatabaseError(anyhow::anyhow!(
            "value {} does not fit NUMERIC(14, 2) column {}",
            value,
            column
        )));
    }
    Ok(())
}

fn invoice_money_columns(invoice: &Invoice) -> Result<(), AppError> {
    money_column("subtotal", invoice.subtotal)?;
    money_column("tax", invoice.tax)?;
    money_column("shipping", invoice.shipping)?;
    money_column("total", invoice.total)?;
    money_column("amount_paid", invoice.amount_paid)?;
    money_column("amount_due", invoice.amount_due)
}

/// Repository backed by a single mutex-guarded [`State`].
///
/// A transaction holds the mutex for its whole lifetime and works on a copy;
/// `commit` writes the copy back and dropping the transaction discards it.
/// This serialises transactions the way the Postgres row and advisory locks
/// do for the operations under test.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    state: Arc<Mutex<State>>,
    faults: Arc<Faults>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> State {
        self.state.lock().await.clone()
    }

    pub fn fail(&self, operation: &'static str, fault: Fault) {
        self.faults.armed.lock().unwrap().insert(operation, fault);
    }

    pub fn heal(&self, operation: &'static str) {
        self.faults.armed.lock().unwrap().remove(operation);
    }

    /// Add a production order in `pending` with `total_cost = quantity * unit_price`.
    pub async fn seed_production_order(
        &self,
        order_id: Uuid,
        order_number: &str,
        quantity: i32,
        unit_price: &str,
    ) -> ProductionOrder {
        let unit_price = dec(unit_price);
        let now = Utc::now();
        let order = ProductionOrder {
            production_order_id: Uuid::new_v4(),
            order_number: order_number.to_string(),
            order_id,
            project_id: Some(project_id()),
            customer_id: Some(customer_id()),
            item_name: format!("{} cabinetry", order_number),
            quantity,
            unit_price,
            total_cost: unit_price * Decimal::from(quantity),
            deposit_paid: false,
            final_payment_paid: false,
            status: ProductionOrderStatus::Pending,
            created_utc: now,
            updated_utc: now,
        };
        self.state.lock().await.production_orders.push(order.clone());
        order
    }

    pub async fn seed_credentials(&self, expires_in: ChronoDuration) -> AccountingCredentials {
        self.seed_credentials_with(expires_in, Some("refresh-token")).await
    }

    pub async fn seed_credentials_with(
        &self,
        expires_in: ChronoDuration,
        refresh_token: Option<&str>,
    ) -> AccountingCredentials {
        let now = Utc::now();
        let credentials = AccountingCredentials {
            credential_id: Uuid::new_v4(),
            provider: "quickbooks".to_string(),
            realm_id: "realm-test".to_string(),
            access_token: "access-token".to_string(),
            refresh_token: refresh_token.map(str::to_string),
            expires_utc: Some(now + expires_in),
            is_active: true,
            created_utc: now,
        };
        self.state.lock().await.credentials.push(credentials.clone());
        credentials
    }

    /// Overwrite a stored invoice, e.g. to put it in a given status.
    pub async fn put_invoice(&self, invoice: Invoice) {
        let mut state = self.state.lock().await;
        if let Some(slot) = state
            .invoices
            .iter_mut()
            .find(|i| i.invoice_id == invoice.invoice_id)
        {
            *slot = invoice;
        }
    }
}

#[async_trait]
impl InvoiceRepository for InMemoryRepository {
    async fn begin(&self) -> Result<Box<dyn RepositoryTx>, AppError> {
        self.faults.check("begin")?;
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryTx {
            guard,
            working,
            faults: self.faults.clone(),
        }))
    }

    async fn health_check(&self) -> Result<(), AppError> {
        self.faults.check("health_check")
    }

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        self.faults.check("get_invoice")?;
        Ok(self.state.lock().await.invoice(invoice_id).cloned())
    }

    async fn list_invoices(&self, filter: &ListInvoicesFilter) -> Result<InvoicePage, AppError> {
        self.faults.check("list_invoices")?;
        let state = self.state.lock().await;
        let mut matching: Vec<Invoice> = state
            .invoices
            .iter()
            .filter(|i| filter.status.is_none_or(|s| i.status == s))
            .filter(|i| filter.invoice_type.is_none_or(|t| i.invoice_type == t))
            .filter(|i| filter.project_id.is_none_or(|p| i.project_id == Some(p)))
            .filter(|i| {
                filter
                    .production_order_id
                    .is_none_or(|p| state.bills_production_order(i, p))
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            b.created_utc
                .cmp(&a.created_utc)
                .then_with(|| b.invoice_number.cmp(&a.invoice_number))
        });

        let total = matching.len() as i64;
        let invoices = matching
            .into_iter()
            .skip(filter.offset as usize)
            .take(filter.limit as usize)
            .collect();
        Ok(InvoicePage { invoices, total })
    }

    async fn list_invoices_for_production_order(
        &self,
        production_order_id: Uuid,
    ) -> Result<Vec<Invoice>, AppError> {
        let state = self.state.lock().await;
        let mut invoices: Vec<Invoice> = state
            .invoices
            .iter()
            .filter(|i| state.bills_production_order(i, production_order_id))
            .cloned()
            .collect();
        invoices.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        Ok(invoices)
    }

    async fn list_outstanding_invoices(
        &self,
        filter: &OutstandingInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError> {
        let state = self.state.lock().await;
        let mut invoices: Vec<Invoice> = state
            .invoices
            .iter()
            .filter(|i| i.status.is_outstanding())
            .filter(|i| filter.project_id.is_none_or(|p| i.project_id == Some(p)))
            .filter(|i| filter.customer_id.is_none_or(|c| i.customer_id == Some(c)))
            .cloned()
            .collect();
        // NULL due dates last, like the SQL ordering.
        invoices.sort_by_key(|i| (i.due_date.is_none(), i.due_date, i.created_utc));
        Ok(invoices)
    }

    async fn get_line_items(&self, invoice_id: Uuid) -> Result<Vec<LineItem>, AppError> {
        let state = self.state.lock().await;
        let mut items: Vec<LineItem> = state
            .line_items
            .iter()
            .filter(|li| li.invoice_id == invoice_id)
            .cloned()
            .collect();
        items.sort_by_key(|li| li.line_number);
        Ok(items)
    }

    async fn list_payments(&self, invoice_id: Uuid) -> Result<Vec<Payment>, AppError> {
        let state = self.state.lock().await;
        let mut payments: Vec<Payment> = state
            .payments
            .iter()
            .filter(|p| p.invoice_id == invoice_id)
            .cloned()
            .collect();
        payments.sort_by(|a, b| {
            b.created_utc
                .cmp(&a.created_utc)
                .then_with(|| b.payment_number.cmp(&a.payment_number))
        });
        Ok(payments)
    }

    async fn get_payment(&self, payment_id: Uuid) -> Result<Option<Payment>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .payments
            .iter()
            .find(|p| p.payment_id == payment_id)
            .cloned())
    }

    async fn get_production_order(
        &self,
        production_order_id: Uuid,
    ) -> Result<Option<ProductionOrder>, AppError> {
        Ok(self
            .state
            .lock()
            .await
            .production_order(production_order_id)
            .cloned())
    }

    async fn list_ordered_items(
        &self,
        production_order_id: Uuid,
    ) -> Result<Vec<OrderedItem>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .units_for(production_order_id)
            .into_iter()
            .cloned()
            .collect())
    }

    async fn active_accounting_credentials(
        &self,
    ) -> Result<Option<AccountingCredentials>, AppError> {
        self.faults.check("active_accounting_credentials")?;
        let state = self.state.lock().await;
        Ok(state
            .credentials
            .iter()
            .filter(|c| c.is_active)
            .max_by_key(|c| c.created_utc)
            .cloned())
    }

    async fn update_accounting_tokens(
        &self,
        credential_id: Uuid,
        tokens: &AccountingTokens,
    ) -> Result<AccountingCredentials, AppError> {
        self.faults.check("update_accounting_tokens")?;
        let mut state = self.state.lock().await;
        let credentials = state
            .credentials
            .iter_mut()
            .find(|c| c.credential_id == credential_id)
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!(
                    "Accounting credentials {} not found",
                    credential_id
                ))
            })?;
        credentials.access_token = tokens.access_token.clone();
        if let Some(refresh_token) = &tokens.refresh_token {
            credentials.refresh_token = Some(refresh_token.clone());
        }
        credentials.expires_utc = tokens.expires_utc;
        Ok(credentials.clone())
    }

    async fn get_entity_mapping(
        &self,
        entity_type: EntityType,
        local_id: Uuid,
    ) -> Result<Option<EntityMapping>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .mappings
            .iter()
            .find(|m| m.entity_type == entity_type && m.local_id == local_id)
            .cloned())
    }

    async fn save_entity_mapping(
        &self,
        entity_type: EntityType,
        local_id: Uuid,
        external_id: &str,
    ) -> Result<EntityMapping, AppError> {
        self.faults.check("save_entity_mapping")?;
        let mut state = self.state.lock().await;
        if let Some(existing) = state
            .mappings
            .iter_mut()
            .find(|m| m.entity_type == entity_type && m.local_id == local_id)
        {
            existing.external_id = external_id.to_string();
            existing.synced_utc = Utc::now();
            return Ok(existing.clone());
        }
        let mapping = EntityMapping {
            mapping_id: Uuid::new_v4(),
            entity_type,
            local_id,
            external_id: external_id.to_string(),
            synced_utc: Utc::now(),
        };
        state.mappings.push(mapping.clone());
        Ok(mapping)
    }
}

pub struct InMemoryTx {
    guard: OwnedMutexGuard<State>,
    working: State,
    faults: Arc<Faults>,
}

#[async_trait]
impl RepositoryTx for InMemoryTx {
    async fn advisory_lock(&mut self, _key: i64) -> Result<(), AppError> {
        self.faults.check("advisory_lock")
    }

    async fn max_sequence(&mut self, kind: SequenceKind, year: i32) -> Result<i32, AppError> {
        let numbers: Vec<&str> = match kind {
            SequenceKind::Invoice => self
                .working
                .invoices
                .iter()
                .map(|i| i.invoice_number.as_str())
                .collect(),
            SequenceKind::Payment => self
                .working
                .payments
                .iter()
                .map(|p| p.payment_number.as_str())
                .collect(),
        };
        Ok(numbers
            .into_iter()
            .filter_map(|n| kind.parse(n, year))
            .max()
            .unwrap_or(0))
    }

    async fn lock_invoice(&mut self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        self.faults.check("lock_invoice")?;
        Ok(self.working.invoice(invoice_id).cloned())
    }

    async fn insert_invoice(&mut self, input: &NewInvoice) -> Result<Invoice, AppError> {
        self.faults.check("insert_invoice")?;
        if self
            .working
            .invoices
            .iter()
            .any(|i| i.invoice_number == input.invoice_number)
        {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "duplicate invoice number {}",
                input.invoice_number
            )));
        }
        let now = Utc::now();
        let invoice = Invoice {
            invoice_id: input.invoice_id,
            invoice_number: input.invoice_number.clone(),
            invoice_type: input.invoice_type,
            order_id: input.order_id,
            production_order_id: input.production_order_id,
            project_id: input.project_id,
            customer_id: input.customer_id,
            subtotal: input.subtotal,
            tax: input.tax,
            shipping: input.shipping,
            total: input.total,
            amount_paid: Decimal::ZERO,
            amount_due: input.total,
            status: InvoiceStatus::PendingPayment,
            payment_terms: input.payment_terms.clone(),
            notes: None,
            due_date: input.due_date,
            paid_utc: None,
            cancelled_utc: None,
            created_by: input.created_by.clone(),
            created_utc: now,
            updated_utc: now,
        };
        invoice_money_columns(&invoice)?;
        self.working.invoices.push(invoice.clone());
        Ok(invoice)
    }

    async fn insert_line_items(
        &mut self,
        items: &[NewLineItem],
    ) -> Result<Vec<LineItem>, AppError> {
        self.faults.check("insert_line_items")?;
        let now = Utc::now();
        let rows: Vec<LineItem> = items
            .iter()
            .map(|item| LineItem {
                line_item_id: item.line_item_id,
                invoice_id: item.invoice_id,
                line_number: item.line_number,
                description: item.description.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                subtotal: item.subtotal,
                tax: item.tax,
                total: item.total,
                production_order_id: item.production_order_id,
                production_order_number: item.production_order_number.clone(),
                created_utc: now,
            })
            .collect();
        self.working.line_items.extend(rows.iter().cloned());
        Ok(rows)
    }

    async fn insert_payment(&mut self, input: &NewPayment) -> Result<Payment, AppError> {
        self.faults.check("insert_payment")?;
        money_column("amount", input.amount)?;
        if input.amount <= Decimal::ZERO {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "payment amount {} violates check constraint",
                input.amount
            )));
        }
        if self
            .working
            .payments
            .iter()
            .any(|p| p.payment_number == input.payment_number)
        {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "duplicate payment number {}",
                input.payment_number
            )));
        }
        let payment = Payment {
            payment_id: input.payment_id,
            payment_number: input.payment_number.clone(),
            invoice_id: input.invoice_id,
            amount: input.amount,
            payment_method: input.payment_method,
            transaction_id: input.transaction_id.clone(),
            notes: input.notes.clone(),
            status: PAYMENT_STATUS_COMPLETED.to_string(),
            payment_date: input.payment_date,
            created_by: input.created_by.clone(),
            created_utc: Utc::now(),
        };
        self.working.payments.push(payment.clone());
        Ok(payment)
    }

    async fn update_invoice(&mut self, invoice: &Invoice) -> Result<Invoice, AppError> {
        self.faults.check("update_invoice")?;
        invoice_money_columns(invoice)?;
        let slot = self
            .working
            .invoices
            .iter_mut()
            .find(|i| i.invoice_id == invoice.invoice_id)
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("Invoice {} not found", invoice.invoice_id))
            })?;
        *slot = invoice.clone();
        Ok(slot.clone())
    }

    async fn find_active_invoice_for_order(
        &mut self,
        order_id: Uuid,
        invoice_type: InvoiceType,
    ) -> Result<Option<Invoice>, AppError> {
        Ok(self
            .working
            .invoices
            .iter()
            .find(|i| {
                i.order_id == order_id
                    && i.invoice_type == invoice_type
                    && i.status != InvoiceStatus::Cancelled
            })
            .cloned())
    }

    async fn lock_production_orders_for_order(
        &mut self,
        order_id: Uuid,
    ) -> Result<Vec<ProductionOrder>, AppError> {
        self.faults.check("lock_production_orders_for_order")?;
        let mut orders: Vec<ProductionOrder> = self
            .working
            .production_orders
            .iter()
            .filter(|o| o.order_id == order_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| a.order_number.cmp(&b.order_number));
        Ok(orders)
    }

    async fn line_item_production_order_ids(
        &mut self,
        invoice_id: Uuid,
    ) -> Result<Vec<Uuid>, AppError> {
        let mut items: Vec<&LineItem> = self
            .working
            .line_items
            .iter()
            .filter(|li| li.invoice_id == invoice_id)
            .collect();
        items.sort_by_key(|li| li.line_number);
        let mut ids = Vec::new();
        for item in items {
            if !ids.contains(&item.production_order_id) {
                ids.push(item.production_order_id);
            }
        }
        Ok(ids)
    }

    async fn lock_production_order(
        &mut self,
        production_order_id: Uuid,
    ) -> Result<Option<ProductionOrder>, AppError> {
        Ok(self.working.production_order(production_order_id).cloned())
    }

    async fn update_production_order_payment(
        &mut self,
        production_order_id: Uuid,
        update: &ProductionOrderPaymentUpdate,
    ) -> Result<ProductionOrder, AppError> {
        self.faults.check("update_production_order_payment")?;
        let order = self
            .working
            .production_orders
            .iter_mut()
            .find(|o| o.production_order_id == production_order_id)
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!(
                    "Production order {} not found",
                    production_order_id
                ))
            })?;
        update.apply(order);
        order.updated_utc = Utc::now();
        Ok(order.clone())
    }

    async fn count_ordered_items(&mut self, production_order_id: Uuid) -> Result<i64, AppError> {
        Ok(self.working.units_for(production_order_id).len() as i64)
    }

    async fn insert_ordered_items(&mut self, items: &[NewOrderedItem]) -> Result<u64, AppError> {
        self.faults.check("insert_ordered_items")?;
        if items.len() * ORDERED_ITEM_COLUMNS > MAX_BIND_PARAMS {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "too many arguments for query: {}",
                items.len() * ORDERED_ITEM_COLUMNS
            )));
        }
        self.working.ordered_item_batches.push(items.len());
        let now = Utc::now();
        for item in items {
            let duplicate = self.working.ordered_items.iter().any(|u| {
                u.sku == item.sku
                    || (u.production_order_id == item.production_order_id
                        && u.item_number == item.item_number)
            });
            if duplicate {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "duplicate ordered item {}",
                    item.sku
                )));
            }
            self.working.ordered_items.push(OrderedItem {
                ordered_item_id: item.ordered_item_id,
                production_order_id: item.production_order_id,
                item_number: item.item_number,
                sku: item.sku.clone(),
                status: item.status.to_string(),
                qc_status: item.qc_status.to_string(),
                created_utc: now,
            });
        }
        Ok(items.len() as u64)
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let InMemoryTx {
            mut guard,
            working,
            faults,
        } = *self;
        faults.check("commit")?;
        *guard = working;
        Ok(())
    }
}

// =============================================================================
// Accounting client doubles
// =============================================================================

/// Accepts every push and remembers what it was sent, along with the access
/// token each push carried.
#[derive(Default)]
pub struct RecordingAccountingClient {
    pub invoices: StdMutex<Vec<InvoiceDocument>>,
    pub payments: StdMutex<Vec<PaymentDocument>>,
    pub access_tokens: StdMutex<Vec<String>>,
    pub refreshes: StdMutex<Vec<String>>,
    counter: AtomicU32,
}

impl RecordingAccountingClient {
    /// Refresh tokens that were exchanged, in order.
    pub fn refreshed_with(&self) -> Vec<String> {
        self.refreshes.lock().unwrap().clone()
    }

    pub fn access_tokens(&self) -> Vec<String> {
        self.access_tokens.lock().unwrap().clone()
    }

    pub fn invoice_pushes(&self) -> Vec<InvoiceDocument> {
        self.invoices.lock().unwrap().clone()
    }

    pub fn payment_pushes(&self) -> Vec<PaymentDocument> {
        self.payments.lock().unwrap().clone()
    }
}

#[async_trait]
impl AccountingClient for RecordingAccountingClient {
    async fn refresh_tokens(
        &self,
        _credentials: &AccountingCredentials,
        refresh_token: &str,
    ) -> Result<AccountingTokens, SyncError> {
        let mut refreshes = self.refreshes.lock().unwrap();
        refreshes.push(refresh_token.to_string());
        let n = refreshes.len();
        Ok(AccountingTokens {
            access_token: format!("refreshed-access-{}", n),
            refresh_token: Some(format!("refreshed-refresh-{}", n)),
            expires_utc: Some(Utc::now() + ChronoDuration::hours(1)),
        })
    }

    async fn push_invoice(
        &self,
        credentials: &AccountingCredentials,
        invoice: &InvoiceDocument,
    ) -> Result<String, SyncError> {
        self.access_tokens
            .lock()
            .unwrap()
            .push(credentials.access_token.clone());
        self.invoices.lock().unwrap().push(invoice.clone());
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("qb-inv-{}", n))
    }

    async fn push_payment(
        &self,
        credentials: &AccountingCredentials,
        payment: &PaymentDocument,
    ) -> Result<String, SyncError> {
        self.access_tokens
            .lock()
            .unwrap()
            .push(credentials.access_token.clone());
        self.payments.lock().unwrap().push(payment.clone());
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("qb-pay-{}", n))
    }
}

/// Rejects every push as the remote API would on bad input.
pub struct FailingAccountingClient;

#[async_trait]
impl AccountingClient for FailingAccountingClient {
    async fn refresh_tokens(
        &self,
        _credentials: &AccountingCredentials,
        _refresh_token: &str,
    ) -> Result<AccountingTokens, SyncError> {
        Err(SyncError::Rejected {
            status: 400,
            body: "invalid_grant".to_string(),
        })
    }

    async fn push_invoice(
        &self,
        _credentials: &AccountingCredentials,
        _invoice: &InvoiceDocument,
    ) -> Result<String, SyncError> {
        Err(SyncError::Rejected {
            status: 400,
            body: "ValidationFault".to_string(),
        })
    }

    async fn push_payment(
        &self,
        _credentials: &AccountingCredentials,
        _payment: &PaymentDocument,
    ) -> Result<String, SyncError> {
        Err(SyncError::Rejected {
            status: 400,
            body: "ValidationFault".to_string(),
        })
    }
}

// =============================================================================
// Service harness
// =============================================================================

/// Invoice service over an in-memory repository. Sync jobs land in `sync_rx`
/// instead of a worker so tests can inspect them.
pub struct TestContext {
    pub repo: InMemoryRepository,
    pub service: InvoiceService,
    pub sync_rx: mpsc::Receiver<SyncJob>,
}

impl TestContext {
    pub fn new() -> Self {
        init_tracing();
        init_metrics();
        let repo = InMemoryRepository::new();
        let (queue, sync_rx) = SyncQueue::channel(64);
        let service = InvoiceService::new(Arc::new(repo.clone()), queue);
        Self {
            repo,
            service,
            sync_rx,
        }
    }

    /// Seed one production order for a fresh commercial order.
    pub async fn seed_single(&self, quantity: i32, unit_price: &str) -> ProductionOrder {
        self.repo
            .seed_production_order(Uuid::new_v4(), "PO-1001", quantity, unit_price)
            .await
    }

    pub fn drain_sync_jobs(&mut self) -> Vec<SyncJob> {
        let mut jobs = Vec::new();
        while let Ok(job) = self.sync_rx.try_recv() {
            jobs.push(job);
        }
        jobs
    }
}

/// gRPC server on a random local port, backed by an in-memory repository.
pub struct TestServer {
    pub repo: InMemoryRepository,
    pub grpc_address: String,
    pub sync_rx: mpsc::Receiver<SyncJob>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        init_tracing();
        init_metrics();
        let repo = InMemoryRepository::new();
        let (queue, sync_rx) = SyncQueue::channel(64);
        let service = InvoiceService::new(Arc::new(repo.clone()), queue);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind gRPC listener");
        let grpc_address = format!("http://{}", listener.local_addr().unwrap());

        let svc = ProductionInvoicingServiceServer::with_interceptor(
            ProductionInvoicingServiceImpl::new(service),
            trace_context_interceptor,
        );
        tokio::spawn(async move {
            tonic::transport::Server::builder()
                .add_service(svc)
                .serve_with_incoming(tokio_stream::wrappers::TcpListenerStream::new(listener))
                .await
                .ok();
        });

        TestServer {
            repo,
            grpc_address,
            sync_rx,
        }
    }

    pub async fn grpc_client(&self) -> ProductionInvoicingServiceClient<Channel> {
        for _ in 0..50 {
            if let Ok(client) =
                ProductionInvoicingServiceClient::connect(self.grpc_address.clone()).await
            {
                return client;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("Failed to connect to gRPC server at {}", self.grpc_address);
    }
}
