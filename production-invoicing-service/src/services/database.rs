//! Postgres repository for production-invoicing-service.

use async_trait::async_trait;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder, Transaction};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::models::{
    AccountingCredentials, AccountingTokens, EntityMapping, EntityType, Invoice, InvoicePage,
    InvoiceStatus, InvoiceType, LineItem, ListInvoicesFilter, NewInvoice, NewLineItem,
    NewOrderedItem, NewPayment, OrderedItem, OutstandingInvoicesFilter, Payment, ProductionOrder,
    ProductionOrderPaymentUpdate, PAYMENT_STATUS_COMPLETED,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::repository::{InvoiceRepository, RepositoryTx};
use crate::services::sequence::SequenceKind;

const INVOICE_COLUMNS: &str = r#"
    invoice_id, invoice_number, invoice_type, order_id, production_order_id, project_id,
    customer_id, subtotal, tax, shipping, total, amount_paid, amount_due, status,
    payment_terms, notes, due_date, paid_utc, cancelled_utc, created_by, created_utc, updated_utc
"#;

const PRODUCTION_ORDER_COLUMNS: &str = r#"
    production_order_id, order_number, order_id, project_id, customer_id, item_name, quantity,
    unit_price, total_cost, deposit_paid, final_payment_paid, status, created_utc, updated_utc
"#;

const PAYMENT_COLUMNS: &str = r#"
    payment_id, payment_number, invoice_id, amount, payment_method, transaction_id, notes,
    status, payment_date, created_by, created_utc
"#;

/// Connection pool backed repository.
#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "production-invoicing-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl InvoiceRepository for PgRepository {
    async fn begin(&self) -> Result<Box<dyn RepositoryTx>, AppError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::from_sqlx("Failed to begin transaction", e))?;
        Ok(Box::new(PgRepositoryTx { tx }))
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {} FROM production_invoices WHERE invoice_id = $1",
            INVOICE_COLUMNS
        ))
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::from_sqlx("Failed to get invoice", e))?;

        timer.observe_duration();

        Ok(invoice)
    }

    #[instrument(skip(self, filter))]
    async fn list_invoices(&self, filter: &ListInvoicesFilter) -> Result<InvoicePage, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices"])
            .start_timer();

        let status = filter.status.map(|s| s.as_str());
        let invoice_type = filter.invoice_type.map(|t| t.as_str());
        let where_clause = r#"
            WHERE ($1::varchar IS NULL OR i.status = $1)
              AND ($2::varchar IS NULL OR i.invoice_type = $2)
              AND ($3::uuid IS NULL OR i.production_order_id = $3 OR EXISTS (
                    SELECT 1 FROM production_invoice_line_items li
                    WHERE li.invoice_id = i.invoice_id AND li.production_order_id = $3))
              AND ($4::uuid IS NULL OR i.project_id = $4)
        "#;

        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {} FROM production_invoices i {} ORDER BY i.created_utc DESC, i.invoice_number DESC LIMIT $5 OFFSET $6",
            INVOICE_COLUMNS, where_clause
        ))
        .bind(status)
        .bind(invoice_type)
        .bind(filter.production_order_id)
        .bind(filter.project_id)
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::from_sqlx("Failed to list invoices", e))?;

        let total = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM production_invoices i {}",
            where_clause
        ))
        .bind(status)
        .bind(invoice_type)
        .bind(filter.production_order_id)
        .bind(filter.project_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::from_sqlx("Failed to count invoices", e))?;

        timer.observe_duration();

        Ok(InvoicePage { invoices, total })
    }

    #[instrument(skip(self), fields(production_order_id = %production_order_id))]
    async fn list_invoices_for_production_order(
        &self,
        production_order_id: Uuid,
    ) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices_for_production_order"])
            .start_timer();

        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            SELECT {} FROM production_invoices i
            WHERE i.production_order_id = $1
               OR EXISTS (
                    SELECT 1 FROM production_invoice_line_items li
                    WHERE li.invoice_id = i.invoice_id AND li.production_order_id = $1)
            ORDER BY i.created_utc DESC, i.invoice_number DESC
            "#,
            INVOICE_COLUMNS
        ))
        .bind(production_order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::from_sqlx("Failed to list invoices for production order", e))?;

        timer.observe_duration();

        Ok(invoices)
    }

    #[instrument(skip(self, filter))]
    async fn list_outstanding_invoices(
        &self,
        filter: &OutstandingInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_outstanding_invoices"])
            .start_timer();

        let statuses: Vec<&str> = InvoiceStatus::OUTSTANDING
            .iter()
            .map(|s| s.as_str())
            .collect();

        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            SELECT {} FROM production_invoices
            WHERE status = ANY($1)
              AND ($2::uuid IS NULL OR project_id = $2)
              AND ($3::uuid IS NULL OR customer_id = $3)
            ORDER BY due_date ASC NULLS LAST, created_utc ASC
            "#,
            INVOICE_COLUMNS
        ))
        .bind(statuses)
        .bind(filter.project_id)
        .bind(filter.customer_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::from_sqlx("Failed to list outstanding invoices", e))?;

        timer.observe_duration();

        Ok(invoices)
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn get_line_items(&self, invoice_id: Uuid) -> Result<Vec<LineItem>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_line_items"])
            .start_timer();

        let items = sqlx::query_as::<_, LineItem>(
            r#"
            SELECT line_item_id, invoice_id, line_number, description, quantity, unit_price,
                subtotal, tax, total, production_order_id, production_order_number, created_utc
            FROM production_invoice_line_items
            WHERE invoice_id = $1
            ORDER BY line_number
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::from_sqlx("Failed to get line items", e))?;

        timer.observe_duration();

        Ok(items)
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn list_payments(&self, invoice_id: Uuid) -> Result<Vec<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_payments"])
            .start_timer();

        let payments = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM production_payments WHERE invoice_id = $1 ORDER BY created_utc DESC, payment_number DESC",
            PAYMENT_COLUMNS
        ))
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::from_sqlx("Failed to list payments", e))?;

        timer.observe_duration();

        Ok(payments)
    }

    #[instrument(skip(self), fields(payment_id = %payment_id))]
    async fn get_payment(&self, payment_id: Uuid) -> Result<Option<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_payment"])
            .start_timer();

        let payment = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM production_payments WHERE payment_id = $1",
            PAYMENT_COLUMNS
        ))
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::from_sqlx("Failed to get payment", e))?;

        timer.observe_duration();

        Ok(payment)
    }

    #[instrument(skip(self), fields(production_order_id = %production_order_id))]
    async fn get_production_order(
        &self,
        production_order_id: Uuid,
    ) -> Result<Option<ProductionOrder>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_production_order"])
            .start_timer();

        let order = sqlx::query_as::<_, ProductionOrder>(&format!(
            "SELECT {} FROM production_orders WHERE production_order_id = $1",
            PRODUCTION_ORDER_COLUMNS
        ))
        .bind(production_order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::from_sqlx("Failed to get production order", e))?;

        timer.observe_duration();

        Ok(order)
    }

    #[instrument(skip(self), fields(production_order_id = %production_order_id))]
    async fn list_ordered_items(
        &self,
        production_order_id: Uuid,
    ) -> Result<Vec<OrderedItem>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_ordered_items"])
            .start_timer();

        let items = sqlx::query_as::<_, OrderedItem>(
            r#"
            SELECT ordered_item_id, production_order_id, item_number, sku, status, qc_status, created_utc
            FROM ordered_items_production
            WHERE production_order_id = $1
            ORDER BY item_number
            "#,
        )
        .bind(production_order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::from_sqlx("Failed to list ordered items", e))?;

        timer.observe_duration();

        Ok(items)
    }

    #[instrument(skip(self))]
    async fn active_accounting_credentials(
        &self,
    ) -> Result<Option<AccountingCredentials>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["active_accounting_credentials"])
            .start_timer();

        let credentials = sqlx::query_as::<_, AccountingCredentials>(
            r#"
            SELECT credential_id, provider, realm_id, access_token, refresh_token, expires_utc,
                is_active, created_utc
            FROM accounting_credentials
            WHERE is_active
            ORDER BY created_utc DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::from_sqlx("Failed to load accounting credentials", e))?;

        timer.observe_duration();

        Ok(credentials)
    }

    #[instrument(skip(self, tokens), fields(credential_id = %credential_id))]
    async fn update_accounting_tokens(
        &self,
        credential_id: Uuid,
        tokens: &AccountingTokens,
    ) -> Result<AccountingCredentials, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_accounting_tokens"])
            .start_timer();

        let credentials = sqlx::query_as::<_, AccountingCredentials>(
            r#"
            UPDATE accounting_credentials
            SET access_token = $2,
                refresh_token = COALESCE($3, refresh_token),
                expires_utc = $4
            WHERE credential_id = $1
            RETURNING credential_id, provider, realm_id, access_token, refresh_token, expires_utc,
                is_active, created_utc
            "#,
        )
        .bind(credential_id)
        .bind(&tokens.access_token)
        .bind(tokens.refresh_token.as_deref())
        .bind(tokens.expires_utc)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::from_sqlx("Failed to update accounting tokens", e))?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "Accounting credentials {} not found",
                credential_id
            ))
        })?;

        timer.observe_duration();

        Ok(credentials)
    }

    #[instrument(skip(self), fields(entity_type = %entity_type, local_id = %local_id))]
    async fn get_entity_mapping(
        &self,
        entity_type: EntityType,
        local_id: Uuid,
    ) -> Result<Option<EntityMapping>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_entity_mapping"])
            .start_timer();

        let mapping = sqlx::query_as::<_, EntityMapping>(
            r#"
            SELECT mapping_id, entity_type, local_id, external_id, synced_utc
            FROM accounting_entity_mappings
            WHERE entity_type = $1 AND local_id = $2
            "#,
        )
        .bind(entity_type.as_str())
        .bind(local_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::from_sqlx("Failed to get entity mapping", e))?;

        timer.observe_duration();

        Ok(mapping)
    }

    #[instrument(skip(self), fields(entity_type = %entity_type, local_id = %local_id))]
    async fn save_entity_mapping(
        &self,
        entity_type: EntityType,
        local_id: Uuid,
        external_id: &str,
    ) -> Result<EntityMapping, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["save_entity_mapping"])
            .start_timer();

        let mapping = sqlx::query_as::<_, EntityMapping>(
            r#"
            INSERT INTO accounting_entity_mappings (mapping_id, entity_type, local_id, external_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (entity_type, local_id)
            DO UPDATE SET external_id = EXCLUDED.external_id, synced_utc = NOW()
            RETURNING mapping_id, entity_type, local_id, external_id, synced_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(entity_type.as_str())
        .bind(local_id)
        .bind(external_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::from_sqlx("Failed to save entity mapping", e))?;

        timer.observe_duration();

        Ok(mapping)
    }
}

/// A Postgres transaction. Dropping it without `commit` rolls back.
pub struct PgRepositoryTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl RepositoryTx for PgRepositoryTx {
    async fn advisory_lock(&mut self, key: i64) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["advisory_lock"])
            .start_timer();

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(key)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| AppError::from_sqlx("Failed to acquire sequence lock", e))?;

        timer.observe_duration();

        Ok(())
    }

    async fn max_sequence(&mut self, kind: SequenceKind, year: i32) -> Result<i32, AppError> {
        let (table, column) = match kind {
            SequenceKind::Invoice => ("production_invoices", "invoice_number"),
            SequenceKind::Payment => ("production_payments", "payment_number"),
        };

        let max = sqlx::query_scalar::<_, i32>(&format!(
            "SELECT COALESCE(MAX(CAST(SPLIT_PART({column}, '-', 3) AS INTEGER)), 0) FROM {table} WHERE {column} ~ $1"
        ))
        .bind(kind.pattern(year))
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| AppError::from_sqlx("Failed to read sequence", e))?;

        Ok(max)
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn lock_invoice(&mut self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["lock_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {} FROM production_invoices WHERE invoice_id = $1 FOR UPDATE",
            INVOICE_COLUMNS
        ))
        .bind(invoice_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| AppError::from_sqlx("Failed to lock invoice", e))?;

        timer.observe_duration();

        Ok(invoice)
    }

    #[instrument(skip(self, input), fields(invoice_number = %input.invoice_number))]
    async fn insert_invoice(&mut self, input: &NewInvoice) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            INSERT INTO production_invoices (
                invoice_id, invoice_number, invoice_type, order_id, production_order_id, project_id,
                customer_id, subtotal, tax, shipping, total, amount_paid, amount_due, status,
                payment_terms, due_date, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 0, $11, $12, $13, $14, $15)
            RETURNING {}
            "#,
            INVOICE_COLUMNS
        ))
        .bind(input.invoice_id)
        .bind(&input.invoice_number)
        .bind(input.invoice_type.as_str())
        .bind(input.order_id)
        .bind(input.production_order_id)
        .bind(input.project_id)
        .bind(input.customer_id)
        .bind(input.subtotal)
        .bind(input.tax)
        .bind(input.shipping)
        .bind(input.total)
        .bind(InvoiceStatus::PendingPayment.as_str())
        .bind(&input.payment_terms)
        .bind(input.due_date)
        .bind(&input.created_by)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| AppError::from_sqlx("Failed to create invoice", e))?;

        timer.observe_duration();

        Ok(invoice)
    }

    async fn insert_line_items(
        &mut self,
        items: &[NewLineItem],
    ) -> Result<Vec<LineItem>, AppError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_line_items"])
            .start_timer();

        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO production_invoice_line_items (line_item_id, invoice_id, line_number, \
             description, quantity, unit_price, subtotal, tax, total, production_order_id, \
             production_order_number) ",
        );
        builder.push_values(items, |mut row, item| {
            row.push_bind(item.line_item_id)
                .push_bind(item.invoice_id)
                .push_bind(item.line_number)
                .push_bind(&item.description)
                .push_bind(item.quantity)
                .push_bind(item.unit_price)
                .push_bind(item.subtotal)
                .push_bind(item.tax)
                .push_bind(item.total)
                .push_bind(item.production_order_id)
                .push_bind(&item.production_order_number);
        });
        builder.push(
            " RETURNING line_item_id, invoice_id, line_number, description, quantity, unit_price, \
             subtotal, tax, total, production_order_id, production_order_number, created_utc",
        );

        let mut inserted = builder
            .build_query_as::<LineItem>()
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| AppError::from_sqlx("Failed to create line items", e))?;
        inserted.sort_by_key(|item| item.line_number);

        timer.observe_duration();

        Ok(inserted)
    }

    #[instrument(skip(self, input), fields(payment_number = %input.payment_number))]
    async fn insert_payment(&mut self, input: &NewPayment) -> Result<Payment, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_payment"])
            .start_timer();

        let payment = sqlx::query_as::<_, Payment>(&format!(
            r#"
            INSERT INTO production_payments (
                payment_id, payment_number, invoice_id, amount, payment_method, transaction_id,
                notes, status, payment_date, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {}
            "#,
            PAYMENT_COLUMNS
        ))
        .bind(input.payment_id)
        .bind(&input.payment_number)
        .bind(input.invoice_id)
        .bind(input.amount)
        .bind(input.payment_method.as_str())
        .bind(&input.transaction_id)
        .bind(&input.notes)
        .bind(PAYMENT_STATUS_COMPLETED)
        .bind(input.payment_date)
        .bind(&input.created_by)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| AppError::from_sqlx("Failed to record payment", e))?;

        timer.observe_duration();

        Ok(payment)
    }

    #[instrument(skip(self, invoice), fields(invoice_id = %invoice.invoice_id, status = %invoice.status))]
    async fn update_invoice(&mut self, invoice: &Invoice) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_invoice"])
            .start_timer();

        let updated = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE production_invoices
            SET amount_paid = $2,
                amount_due = $3,
                status = $4,
                payment_terms = $5,
                notes = $6,
                due_date = $7,
                paid_utc = $8,
                cancelled_utc = $9,
                updated_utc = $10
            WHERE invoice_id = $1
            RETURNING {}
            "#,
            INVOICE_COLUMNS
        ))
        .bind(invoice.invoice_id)
        .bind(invoice.amount_paid)
        .bind(invoice.amount_due)
        .bind(invoice.status.as_str())
        .bind(&invoice.payment_terms)
        .bind(&invoice.notes)
        .bind(invoice.due_date)
        .bind(invoice.paid_utc)
        .bind(invoice.cancelled_utc)
        .bind(invoice.updated_utc)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| AppError::from_sqlx("Failed to update invoice", e))?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Invoice {} not found", invoice.invoice_id))
        })?;

        timer.observe_duration();

        Ok(updated)
    }

    async fn find_active_invoice_for_order(
        &mut self,
        order_id: Uuid,
        invoice_type: InvoiceType,
    ) -> Result<Option<Invoice>, AppError> {
        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            SELECT {} FROM production_invoices
            WHERE order_id = $1 AND invoice_type = $2 AND status <> $3
            ORDER BY created_utc
            LIMIT 1
            "#,
            INVOICE_COLUMNS
        ))
        .bind(order_id)
        .bind(invoice_type.as_str())
        .bind(InvoiceStatus::Cancelled.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| AppError::from_sqlx("Failed to look up existing invoice", e))?;

        Ok(invoice)
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    async fn lock_production_orders_for_order(
        &mut self,
        order_id: Uuid,
    ) -> Result<Vec<ProductionOrder>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["lock_production_orders_for_order"])
            .start_timer();

        let orders = sqlx::query_as::<_, ProductionOrder>(&format!(
            "SELECT {} FROM production_orders WHERE order_id = $1 ORDER BY order_number FOR UPDATE",
            PRODUCTION_ORDER_COLUMNS
        ))
        .bind(order_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| AppError::from_sqlx("Failed to load production orders", e))?;

        timer.observe_duration();

        Ok(orders)
    }

    async fn line_item_production_order_ids(
        &mut self,
        invoice_id: Uuid,
    ) -> Result<Vec<Uuid>, AppError> {
        let rows = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT production_order_id
            FROM production_invoice_line_items
            WHERE invoice_id = $1
            ORDER BY line_number
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| AppError::from_sqlx("Failed to read line item orders", e))?;

        let mut ids: Vec<Uuid> = Vec::with_capacity(rows.len());
        for id in rows {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    async fn lock_production_order(
        &mut self,
        production_order_id: Uuid,
    ) -> Result<Option<ProductionOrder>, AppError> {
        let order = sqlx::query_as::<_, ProductionOrder>(&format!(
            "SELECT {} FROM production_orders WHERE production_order_id = $1 FOR UPDATE",
            PRODUCTION_ORDER_COLUMNS
        ))
        .bind(production_order_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| AppError::from_sqlx("Failed to lock production order", e))?;

        Ok(order)
    }

    #[instrument(skip(self, update), fields(production_order_id = %production_order_id, status = %update.status))]
    async fn update_production_order_payment(
        &mut self,
        production_order_id: Uuid,
        update: &ProductionOrderPaymentUpdate,
    ) -> Result<ProductionOrder, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_production_order_payment"])
            .start_timer();

        let order = sqlx::query_as::<_, ProductionOrder>(&format!(
            r#"
            UPDATE production_orders
            SET deposit_paid = COALESCE($2, deposit_paid),
                final_payment_paid = COALESCE($3, final_payment_paid),
                status = $4,
                updated_utc = NOW()
            WHERE production_order_id = $1
            RETURNING {}
            "#,
            PRODUCTION_ORDER_COLUMNS
        ))
        .bind(production_order_id)
        .bind(update.deposit_paid)
        .bind(update.final_payment_paid)
        .bind(update.status.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| AppError::from_sqlx("Failed to update production order", e))?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "Production order {} not found",
                production_order_id
            ))
        })?;

        timer.observe_duration();

        Ok(order)
    }

    async fn count_ordered_items(&mut self, production_order_id: Uuid) -> Result<i64, AppError> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM ordered_items_production WHERE production_order_id = $1",
        )
        .bind(production_order_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| AppError::from_sqlx("Failed to count ordered items", e))
    }

    async fn insert_ordered_items(&mut self, items: &[NewOrderedItem]) -> Result<u64, AppError> {
        if items.is_empty() {
            return Ok(0);
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_ordered_items"])
            .start_timer();

        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO ordered_items_production (ordered_item_id, production_order_id, \
             item_number, sku, status, qc_status) ",
        );
        builder.push_values(items, |mut row, item| {
            row.push_bind(item.ordered_item_id)
                .push_bind(item.production_order_id)
                .push_bind(item.item_number)
                .push_bind(&item.sku)
                .push_bind(item.status)
                .push_bind(item.qc_status);
        });

        let result = builder
            .build()
            .execute(&mut *self.tx)
            .await
            .map_err(|e| AppError::from_sqlx("Failed to create ordered items", e))?;

        timer.observe_duration();

        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.tx
            .commit()
            .await
            .map_err(|e| AppError::from_sqlx("Failed to commit transaction", e))
    }
}
