use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::client::{AccountingClient, InvoiceDocument, PaymentDocument};
use super::SyncError;
use crate::models::{AccountingCredentials, EntityType};
use crate::services::metrics::{ERRORS_TOTAL, SYNC_TOTAL};
use crate::services::repository::InvoiceRepository;

/// Mirror an invoice and, optionally, one of its payments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncJob {
    pub invoice_id: Uuid,
    pub payment_id: Option<Uuid>,
}

impl SyncJob {
    pub fn invoice(invoice_id: Uuid) -> Self {
        Self {
            invoice_id,
            payment_id: None,
        }
    }

    pub fn payment(invoice_id: Uuid, payment_id: Uuid) -> Self {
        Self {
            invoice_id,
            payment_id: Some(payment_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// No client configured or no active credentials.
    Skipped(&'static str),
    /// Entities pushed now and entities that were already mapped.
    Completed { pushed: usize, already_mapped: usize },
}

pub struct SyncAdapter {
    repo: Arc<dyn InvoiceRepository>,
    client: Option<Arc<dyn AccountingClient>>,
}

impl SyncAdapter {
    pub fn new(repo: Arc<dyn InvoiceRepository>, client: Option<Arc<dyn AccountingClient>>) -> Self {
        Self { repo, client }
    }

    /// Run `job`, swallowing every failure after logging and counting it.
    pub async fn try_sync(&self, job: SyncJob) {
        match self.sync(job).await {
            Ok(SyncOutcome::Skipped(reason)) => {
                debug!(invoice_id = %job.invoice_id, reason = reason, "Accounting sync skipped");
            }
            Ok(SyncOutcome::Completed {
                pushed,
                already_mapped,
            }) => {
                debug!(
                    invoice_id = %job.invoice_id,
                    pushed = pushed,
                    already_mapped = already_mapped,
                    "Accounting sync finished"
                );
            }
            Err(e) => {
                warn!(
                    invoice_id = %job.invoice_id,
                    payment_id = ?job.payment_id,
                    error = %e,
                    "Accounting sync failed"
                );
                SYNC_TOTAL.with_label_values(&["job", "failed"]).inc();
                ERRORS_TOTAL.with_label_values(&["sync_error"]).inc();
            }
        }
    }

    #[instrument(skip(self), fields(invoice_id = %job.invoice_id))]
    pub async fn sync(&self, job: SyncJob) -> Result<SyncOutcome, SyncError> {
        let Some(client) = self.client.as_deref() else {
            SYNC_TOTAL.with_label_values(&["job", "skipped"]).inc();
            return Ok(SyncOutcome::Skipped("accounting client not configured"));
        };

        let Some(credentials) = self.repo.active_accounting_credentials().await? else {
            SYNC_TOTAL.with_label_values(&["job", "skipped"]).inc();
            return Ok(SyncOutcome::Skipped("no active accounting credentials"));
        };

        let credentials = if credentials.is_expired(Utc::now()) {
            self.refresh(client, credentials).await?
        } else {
            credentials
        };

        let mut pushed = 0;
        let mut already_mapped = 0;

        let (invoice_external_id, invoice_pushed) =
            self.ensure_invoice(client, &credentials, job.invoice_id).await?;
        if invoice_pushed {
            pushed += 1;
        } else {
            already_mapped += 1;
        }

        if let Some(payment_id) = job.payment_id {
            if self
                .ensure_payment(client, &credentials, payment_id, &invoice_external_id)
                .await?
            {
                pushed += 1;
            } else {
                already_mapped += 1;
            }
        }

        Ok(SyncOutcome::Completed {
            pushed,
            already_mapped,
        })
    }

    /// Exchange the refresh token of expired `credentials` and store the new
    /// pair. Without a refresh token the job fails with `CredentialsExpired`.
    async fn refresh(
        &self,
        client: &dyn AccountingClient,
        credentials: AccountingCredentials,
    ) -> Result<AccountingCredentials, SyncError> {
        let Some(refresh_token) = credentials.refresh_token.as_deref() else {
            return Err(SyncError::CredentialsExpired);
        };

        let tokens = client.refresh_tokens(&credentials, refresh_token).await?;
        let refreshed = self
            .repo
            .update_accounting_tokens(credentials.credential_id, &tokens)
            .await?;

        SYNC_TOTAL.with_label_values(&["credentials", "refreshed"]).inc();
        info!(
            credential_id = %refreshed.credential_id,
            realm_id = %refreshed.realm_id,
            expires_utc = ?refreshed.expires_utc,
            "Accounting tokens refreshed"
        );

        Ok(refreshed)
    }

    /// External id of the invoice, pushing it first if it has none. The flag
    /// says whether a push happened.
    async fn ensure_invoice(
        &self,
        client: &dyn AccountingClient,
        credentials: &AccountingCredentials,
        invoice_id: Uuid,
    ) -> Result<(String, bool), SyncError> {
        if let Some(mapping) = self
            .repo
            .get_entity_mapping(EntityType::Invoice, invoice_id)
            .await?
        {
            SYNC_TOTAL
                .with_label_values(&[EntityType::Invoice.as_str(), "already_mapped"])
                .inc();
            return Ok((mapping.external_id, false));
        }

        let invoice = self
            .repo
            .get_invoice(invoice_id)
            .await?
            .ok_or(SyncError::MissingEntity {
                entity_type: EntityType::Invoice,
                id: invoice_id,
            })?;
        let line_items = self.repo.get_line_items(invoice_id).await?;

        let external_id = client
            .push_invoice(credentials, &InvoiceDocument::new(&invoice, &line_items))
            .await?;
        self.repo
            .save_entity_mapping(EntityType::Invoice, invoice_id, &external_id)
            .await?;

        SYNC_TOTAL
            .with_label_values(&[EntityType::Invoice.as_str(), "synced"])
            .inc();
        info!(
            invoice_number = %invoice.invoice_number,
            external_id = %external_id,
            "Invoice synced to accounting"
        );

        Ok((external_id, true))
    }

    async fn ensure_payment(
        &self,
        client: &dyn AccountingClient,
        credentials: &AccountingCredentials,
        payment_id: Uuid,
        invoice_external_id: &str,
    ) -> Result<bool, SyncError> {
        if self
            .repo
            .get_entity_mapping(EntityType::Payment, payment_id)
            .await?
            .is_some()
        {
            SYNC_TOTAL
                .with_label_values(&[EntityType::Payment.as_str(), "already_mapped"])
                .inc();
            return Ok(false);
        }

        let payment = self
            .repo
            .get_payment(payment_id)
            .await?
            .ok_or(SyncError::MissingEntity {
                entity_type: EntityType::Payment,
                id: payment_id,
            })?;

        let external_id = client
            .push_payment(
                credentials,
                &PaymentDocument::new(&payment, invoice_external_id),
            )
            .await?;
        self.repo
            .save_entity_mapping(EntityType::Payment, payment_id, &external_id)
            .await?;

        SYNC_TOTAL
            .with_label_values(&[EntityType::Payment.as_str(), "synced"])
            .inc();
        info!(
            payment_number = %payment.payment_number,
            external_id = %external_id,
            "Payment synced to accounting"
        );

        Ok(true)
    }
}
