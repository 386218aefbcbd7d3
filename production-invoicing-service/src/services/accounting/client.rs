use std::time::Duration;

use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use chrono::{NaiveDate, Utc};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use service_core::observability::inject_trace_headers;
use tracing::{debug, instrument};

use super::SyncError;
use crate::models::{AccountingCredentials, AccountingTokens, Invoice, LineItem, Payment};

/// Invoice as sent to the accounting system.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceDocument {
    pub doc_number: String,
    pub invoice_type: String,
    pub customer_ref: Option<String>,
    pub txn_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub lines: Vec<InvoiceLineDocument>,
    pub shipping: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub private_note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceLineDocument {
    pub line_number: i32,
    pub description: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub amount: Decimal,
}

impl InvoiceDocument {
    pub fn new(invoice: &Invoice, line_items: &[LineItem]) -> Self {
        Self {
            doc_number: invoice.invoice_number.clone(),
            invoice_type: invoice.invoice_type.as_str().to_string(),
            customer_ref: invoice.customer_id.map(|id| id.to_string()),
            txn_date: invoice.created_utc.date_naive(),
            due_date: invoice.due_date,
            lines: line_items
                .iter()
                .map(|item| InvoiceLineDocument {
                    line_number: item.line_number,
                    description: item.description.clone(),
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    amount: item.total,
                })
                .collect(),
            shipping: invoice.shipping,
            tax: invoice.tax,
            total: invoice.total,
            private_note: invoice.notes.clone(),
        }
    }
}

/// Payment as sent to the accounting system, linked to the mirrored invoice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentDocument {
    pub payment_ref: String,
    pub invoice_external_id: String,
    pub amount: Decimal,
    pub payment_method: String,
    pub txn_date: NaiveDate,
    pub reference: Option<String>,
}

impl PaymentDocument {
    pub fn new(payment: &Payment, invoice_external_id: &str) -> Self {
        Self {
            payment_ref: payment.payment_number.clone(),
            invoice_external_id: invoice_external_id.to_string(),
            amount: payment.amount,
            payment_method: payment.payment_method.as_str().to_string(),
            txn_date: payment.payment_date,
            reference: payment.transaction_id.clone(),
        }
    }
}

/// Operations against the accounting system. Pushes return the id the remote
/// side assigned.
#[async_trait]
pub trait AccountingClient: Send + Sync {
    /// Exchange the refresh token for a new token pair.
    async fn refresh_tokens(
        &self,
        credentials: &AccountingCredentials,
        refresh_token: &str,
    ) -> Result<AccountingTokens, SyncError>;

    async fn push_invoice(
        &self,
        credentials: &AccountingCredentials,
        invoice: &InvoiceDocument,
    ) -> Result<String, SyncError>;

    async fn push_payment(
        &self,
        credentials: &AccountingCredentials,
        payment: &PaymentDocument,
    ) -> Result<String, SyncError>;
}

#[derive(Debug, Deserialize)]
struct CreatedEntity {
    id: String,
}

#[derive(Serialize)]
struct RefreshGrant<'a> {
    grant_type: &'static str,
    refresh_token: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    /// Lifetime of the access token in seconds.
    expires_in: Option<i64>,
}

/// REST client with bearer auth. Timeouts, connection errors, 429 and 5xx
/// are retried with exponential backoff; other failures are final.
pub struct HttpAccountingClient {
    http: reqwest::Client,
    base_url: String,
    max_retry: Duration,
}

impl HttpAccountingClient {
    pub fn new(base_url: &str, timeout: Duration, max_retry: Duration) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_retry,
        })
    }

    fn url(&self, credentials: &AccountingCredentials, resource: &str) -> String {
        format!(
            "{}/v1/realms/{}/{}",
            self.base_url, credentials.realm_id, resource
        )
    }

    async fn create<T: Serialize + Sync>(
        &self,
        credentials: &AccountingCredentials,
        resource: &str,
        body: &T,
    ) -> Result<String, SyncError> {
        let url = self.url(credentials, resource);
        let created: CreatedEntity = self
            .post(&url, Some(&credentials.access_token), body)
            .await?;
        Ok(created.id)
    }

    async fn post<T: Serialize + Sync, R: DeserializeOwned + Send>(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: &T,
    ) -> Result<R, SyncError> {
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.max_retry),
            ..Default::default()
        };

        retry(backoff, || async {
            let mut request = self
                .http
                .post(url)
                .headers(inject_trace_headers(None))
                .json(body);
            if let Some(token) = bearer {
                request = request.bearer_auth(token);
            }
            let response = request.send().await.map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    debug!(error = %e, url = %url, "Accounting request failed, retrying");
                    backoff::Error::transient(SyncError::Transport(e))
                } else {
                    backoff::Error::permanent(SyncError::Transport(e))
                }
            })?;

            let status = response.status();
            if status.is_success() {
                return response.json::<R>().await.map_err(|e| {
                    backoff::Error::permanent(SyncError::InvalidResponse(e.to_string()))
                });
            }

            let body = response.text().await.unwrap_or_default();
            let err = SyncError::Rejected {
                status: status.as_u16(),
                body,
            };
            if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                debug!(status = status.as_u16(), url = %url, "Accounting API busy, retrying");
                Err(backoff::Error::transient(err))
            } else {
                Err(backoff::Error::permanent(err))
            }
        })
        .await
    }
}

#[async_trait]
impl AccountingClient for HttpAccountingClient {
    #[instrument(skip_all, fields(realm_id = %credentials.realm_id))]
    async fn refresh_tokens(
        &self,
        credentials: &AccountingCredentials,
        refresh_token: &str,
    ) -> Result<AccountingTokens, SyncError> {
        let url = format!("{}/v1/oauth/token", self.base_url);
        let grant = RefreshGrant {
            grant_type: "refresh_token",
            refresh_token,
        };
        let response: TokenResponse = self.post(&url, None, &grant).await?;
        if response.access_token.is_empty() {
            return Err(SyncError::InvalidResponse(
                "token response has an empty access_token".to_string(),
            ));
        }

        Ok(AccountingTokens {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_utc: response
                .expires_in
                .map(|seconds| Utc::now() + chrono::Duration::seconds(seconds)),
        })
    }

    #[instrument(skip_all, fields(doc_number = %invoice.doc_number, realm_id = %credentials.realm_id))]
    async fn push_invoice(
        &self,
        credentials: &AccountingCredentials,
        invoice: &InvoiceDocument,
    ) -> Result<String, SyncError> {
        self.create(credentials, "invoices", invoice).await
    }

    #[instrument(skip_all, fields(payment_ref = %payment.payment_ref, realm_id = %credentials.realm_id))]
    async fn push_payment(
        &self,
        credentials: &AccountingCredentials,
        payment: &PaymentDocument,
    ) -> Result<String, SyncError> {
        self.create(credentials, "payments", payment).await
    }
}
