//! Best-effort mirroring of invoices and payments into the external
//! accounting system.
//!
//! Jobs are queued after the local transaction commits and handled by a
//! background [`SyncWorker`]. Nothing in here ever fails a caller's request:
//! errors stop at [`SyncAdapter::try_sync`], where they are logged and
//! counted.

mod client;
mod sync;
mod worker;

pub use client::{
    AccountingClient, HttpAccountingClient, InvoiceDocument, InvoiceLineDocument, PaymentDocument,
};
pub use sync::{SyncAdapter, SyncJob, SyncOutcome};
pub use worker::{SyncQueue, SyncWorker};

use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

use crate::models::EntityType;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("accounting credentials have expired and cannot be refreshed")]
    CredentialsExpired,

    #[error("{entity_type} {id} not found")]
    MissingEntity { entity_type: EntityType, id: Uuid },

    #[error("accounting request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("accounting API returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("unexpected accounting API response: {0}")]
    InvalidResponse(String),

    #[error("repository error: {0}")]
    Repository(#[from] AppError),
}
