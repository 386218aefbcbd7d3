//! Services module for production-invoicing-service.

pub mod accounting;
pub mod database;
pub mod factory;
pub mod invoices;
pub mod ledger;
pub mod metrics;
pub mod pricing;
pub mod repository;
pub mod sequence;
pub mod state_machine;
pub mod units;

pub use database::{PgRepository, PgRepositoryTx};
pub use invoices::{InvoiceDetail, InvoiceService};
pub use metrics::{get_metrics, init_metrics};
pub use repository::{InvoiceRepository, RepositoryTx};
