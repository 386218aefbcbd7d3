//! Domain models for production-invoicing-service.

mod accounting;
mod invoice;
mod line_item;
mod ordered_item;
mod payment;
mod production_order;

pub use accounting::{AccountingCredentials, AccountingTokens, EntityMapping, EntityType};
pub use invoice::{
    Invoice, InvoicePage, InvoiceStatus, InvoiceType, InvoiceUpdate, ListInvoicesFilter,
    NewInvoice, OutstandingInvoicesFilter,
};
pub use line_item::{LineItem, NewLineItem};
pub use ordered_item::{NewOrderedItem, OrderedItem, UNIT_INITIAL_QC_STATUS, UNIT_INITIAL_STATUS};
pub use payment::{NewPayment, Payment, PaymentMethod, RecordPayment, PAYMENT_STATUS_COMPLETED};
pub use production_order::{ProductionOrder, ProductionOrderPaymentUpdate, ProductionOrderStatus};

/// A stored string did not match any known variant.
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub(crate) fn new(kind: &'static str, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}
