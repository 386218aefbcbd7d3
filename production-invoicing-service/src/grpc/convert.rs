//! Conversions between domain models and generated protobuf types.
//!
//! Empty strings on the wire mean "absent", and `*_UNSPECIFIED` enum values
//! mean "no filter" or "unchanged" depending on the request.

use chrono::{DateTime, NaiveDate, Utc};
use prost_types::Timestamp;
use rust_decimal::Decimal;
use std::str::FromStr;
use tonic::Status;
use uuid::Uuid;

use super::proto;
use crate::models::{Invoice, InvoiceStatus, InvoiceType, LineItem, Payment, PaymentMethod};
use crate::services::metrics::ERRORS_TOTAL;
use crate::services::pricing::format_decimal;

pub(super) fn datetime_to_timestamp(dt: DateTime<Utc>) -> Timestamp {
    Timestamp {
        seconds: dt.timestamp(),
        nanos: dt.timestamp_subsec_nanos() as i32,
    }
}

fn invalid(message: impl Into<String>) -> Status {
    ERRORS_TOTAL.with_label_values(&["validation_error"]).inc();
    Status::invalid_argument(message)
}

pub(super) fn parse_uuid(field: &str, value: &str) -> Result<Uuid, Status> {
    Uuid::parse_str(value).map_err(|_| invalid(format!("Invalid {} format", field)))
}

pub(super) fn parse_optional_uuid(field: &str, value: &str) -> Result<Option<Uuid>, Status> {
    if value.is_empty() {
        Ok(None)
    } else {
        parse_uuid(field, value).map(Some)
    }
}

pub(super) fn parse_amount(value: &str) -> Result<Decimal, Status> {
    Decimal::from_str(value.trim()).map_err(|_| invalid("Invalid amount format"))
}

pub(super) fn parse_optional_date(field: &str, value: &str) -> Result<Option<NaiveDate>, Status> {
    if value.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| invalid(format!("Invalid {} format, expected YYYY-MM-DD", field)))
}

pub(super) fn optional_string(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

pub(super) fn invoice_type_from_proto(value: i32) -> Result<Option<InvoiceType>, Status> {
    match proto::InvoiceType::try_from(value) {
        Ok(proto::InvoiceType::Unspecified) => Ok(None),
        Ok(proto::InvoiceType::Deposit) => Ok(Some(InvoiceType::Deposit)),
        Ok(proto::InvoiceType::Final) => Ok(Some(InvoiceType::Final)),
        Err(_) => Err(invalid(format!("Unknown invoice_type {}", value))),
    }
}

pub(super) fn invoice_status_from_proto(value: i32) -> Result<Option<InvoiceStatus>, Status> {
    match proto::InvoiceStatus::try_from(value) {
        Ok(proto::InvoiceStatus::Unspecified) => Ok(None),
        Ok(proto::InvoiceStatus::PendingPayment) => Ok(Some(InvoiceStatus::PendingPayment)),
        Ok(proto::InvoiceStatus::PartialPayment) => Ok(Some(InvoiceStatus::PartialPayment)),
        Ok(proto::InvoiceStatus::Paid) => Ok(Some(InvoiceStatus::Paid)),
        Ok(proto::InvoiceStatus::Overdue) => Ok(Some(InvoiceStatus::Overdue)),
        Ok(proto::InvoiceStatus::Cancelled) => Ok(Some(InvoiceStatus::Cancelled)),
        Err(_) => Err(invalid(format!("Unknown status {}", value))),
    }
}

/// Payment method is required, so `UNSPECIFIED` is rejected.
pub(super) fn payment_method_from_proto(value: i32) -> Result<PaymentMethod, Status> {
    match proto::PaymentMethod::try_from(value) {
        Ok(proto::PaymentMethod::CreditCard) => Ok(PaymentMethod::CreditCard),
        Ok(proto::PaymentMethod::WireTransfer) => Ok(PaymentMethod::WireTransfer),
        Ok(proto::PaymentMethod::Check) => Ok(PaymentMethod::Check),
        Ok(proto::PaymentMethod::Ach) => Ok(PaymentMethod::Ach),
        Ok(proto::PaymentMethod::Unspecified) => Err(invalid("payment_method is required")),
        Err(_) => Err(invalid(format!("Unknown payment_method {}", value))),
    }
}

fn invoice_type_to_proto(invoice_type: InvoiceType) -> proto::InvoiceType {
    match invoice_type {
        InvoiceType::Deposit => proto::InvoiceType::Deposit,
        InvoiceType::Final => proto::InvoiceType::Final,
    }
}

fn invoice_status_to_proto(status: InvoiceStatus) -> proto::InvoiceStatus {
    match status {
        InvoiceStatus::PendingPayment => proto::InvoiceStatus::PendingPayment,
        InvoiceStatus::PartialPayment => proto::InvoiceStatus::PartialPayment,
        InvoiceStatus::Paid => proto::InvoiceStatus::Paid,
        InvoiceStatus::Overdue => proto::InvoiceStatus::Overdue,
        InvoiceStatus::Cancelled => proto::InvoiceStatus::Cancelled,
    }
}

fn payment_method_to_proto(method: PaymentMethod) -> proto::PaymentMethod {
    match method {
        PaymentMethod::CreditCard => proto::PaymentMethod::CreditCard,
        PaymentMethod::WireTransfer => proto::PaymentMethod::WireTransfer,
        PaymentMethod::Check => proto::PaymentMethod::Check,
        PaymentMethod::Ach => proto::PaymentMethod::Ach,
    }
}

pub(super) fn invoice_to_proto(invoice: &Invoice) -> proto::Invoice {
    proto::Invoice {
        invoice_id: invoice.invoice_id.to_string(),
        invoice_number: invoice.invoice_number.clone(),
        invoice_type: invoice_type_to_proto(invoice.invoice_type) as i32,
        status: invoice_status_to_proto(invoice.status) as i32,
        order_id: invoice.order_id.to_string(),
        production_order_id: invoice.production_order_id.to_string(),
        project_id: invoice
            .project_id
            .map(|id| id.to_string())
            .unwrap_or_default(),
        customer_id: invoice
            .customer_id
            .map(|id| id.to_string())
            .unwrap_or_default(),
        subtotal: format_decimal(invoice.subtotal),
        tax: format_decimal(invoice.tax),
        shipping: format_decimal(invoice.shipping),
        total: format_decimal(invoice.total),
        amount_paid: format_decimal(invoice.amount_paid),
        amount_due: format_decimal(invoice.amount_due),
        payment_terms: invoice.payment_terms.clone(),
        notes: invoice.notes.clone().unwrap_or_default(),
        due_date: invoice
            .due_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
        paid_at: invoice.paid_utc.map(datetime_to_timestamp),
        cancelled_at: invoice.cancelled_utc.map(datetime_to_timestamp),
        created_by: invoice.created_by.clone().unwrap_or_default(),
        created_at: Some(datetime_to_timestamp(invoice.created_utc)),
        updated_at: Some(datetime_to_timestamp(invoice.updated_utc)),
    }
}

pub(super) fn line_item_to_proto(item: &LineItem) -> proto::InvoiceLineItem {
    proto::InvoiceLineItem {
        line_item_id: item.line_item_id.to_string(),
        invoice_id: item.invoice_id.to_string(),
        line_number: item.line_number,
        description: item.description.clone(),
        quantity: item.quantity,
        unit_price: format_decimal(item.unit_price),
        subtotal: format_decimal(item.subtotal),
        tax: format_decimal(item.tax),
        total: format_decimal(item.total),
        production_order_id: item.production_order_id.to_string(),
        production_order_number: item.production_order_number.clone(),
    }
}

pub(super) fn payment_to_proto(payment: &Payment) -> proto::Payment {
    proto::Payment {
        payment_id: payment.payment_id.to_string(),
        payment_number: payment.payment_number.clone(),
        invoice_id: payment.invoice_id.to_string(),
        amount: format_decimal(payment.amount),
        payment_method: payment_method_to_proto(payment.payment_method) as i32,
        transaction_id: payment.transaction_id.clone().unwrap_or_default(),
        notes: payment.notes.clone().unwrap_or_default(),
        status: payment.status.clone(),
        payment_date: payment.payment_date.format("%Y-%m-%d").to_string(),
        created_by: payment.created_by.clone().unwrap_or_default(),
        created_at: Some(datetime_to_timestamp(payment.created_utc)),
    }
}
