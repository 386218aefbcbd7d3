//! Production invoice model.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use super::ParseEnumError;

/// Invoice tranche. Deposit invoices start production, final invoices
/// release shipping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceType {
    Deposit,
    Final,
}

impl InvoiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceType::Deposit => "deposit",
            InvoiceType::Final => "final",
        }
    }

    pub fn default_payment_terms(&self) -> &'static str {
        match self {
            InvoiceType::Deposit => "Due on receipt",
            InvoiceType::Final => "Net 30",
        }
    }

    /// Due date for an invoice issued on `issued_on`.
    pub fn due_date(&self, issued_on: NaiveDate) -> NaiveDate {
        match self {
            InvoiceType::Deposit => issued_on,
            InvoiceType::Final => issued_on
                .checked_add_days(Days::new(30))
                .unwrap_or(issued_on),
        }
    }
}

impl FromStr for InvoiceType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(InvoiceType::Deposit),
            "final" => Ok(InvoiceType::Final),
            other => Err(ParseEnumError::new("invoice type", other)),
        }
    }
}

impl TryFrom<String> for InvoiceType {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for InvoiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invoice payment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    PendingPayment,
    PartialPayment,
    Paid,
    Overdue,
    Cancelled,
}

impl InvoiceStatus {
    pub const ALL: [InvoiceStatus; 5] = [
        InvoiceStatus::PendingPayment,
        InvoiceStatus::PartialPayment,
        InvoiceStatus::Paid,
        InvoiceStatus::Overdue,
        InvoiceStatus::Cancelled,
    ];

    /// Statuses that still expect money.
    pub const OUTSTANDING: [InvoiceStatus; 3] = [
        InvoiceStatus::PendingPayment,
        InvoiceStatus::PartialPayment,
        InvoiceStatus::Overdue,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::PendingPayment => "pending_payment",
            InvoiceStatus::PartialPayment => "partial_payment",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_outstanding(&self) -> bool {
        Self::OUTSTANDING.contains(self)
    }
}

impl FromStr for InvoiceStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("invoice status", s))
    }
}

impl TryFrom<String> for InvoiceStatus {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Production invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    #[sqlx(try_from = "String")]
    pub invoice_type: InvoiceType,
    pub order_id: Uuid,
    pub production_order_id: Uuid,
    pub project_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub shipping: Decimal,
    pub total: Decimal,
    pub amount_paid: Decimal,
    pub amount_due: Decimal,
    #[sqlx(try_from = "String")]
    pub status: InvoiceStatus,
    pub payment_terms: String,
    pub notes: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub paid_utc: Option<DateTime<Utc>>,
    pub cancelled_utc: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Input for inserting a freshly derived invoice.
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub invoice_type: InvoiceType,
    pub order_id: Uuid,
    pub production_order_id: Uuid,
    pub project_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub shipping: Decimal,
    pub total: Decimal,
    pub payment_terms: String,
    pub due_date: Option<NaiveDate>,
    pub created_by: Option<String>,
}

/// Manual edits accepted by `update`. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Validate)]
pub struct InvoiceUpdate {
    pub status: Option<InvoiceStatus>,
    pub due_date: Option<NaiveDate>,
    #[validate(length(min = 1, max = 255))]
    pub payment_terms: Option<String>,
    #[validate(length(max = 5000))]
    pub notes: Option<String>,
}

impl InvoiceUpdate {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.due_date.is_none()
            && self.payment_terms.is_none()
            && self.notes.is_none()
    }
}

/// Filter parameters for listing invoices.
#[derive(Debug, Clone)]
pub struct ListInvoicesFilter {
    pub status: Option<InvoiceStatus>,
    pub invoice_type: Option<InvoiceType>,
    pub production_order_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub limit: i64,
    pub offset: i64,
}

impl ListInvoicesFilter {
    pub const DEFAULT_LIMIT: i64 = 50;
    pub const MAX_LIMIT: i64 = 100;

    /// Clamp raw paging input: zero or negative limit means the default.
    pub fn page(limit: i64, offset: i64) -> (i64, i64) {
        let limit = if limit <= 0 {
            Self::DEFAULT_LIMIT
        } else {
            limit.min(Self::MAX_LIMIT)
        };
        (limit, offset.max(0))
    }
}

impl Default for ListInvoicesFilter {
    fn default() -> Self {
        Self {
            status: None,
            invoice_type: None,
            production_order_id: None,
            project_id: None,
            limit: Self::DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

/// One page of invoices plus the unpaged match count.
#[derive(Debug, Clone, Default)]
pub struct InvoicePage {
    pub invoices: Vec<Invoice>,
    pub total: i64,
}

impl InvoicePage {
    pub fn has_more(&self, offset: i64) -> bool {
        offset + (self.invoices.len() as i64) < self.total
    }
}

/// Filter for outstanding (unpaid, uncancelled) invoices.
#[derive(Debug, Clone, Default)]
pub struct OutstandingInvoicesFilter {
    pub project_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_storage_string() {
        for status in InvoiceStatus::ALL {
            assert_eq!(status.as_str().parse::<InvoiceStatus>().unwrap(), status);
        }
        assert!("void".parse::<InvoiceStatus>().is_err());
    }

    #[test]
    fn test_due_date_by_type() {
        let issued = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
        assert_eq!(InvoiceType::Deposit.due_date(issued), issued);
        assert_eq!(
            InvoiceType::Final.due_date(issued),
            NaiveDate::from_ymd_opt(2025, 2, 14).unwrap()
        );
    }

    #[test]
    fn test_page_clamping() {
        assert_eq!(ListInvoicesFilter::page(0, -5), (50, 0));
        assert_eq!(ListInvoicesFilter::page(500, 10), (100, 10));
        assert_eq!(ListInvoicesFilter::page(1, 0), (1, 0));
    }

    #[test]
    fn test_has_more() {
        let page = InvoicePage {
            invoices: vec![],
            total: 3,
        };
        assert!(page.has_more(2));
        assert!(!page.has_more(3));
    }
}
