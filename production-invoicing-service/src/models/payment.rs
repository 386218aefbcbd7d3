//! Payment model.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use super::ParseEnumError;

/// Status every recorded payment carries. Refunds are not handled here.
pub const PAYMENT_STATUS_COMPLETED: &str = "completed";

/// How the customer paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    CreditCard,
    WireTransfer,
    Check,
    Ach,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::CreditCard => "credit_card",
            PaymentMethod::WireTransfer => "wire_transfer",
            PaymentMethod::Check => "check",
            PaymentMethod::Ach => "ach",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credit_card" => Ok(PaymentMethod::CreditCard),
            "wire_transfer" => Ok(PaymentMethod::WireTransfer),
            "check" => Ok(PaymentMethod::Check),
            "ach" => Ok(PaymentMethod::Ach),
            other => Err(ParseEnumError::new("payment method", other)),
        }
    }
}

impl TryFrom<String> for PaymentMethod {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of money received against an invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub payment_id: Uuid,
    pub payment_number: String,
    pub invoice_id: Uuid,
    pub amount: Decimal,
    #[sqlx(try_from = "String")]
    pub payment_method: PaymentMethod,
    pub transaction_id: Option<String>,
    pub notes: Option<String>,
    pub status: String,
    pub payment_date: NaiveDate,
    pub created_by: Option<String>,
    pub created_utc: DateTime<Utc>,
}

/// Input for inserting a payment row.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub payment_id: Uuid,
    pub payment_number: String,
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub transaction_id: Option<String>,
    pub notes: Option<String>,
    pub payment_date: NaiveDate,
    pub created_by: Option<String>,
}

/// Caller input for recording a payment.
#[derive(Debug, Clone, Validate)]
pub struct RecordPayment {
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    #[validate(length(max = 255))]
    pub transaction_id: Option<String>,
    #[validate(length(max = 5000))]
    pub notes: Option<String>,
    #[validate(length(max = 255))]
    pub created_by: Option<String>,
}
