//! Money rules for production invoices.

use rust_decimal::{Decimal, RoundingStrategy};
use service_core::error::AppError;

use crate::models::InvoiceType;

/// Largest value a `NUMERIC(14, 2)` money column holds: 999999999999.99.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(276_447_231, 23_283, 0, false, 2);

/// Share of the production cost billed by each tranche.
pub const TRANCHE_RATE: Decimal = Decimal::from_parts(5, 0, 0, false, 1);

const FREE_SHIPPING_THRESHOLD: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);
const FLAT_SHIPPING_THRESHOLD: Decimal = Decimal::from_parts(5_000, 0, 0, false, 0);
const PERCENT_SHIPPING_THRESHOLD: Decimal = Decimal::from_parts(1_000, 0, 0, false, 0);
const FLAT_SHIPPING: Decimal = Decimal::from_parts(250, 0, 0, false, 0);
const SHIPPING_RATE: Decimal = Decimal::from_parts(5, 0, 0, false, 2);
const MINIMUM_SHIPPING: Decimal = Decimal::from_parts(100, 0, 0, false, 0);

/// Round to cents, half away from zero.
pub fn to_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// One tranche of `amount`.
pub fn tranche(amount: Decimal) -> Decimal {
    to_cents(amount * TRANCHE_RATE)
}

/// Tiered shipping on the order's total production cost.
pub fn shipping_for(total_cost: Decimal) -> Decimal {
    if total_cost >= FREE_SHIPPING_THRESHOLD {
        Decimal::ZERO
    } else if total_cost >= FLAT_SHIPPING_THRESHOLD {
        FLAT_SHIPPING
    } else if total_cost >= PERCENT_SHIPPING_THRESHOLD {
        to_cents(total_cost * SHIPPING_RATE)
    } else {
        MINIMUM_SHIPPING
    }
}

/// True when `amount` has no fraction of a cent.
pub fn is_whole_cents(amount: Decimal) -> bool {
    amount.round_dp(2) == amount
}

/// Check a payment amount before it is applied. Money columns store cents,
/// so anything finer would be rounded on write and drift from the totals
/// the status was derived from.
pub fn check_payment_amount(amount: Decimal) -> Result<(), AppError> {
    if amount <= Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Payment amount must be positive, got {}",
            format_decimal(amount)
        )));
    }
    if !is_whole_cents(amount) {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Payment amount {} has more than two decimal places",
            format_decimal(amount)
        )));
    }
    if amount > MAX_AMOUNT {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Payment amount {} exceeds the maximum of {}",
            format_decimal(amount),
            format_decimal(MAX_AMOUNT)
        )));
    }
    Ok(())
}

/// Remaining balance, never negative.
pub fn amount_due(total: Decimal, amount_paid: Decimal) -> Decimal {
    (total - amount_paid).max(Decimal::ZERO)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvoiceTotals {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub shipping: Decimal,
    pub total: Decimal,
}

/// Totals for a tranche invoice over orders costing `total_cost` together.
/// Shipping is charged on the final invoice only; no tax is applied.
pub fn invoice_totals(invoice_type: InvoiceType, total_cost: Decimal) -> InvoiceTotals {
    let subtotal = tranche(total_cost);
    let tax = Decimal::ZERO;
    let shipping = match invoice_type {
        InvoiceType::Deposit => Decimal::ZERO,
        InvoiceType::Final => shipping_for(total_cost),
    };

    InvoiceTotals {
        subtotal,
        tax,
        shipping,
        total: subtotal + tax + shipping,
    }
}

/// Normalised decimal string for the wire ("1650.5" not "1650.50").
pub fn format_decimal(d: Decimal) -> String {
    d.normalize().to_string()
}
