//! Year-scoped document numbers (`INV-2025-0012`, `PAY-2025-0004`).
//!
//! Generation runs inside the caller's transaction: take the advisory lock
//! for (kind, year), read the current maximum, add one. The lock is
//! transaction-scoped, so whatever way the transaction ends releases it.
//! A number consumed by a transaction that later rolls back is never stored,
//! which leaves a harmless gap.

use std::fmt;

use service_core::error::AppError;
use tracing::{debug, instrument};

use crate::services::repository::RepositoryTx;

/// Kinds of numbered documents. Each has its own counter per year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequenceKind {
    Invoice,
    Payment,
}

impl SequenceKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            SequenceKind::Invoice => "INV",
            SequenceKind::Payment => "PAY",
        }
    }

    /// Base for advisory lock keys. Bases are far enough apart that no two
    /// (kind, year) pairs share a key.
    fn lock_base(&self) -> i64 {
        match self {
            SequenceKind::Invoice => 1_000_000,
            SequenceKind::Payment => 2_000_000,
        }
    }

    pub fn lock_key(&self, year: i32) -> i64 {
        self.lock_base() - i64::from(year)
    }

    pub fn format(&self, year: i32, seq: i32) -> String {
        format!("{}-{}-{:04}", self.prefix(), year, seq)
    }

    /// Postgres regex matching this kind's numbers for `year`.
    pub fn pattern(&self, year: i32) -> String {
        format!("^{}-{}-[0-9]+$", self.prefix(), year)
    }

    /// Numeric suffix of `number` if it belongs to this kind and year.
    pub fn parse(&self, number: &str, year: i32) -> Option<i32> {
        let scope = format!("{}-{}-", self.prefix(), year);
        let suffix = number.strip_prefix(&scope)?;
        if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        suffix.parse().ok()
    }
}

impl fmt::Display for SequenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Allocate the next number for `kind` in `year` inside `tx`.
#[instrument(skip_all, fields(kind = %kind, year = year))]
pub async fn next_number(
    tx: &mut dyn RepositoryTx,
    kind: SequenceKind,
    year: i32,
) -> Result<String, AppError> {
    tx.advisory_lock(kind.lock_key(year)).await?;

    let current = tx.max_sequence(kind, year).await?;
    let next = current.checked_add(1).ok_or_else(|| {
        AppError::InternalError(anyhow::anyhow!(
            "{} sequence for {} is exhausted",
            kind,
            year
        ))
    })?;

    let number = kind.format(year, next);
    debug!(number = %number, "Allocated document number");
    Ok(number)
}
