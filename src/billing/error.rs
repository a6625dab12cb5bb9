use thiserror::Error;
use uuid::Uuid;

/// Failures reported by an [`InvoiceStore`](super::store::InvoiceStore) or plan catalog.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invoice {0} was modified concurrently")]
    VersionConflict(Uuid),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// key: spp-errors -> engine failure taxonomy
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("billing plan {0} is missing or inactive")]
    InvalidPlan(Uuid),
    #[error("request must name at least one {0}")]
    EmptyRequest(&'static str),
    #[error("invoice already exists for student {student_id} in {year}-{month:02}")]
    AlreadyExists {
        student_id: Uuid,
        year: i32,
        month: u32,
    },
    #[error("invalid billing period {year}-{month}: {reason}")]
    InvalidPeriod {
        year: i32,
        month: u32,
        reason: String,
    },
    #[error("invoice {0} not found")]
    InvoiceNotFound(Uuid),
    #[error("payment amount must be positive, got {0}")]
    NonPositiveAmount(i64),
    #[error("payment of {amount} exceeds outstanding balance {outstanding} on invoice {invoice_id}")]
    OverpaymentRejected {
        invoice_id: Uuid,
        amount: i64,
        outstanding: i64,
    },
    #[error("invoice {0} kept changing underneath the payment; retry")]
    ConcurrencyConflict(Uuid),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl BillingError {
    /// Stable kind name surfaced in response bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            BillingError::InvalidPlan(_) => "InvalidPlan",
            BillingError::EmptyRequest(_) => "EmptyRequest",
            BillingError::AlreadyExists { .. } => "AlreadyExists",
            BillingError::InvalidPeriod { .. } => "InvalidPeriod",
            BillingError::InvoiceNotFound(_) => "InvoiceNotFound",
            BillingError::NonPositiveAmount(_) => "NonPositiveAmount",
            BillingError::OverpaymentRejected { .. } => "OverpaymentRejected",
            BillingError::ConcurrencyConflict(_) => "ConcurrencyConflict",
            BillingError::Storage(_) => "StorageError",
        }
    }

    /// Whether retrying the same single item may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BillingError::ConcurrencyConflict(_)
                | BillingError::Storage(StoreError::VersionConflict(_))
        )
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
