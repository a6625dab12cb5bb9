use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{BillingError, BillingResult};

/// Last year a billing period may name.
pub const MAX_BILLING_YEAR: i32 = 9999;

/// key: spp-models -> plans,invoices,payments
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BillingPlan {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub level: String,
    pub base_amount: i64,
    pub active: bool,
    pub fine_policy: FinePolicy,
    pub created_at: DateTime<Utc>,
}

impl BillingPlan {
    /// Earliest year this plan may be invoiced for.
    pub fn first_billable_year(&self) -> i32 {
        use chrono::Datelike;
        self.created_at.year()
    }
}

/// key: spp-fine-policy -> late fee schedule, snapshotted onto each invoice
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FinePolicy {
    None,
    Flat {
        amount: i64,
        grace_days: i32,
    },
    PerDay {
        rate: i64,
        grace_days: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cap: Option<i64>,
    },
}

impl Default for FinePolicy {
    fn default() -> Self {
        FinePolicy::Flat {
            amount: 10_000,
            grace_days: 0,
        }
    }
}

impl FinePolicy {
    pub fn kind(&self) -> &'static str {
        match self {
            FinePolicy::None => "none",
            FinePolicy::Flat { .. } => "flat",
            FinePolicy::PerDay { .. } => "per_day",
        }
    }

    /// Flattens the policy into the `(kind, amount, grace_days, cap)` column layout.
    /// A cap of zero means uncapped.
    pub fn to_columns(&self) -> (&'static str, i64, i32, i64) {
        match *self {
            FinePolicy::None => ("none", 0, 0, 0),
            FinePolicy::Flat { amount, grace_days } => ("flat", amount, grace_days, 0),
            FinePolicy::PerDay {
                rate,
                grace_days,
                cap,
            } => ("per_day", rate, grace_days, cap.unwrap_or(0)),
        }
    }

    pub fn from_columns(kind: &str, amount: i64, grace_days: i32, cap: i64) -> Self {
        match kind {
            "flat" => FinePolicy::Flat { amount, grace_days },
            "per_day" => FinePolicy::PerDay {
                rate: amount,
                grace_days,
                cap: (cap > 0).then_some(cap),
            },
            _ => FinePolicy::None,
        }
    }
}

/// One (month, year) unit a plan is invoiced for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct BillingPeriod {
    pub month: u32,
    pub year: i32,
    pub due_date: NaiveDate,
}

impl BillingPeriod {
    pub fn new(month: u32, year: i32, due_date: NaiveDate) -> Self {
        Self {
            month,
            year,
            due_date,
        }
    }
}

/// Rejects months outside 1-12 and years outside `1..=MAX_BILLING_YEAR`.
pub fn check_period_bounds(year: i32, month: u32) -> BillingResult<()> {
    let reason = if !(1..=12).contains(&month) {
        "month must be between 1 and 12".to_string()
    } else if !(1..=MAX_BILLING_YEAR).contains(&year) {
        format!("year must be between 1 and {MAX_BILLING_YEAR}")
    } else {
        return Ok(());
    };
    Err(BillingError::InvalidPeriod {
        year,
        month,
        reason,
    })
}

/// Uniqueness key of an invoice.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InvoiceKey {
    pub student_id: Uuid,
    pub plan_id: Uuid,
    pub year: i32,
    pub month: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Partial,
    Paid,
    Overdue,
}

impl InvoiceStatus {
    pub const ALL: [InvoiceStatus; 4] = [
        InvoiceStatus::Pending,
        InvoiceStatus::Partial,
        InvoiceStatus::Paid,
        InvoiceStatus::Overdue,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Partial => "partial",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, InvoiceStatus::Paid)
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(InvoiceStatus::Pending),
            "partial" => Ok(InvoiceStatus::Partial),
            "paid" => Ok(InvoiceStatus::Paid),
            "overdue" => Ok(InvoiceStatus::Overdue),
            other => Err(format!("unknown invoice status '{other}'")),
        }
    }
}

/// key: spp-invoice-model -> persisted billing obligation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Invoice {
    pub id: Uuid,
    pub student_id: Uuid,
    pub plan_id: Uuid,
    pub month: u32,
    pub year: i32,
    pub due_date: NaiveDate,
    pub base_amount: i64,
    pub discount: i64,
    pub fine: i64,
    pub paid_amount: i64,
    pub status: InvoiceStatus,
    pub fine_policy: FinePolicy,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub last_payment_at: Option<DateTime<Utc>>,
}

impl Invoice {
    pub fn key(&self) -> InvoiceKey {
        InvoiceKey {
            student_id: self.student_id,
            plan_id: self.plan_id,
            year: self.year,
            month: self.month,
        }
    }

    pub fn period(&self) -> BillingPeriod {
        BillingPeriod::new(self.month, self.year, self.due_date)
    }
}

/// key: spp-payment-model -> append-only ledger entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Payment {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub amount: i64,
    pub applied_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Filter for invoice queries and reports. Period bounds are inclusive.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvoiceFilter {
    pub plan_id: Option<Uuid>,
    pub student_id: Option<Uuid>,
    pub status: Option<InvoiceStatus>,
    pub period_from: Option<(i32, u32)>,
    pub period_to: Option<(i32, u32)>,
}

impl InvoiceFilter {
    pub fn matches(&self, invoice: &Invoice) -> bool {
        if self.plan_id.map_or(false, |id| id != invoice.plan_id) {
            return false;
        }
        if self.student_id.map_or(false, |id| id != invoice.student_id) {
            return false;
        }
        if self.status.map_or(false, |status| status != invoice.status) {
            return false;
        }
        let period = (invoice.year, invoice.month);
        if self.period_from.map_or(false, |from| period < from) {
            return false;
        }
        if self.period_to.map_or(false, |to| period > to) {
            return false;
        }
        true
    }

    /// Rejects period bounds that cannot name a billing month.
    pub fn validate(&self) -> BillingResult<()> {
        for (year, month) in self.period_from.iter().chain(self.period_to.iter()) {
            check_period_bounds(*year, *month)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct InvoiceSummary {
    pub count: usize,
    pub total_due: i64,
    pub total_paid: i64,
    pub total_outstanding: i64,
    pub count_by_status: BTreeMap<InvoiceStatus, usize>,
}

/// A status flip produced by the overdue sweep, guarded by the row version it was computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverdueUpdate {
    pub invoice_id: Uuid,
    pub expected_version: i64,
    pub fine: i64,
}
