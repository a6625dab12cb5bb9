use std::collections::HashSet;

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use super::error::StoreError;
use super::models::{BillingPlan, Invoice, InvoiceFilter, InvoiceKey, OverdueUpdate, Payment};

pub type StoreResult<T> = Result<T, StoreError>;

/// key: spp-plan-catalog -> read-only plan lookup
#[async_trait]
pub trait BillingPlanCatalog: Send + Sync {
    async fn plan(&self, plan_id: Uuid) -> StoreResult<Option<BillingPlan>>;

    async fn active_plans(&self) -> StoreResult<Vec<BillingPlan>>;
}

/// Result of a batch insert. Invoices whose key already existed are listed in `conflicts`
/// and were not written.
#[derive(Debug, Default, Clone)]
pub struct InsertOutcome {
    pub inserted: Vec<Uuid>,
    pub conflicts: Vec<InvoiceKey>,
}

/// key: spp-invoice-store -> persistence port for invoices and the payment ledger
#[async_trait]
pub trait InvoiceStore: Send + Sync {
    /// Keys among `student_ids × periods` (as `(year, month)`) that already have an invoice
    /// under `plan_id`. One round trip regardless of input size.
    async fn existing_keys(
        &self,
        plan_id: Uuid,
        student_ids: &[Uuid],
        periods: &[(i32, u32)],
    ) -> StoreResult<HashSet<InvoiceKey>>;

    /// Writes all invoices as one atomic unit. Uniqueness conflicts are not errors; they are
    /// reported in [`InsertOutcome::conflicts`].
    async fn insert_invoices(&self, invoices: &[Invoice]) -> StoreResult<InsertOutcome>;

    async fn invoice(&self, invoice_id: Uuid) -> StoreResult<Option<Invoice>>;

    /// Appends `payment` and replaces the invoice row with `updated`, both or neither, only if
    /// the stored version still equals `expected_version`. Returns the stored invoice with its
    /// bumped version, or [`StoreError::VersionConflict`].
    async fn record_payment(
        &self,
        expected_version: i64,
        updated: &Invoice,
        payment: &Payment,
    ) -> StoreResult<Invoice>;

    async fn payments_for(&self, invoice_id: Uuid) -> StoreResult<Vec<Payment>>;

    /// Pending or partial invoices due strictly before `due_before`, ordered by id and
    /// starting after `after`.
    async fn overdue_candidates(
        &self,
        due_before: NaiveDate,
        after: Option<Uuid>,
        limit: usize,
    ) -> StoreResult<Vec<Invoice>>;

    /// Flips the listed invoices to overdue in one atomic unit. Rows whose version moved or
    /// that are no longer pending/partial are left alone. Returns the number flipped.
    async fn mark_overdue(&self, updates: &[OverdueUpdate]) -> StoreResult<usize>;

    async fn find_invoices(&self, filter: &InvoiceFilter) -> StoreResult<Vec<Invoice>>;
}
