//! In-process store used by tests and local development.
//!
//! A single mutex guards all state, so every trait call is atomic with respect to the
//! others, mirroring a per-statement transaction in Postgres.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::error::StoreError;
use super::models::{
    BillingPlan, Invoice, InvoiceFilter, InvoiceKey, InvoiceStatus, OverdueUpdate, Payment,
};
use super::store::{BillingPlanCatalog, InsertOutcome, InvoiceStore, StoreResult};

#[derive(Default)]
struct MemoryState {
    plans: HashMap<Uuid, BillingPlan>,
    invoices: HashMap<Uuid, Invoice>,
    keys: HashMap<InvoiceKey, Uuid>,
    payments: Vec<Payment>,
}

#[derive(Default)]
pub struct InMemoryBillingStore {
    state: Mutex<MemoryState>,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_plan(&self, plan: BillingPlan) {
        self.state.lock().await.plans.insert(plan.id, plan);
    }

    pub async fn invoice_count(&self) -> usize {
        self.state.lock().await.invoices.len()
    }

    pub async fn all_invoices(&self) -> Vec<Invoice> {
        let state = self.state.lock().await;
        let mut invoices: Vec<_> = state.invoices.values().cloned().collect();
        invoices.sort_by_key(|invoice| invoice.key());
        invoices
    }
}

#[async_trait]
impl BillingPlanCatalog for InMemoryBillingStore {
    async fn plan(&self, plan_id: Uuid) -> StoreResult<Option<BillingPlan>> {
        Ok(self.state.lock().await.plans.get(&plan_id).cloned())
    }

    async fn active_plans(&self) -> StoreResult<Vec<BillingPlan>> {
        let state = self.state.lock().await;
        let mut plans: Vec<_> = state
            .plans
            .values()
            .filter(|plan| plan.active)
            .cloned()
            .collect();
        plans.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(plans)
    }
}

#[async_trait]
impl InvoiceStore for InMemoryBillingStore {
    async fn existing_keys(
        &self,
        plan_id: Uuid,
        student_ids: &[Uuid],
        periods: &[(i32, u32)],
    ) -> StoreResult<HashSet<InvoiceKey>> {
        let state = self.state.lock().await;
        let mut existing = HashSet::new();
        for student_id in student_ids {
            for (year, month) in periods {
                let key = InvoiceKey {
                    student_id: *student_id,
                    plan_id,
                    year: *year,
                    month: *month,
                };
                if state.keys.contains_key(&key) {
                    existing.insert(key);
                }
            }
        }
        Ok(existing)
    }

    async fn insert_invoices(&self, invoices: &[Invoice]) -> StoreResult<InsertOutcome> {
        let mut state = self.state.lock().await;
        let mut outcome = InsertOutcome::default();
        for invoice in invoices {
            let key = invoice.key();
            if state.keys.contains_key(&key) || state.invoices.contains_key(&invoice.id) {
                outcome.conflicts.push(key);
                continue;
            }
            state.keys.insert(key, invoice.id);
            state.invoices.insert(invoice.id, invoice.clone());
            outcome.inserted.push(invoice.id);
        }
        Ok(outcome)
    }

    async fn invoice(&self, invoice_id: Uuid) -> StoreResult<Option<Invoice>> {
        Ok(self.state.lock().await.invoices.get(&invoice_id).cloned())
    }

    async fn record_payment(
        &self,
        expected_version: i64,
        updated: &Invoice,
        payment: &Payment,
    ) -> StoreResult<Invoice> {
        let mut state = self.state.lock().await;
        let Some(current) = state.invoices.get_mut(&updated.id) else {
            return Err(StoreError::VersionConflict(updated.id));
        };
        if current.version != expected_version {
            return Err(StoreError::VersionConflict(updated.id));
        }

        let mut stored = updated.clone();
        stored.version = expected_version + 1;
        *current = stored.clone();
        state.payments.push(payment.clone());
        Ok(stored)
    }

    async fn payments_for(&self, invoice_id: Uuid) -> StoreResult<Vec<Payment>> {
        let state = self.state.lock().await;
        let mut payments: Vec<_> = state
            .payments
            .iter()
            .filter(|payment| payment.invoice_id == invoice_id)
            .cloned()
            .collect();
        payments.sort_by_key(|payment| payment.applied_at);
        Ok(payments)
    }

    async fn overdue_candidates(
        &self,
        due_before: NaiveDate,
        after: Option<Uuid>,
        limit: usize,
    ) -> StoreResult<Vec<Invoice>> {
        let state = self.state.lock().await;
        let mut candidates: Vec<_> = state
            .invoices
            .values()
            .filter(|invoice| {
                matches!(
                    invoice.status,
                    InvoiceStatus::Pending | InvoiceStatus::Partial
                ) && invoice.due_date < due_before
                    && after.map_or(true, |cursor| invoice.id > cursor)
            })
            .cloned()
            .collect();
        candidates.sort_by_key(|invoice| invoice.id);
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn mark_overdue(&self, updates: &[OverdueUpdate]) -> StoreResult<usize> {
        let mut state = self.state.lock().await;
        let mut flipped = 0;
        for update in updates {
            let Some(invoice) = state.invoices.get_mut(&update.invoice_id) else {
                continue;
            };
            let open = matches!(
                invoice.status,
                InvoiceStatus::Pending | InvoiceStatus::Partial
            );
            if !open || invoice.version != update.expected_version {
                continue;
            }
            invoice.status = InvoiceStatus::Overdue;
            invoice.fine = invoice.fine.max(update.fine);
            invoice.version += 1;
            flipped += 1;
        }
        Ok(flipped)
    }

    async fn find_invoices(&self, filter: &InvoiceFilter) -> StoreResult<Vec<Invoice>> {
        let state = self.state.lock().await;
        let mut invoices: Vec<_> = state
            .invoices
            .values()
            .filter(|invoice| filter.matches(invoice))
            .cloned()
            .collect();
        invoices.sort_by(|a, b| {
            (a.year, a.month, a.student_id).cmp(&(b.year, b.month, b.student_id))
        });
        Ok(invoices)
    }
}
