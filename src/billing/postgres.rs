use std::collections::HashSet;

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::db::{spp_invoices, spp_payments, spp_plans};

use super::error::StoreError;
use super::models::{BillingPlan, Invoice, InvoiceFilter, InvoiceKey, OverdueUpdate, Payment};
use super::store::{BillingPlanCatalog, InsertOutcome, InvoiceStore, StoreResult};

/// key: spp-store-postgres -> sqlx adapter for the invoice store and plan catalog
#[derive(Clone)]
pub struct PgBillingStore {
    pool: PgPool,
}

impl PgBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BillingPlanCatalog for PgBillingStore {
    async fn plan(&self, plan_id: Uuid) -> StoreResult<Option<BillingPlan>> {
        Ok(spp_plans::get_plan(&self.pool, plan_id).await?)
    }

    async fn active_plans(&self) -> StoreResult<Vec<BillingPlan>> {
        Ok(spp_plans::list_active_plans(&self.pool).await?)
    }
}

#[async_trait]
impl InvoiceStore for PgBillingStore {
    async fn existing_keys(
        &self,
        plan_id: Uuid,
        student_ids: &[Uuid],
        periods: &[(i32, u32)],
    ) -> StoreResult<HashSet<InvoiceKey>> {
        Ok(spp_invoices::existing_keys(&self.pool, plan_id, student_ids, periods).await?)
    }

    async fn insert_invoices(&self, invoices: &[Invoice]) -> StoreResult<InsertOutcome> {
        if invoices.is_empty() {
            return Ok(InsertOutcome::default());
        }

        let inserted = spp_invoices::insert_batch(&self.pool, invoices).await?;
        let written: HashSet<Uuid> = inserted.iter().copied().collect();
        let conflicts: Vec<InvoiceKey> = invoices
            .iter()
            .filter(|invoice| !written.contains(&invoice.id))
            .map(Invoice::key)
            .collect();
        if !conflicts.is_empty() {
            debug!(
                conflicts = conflicts.len(),
                "invoice batch hit existing billing periods"
            );
        }

        Ok(InsertOutcome {
            inserted,
            conflicts,
        })
    }

    async fn invoice(&self, invoice_id: Uuid) -> StoreResult<Option<Invoice>> {
        Ok(spp_invoices::get_invoice(&self.pool, invoice_id).await?)
    }

    async fn record_payment(
        &self,
        expected_version: i64,
        updated: &Invoice,
        payment: &Payment,
    ) -> StoreResult<Invoice> {
        let mut tx = self.pool.begin().await?;
        let Some(stored) =
            spp_invoices::update_after_payment(&mut *tx, expected_version, updated).await?
        else {
            // dropping the transaction rolls it back
            return Err(StoreError::VersionConflict(updated.id));
        };
        spp_payments::insert_payment(&mut *tx, payment).await?;
        tx.commit().await?;

        Ok(stored)
    }

    async fn payments_for(&self, invoice_id: Uuid) -> StoreResult<Vec<Payment>> {
        Ok(spp_payments::list_for_invoice(&self.pool, invoice_id).await?)
    }

    async fn overdue_candidates(
        &self,
        due_before: NaiveDate,
        after: Option<Uuid>,
        limit: usize,
    ) -> StoreResult<Vec<Invoice>> {
        Ok(spp_invoices::overdue_candidates(&self.pool, due_before, after, limit).await?)
    }

    async fn mark_overdue(&self, updates: &[OverdueUpdate]) -> StoreResult<usize> {
        if updates.is_empty() {
            return Ok(0);
        }
        Ok(spp_invoices::mark_overdue(&self.pool, updates).await?)
    }

    async fn find_invoices(&self, filter: &InvoiceFilter) -> StoreResult<Vec<Invoice>> {
        Ok(spp_invoices::find(&self.pool, filter).await?)
    }
}
