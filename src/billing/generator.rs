use std::collections::{HashMap, HashSet};
use std::slice;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::error::{BillingError, BillingResult};
use super::models::{
    check_period_bounds, BillingPeriod, BillingPlan, Invoice, InvoiceKey, InvoiceStatus,
};
use super::reconciliation;
use super::store::{BillingPlanCatalog, InsertOutcome, InvoiceStore};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SkippedInvoice {
    pub student_id: Uuid,
    pub period: BillingPeriod,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct GenerationFailure {
    pub student_id: Uuid,
    pub period: BillingPeriod,
    pub reason: String,
    pub message: String,
}

/// key: spp-generation-report -> created / skipped / failed per (student, period)
#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerationReport {
    pub created: Vec<Uuid>,
    pub skipped: Vec<SkippedInvoice>,
    pub failed: Vec<GenerationFailure>,
}

impl GenerationReport {
    fn skip(&mut self, student_id: Uuid, period: BillingPeriod) {
        let reason = BillingError::AlreadyExists {
            student_id,
            year: period.year,
            month: period.month,
        };
        self.skipped.push(SkippedInvoice {
            student_id,
            period,
            reason: reason.kind().to_string(),
        });
    }

    fn fail(&mut self, student_id: Uuid, period: BillingPeriod, err: &BillingError) {
        self.failed.push(GenerationFailure {
            student_id,
            period,
            reason: err.kind().to_string(),
            message: err.to_string(),
        });
    }
}

/// key: spp-invoice-generator -> bulk monthly invoicing without duplicates
#[derive(Clone)]
pub struct InvoiceGenerator {
    catalog: Arc<dyn BillingPlanCatalog>,
    store: Arc<dyn InvoiceStore>,
}

impl InvoiceGenerator {
    pub fn new(catalog: Arc<dyn BillingPlanCatalog>, store: Arc<dyn InvoiceStore>) -> Self {
        Self { catalog, store }
    }

    /// Creates one invoice per `(student, period)` that does not exist yet under `plan_id`.
    ///
    /// Re-running with the same arguments is safe: existing invoices, including ones written
    /// by a concurrent call between our existence check and insert, come back as skipped.
    pub async fn generate(
        &self,
        plan_id: Uuid,
        student_ids: &[Uuid],
        periods: &[BillingPeriod],
        now: DateTime<Utc>,
    ) -> BillingResult<GenerationReport> {
        if student_ids.is_empty() {
            return Err(BillingError::EmptyRequest("student"));
        }
        if periods.is_empty() {
            return Err(BillingError::EmptyRequest("billing period"));
        }

        let plan = self
            .catalog
            .plan(plan_id)
            .await?
            .filter(|plan| plan.active)
            .ok_or(BillingError::InvalidPlan(plan_id))?;

        let students = dedup_students(student_ids);
        let mut report = GenerationReport::default();
        let mut valid_periods = Vec::new();
        let mut seen_periods: HashMap<(i32, u32), NaiveDate> = HashMap::new();
        for period in periods {
            if let Some(due_date) = seen_periods.get(&(period.year, period.month)) {
                if *due_date != period.due_date {
                    let err = BillingError::InvalidPeriod {
                        year: period.year,
                        month: period.month,
                        reason: format!("duplicate period with a different due date ({due_date})"),
                    };
                    for student_id in &students {
                        report.fail(*student_id, *period, &err);
                    }
                }
                continue;
            }
            seen_periods.insert((period.year, period.month), period.due_date);
            match validate_period(&plan, period) {
                Ok(()) => valid_periods.push(*period),
                Err(err) => {
                    for student_id in &students {
                        report.fail(*student_id, *period, &err);
                    }
                }
            }
        }

        if valid_periods.is_empty() {
            warn!(%plan_id, "no valid billing periods in generation request");
            return Ok(report);
        }

        let period_pairs: Vec<(i32, u32)> = valid_periods
            .iter()
            .map(|period| (period.year, period.month))
            .collect();
        // Conflicts also surface from the insert, so a failed lookup only costs a wider write.
        let existing = match self
            .store
            .existing_keys(plan_id, &students, &period_pairs)
            .await
        {
            Ok(existing) => existing,
            Err(err) => {
                warn!(
                    ?err,
                    %plan_id,
                    "existing invoice lookup failed; relying on insert conflicts"
                );
                HashSet::new()
            }
        };

        let mut pending: HashMap<InvoiceKey, BillingPeriod> = HashMap::new();
        let mut candidates = Vec::new();
        for student_id in &students {
            for period in &valid_periods {
                let invoice = new_invoice(&plan, *student_id, *period, now);
                let key = invoice.key();
                if existing.contains(&key) {
                    report.skip(*student_id, *period);
                    continue;
                }
                pending.insert(key, *period);
                candidates.push(invoice);
            }
        }

        if !candidates.is_empty() {
            match self.store.insert_invoices(&candidates).await {
                Ok(outcome) => apply_outcome(&mut report, &pending, outcome),
                Err(err) => {
                    warn!(
                        ?err,
                        %plan_id,
                        invoices = candidates.len(),
                        "batch invoice insert failed; retrying invoices individually"
                    );
                    self.insert_individually(&mut report, &pending, &candidates)
                        .await;
                }
            }
        }

        info!(
            %plan_id,
            plan = %plan.code,
            created = report.created.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "spp invoice generation finished"
        );

        Ok(report)
    }

    async fn insert_individually(
        &self,
        report: &mut GenerationReport,
        pending: &HashMap<InvoiceKey, BillingPeriod>,
        candidates: &[Invoice],
    ) {
        let results = join_all(
            candidates
                .iter()
                .map(|invoice| self.store.insert_invoices(slice::from_ref(invoice))),
        )
        .await;

        for (invoice, result) in candidates.iter().zip(results) {
            match result {
                Ok(outcome) => apply_outcome(report, pending, outcome),
                Err(err) => {
                    warn!(
                        ?err,
                        student_id = %invoice.student_id,
                        year = invoice.year,
                        month = invoice.month,
                        "invoice insert failed"
                    );
                    report.fail(
                        invoice.student_id,
                        invoice.period(),
                        &BillingError::Storage(err),
                    );
                }
            }
        }
    }
}

fn apply_outcome(
    report: &mut GenerationReport,
    pending: &HashMap<InvoiceKey, BillingPeriod>,
    outcome: InsertOutcome,
) {
    report.created.extend(outcome.inserted);
    for key in outcome.conflicts {
        if let Some(period) = pending.get(&key) {
            report.skip(key.student_id, *period);
        }
    }
}

fn dedup_students(student_ids: &[Uuid]) -> Vec<Uuid> {
    let mut seen = HashSet::with_capacity(student_ids.len());
    student_ids
        .iter()
        .copied()
        .filter(|id| seen.insert(*id))
        .collect()
}

fn validate_period(plan: &BillingPlan, period: &BillingPeriod) -> BillingResult<()> {
    check_period_bounds(period.year, period.month)?;
    let first_year = plan.first_billable_year();
    if period.year < first_year {
        return Err(BillingError::InvalidPeriod {
            year: period.year,
            month: period.month,
            reason: format!("plan {} bills from {first_year}", plan.code),
        });
    }
    Ok(())
}

fn new_invoice(
    plan: &BillingPlan,
    student_id: Uuid,
    period: BillingPeriod,
    now: DateTime<Utc>,
) -> Invoice {
    let mut invoice = Invoice {
        id: Uuid::new_v4(),
        student_id,
        plan_id: plan.id,
        month: period.month,
        year: period.year,
        due_date: period.due_date,
        base_amount: plan.base_amount,
        discount: 0,
        fine: 0,
        paid_amount: 0,
        status: InvoiceStatus::Pending,
        fine_policy: plan.fine_policy,
        version: 0,
        created_at: now,
        last_payment_at: None,
    };
    // Back-issued invoices may already be late.
    invoice.status = reconciliation::status_for(
        reconciliation::due_amount(&invoice, now),
        0,
        invoice.due_date,
        now,
    );
    invoice
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::memory::InMemoryBillingStore;
    use crate::billing::models::FinePolicy;
    use chrono::{NaiveDate, TimeZone};

    fn plan(active: bool) -> BillingPlan {
        BillingPlan {
            id: Uuid::new_v4(),
            code: "spp-reguler".to_string(),
            name: "SPP Reguler".to_string(),
            level: "MTs".to_string(),
            base_amount: 150_000,
            active,
            fine_policy: FinePolicy::default(),
            created_at: Utc.with_ymd_and_hms(2023, 7, 1, 0, 0, 0).unwrap(),
        }
    }

    fn period(month: u32, year: i32) -> BillingPeriod {
        BillingPeriod::new(
            month,
            year,
            NaiveDate::from_ymd_opt(year, month.clamp(1, 12), 15).unwrap(),
        )
    }

    async fn generator_with(plan: &BillingPlan) -> (InvoiceGenerator, Arc<InMemoryBillingStore>) {
        let store = Arc::new(InMemoryBillingStore::new());
        store.insert_plan(plan.clone()).await;
        let generator = InvoiceGenerator::new(store.clone(), store.clone());
        (generator, store)
    }

    #[tokio::test]
    async fn inactive_plan_fails_whole_request() {
        let plan = plan(false);
        let (generator, store) = generator_with(&plan).await;
        let err = generator
            .generate(plan.id, &[Uuid::new_v4()], &[period(2, 2024)], Utc::now())
            .await
            .expect_err("inactive plan must be rejected");
        assert!(matches!(err, BillingError::InvalidPlan(id) if id == plan.id));
        assert_eq!(store.invoice_count().await, 0);
    }

    #[tokio::test]
    async fn empty_inputs_are_rejected() {
        let plan = plan(true);
        let (generator, _) = generator_with(&plan).await;
        let no_students = generator
            .generate(plan.id, &[], &[period(2, 2024)], Utc::now())
            .await;
        assert!(matches!(no_students, Err(BillingError::EmptyRequest(_))));
        let no_periods = generator
            .generate(plan.id, &[Uuid::new_v4()], &[], Utc::now())
            .await;
        assert!(matches!(no_periods, Err(BillingError::EmptyRequest(_))));
    }

    #[tokio::test]
    async fn invalid_periods_fail_per_item_only() {
        let plan = plan(true);
        let (generator, store) = generator_with(&plan).await;
        let students = [Uuid::new_v4(), Uuid::new_v4()];
        let report = generator
            .generate(
                plan.id,
                &students,
                &[period(13, 2024), period(1, 2020), period(3, 2024)],
                Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(report.created.len(), 2);
        assert_eq!(report.failed.len(), 4);
        assert!(report
            .failed
            .iter()
            .all(|failure| failure.reason == "InvalidPeriod"));
        assert_eq!(store.invoice_count().await, 2);
    }

    #[tokio::test]
    async fn duplicate_inputs_are_collapsed() {
        let plan = plan(true);
        let (generator, store) = generator_with(&plan).await;
        let student = Uuid::new_v4();
        let report = generator
            .generate(
                plan.id,
                &[student, student],
                &[period(2, 2024), period(2, 2024)],
                Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(report.created.len(), 1);
        assert!(report.skipped.is_empty());
        assert_eq!(store.invoice_count().await, 1);
    }

    #[tokio::test]
    async fn conflicting_duplicate_period_is_reported() {
        let plan = plan(true);
        let (generator, store) = generator_with(&plan).await;
        let student = Uuid::new_v4();
        let mut moved = period(2, 2024);
        moved.due_date = NaiveDate::from_ymd_opt(2024, 2, 20).unwrap();
        let report = generator
            .generate(
                plan.id,
                &[student],
                &[period(2, 2024), moved],
                Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(report.created.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].reason, "InvalidPeriod");
        assert_eq!(report.failed[0].period, moved);
        let stored = store.invoice(report.created[0]).await.unwrap().unwrap();
        assert_eq!(stored.due_date, period(2, 2024).due_date);
    }

    #[tokio::test]
    async fn far_future_year_is_an_invalid_period() {
        let plan = plan(true);
        let (generator, store) = generator_with(&plan).await;
        let far = BillingPeriod::new(1, 21_474_837, NaiveDate::from_ymd_opt(2024, 1, 10).unwrap());
        let report = generator
            .generate(plan.id, &[Uuid::new_v4()], &[far], Utc::now())
            .await
            .unwrap();
        assert!(report.created.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].reason, "InvalidPeriod");
        assert_eq!(store.invoice_count().await, 0);
    }

    #[tokio::test]
    async fn past_due_period_is_created_overdue() {
        let plan = plan(true);
        let (generator, store) = generator_with(&plan).await;
        let report = generator
            .generate(
                plan.id,
                &[Uuid::new_v4()],
                &[period(1, 2024)],
                Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            )
            .await
            .unwrap();
        let invoice = store
            .invoice(report.created[0])
            .await
            .unwrap()
            .expect("created invoice");
        let as_of = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Overdue);
        assert_eq!(invoice.fine, 0);
        assert_eq!(invoice.base_amount, 150_000);
        assert_eq!(reconciliation::due_amount(&invoice, as_of), 160_000);
    }
}
