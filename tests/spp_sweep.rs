use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use spp_billing::billing::models::OverdueUpdate;
use spp_billing::billing::store::StoreResult;
use spp_billing::billing::{
    reconciliation, run_sweep, BillingPeriod, BillingPlan, FinePolicy, InMemoryBillingStore,
    InsertOutcome, Invoice, InvoiceFilter, InvoiceGenerator, InvoiceKey, InvoiceStatus,
    InvoiceStore, LedgerConfig, Payment, PaymentLedger, StoreError,
};
use uuid::Uuid;

fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 1, 0, 0).unwrap()
}

fn february() -> BillingPeriod {
    BillingPeriod::new(2, 2024, NaiveDate::from_ymd_opt(2024, 2, 15).unwrap())
}

async fn seed(
    store: &Arc<InMemoryBillingStore>,
    students: usize,
    periods: &[BillingPeriod],
) -> Vec<Uuid> {
    let plan = BillingPlan {
        id: Uuid::new_v4(),
        code: "spp-mi".to_string(),
        name: "SPP MI".to_string(),
        level: "MI".to_string(),
        base_amount: 150_000,
        active: true,
        fine_policy: FinePolicy::default(),
        created_at: at(2023, 7, 1),
    };
    store.insert_plan(plan.clone()).await;
    let students: Vec<Uuid> = (0..students).map(|_| Uuid::new_v4()).collect();
    InvoiceGenerator::new(store.clone(), store.clone())
        .generate(plan.id, &students, periods, at(2024, 2, 1))
        .await
        .unwrap()
        .created
}

// key: spp-sweep-tests -> pending past due becomes overdue with fine
#[tokio::test]
async fn sweep_flips_past_due_invoice() {
    let store = Arc::new(InMemoryBillingStore::new());
    let ids = seed(&store, 1, &[february()]).await;
    let as_of = at(2024, 3, 1);

    let report = run_sweep(store.as_ref(), as_of, 50).await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.flipped, 1);
    assert_eq!(report.failed_batches, 0);

    let invoice = store.invoice(ids[0]).await.unwrap().unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Overdue);
    assert!(invoice.fine > 0);
    assert!(reconciliation::due_amount(&invoice, as_of) > invoice.base_amount);
    assert_eq!(invoice.version, 1);
}

#[tokio::test]
async fn sweep_leaves_current_and_paid_invoices_alone() {
    let store = Arc::new(InMemoryBillingStore::new());
    let march = BillingPeriod::new(3, 2024, NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());
    let ids = seed(&store, 2, &[february(), march]).await;
    let ledger = PaymentLedger::new(store.clone(), LedgerConfig::default());

    let february_ids: Vec<Uuid> = {
        let mut found = Vec::new();
        for id in &ids {
            let invoice = store.invoice(*id).await.unwrap().unwrap();
            if invoice.month == 2 {
                found.push(invoice.id);
            }
        }
        found
    };
    ledger
        .apply_payment(february_ids[0], 150_000, at(2024, 2, 10))
        .await
        .unwrap();

    let report = run_sweep(store.as_ref(), at(2024, 3, 1), 50).await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.flipped, 1);

    for invoice in store.all_invoices().await {
        let expected = match (invoice.month, invoice.id == february_ids[0]) {
            (2, true) => InvoiceStatus::Paid,
            (2, false) => InvoiceStatus::Overdue,
            _ => InvoiceStatus::Pending,
        };
        assert_eq!(invoice.status, expected, "invoice {}", invoice.id);
    }
}

#[tokio::test]
async fn partially_paid_invoice_is_flipped() {
    let store = Arc::new(InMemoryBillingStore::new());
    let ids = seed(&store, 1, &[february()]).await;
    PaymentLedger::new(store.clone(), LedgerConfig::default())
        .apply_payment(ids[0], 70_000, at(2024, 2, 10))
        .await
        .unwrap();

    run_sweep(store.as_ref(), at(2024, 2, 20), 50).await.unwrap();

    let invoice = store.invoice(ids[0]).await.unwrap().unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Overdue);
    assert_eq!(invoice.paid_amount, 70_000);
    assert_eq!(reconciliation::outstanding(&invoice, at(2024, 2, 20)), 90_000);
}

#[tokio::test]
async fn sweep_walks_all_batches() {
    let store = Arc::new(InMemoryBillingStore::new());
    seed(&store, 7, &[february()]).await;

    let report = run_sweep(store.as_ref(), at(2024, 3, 1), 2).await.unwrap();
    assert_eq!(report.scanned, 7);
    assert_eq!(report.flipped, 7);
    assert!(store
        .all_invoices()
        .await
        .iter()
        .all(|invoice| invoice.status == InvoiceStatus::Overdue));

    let again = run_sweep(store.as_ref(), at(2024, 3, 2), 2).await.unwrap();
    assert_eq!(again.scanned, 0);
    assert_eq!(again.flipped, 0);
}

#[tokio::test]
async fn stale_flip_is_ignored_after_payment() {
    let store = Arc::new(InMemoryBillingStore::new());
    let ids = seed(&store, 1, &[february()]).await;
    let as_of = at(2024, 3, 1);

    let candidates = store
        .overdue_candidates(as_of.date_naive(), None, 10)
        .await
        .unwrap();
    assert_eq!(candidates.len(), 1);

    PaymentLedger::new(store.clone(), LedgerConfig::default())
        .apply_payment(ids[0], 160_000, as_of)
        .await
        .unwrap();

    let flipped = store
        .mark_overdue(&[OverdueUpdate {
            invoice_id: candidates[0].id,
            expected_version: candidates[0].version,
            fine: reconciliation::fine(&candidates[0], as_of),
        }])
        .await
        .unwrap();
    assert_eq!(flipped, 0);
    let invoice = store.invoice(ids[0]).await.unwrap().unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Paid);
}

/// Store that fails the first `mark_overdue` call.
struct FirstFlipFails {
    inner: Arc<InMemoryBillingStore>,
    flips: AtomicUsize,
}

#[async_trait]
impl InvoiceStore for FirstFlipFails {
    async fn existing_keys(
        &self,
        plan_id: Uuid,
        student_ids: &[Uuid],
        periods: &[(i32, u32)],
    ) -> StoreResult<HashSet<InvoiceKey>> {
        self.inner.existing_keys(plan_id, student_ids, periods).await
    }

    async fn insert_invoices(&self, invoices: &[Invoice]) -> StoreResult<InsertOutcome> {
        self.inner.insert_invoices(invoices).await
    }

    async fn invoice(&self, invoice_id: Uuid) -> StoreResult<Option<Invoice>> {
        self.inner.invoice(invoice_id).await
    }

    async fn record_payment(
        &self,
        expected_version: i64,
        updated: &Invoice,
        payment: &Payment,
    ) -> StoreResult<Invoice> {
        self.inner
            .record_payment(expected_version, updated, payment)
            .await
    }

    async fn payments_for(&self, invoice_id: Uuid) -> StoreResult<Vec<Payment>> {
        self.inner.payments_for(invoice_id).await
    }

    async fn overdue_candidates(
        &self,
        due_before: NaiveDate,
        after: Option<Uuid>,
        limit: usize,
    ) -> StoreResult<Vec<Invoice>> {
        self.inner.overdue_candidates(due_before, after, limit).await
    }

    async fn mark_overdue(&self, updates: &[OverdueUpdate]) -> StoreResult<usize> {
        if self.flips.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(StoreError::Unavailable("lock timeout".to_string()));
        }
        self.inner.mark_overdue(updates).await
    }

    async fn find_invoices(&self, filter: &InvoiceFilter) -> StoreResult<Vec<Invoice>> {
        self.inner.find_invoices(filter).await
    }
}

// key: spp-sweep-tests -> batch isolation
#[tokio::test]
async fn failed_batch_does_not_undo_other_batches() {
    let inner = Arc::new(InMemoryBillingStore::new());
    seed(&inner, 4, &[february()]).await;
    let store = FirstFlipFails {
        inner: inner.clone(),
        flips: AtomicUsize::new(0),
    };

    let report = run_sweep(&store, at(2024, 3, 1), 2).await.unwrap();
    assert_eq!(report.scanned, 4);
    assert_eq!(report.flipped, 2);
    assert_eq!(report.failed_batches, 1);

    let overdue = inner
        .find_invoices(&InvoiceFilter {
            status: Some(InvoiceStatus::Overdue),
            ..InvoiceFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(overdue.len(), 2);

    let retry = run_sweep(&store, at(2024, 3, 1), 2).await.unwrap();
    assert_eq!(retry.scanned, 2);
    assert_eq!(retry.flipped, 2);
    assert_eq!(retry.failed_batches, 0);
}

#[tokio::test]
async fn swept_statuses_match_reconciled_amounts() {
    let store = Arc::new(InMemoryBillingStore::new());
    let march = BillingPeriod::new(3, 2024, NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());
    seed(&store, 5, &[february(), march]).await;
    let ledger = PaymentLedger::new(store.clone(), LedgerConfig::default());

    let mut invoices = store.all_invoices().await;
    invoices.sort_by_key(|invoice| (invoice.student_id, invoice.month));
    let by_student: Vec<(Uuid, Uuid)> = invoices
        .chunks(2)
        .map(|pair| (pair[0].id, pair[1].id))
        .collect();

    let (feb, mar) = by_student[0];
    ledger.apply_payment(feb, 150_000, at(2024, 2, 10)).await.unwrap();
    ledger.apply_payment(mar, 50_000, at(2024, 2, 25)).await.unwrap();
    ledger
        .apply_payment(by_student[1].0, 70_000, at(2024, 2, 10))
        .await
        .unwrap();
    ledger
        .apply_payment(by_student[2].0, 160_000, at(2024, 2, 20))
        .await
        .unwrap();
    ledger
        .apply_payment(by_student[3].0, 20_000, at(2024, 2, 20))
        .await
        .unwrap();

    let as_of = at(2024, 3, 1);
    let report = run_sweep(store.as_ref(), as_of, 2).await.unwrap();
    assert_eq!(report.failed_batches, 0);

    let mut seen = HashSet::new();
    for invoice in store.all_invoices().await {
        let expected = reconciliation::status_for(
            reconciliation::due_amount(&invoice, as_of),
            invoice.paid_amount,
            invoice.due_date,
            as_of,
        );
        assert_eq!(invoice.status, expected, "invoice {}", invoice.id);
        seen.insert(invoice.status);
    }
    assert_eq!(seen.len(), 4);
}
