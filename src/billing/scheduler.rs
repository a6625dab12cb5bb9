use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::{self, Duration as TokioDuration};
use tracing::{debug, info, warn};

use crate::config;

use super::error::BillingResult;
use super::models::{InvoiceStatus, OverdueUpdate};
use super::reconciliation;
use super::store::InvoiceStore;

#[derive(Clone, Debug)]
pub struct SweepConfig {
    pub interval: TokioDuration,
    pub batch_size: usize,
}

impl SweepConfig {
    pub fn from_env() -> Self {
        Self {
            interval: TokioDuration::from_secs(*config::SPP_OVERDUE_SCAN_INTERVAL_SECS),
            batch_size: *config::SPP_OVERDUE_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub flipped: usize,
    pub failed_batches: usize,
}

/// key: spp-overdue-scheduler -> periodic overdue sweep
pub fn spawn(store: Arc<dyn InvoiceStore>, sweep: SweepConfig) {
    tokio::spawn(async move {
        let mut ticker = time::interval(sweep.interval);
        loop {
            ticker.tick().await;
            if let Err(err) = run_sweep(store.as_ref(), Utc::now(), sweep.batch_size).await {
                warn!(?err, "spp overdue sweep tick failed");
            }
        }
    });
}

/// key: spp-overdue-scheduler -> tick handler
///
/// Walks pending/partial invoices that are past due in id order, `batch_size` at a time.
/// Each batch is flipped in one conditional write; a failed batch is logged and skipped
/// without undoing earlier batches. Only a failure to read candidates ends the sweep early.
pub async fn run_sweep(
    store: &dyn InvoiceStore,
    as_of: DateTime<Utc>,
    batch_size: usize,
) -> BillingResult<SweepReport> {
    let batch_size = batch_size.max(1);
    let today = as_of.date_naive();
    let mut report = SweepReport::default();
    let mut cursor = None;

    loop {
        let batch = store
            .overdue_candidates(today, cursor, batch_size)
            .await?;
        let Some(last) = batch.last() else {
            break;
        };
        cursor = Some(last.id);
        report.scanned += batch.len();

        let updates: Vec<OverdueUpdate> = batch
            .iter()
            .filter(|invoice| {
                let status = reconciliation::current_status(invoice, as_of);
                status == InvoiceStatus::Overdue
                    && reconciliation::can_transition(invoice.status, status)
            })
            .map(|invoice| OverdueUpdate {
                invoice_id: invoice.id,
                expected_version: invoice.version,
                fine: reconciliation::fine(invoice, as_of),
            })
            .collect();

        if !updates.is_empty() {
            match store.mark_overdue(&updates).await {
                Ok(flipped) => {
                    report.flipped += flipped;
                    if flipped < updates.len() {
                        debug!(
                            skipped = updates.len() - flipped,
                            "invoices changed before the overdue flip"
                        );
                    }
                }
                Err(err) => {
                    report.failed_batches += 1;
                    warn!(
                        ?err,
                        batch = updates.len(),
                        "failed to flip overdue batch"
                    );
                }
            }
        }

        if batch.len() < batch_size {
            break;
        }
    }

    info!(
        %as_of,
        scanned = report.scanned,
        flipped = report.flipped,
        failed_batches = report.failed_batches,
        "spp overdue sweep finished"
    );

    Ok(report)
}
