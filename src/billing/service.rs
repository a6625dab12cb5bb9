use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::error::{BillingError, BillingResult};
use super::generator::InvoiceGenerator;
use super::ledger::{LedgerConfig, PaymentLedger};
use super::models::{BillingPlan, Invoice, Payment};
use super::reconciliation;
use super::scheduler::{self, SweepReport};
use super::store::{BillingPlanCatalog, InvoiceStore};
use super::summary::SummaryAggregator;

/// An invoice evaluated at a point in time. `status` and `fine` are the values as of
/// `as_of`, which may be ahead of what the sweep has written so far.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceView {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub due_amount: i64,
    pub outstanding: i64,
}

impl InvoiceView {
    pub fn at(mut invoice: Invoice, as_of: DateTime<Utc>) -> Self {
        let due_amount = reconciliation::due_amount(&invoice, as_of);
        let outstanding = reconciliation::outstanding(&invoice, as_of);
        let fine = reconciliation::fine(&invoice, as_of);
        invoice.status = reconciliation::current_status(&invoice, as_of);
        invoice.fine = fine;
        Self {
            invoice,
            due_amount,
            outstanding,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceDetail {
    #[serde(flatten)]
    pub view: InvoiceView,
    pub payments: Vec<Payment>,
}

/// key: spp-billing-service -> engine components wired to one store
///
/// Built once at startup and cloned into request handlers.
#[derive(Clone)]
pub struct BillingService {
    catalog: Arc<dyn BillingPlanCatalog>,
    store: Arc<dyn InvoiceStore>,
    generator: InvoiceGenerator,
    ledger: PaymentLedger,
    summary: SummaryAggregator,
    sweep_batch_size: usize,
}

impl BillingService {
    pub fn new(
        catalog: Arc<dyn BillingPlanCatalog>,
        store: Arc<dyn InvoiceStore>,
        ledger_config: LedgerConfig,
        sweep_batch_size: usize,
    ) -> Self {
        Self {
            generator: InvoiceGenerator::new(catalog.clone(), store.clone()),
            ledger: PaymentLedger::new(store.clone(), ledger_config),
            summary: SummaryAggregator::new(store.clone()),
            catalog,
            store,
            sweep_batch_size,
        }
    }

    pub fn generator(&self) -> &InvoiceGenerator {
        &self.generator
    }

    pub fn ledger(&self) -> &PaymentLedger {
        &self.ledger
    }

    pub fn summary(&self) -> &SummaryAggregator {
        &self.summary
    }

    pub async fn active_plans(&self) -> BillingResult<Vec<BillingPlan>> {
        Ok(self.catalog.active_plans().await?)
    }

    pub async fn invoice_detail(
        &self,
        invoice_id: Uuid,
        as_of: DateTime<Utc>,
    ) -> BillingResult<InvoiceDetail> {
        let invoice = self
            .store
            .invoice(invoice_id)
            .await?
            .ok_or(BillingError::InvoiceNotFound(invoice_id))?;
        let payments = self.store.payments_for(invoice_id).await?;
        Ok(InvoiceDetail {
            view: InvoiceView::at(invoice, as_of),
            payments,
        })
    }

    pub async fn run_sweep(&self, as_of: DateTime<Utc>) -> BillingResult<SweepReport> {
        scheduler::run_sweep(self.store.as_ref(), as_of, self.sweep_batch_size).await
    }
}
