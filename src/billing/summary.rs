use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::error::BillingResult;
use super::models::{Invoice, InvoiceFilter, InvoiceStatus, InvoiceSummary};
use super::reconciliation;
use super::store::InvoiceStore;

/// key: spp-summary -> read-only reporting totals
#[derive(Clone)]
pub struct SummaryAggregator {
    store: Arc<dyn InvoiceStore>,
}

impl SummaryAggregator {
    pub fn new(store: Arc<dyn InvoiceStore>) -> Self {
        Self { store }
    }

    /// Invoices matching `filter` together with their totals as of `as_of`. A status filter
    /// matches the status as of `as_of`, not the stored one.
    pub async fn summarize(
        &self,
        filter: &InvoiceFilter,
        as_of: DateTime<Utc>,
    ) -> BillingResult<(Vec<Invoice>, InvoiceSummary)> {
        filter.validate()?;
        let stored_filter = InvoiceFilter {
            status: None,
            ..filter.clone()
        };
        let mut invoices = self.store.find_invoices(&stored_filter).await?;
        if let Some(status) = filter.status {
            invoices.retain(|invoice| reconciliation::current_status(invoice, as_of) == status);
        }
        let summary = aggregate(&invoices, as_of);
        Ok((invoices, summary))
    }
}

pub fn aggregate(invoices: &[Invoice], as_of: DateTime<Utc>) -> InvoiceSummary {
    let mut count_by_status: BTreeMap<InvoiceStatus, usize> =
        InvoiceStatus::ALL.iter().map(|status| (*status, 0)).collect();
    let mut total_due = 0i64;
    let mut total_paid = 0i64;
    let mut total_outstanding = 0i64;

    for invoice in invoices {
        let status = reconciliation::current_status(invoice, as_of);
        *count_by_status.entry(status).or_default() += 1;
        total_due = total_due.saturating_add(reconciliation::due_amount(invoice, as_of));
        total_paid = total_paid.saturating_add(invoice.paid_amount);
        total_outstanding =
            total_outstanding.saturating_add(reconciliation::outstanding(invoice, as_of));
    }

    InvoiceSummary {
        count: invoices.len(),
        total_due,
        total_paid,
        total_outstanding,
        count_by_status,
    }
}
