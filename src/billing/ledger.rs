use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::{BillingError, BillingResult, StoreError};
use super::models::{Invoice, Payment};
use super::reconciliation;
use super::store::InvoiceStore;

#[derive(Clone, Debug)]
pub struct LedgerConfig {
    /// Attempts at the read-validate-write cycle before giving up with `ConcurrencyConflict`.
    pub max_retries: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self { max_retries: 5 }
    }
}

/// key: spp-payment-ledger -> applies payments with per-invoice compare-and-swap
#[derive(Clone)]
pub struct PaymentLedger {
    store: Arc<dyn InvoiceStore>,
    config: LedgerConfig,
}

impl PaymentLedger {
    pub fn new(store: Arc<dyn InvoiceStore>, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    /// Applies `amount` to the invoice as of `applied_at` and returns the updated invoice.
    ///
    /// The payment row and the invoice balance are written together or not at all. Payments
    /// that would push `paid_amount` past the amount due are rejected rather than clipped.
    pub async fn apply_payment(
        &self,
        invoice_id: Uuid,
        amount: i64,
        applied_at: DateTime<Utc>,
    ) -> BillingResult<Invoice> {
        if amount <= 0 {
            return Err(BillingError::NonPositiveAmount(amount));
        }

        let attempts = self.config.max_retries.max(1);
        for attempt in 1..=attempts {
            let current = self
                .store
                .invoice(invoice_id)
                .await?
                .ok_or(BillingError::InvoiceNotFound(invoice_id))?;

            let (updated, payment) = settle(&current, amount, applied_at)?;
            match self
                .store
                .record_payment(current.version, &updated, &payment)
                .await
            {
                Ok(stored) => {
                    info!(
                        %invoice_id,
                        payment_id = %payment.id,
                        amount,
                        paid_amount = stored.paid_amount,
                        status = %stored.status,
                        "spp payment applied"
                    );
                    return Ok(stored);
                }
                Err(StoreError::VersionConflict(_)) => {
                    debug!(%invoice_id, attempt, "invoice changed during payment; retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }

        warn!(%invoice_id, attempts, "payment gave up after repeated version conflicts");
        Err(BillingError::ConcurrencyConflict(invoice_id))
    }

    pub async fn payments(&self, invoice_id: Uuid) -> BillingResult<Vec<Payment>> {
        if self.store.invoice(invoice_id).await?.is_none() {
            return Err(BillingError::InvoiceNotFound(invoice_id));
        }
        Ok(self.store.payments_for(invoice_id).await?)
    }
}

/// Computes the invoice after a payment of `amount`, or rejects it.
fn settle(
    current: &Invoice,
    amount: i64,
    applied_at: DateTime<Utc>,
) -> BillingResult<(Invoice, Payment)> {
    let fine = reconciliation::fine(current, applied_at);
    let due = reconciliation::due_with_fine(current, fine);
    let outstanding = due.saturating_sub(current.paid_amount).max(0);
    if amount > outstanding {
        return Err(BillingError::OverpaymentRejected {
            invoice_id: current.id,
            amount,
            outstanding,
        });
    }

    let paid_amount = current.paid_amount + amount;
    let computed = reconciliation::status_for(due, paid_amount, current.due_date, applied_at);

    let mut updated = current.clone();
    updated.fine = fine;
    updated.paid_amount = paid_amount;
    updated.status = reconciliation::next_status(current.status, computed);
    updated.last_payment_at = Some(
        current
            .last_payment_at
            .map_or(applied_at, |last| last.max(applied_at)),
    );

    let payment = Payment {
        id: Uuid::new_v4(),
        invoice_id: current.id,
        amount,
        applied_at,
        created_at: Utc::now(),
    };

    Ok((updated, payment))
}
