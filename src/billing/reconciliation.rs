//! Pure balance and status derivation for SPP invoices.
//!
//! Every status written by the generator, the payment ledger and the overdue sweep is
//! produced here. Nothing in this module performs I/O.

use chrono::{DateTime, NaiveDate, Utc};

use super::models::{FinePolicy, Invoice, InvoiceStatus};

/// key: spp-reconciliation -> fine accrual for a policy
///
/// Zero while `as_of` is on or before the due date. Past the due date the value only
/// grows (or stays flat) as more days elapse.
pub fn accrued_fine(policy: &FinePolicy, due_date: NaiveDate, as_of: DateTime<Utc>) -> i64 {
    let days_late = (as_of.date_naive() - due_date).num_days();
    if days_late <= 0 {
        return 0;
    }

    match *policy {
        FinePolicy::None => 0,
        FinePolicy::Flat { amount, grace_days } => {
            if days_late > i64::from(grace_days) {
                amount.max(0)
            } else {
                0
            }
        }
        FinePolicy::PerDay {
            rate,
            grace_days,
            cap,
        } => {
            let billable_days = days_late - i64::from(grace_days);
            if billable_days <= 0 {
                return 0;
            }
            let fine = rate.max(0).saturating_mul(billable_days);
            match cap {
                Some(cap) => fine.min(cap.max(0)),
                None => fine,
            }
        }
    }
}

/// Effective fine on an invoice as of `as_of`.
///
/// Paid invoices keep the fine recorded when they were settled.
pub fn fine(invoice: &Invoice, as_of: DateTime<Utc>) -> i64 {
    if invoice.status.is_terminal() {
        return invoice.fine;
    }
    invoice
        .fine
        .max(accrued_fine(&invoice.fine_policy, invoice.due_date, as_of))
}

/// Amount due as of `as_of`, fine included.
pub fn due_amount(invoice: &Invoice, as_of: DateTime<Utc>) -> i64 {
    due_with_fine(invoice, fine(invoice, as_of))
}

/// `base - discount + fine`, saturating at the `i64` bounds.
pub fn due_with_fine(invoice: &Invoice, fine: i64) -> i64 {
    invoice
        .base_amount
        .saturating_sub(invoice.discount)
        .saturating_add(fine)
}

pub fn outstanding(invoice: &Invoice, as_of: DateTime<Utc>) -> i64 {
    due_amount(invoice, as_of)
        .saturating_sub(invoice.paid_amount)
        .max(0)
}

/// key: spp-reconciliation -> the single source of invoice status
pub fn status_for(
    due_amount: i64,
    paid_amount: i64,
    due_date: NaiveDate,
    as_of: DateTime<Utc>,
) -> InvoiceStatus {
    if paid_amount >= due_amount {
        InvoiceStatus::Paid
    } else if as_of.date_naive() > due_date {
        InvoiceStatus::Overdue
    } else if paid_amount > 0 {
        InvoiceStatus::Partial
    } else {
        InvoiceStatus::Pending
    }
}

/// Status the invoice should carry as of `as_of`, given its current fields. Never moves
/// backwards from the stored status.
pub fn current_status(invoice: &Invoice, as_of: DateTime<Utc>) -> InvoiceStatus {
    if invoice.status.is_terminal() {
        return invoice.status;
    }
    let computed = status_for(
        due_amount(invoice, as_of),
        invoice.paid_amount,
        invoice.due_date,
        as_of,
    );
    next_status(invoice.status, computed)
}

/// Allowed lifecycle moves. Staying in the same state is always allowed.
pub fn can_transition(from: InvoiceStatus, to: InvoiceStatus) -> bool {
    use InvoiceStatus::*;
    if from == to {
        return true;
    }
    matches!(
        (from, to),
        (Pending, Partial)
            | (Pending, Overdue)
            | (Pending, Paid)
            | (Partial, Overdue)
            | (Partial, Paid)
            | (Overdue, Paid)
    )
}

/// Picks the next status, holding the current one when `computed` would move backwards
/// (a back-dated payment on an overdue invoice stays overdue until settled).
pub fn next_status(current: InvoiceStatus, computed: InvoiceStatus) -> InvoiceStatus {
    if can_transition(current, computed) {
        computed
    } else {
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 9, 0, 0).unwrap()
    }

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn invoice(policy: FinePolicy) -> Invoice {
        Invoice {
            id: Uuid::new_v4(),
            student_id: Uuid::new_v4(),
            plan_id: Uuid::new_v4(),
            month: 2,
            year: 2024,
            due_date: date(2024, 2, 15),
            base_amount: 150_000,
            discount: 0,
            fine: 0,
            paid_amount: 0,
            status: InvoiceStatus::Pending,
            fine_policy: policy,
            version: 0,
            created_at: at(2024, 2, 1),
            last_payment_at: None,
        }
    }

    #[test]
    fn status_precedence_matches_lifecycle() {
        let due = date(2024, 2, 15);
        assert_eq!(status_for(150_000, 0, due, at(2024, 2, 10)), InvoiceStatus::Pending);
        assert_eq!(
            status_for(150_000, 100_000, due, at(2024, 2, 10)),
            InvoiceStatus::Partial
        );
        assert_eq!(
            status_for(150_000, 100_000, due, at(2024, 2, 16)),
            InvoiceStatus::Overdue
        );
        assert_eq!(
            status_for(150_000, 150_000, due, at(2024, 3, 1)),
            InvoiceStatus::Paid
        );
        // the due date itself is not late
        assert_eq!(status_for(150_000, 0, due, at(2024, 2, 15)), InvoiceStatus::Pending);
    }

    #[test]
    fn flat_fine_applies_after_grace() {
        let policy = FinePolicy::Flat {
            amount: 10_000,
            grace_days: 3,
        };
        let due = date(2024, 2, 15);
        assert_eq!(accrued_fine(&policy, due, at(2024, 2, 15)), 0);
        assert_eq!(accrued_fine(&policy, due, at(2024, 2, 18)), 0);
        assert_eq!(accrued_fine(&policy, due, at(2024, 2, 19)), 10_000);
        assert_eq!(accrued_fine(&policy, due, at(2024, 6, 1)), 10_000);
    }

    #[test]
    fn per_day_fine_is_monotonic_and_capped() {
        let policy = FinePolicy::PerDay {
            rate: 1_000,
            grace_days: 0,
            cap: Some(20_000),
        };
        let due = date(2024, 2, 15);
        let mut previous = 0;
        for day in 0..60 {
            let as_of = at(2024, 2, 15) + chrono::Duration::days(day);
            let fine = accrued_fine(&policy, due, as_of);
            assert!(fine >= previous, "fine decreased on day {day}");
            assert!(fine <= 20_000);
            previous = fine;
        }
        assert_eq!(accrued_fine(&policy, due, at(2024, 2, 20)), 5_000);
        assert_eq!(previous, 20_000);
    }

    #[test]
    fn due_amount_includes_fine_once_overdue() {
        let invoice = invoice(FinePolicy::default());
        assert_eq!(due_amount(&invoice, at(2024, 2, 15)), 150_000);
        assert!(due_amount(&invoice, at(2024, 3, 1)) > 150_000);
        assert_eq!(current_status(&invoice, at(2024, 3, 1)), InvoiceStatus::Overdue);
    }

    #[test]
    fn paid_invoice_freezes_fine() {
        let mut invoice = invoice(FinePolicy::PerDay {
            rate: 1_000,
            grace_days: 0,
            cap: None,
        });
        invoice.fine = 3_000;
        invoice.paid_amount = 153_000;
        invoice.status = InvoiceStatus::Paid;
        assert_eq!(fine(&invoice, at(2024, 12, 31)), 3_000);
        assert_eq!(outstanding(&invoice, at(2024, 12, 31)), 0);
        assert_eq!(current_status(&invoice, at(2024, 12, 31)), InvoiceStatus::Paid);
    }

    #[test]
    fn current_status_holds_overdue_for_earlier_as_of() {
        let mut invoice = invoice(FinePolicy::default());
        invoice.status = InvoiceStatus::Overdue;
        invoice.fine = 10_000;
        invoice.paid_amount = 20_000;
        assert_eq!(current_status(&invoice, at(2024, 2, 1)), InvoiceStatus::Overdue);
    }

    #[test]
    fn uncapped_fine_saturates_instead_of_overflowing() {
        let mut invoice = invoice(FinePolicy::PerDay {
            rate: i64::MAX,
            grace_days: 0,
            cap: None,
        });
        let as_of = at(2024, 6, 1);
        assert_eq!(fine(&invoice, as_of), i64::MAX);
        assert_eq!(due_amount(&invoice, as_of), i64::MAX);
        invoice.paid_amount = 150_000;
        assert_eq!(outstanding(&invoice, as_of), i64::MAX - 150_000);
    }

    #[test]
    fn stored_fine_never_shrinks() {
        let mut invoice = invoice(FinePolicy::PerDay {
            rate: 1_000,
            grace_days: 0,
            cap: None,
        });
        invoice.fine = 7_000;
        assert_eq!(fine(&invoice, at(2024, 2, 17)), 7_000);
    }

    #[test]
    fn paid_is_terminal() {
        for to in InvoiceStatus::ALL {
            assert_eq!(
                can_transition(InvoiceStatus::Paid, to),
                to == InvoiceStatus::Paid
            );
        }
        assert!(!can_transition(InvoiceStatus::Overdue, InvoiceStatus::Partial));
        assert!(!can_transition(InvoiceStatus::Partial, InvoiceStatus::Pending));
        assert_eq!(
            next_status(InvoiceStatus::Overdue, InvoiceStatus::Partial),
            InvoiceStatus::Overdue
        );
    }
}
