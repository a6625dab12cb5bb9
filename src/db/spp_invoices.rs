use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{postgres::PgRow, Executor, Postgres, Row};
use uuid::Uuid;

use crate::billing::models::{
    FinePolicy, Invoice, InvoiceFilter, InvoiceKey, InvoiceStatus, OverdueUpdate,
};

pub async fn existing_keys<'c, E>(
    executor: E,
    plan_id: Uuid,
    student_ids: &[Uuid],
    periods: &[(i32, u32)],
) -> Result<HashSet<InvoiceKey>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let years: Vec<i32> = periods.iter().map(|(year, _)| *year).collect();
    let months: Vec<i32> = periods.iter().map(|(_, month)| month_column(*month)).collect();
    let rows = sqlx::query(
        r#"
        SELECT i.student_id, i.period_month, i.period_year
        FROM spp_invoices AS i
        JOIN UNNEST($3::int4[], $4::int4[]) AS p(period_year, period_month)
          ON i.period_year = p.period_year
         AND i.period_month = p.period_month
        WHERE i.plan_id = $1
          AND i.student_id = ANY($2)
        "#,
    )
    .bind(plan_id)
    .bind(student_ids)
    .bind(&years)
    .bind(&months)
    .fetch_all(executor)
    .await?;

    Ok(rows
        .iter()
        .map(|row| InvoiceKey {
            student_id: row.get("student_id"),
            plan_id,
            year: row.get("period_year"),
            month: row.get::<i32, _>("period_month") as u32,
        })
        .collect())
}

/// Inserts every invoice in one statement. Rows hitting the unique period constraint are
/// dropped by `ON CONFLICT DO NOTHING`; the ids that were actually written come back.
pub async fn insert_batch<'c, E>(executor: E, invoices: &[Invoice]) -> Result<Vec<Uuid>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let mut ids = Vec::with_capacity(invoices.len());
    let mut student_ids = Vec::with_capacity(invoices.len());
    let mut plan_ids = Vec::with_capacity(invoices.len());
    let mut months = Vec::with_capacity(invoices.len());
    let mut years = Vec::with_capacity(invoices.len());
    let mut due_dates = Vec::with_capacity(invoices.len());
    let mut base_amounts = Vec::with_capacity(invoices.len());
    let mut discounts = Vec::with_capacity(invoices.len());
    let mut fines = Vec::with_capacity(invoices.len());
    let mut paid_amounts = Vec::with_capacity(invoices.len());
    let mut statuses = Vec::with_capacity(invoices.len());
    let mut fine_kinds = Vec::with_capacity(invoices.len());
    let mut fine_amounts = Vec::with_capacity(invoices.len());
    let mut fine_grace_days = Vec::with_capacity(invoices.len());
    let mut fine_caps = Vec::with_capacity(invoices.len());
    let mut created_ats = Vec::with_capacity(invoices.len());

    for invoice in invoices {
        let (kind, amount, grace, cap) = invoice.fine_policy.to_columns();
        ids.push(invoice.id);
        student_ids.push(invoice.student_id);
        plan_ids.push(invoice.plan_id);
        months.push(month_column(invoice.month));
        years.push(invoice.year);
        due_dates.push(invoice.due_date);
        base_amounts.push(invoice.base_amount);
        discounts.push(invoice.discount);
        fines.push(invoice.fine);
        paid_amounts.push(invoice.paid_amount);
        statuses.push(invoice.status.as_str().to_string());
        fine_kinds.push(kind.to_string());
        fine_amounts.push(amount);
        fine_grace_days.push(grace);
        fine_caps.push(cap);
        created_ats.push(invoice.created_at);
    }

    let rows = sqlx::query(
        r#"
        INSERT INTO spp_invoices (
            id,
            student_id,
            plan_id,
            period_month,
            period_year,
            due_date,
            base_amount,
            discount,
            fine,
            paid_amount,
            status,
            fine_kind,
            fine_amount,
            fine_grace_days,
            fine_cap,
            created_at
        )
        SELECT * FROM UNNEST(
            $1::uuid[],
            $2::uuid[],
            $3::uuid[],
            $4::int4[],
            $5::int4[],
            $6::date[],
            $7::int8[],
            $8::int8[],
            $9::int8[],
            $10::int8[],
            $11::text[],
            $12::text[],
            $13::int8[],
            $14::int4[],
            $15::int8[],
            $16::timestamptz[]
        )
        ON CONFLICT (student_id, plan_id, period_month, period_year) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(&ids)
    .bind(&student_ids)
    .bind(&plan_ids)
    .bind(&months)
    .bind(&years)
    .bind(&due_dates)
    .bind(&base_amounts)
    .bind(&discounts)
    .bind(&fines)
    .bind(&paid_amounts)
    .bind(&statuses)
    .bind(&fine_kinds)
    .bind(&fine_amounts)
    .bind(&fine_grace_days)
    .bind(&fine_caps)
    .bind(&created_ats)
    .fetch_all(executor)
    .await?;

    Ok(rows.iter().map(|row| row.get("id")).collect())
}

pub async fn get_invoice<'c, E>(executor: E, invoice_id: Uuid) -> Result<Option<Invoice>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let row = sqlx::query("SELECT * FROM spp_invoices WHERE id = $1")
        .bind(invoice_id)
        .fetch_optional(executor)
        .await?;

    row.map(|row| map_row(&row)).transpose()
}

/// Writes the post-payment balance when the row is still at `expected_version`.
/// `None` means another writer got there first.
pub async fn update_after_payment<'c, E>(
    executor: E,
    expected_version: i64,
    invoice: &Invoice,
) -> Result<Option<Invoice>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let row = sqlx::query(
        r#"
        UPDATE spp_invoices
        SET
            paid_amount = $3,
            fine = $4,
            status = $5,
            last_payment_at = $6,
            version = version + 1,
            updated_at = NOW()
        WHERE id = $1
          AND version = $2
        RETURNING *
        "#,
    )
    .bind(invoice.id)
    .bind(expected_version)
    .bind(invoice.paid_amount)
    .bind(invoice.fine)
    .bind(invoice.status.as_str())
    .bind(invoice.last_payment_at)
    .fetch_optional(executor)
    .await?;

    row.map(|row| map_row(&row)).transpose()
}

pub async fn overdue_candidates<'c, E>(
    executor: E,
    due_before: NaiveDate,
    after: Option<Uuid>,
    limit: usize,
) -> Result<Vec<Invoice>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let rows = sqlx::query(
        r#"
        SELECT * FROM spp_invoices
        WHERE status IN ('pending', 'partial')
          AND due_date < $1
          AND ($2::uuid IS NULL OR id > $2)
        ORDER BY id ASC
        LIMIT $3
        "#,
    )
    .bind(due_before)
    .bind(after)
    .bind(limit as i64)
    .fetch_all(executor)
    .await?;

    rows.iter().map(map_row).collect()
}

pub async fn mark_overdue<'c, E>(executor: E, updates: &[OverdueUpdate]) -> Result<usize, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let ids: Vec<Uuid> = updates.iter().map(|update| update.invoice_id).collect();
    let versions: Vec<i64> = updates.iter().map(|update| update.expected_version).collect();
    let fines: Vec<i64> = updates.iter().map(|update| update.fine).collect();

    let rows = sqlx::query(
        r#"
        UPDATE spp_invoices AS i
        SET
            status = 'overdue',
            fine = GREATEST(i.fine, u.fine),
            version = i.version + 1,
            updated_at = NOW()
        FROM UNNEST($1::uuid[], $2::int8[], $3::int8[]) AS u(id, expected_version, fine)
        WHERE i.id = u.id
          AND i.version = u.expected_version
          AND i.status IN ('pending', 'partial')
        RETURNING i.id
        "#,
    )
    .bind(&ids)
    .bind(&versions)
    .bind(&fines)
    .fetch_all(executor)
    .await?;

    Ok(rows.len())
}

pub async fn find<'c, E>(executor: E, filter: &InvoiceFilter) -> Result<Vec<Invoice>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let rows = sqlx::query(
        r#"
        SELECT * FROM spp_invoices
        WHERE ($1::uuid IS NULL OR plan_id = $1)
          AND ($2::uuid IS NULL OR student_id = $2)
          AND ($3::text IS NULL OR status = $3)
          AND ($4::int4 IS NULL OR (period_year, period_month) >= ($4::int4, $5::int4))
          AND ($6::int4 IS NULL OR (period_year, period_month) <= ($6::int4, $7::int4))
        ORDER BY period_year ASC, period_month ASC, student_id ASC
        "#,
    )
    .bind(filter.plan_id)
    .bind(filter.student_id)
    .bind(filter.status.map(|status| status.as_str()))
    .bind(filter.period_from.map(|(year, _)| year))
    .bind(filter.period_from.map(|(_, month)| month_column(month)))
    .bind(filter.period_to.map(|(year, _)| year))
    .bind(filter.period_to.map(|(_, month)| month_column(month)))
    .fetch_all(executor)
    .await?;

    rows.iter().map(map_row).collect()
}

/// Months above `i32::MAX` clamp instead of wrapping, which keeps range comparisons ordered.
fn month_column(month: u32) -> i32 {
    i32::try_from(month).unwrap_or(i32::MAX)
}

fn map_row(row: &PgRow) -> Result<Invoice, sqlx::Error> {
    let status: String = row.get("status");
    let status = status
        .parse::<InvoiceStatus>()
        .map_err(|err| sqlx::Error::Decode(err.into()))?;
    let fine_kind: String = row.get("fine_kind");
    let last_payment_at: Option<DateTime<Utc>> = row.try_get("last_payment_at")?;

    Ok(Invoice {
        id: row.get("id"),
        student_id: row.get("student_id"),
        plan_id: row.get("plan_id"),
        month: row.get::<i32, _>("period_month") as u32,
        year: row.get("period_year"),
        due_date: row.get("due_date"),
        base_amount: row.get("base_amount"),
        discount: row.get("discount"),
        fine: row.get("fine"),
        paid_amount: row.get("paid_amount"),
        status,
        fine_policy: FinePolicy::from_columns(
            &fine_kind,
            row.get("fine_amount"),
            row.get("fine_grace_days"),
            row.get("fine_cap"),
        ),
        version: row.get("version"),
        created_at: row.get("created_at"),
        last_payment_at,
    })
}
