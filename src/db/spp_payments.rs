use sqlx::{postgres::PgRow, Executor, Postgres, Row};
use uuid::Uuid;

use crate::billing::models::Payment;

pub async fn insert_payment<'c, E>(executor: E, payment: &Payment) -> Result<(), sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        "INSERT INTO spp_payments (id, invoice_id, amount, applied_at, created_at) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(payment.id)
    .bind(payment.invoice_id)
    .bind(payment.amount)
    .bind(payment.applied_at)
    .bind(payment.created_at)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn list_for_invoice<'c, E>(
    executor: E,
    invoice_id: Uuid,
) -> Result<Vec<Payment>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let rows = sqlx::query(
        r#"
        SELECT id, invoice_id, amount, applied_at, created_at
        FROM spp_payments
        WHERE invoice_id = $1
        ORDER BY applied_at ASC, created_at ASC
        "#,
    )
    .bind(invoice_id)
    .fetch_all(executor)
    .await?;

    Ok(rows.iter().map(map_row).collect())
}

fn map_row(row: &PgRow) -> Payment {
    Payment {
        id: row.get("id"),
        invoice_id: row.get("invoice_id"),
        amount: row.get("amount"),
        applied_at: row.get("applied_at"),
        created_at: row.get("created_at"),
    }
}
