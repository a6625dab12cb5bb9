use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, Executor, Postgres, Row};
use uuid::Uuid;

use crate::billing::models::{BillingPlan, FinePolicy};

pub async fn get_plan<'c, E>(executor: E, plan_id: Uuid) -> Result<Option<BillingPlan>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let row = sqlx::query(
        r#"
        SELECT
            id,
            code,
            name,
            level,
            base_amount,
            active,
            fine_kind,
            fine_amount,
            fine_grace_days,
            fine_cap,
            created_at
        FROM spp_billing_plans
        WHERE id = $1
        "#,
    )
    .bind(plan_id)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(|row| map_row(&row)))
}

pub async fn list_active_plans<'c, E>(executor: E) -> Result<Vec<BillingPlan>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let rows = sqlx::query(
        "SELECT * FROM spp_billing_plans WHERE active = TRUE ORDER BY created_at ASC",
    )
    .fetch_all(executor)
    .await?;

    Ok(rows.iter().map(map_row).collect())
}

#[derive(Debug, Clone)]
pub struct InsertBillingPlan<'a> {
    pub code: &'a str,
    pub name: &'a str,
    pub level: &'a str,
    pub base_amount: i64,
    pub fine_policy: FinePolicy,
}

/// Seeds a plan. Plan administration lives outside the engine; this exists for tooling and tests.
pub async fn insert_plan<'c, E>(
    executor: E,
    input: InsertBillingPlan<'_>,
) -> Result<BillingPlan, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let (fine_kind, fine_amount, fine_grace_days, fine_cap) = input.fine_policy.to_columns();
    let row = sqlx::query(
        r#"
        INSERT INTO spp_billing_plans (
            id,
            code,
            name,
            level,
            base_amount,
            fine_kind,
            fine_amount,
            fine_grace_days,
            fine_cap
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(input.code)
    .bind(input.name)
    .bind(input.level)
    .bind(input.base_amount)
    .bind(fine_kind)
    .bind(fine_amount)
    .bind(fine_grace_days)
    .bind(fine_cap)
    .fetch_one(executor)
    .await?;

    Ok(map_row(&row))
}

fn map_row(row: &PgRow) -> BillingPlan {
    let fine_kind: String = row.get("fine_kind");
    let created_at: DateTime<Utc> = row.get("created_at");
    BillingPlan {
        id: row.get("id"),
        code: row.get("code"),
        name: row.get("name"),
        level: row.get("level"),
        base_amount: row.get("base_amount"),
        active: row.get("active"),
        fine_policy: FinePolicy::from_columns(
            &fine_kind,
            row.get("fine_amount"),
            row.get("fine_grace_days"),
            row.get("fine_cap"),
        ),
        created_at,
    }
}
