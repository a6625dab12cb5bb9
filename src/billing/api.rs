use axum::{
    extract::{Extension, Path, Query},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppResult;

use super::error::BillingError;
use super::generator::GenerationFailure;
use super::models::{BillingPeriod, BillingPlan, InvoiceFilter, InvoiceStatus, InvoiceSummary};
use super::scheduler::SweepReport;
use super::service::{BillingService, InvoiceDetail, InvoiceView};

pub fn routes() -> Router {
    Router::new()
        .route("/api/spp/plans", get(list_plans))
        .route("/api/spp/generate", post(generate_invoices))
        .route("/api/spp/payments", post(apply_payment))
        .route("/api/spp/invoices", get(list_invoices))
        .route("/api/spp/invoices/:id", get(get_invoice))
        .route("/api/spp/sweep", post(run_sweep))
}

/// key: spp-api -> rest endpoints
pub async fn list_plans(
    Extension(service): Extension<BillingService>,
) -> AppResult<Json<Vec<BillingPlan>>> {
    Ok(Json(service.active_plans().await?))
}

#[derive(Debug, Deserialize)]
pub struct PeriodPayload {
    pub month: u32,
    pub year: i32,
    pub due_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct GenerateInvoicesRequest {
    pub plan_id: Uuid,
    #[serde(default)]
    pub student_ids: Vec<Uuid>,
    #[serde(default)]
    pub periods: Vec<PeriodPayload>,
}

impl GenerateInvoicesRequest {
    fn validate(&self) -> Result<Vec<BillingPeriod>, BillingError> {
        if self.student_ids.is_empty() {
            return Err(BillingError::EmptyRequest("student"));
        }
        if self.periods.is_empty() {
            return Err(BillingError::EmptyRequest("billing period"));
        }
        Ok(self
            .periods
            .iter()
            .map(|period| BillingPeriod::new(period.month, period.year, period.due_date))
            .collect())
    }
}

#[derive(Debug, Serialize)]
pub struct GenerateInvoicesResponse {
    pub success: bool,
    pub created: usize,
    pub skipped: usize,
    pub created_ids: Vec<Uuid>,
    pub failed: Vec<GenerationFailure>,
}

pub async fn generate_invoices(
    Extension(service): Extension<BillingService>,
    Json(payload): Json<GenerateInvoicesRequest>,
) -> AppResult<Json<GenerateInvoicesResponse>> {
    let periods = payload.validate()?;
    let report = service
        .generator()
        .generate(payload.plan_id, &payload.student_ids, &periods, Utc::now())
        .await?;

    Ok(Json(GenerateInvoicesResponse {
        success: report.failed.is_empty(),
        created: report.created.len(),
        skipped: report.skipped.len(),
        created_ids: report.created,
        failed: report.failed,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ApplyPaymentRequest {
    pub invoice_id: Uuid,
    pub amount: i64,
    #[serde(default)]
    pub applied_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct PaymentInvoiceBody {
    pub id: Uuid,
    pub paid_amount: i64,
    pub status: InvoiceStatus,
    pub due_amount: i64,
}

#[derive(Debug, Serialize)]
pub struct ApplyPaymentResponse {
    pub success: bool,
    pub invoice: PaymentInvoiceBody,
}

pub async fn apply_payment(
    Extension(service): Extension<BillingService>,
    Json(payload): Json<ApplyPaymentRequest>,
) -> AppResult<Json<ApplyPaymentResponse>> {
    if payload.amount <= 0 {
        return Err(BillingError::NonPositiveAmount(payload.amount).into());
    }
    let applied_at = payload.applied_at.unwrap_or_else(Utc::now);
    let invoice = service
        .ledger()
        .apply_payment(payload.invoice_id, payload.amount, applied_at)
        .await?;
    let view = InvoiceView::at(invoice, applied_at);

    Ok(Json(ApplyPaymentResponse {
        success: true,
        invoice: PaymentInvoiceBody {
            id: view.invoice.id,
            paid_amount: view.invoice.paid_amount,
            status: view.invoice.status,
            due_amount: view.due_amount,
        },
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct InvoiceQuery {
    pub plan_id: Option<Uuid>,
    pub student_id: Option<Uuid>,
    pub status: Option<InvoiceStatus>,
    pub from_year: Option<i32>,
    pub from_month: Option<u32>,
    pub to_year: Option<i32>,
    pub to_month: Option<u32>,
    pub as_of: Option<DateTime<Utc>>,
}

impl InvoiceQuery {
    fn filter(&self) -> InvoiceFilter {
        InvoiceFilter {
            plan_id: self.plan_id,
            student_id: self.student_id,
            status: self.status,
            period_from: self
                .from_year
                .map(|year| (year, self.from_month.unwrap_or(1))),
            period_to: self.to_year.map(|year| (year, self.to_month.unwrap_or(12))),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InvoiceListResponse {
    pub invoices: Vec<InvoiceView>,
    pub summary: InvoiceSummary,
}

pub async fn list_invoices(
    Extension(service): Extension<BillingService>,
    Query(query): Query<InvoiceQuery>,
) -> AppResult<Json<InvoiceListResponse>> {
    let as_of = query.as_of.unwrap_or_else(Utc::now);
    let (invoices, summary) = service.summary().summarize(&query.filter(), as_of).await?;
    let invoices = invoices
        .into_iter()
        .map(|invoice| InvoiceView::at(invoice, as_of))
        .collect();

    Ok(Json(InvoiceListResponse { invoices, summary }))
}

pub async fn get_invoice(
    Extension(service): Extension<BillingService>,
    Path(invoice_id): Path<Uuid>,
) -> AppResult<Json<InvoiceDetail>> {
    Ok(Json(service.invoice_detail(invoice_id, Utc::now()).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct SweepRequest {
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
}

pub async fn run_sweep(
    Extension(service): Extension<BillingService>,
    payload: Option<Json<SweepRequest>>,
) -> AppResult<Json<SweepReport>> {
    let as_of = payload
        .and_then(|Json(request)| request.as_of)
        .unwrap_or_else(Utc::now);
    Ok(Json(service.run_sweep(as_of).await?))
}
