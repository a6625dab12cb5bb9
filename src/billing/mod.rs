//! Recurring tuition (SPP) billing: invoice generation, payment reconciliation and the
//! overdue sweep.

pub mod api;
pub mod error;
pub mod generator;
pub mod ledger;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod reconciliation;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod summary;

pub use api::{
    ApplyPaymentRequest, ApplyPaymentResponse, GenerateInvoicesRequest,
    GenerateInvoicesResponse, InvoiceListResponse, InvoiceQuery,
};
pub use error::{BillingError, BillingResult, StoreError};
pub use generator::{GenerationFailure, GenerationReport, InvoiceGenerator, SkippedInvoice};
pub use ledger::{LedgerConfig, PaymentLedger};
pub use memory::InMemoryBillingStore;
pub use models::{
    BillingPeriod, BillingPlan, FinePolicy, Invoice, InvoiceFilter, InvoiceKey, InvoiceStatus,
    InvoiceSummary, Payment,
};
pub use postgres::PgBillingStore;
pub use scheduler::{run_sweep, spawn as spawn_overdue_scheduler, SweepConfig, SweepReport};
pub use service::{BillingService, InvoiceDetail, InvoiceView};
pub use store::{BillingPlanCatalog, InsertOutcome, InvoiceStore};
pub use summary::SummaryAggregator;
