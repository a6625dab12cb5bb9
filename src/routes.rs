use axum::{routing::get, Extension, Router};

use crate::billing::{self, BillingService};

async fn root() -> &'static str {
    "SPP Billing API"
}

pub fn api_routes() -> Router {
    Router::new()
        .route("/", get(root))
        .merge(billing::api::routes())
}

/// Full application router with the billing service attached.
pub fn app(service: BillingService) -> Router {
    api_routes().layer(Extension(service))
}
