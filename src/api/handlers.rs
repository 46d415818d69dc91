use crate::api::AppState;
use crate::error::Result;
use crate::messaging::gather_metrics;
use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use tracing::info;

/// Channel the invoice endpoint publishes on
pub const INVOICE_OUTPUT: &str = "invoiceOutput";

/// Channel the payment endpoint publishes on
pub const PAYMENT_OUTPUT: &str = "paymentOutput";

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>> {
    let (binder, connected) = match &state.context {
        Some(context) => (
            Some(context.binder_id().to_string()),
            context.is_connected().await,
        ),
        None => (None, true),
    };

    Ok(Json(HealthResponse {
        status: if connected { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        binder,
        connected,
    }))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binder: Option<String>,
    pub connected: bool,
}

/// Publish the request body on the invoice channel
pub async fn send_invoice(State(state): State<AppState>, body: String) -> Result<String> {
    state.dispatcher.send(INVOICE_OUTPUT, body.as_bytes()).await?;
    info!(channel = INVOICE_OUTPUT, "Invoice message sent");
    Ok(format!("Invoice message sent: {}", body))
}

/// Publish the request body on the payment channel
pub async fn send_payment(State(state): State<AppState>, body: String) -> Result<String> {
    state.dispatcher.send(PAYMENT_OUTPUT, body.as_bytes()).await?;
    info!(channel = PAYMENT_OUTPUT, "Payment message sent");
    Ok(format!("Payment message sent: {}", body))
}

/// Prometheus metrics endpoint
pub async fn metrics() -> (StatusCode, String) {
    (StatusCode::OK, gather_metrics())
}
