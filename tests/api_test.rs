use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use std::time::Duration;
use stream_relay::{
    api::{build_router, AppState},
    messaging::{
        handler_fn, BindingConfig, Message, Role, StreamConfig, StreamContext,
    },
};
use tokio::sync::mpsc;
use tower::ServiceExt;

fn binding(channel: &str, destination: &str, role: Role) -> BindingConfig {
    BindingConfig {
        channel: channel.to_string(),
        destination: destination.to_string(),
        role,
        group: None,
        binder: None,
    }
}

async fn relay_context() -> StreamContext {
    let config = StreamConfig {
        bindings: vec![
            binding("invoiceOutput", "invoice-topic", Role::Producer),
            binding("invoiceInput", "invoice-topic", Role::Consumer),
        ],
        ..StreamConfig::default()
    };
    StreamContext::from_config(&config).await.unwrap()
}

fn app(context: &StreamContext) -> Router {
    build_router(AppState::new(context.dispatcher().clone()).with_context(context.clone()))
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn post(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "text/plain")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// POST /sendInvoice publishes the body and echoes it back
#[tokio::test]
async fn test_send_invoice_reaches_consumer() {
    let context = relay_context().await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    context
        .dispatcher()
        .subscribe(
            "invoiceInput",
            handler_fn(move |message: Message| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(message.payload_str().into_owned());
                    anyhow::Ok(())
                }
            }),
        )
        .await
        .unwrap();

    let response = app(&context)
        .oneshot(post("/sendInvoice", "INV-1"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "Invoice message sent: INV-1");

    let payload = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payload, "INV-1");
}

/// POST /sendPayment without a paymentOutput binding is a server error
#[tokio::test]
async fn test_send_payment_unbound() {
    let context = relay_context().await;

    let response = app(&context)
        .oneshot(post("/sendPayment", "PAY-1"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["error"]["code"], "CONFIGURATION_ERROR");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("paymentOutput"));
}

/// POST /sendPayment with a binding echoes the payload
#[tokio::test]
async fn test_send_payment() {
    let config = StreamConfig {
        bindings: vec![binding("paymentOutput", "order-topic", Role::Producer)],
        ..StreamConfig::default()
    };
    let context = StreamContext::from_config(&config).await.unwrap();

    let response = app(&context)
        .oneshot(post("/sendPayment", "PAY-2"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "Payment message sent: PAY-2");
}

/// GET /health reports the active binder
#[tokio::test]
async fn test_health_endpoint() {
    let context = relay_context().await;

    let response = app(&context)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["binder"], "memory");
    assert_eq!(body["connected"], true);
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

/// GET /metrics exposes relay counters in Prometheus text format
#[tokio::test]
async fn test_metrics_endpoint() {
    let context = relay_context().await;
    let app = app(&context);

    let _ = app
        .clone()
        .oneshot(post("/sendInvoice", "INV-9"))
        .await
        .unwrap();

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("relay_messages_published_total"));
}

/// The metrics route is absent when Prometheus is disabled
#[tokio::test]
async fn test_metrics_endpoint_disabled() {
    let context = relay_context().await;
    let app = build_router(AppState::new(context.dispatcher().clone()).with_prometheus(false));

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
