//! Webhook signature verification and reconciliation tests

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use common::*;

fn webhook_request(payload: String, signature: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/payments/webhook")
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header(SIGNATURE_HEADER, signature);
    }
    builder.body(Body::from(payload)).unwrap()
}

async fn deliver(ctx: &TestContext, body: &Value) -> (StatusCode, Value) {
    let (payload, header) = ctx.signed_webhook(body);
    let response = ctx
        .app()
        .oneshot(webhook_request(payload, Some(&header)))
        .await
        .unwrap();
    let status = response.status();
    (status, body_json(response).await)
}

// ============ Signature verification ============

#[test]
fn test_verifier_accepts_own_signature() {
    let verifier = WebhookVerifier::new(WEBHOOK_SECRET);
    let payload = br#"{"event_type":"PAYMENT_COMPLETED"}"#;
    let header = verifier.signature_header(payload, now()).unwrap();
    assert!(verifier.verify(payload, &header).unwrap());
}

#[test]
fn test_verifier_rejects_wrong_secret() {
    let signer = WebhookVerifier::new("wrong_secret");
    let verifier = WebhookVerifier::new(WEBHOOK_SECRET);
    let payload = br#"{"event_type":"PAYMENT_COMPLETED"}"#;
    let header = signer.signature_header(payload, now()).unwrap();
    assert!(!verifier.verify(payload, &header).unwrap());
}

#[test]
fn test_verifier_rejects_modified_payload() {
    let verifier = WebhookVerifier::new(WEBHOOK_SECRET);
    let header = verifier
        .signature_header(br#"{"event_type":"PAYMENT_FAILED"}"#, now())
        .unwrap();
    assert!(!verifier
        .verify(br#"{"event_type":"PAYMENT_COMPLETED"}"#, &header)
        .unwrap());
}

#[test]
fn test_verifier_rejects_stale_and_future_timestamps() {
    let verifier = WebhookVerifier::new(WEBHOOK_SECRET);
    let payload = b"{}";

    let stale = verifier.signature_header(payload, now() - 600).unwrap();
    assert!(!verifier.verify(payload, &stale).unwrap());

    let future = verifier.signature_header(payload, now() + 600).unwrap();
    assert!(!verifier.verify(payload, &future).unwrap());

    let slight_skew = verifier.signature_header(payload, now() + 30).unwrap();
    assert!(verifier.verify(payload, &slight_skew).unwrap());
}

#[test]
fn test_verifier_malformed_header_is_error() {
    let verifier = WebhookVerifier::new(WEBHOOK_SECRET);
    assert!(verifier.verify(b"{}", "garbage").is_err());
    assert!(verifier.verify(b"{}", "t=abc,v1=00").is_err());
    assert!(verifier.verify(b"{}", "v1=00").is_err());
}

#[tokio::test]
async fn test_unsigned_webhook_is_unauthorized_and_ignored() {
    let ctx = TestContext::new();
    let order = ctx.pending_order(OWNER, OrderScope::all());
    let payload = webhook_body("PAYMENT_COMPLETED", &order.id, Some("pk_1")).to_string();

    let response = ctx.app().oneshot(webhook_request(payload, None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(ctx.order(&order.id).status, OrderStatus::Pending);
}

#[tokio::test]
async fn test_badly_signed_webhook_is_unauthorized_and_ignored() {
    let ctx = TestContext::new();
    let order = ctx.pending_order(OWNER, OrderScope::all());
    let payload = webhook_body("PAYMENT_COMPLETED", &order.id, Some("pk_1")).to_string();
    let forged = WebhookVerifier::new("attacker")
        .signature_header(payload.as_bytes(), now())
        .unwrap();

    let response = ctx
        .app()
        .oneshot(webhook_request(payload, Some(&forged)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["code"], "unauthorized");
    assert_eq!(ctx.order(&order.id).status, OrderStatus::Pending);
    assert_eq!(ctx.events(&order.id).len(), 1, "only the created record");
}

#[tokio::test]
async fn test_malformed_signature_header_is_unauthorized() {
    let ctx = TestContext::new();
    let order = ctx.pending_order(OWNER, OrderScope::all());
    let payload = webhook_body("PAYMENT_FAILED", &order.id, None).to_string();

    let response = ctx
        .app()
        .oneshot(webhook_request(payload, Some("not-a-signature")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(ctx.order(&order.id).status, OrderStatus::Pending);
}

// ============ Reconciliation ============

#[tokio::test]
async fn test_payment_completed_settles_pending_order() {
    let ctx = TestContext::new();
    let order = ctx.pending_order(OWNER, OrderScope::all());

    let (status, body) = deliver(&ctx, &webhook_body("PAYMENT_COMPLETED", &order.id, Some("pk_1"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "applied");
    assert_eq!(body["status"], "completed");

    let stored = ctx.order(&order.id);
    assert_eq!(stored.status, OrderStatus::Completed);
    assert_eq!(stored.gateway_reference.as_deref(), Some("pk_1"));
}

#[tokio::test]
async fn test_redelivered_webhook_is_acknowledged_without_change() {
    let ctx = TestContext::new();
    let order = ctx.pending_order(OWNER, OrderScope::all());
    let body = webhook_body("PAYMENT_COMPLETED", &order.id, Some("pk_1"));

    deliver(&ctx, &body).await;
    let paid_at = ctx.order(&order.id).paid_at;

    let (status, ack) = deliver(&ctx, &body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["outcome"], "already_applied");
    let stored = ctx.order(&order.id);
    assert_eq!(stored.status, OrderStatus::Completed);
    assert_eq!(stored.paid_at, paid_at);

    let outcomes: Vec<WebhookOutcome> = ctx
        .events(&order.id)
        .into_iter()
        .filter_map(|e| match e {
            OrderEventRecord::Webhook { outcome, .. } => Some(outcome),
            _ => None,
        })
        .collect();
    assert_eq!(outcomes, vec![WebhookOutcome::Applied, WebhookOutcome::AlreadyApplied]);
}

#[tokio::test]
async fn test_payment_canceled_refunds_completed_order() {
    let ctx = TestContext::new();
    let order = ctx.completed_order(OWNER, OrderScope::all());

    let (status, ack) = deliver(&ctx, &webhook_body("PAYMENT_CANCELED", &order.id, None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["status"], "refunded");
    assert!(ctx.order(&order.id).refunded_at.is_some());
}

#[tokio::test]
async fn test_payment_canceled_cancels_pending_order() {
    let ctx = TestContext::new();
    let order = ctx.pending_order(OWNER, OrderScope::all());

    let (_, ack) = deliver(&ctx, &webhook_body("PAYMENT_CANCELED", &order.id, None)).await;

    assert_eq!(ack["status"], "cancelled");
}

#[tokio::test]
async fn test_late_completion_after_refund_is_a_conflict() {
    let ctx = TestContext::new();
    let order = ctx.completed_order(OWNER, OrderScope::all());
    let reference = order.gateway_reference.clone().unwrap();
    deliver(&ctx, &webhook_body("PAYMENT_CANCELED", &order.id, None)).await;

    let (status, ack) = deliver(
        &ctx,
        &webhook_body("PAYMENT_COMPLETED", &order.id, Some(&reference)),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["outcome"], "conflict");
    assert_eq!(ack["status"], "refunded");
    assert_eq!(ctx.order(&order.id).status, OrderStatus::Refunded);
}

#[tokio::test]
async fn test_payment_failed_fails_pending_order() {
    let ctx = TestContext::new();
    let order = ctx.pending_order(OWNER, OrderScope::all());

    let (_, ack) = deliver(&ctx, &webhook_body("PAYMENT_FAILED", &order.id, None)).await;

    assert_eq!(ack["outcome"], "applied");
    assert_eq!(ctx.order(&order.id).status, OrderStatus::Failed);
}

#[tokio::test]
async fn test_webhook_for_unknown_order_is_not_found() {
    let ctx = TestContext::new();
    let (status, body) = deliver(&ctx, &webhook_body("PAYMENT_FAILED", "missing", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn test_unknown_event_type_is_rejected() {
    let ctx = TestContext::new();
    let order = ctx.pending_order(OWNER, OrderScope::all());

    let (status, body) = deliver(&ctx, &webhook_body("PAYMENT_EXPIRED", &order.id, None)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");
    assert_eq!(ctx.order(&order.id).status, OrderStatus::Pending);
}

#[tokio::test]
async fn test_completion_without_reference_is_rejected() {
    let ctx = TestContext::new();
    let order = ctx.pending_order(OWNER, OrderScope::all());

    let (status, _) = deliver(&ctx, &webhook_body("PAYMENT_COMPLETED", &order.id, None)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(ctx.order(&order.id).status, OrderStatus::Pending);
}

#[tokio::test]
async fn test_completion_with_wrong_amount_fails_order() {
    let ctx = TestContext::new();
    let order = ctx.pending_order(OWNER, OrderScope::all());
    let body = json!({
        "event_type": "PAYMENT_COMPLETED",
        "data": {
            "order_id": order.id,
            "gateway_reference": "pk_1",
            "status": "DONE",
            "amount": 100,
        }
    });

    let (status, ack) = deliver(&ctx, &body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["status"], "failed");
    assert!(ctx.events(&order.id).contains(&OrderEventRecord::AmountMismatch {
        expected: order.amount,
        claimed: 100,
        source: AmountSource::Webhook,
    }));
}

#[test]
fn test_webhook_racing_confirm_resolves_once() {
    // Confirm landed first; the webhook for the same payment is a redelivery.
    let conn = setup_test_db();
    let order = create_pending_order(&conn, OWNER, SUBJECT, OrderScope::all());
    ledger::transition(
        &conn,
        &order.id,
        &LedgerEvent::ConfirmSucceeded {
            gateway_reference: "pk_1".into(),
        },
    )
    .unwrap();

    let payload: reportgate::payments::WebhookPayload =
        serde_json::from_value(webhook_body("PAYMENT_COMPLETED", &order.id, Some("pk_1"))).unwrap();
    let ack = reconcile::apply_webhook(&conn, &payload).unwrap();

    assert_eq!(ack.outcome, WebhookOutcome::AlreadyApplied);
    assert_eq!(ack.status, OrderStatus::Completed);
}
