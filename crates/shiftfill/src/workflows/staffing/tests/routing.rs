use super::common::*;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::IntoResponse;
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::workflows::staffing::{
    staffing_router, CompletionSignal, ConflictKind, Ineligibility, MarketplaceError,
    ProviderError, RepositoryError, ShiftId,
};

fn router(harness: &Harness) -> Router {
    staffing_router(harness.service.clone())
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn admin_body() -> Value {
    json!({ "actor": { "kind": "admin", "id": "ops" } })
}

#[tokio::test]
async fn post_shift_route_creates_a_pending_shift() {
    let harness = build_service(Vec::new());

    let response = router(&harness)
        .oneshot(post(
            "/api/v1/staffing/shifts",
            serde_json::to_value(posting()).unwrap(),
        ))
        .await
        .unwrap();

    let (status, body) = json_body(response).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "pending_approval");
    assert_eq!(body["business_id"], "biz-1");
}

#[tokio::test]
async fn unknown_shift_returns_not_found() {
    let harness = build_service(Vec::new());

    let response = router(&harness)
        .oneshot(get("/api/v1/staffing/shifts/shift-missing"))
        .await
        .unwrap();

    let (status, body) = json_body(response).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn applying_to_an_unapproved_shift_is_unprocessable() {
    let harness = build_service(vec![nearby("w-a")]);
    let shift = harness.service.post_shift(posting(), now()).expect("posted");

    let response = router(&harness)
        .oneshot(post(
            &format!("/api/v1/staffing/shifts/{}/applications", shift.id),
            json!({ "worker_id": "w-a" }),
        ))
        .await
        .unwrap();

    let (status, body) = json_body(response).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], "not_eligible");
}

#[tokio::test]
async fn application_flow_over_http() {
    let harness = build_service(vec![nearby("w-a")]);
    let shift = open_shift(&harness);
    let app = router(&harness);
    let applications = format!("/api/v1/staffing/shifts/{}/applications", shift.id);

    let response = app
        .clone()
        .oneshot(post(&applications, json!({ "worker_id": "w-a" })))
        .await
        .unwrap();
    let (status, application) = json_body(response).await;
    assert_eq!(status, StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(post(&applications, json!({ "worker_id": "w-a" })))
        .await
        .unwrap();
    let (status, body) = json_body(response).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "conflict");

    let approve = format!(
        "{applications}/{}/approve",
        application["id"].as_str().unwrap()
    );
    let response = app
        .clone()
        .oneshot(post(
            &approve,
            json!({ "actor": { "kind": "business", "id": "biz-1" } }),
        ))
        .await
        .unwrap();
    let (status, report) = json_body(response).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["assignment"]["worker_id"], "w-a");
    assert_eq!(report["shift"]["status"], "filled");
    assert_eq!(report["payment"]["status"], "in_escrow");

    let payment = format!(
        "/api/v1/staffing/assignments/{}/payment",
        report["assignment"]["id"].as_str().unwrap()
    );
    let response = app.oneshot(get(&payment)).await.unwrap();
    let (status, body) = json_body(response).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["held_cents"], SHIFT_AMOUNT_CENTS);
}

#[tokio::test]
async fn admin_routes_reject_non_admin_actors() {
    let harness = build_service(Vec::new());
    let shift = open_shift(&harness);

    let response = router(&harness)
        .oneshot(post(
            &format!("/api/v1/staffing/admin/shifts/{}/flag", shift.id),
            json!({
                "actor": { "kind": "business", "id": "biz-1" },
                "reason": "self-flag"
            }),
        ))
        .await
        .unwrap();

    let (status, body) = json_body(response).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation");
}

#[tokio::test]
async fn sweep_route_reports_counts() {
    let harness = build_service(Vec::new());
    open_shift(&harness);

    let response = router(&harness)
        .oneshot(post("/api/v1/staffing/admin/sweep", json!({})))
        .await
        .unwrap();

    let (status, body) = json_body(response).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["shifts_scanned"], 1);
    assert_eq!(body["errors"], 0);
}

#[tokio::test]
async fn manual_no_show_requires_an_admin() {
    let harness = build_service(Vec::new());

    let response = router(&harness)
        .oneshot(post(
            "/api/v1/staffing/admin/assignments/asg-000001/no-show",
            json!({ "actor": { "kind": "system" } }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = router(&harness)
        .oneshot(post(
            "/api/v1/staffing/admin/assignments/asg-missing/no-show",
            admin_body(),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn businesses_cannot_approve_shifts_or_release_escrow() {
    let harness = build_service(vec![nearby("w-a")]);
    let business_body = json!({ "actor": { "kind": "business", "id": "biz-1" } });
    let pending = harness.service.post_shift(posting(), now()).expect("posted");

    let response = router(&harness)
        .oneshot(post(
            &format!("/api/v1/staffing/shifts/{}/approve", pending.id),
            business_body.clone(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let shift = open_shift(&harness);
    let application = harness
        .service
        .apply(&shift.id, &worker("w-a"), now())
        .expect("applies");
    let assignment = harness
        .service
        .approve_application(&shift.id, &application.id, &business(), now())
        .expect("wins")
        .win
        .assignment;
    harness
        .service
        .check_in(&assignment.id, &worker("w-a"), shift.starts_at)
        .expect("checks in");
    let payment = harness
        .service
        .complete(&assignment.id, CompletionSignal::Scheduled, &business(), shift.ends_at)
        .expect("completes")
        .payment
        .expect("payment");

    let response = router(&harness)
        .oneshot(post(
            &format!("/api/v1/staffing/payments/{}/release", payment.id),
            business_body,
        ))
        .await
        .unwrap();
    let (status, body) = json_body(response).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation");
    assert!(harness.provider.calls("release").is_empty());
}

#[tokio::test]
async fn contention_and_provider_errors_carry_identifiers() {
    let contention = MarketplaceError::TransientContention {
        shift_id: ShiftId::from("shift-9"),
        attempts: 8,
    };
    let (status, body) = json_body(contention.into_response()).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["shift_id"], "shift-9");
    assert_eq!(body["retryable"], true);

    let provider = MarketplaceError::PaymentProvider {
        payment_id: "pay-1".into(),
        source: ProviderError::Unavailable("timeout".to_string()),
    };
    let (status, body) = json_body(provider.into_response()).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["payment_id"], "pay-1");
}

#[test]
fn error_status_mapping() {
    let cases = [
        (MarketplaceError::validation("bad"), StatusCode::BAD_REQUEST),
        (
            MarketplaceError::NotEligible(Ineligibility::ShiftFlagged("shift-1".into())),
            StatusCode::UNPROCESSABLE_ENTITY,
        ),
        (
            MarketplaceError::Conflict(ConflictKind::ShiftAlreadyFilled("shift-1".into())),
            StatusCode::CONFLICT,
        ),
        (MarketplaceError::not_found("shift 1"), StatusCode::NOT_FOUND),
        (
            MarketplaceError::InvariantViolation("two active assignments".to_string()),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
        (
            MarketplaceError::Repository(RepositoryError::Unavailable("down".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
    ];

    for (error, expected) in cases {
        assert_eq!(error.status_code(), expected, "{error}");
    }
}
