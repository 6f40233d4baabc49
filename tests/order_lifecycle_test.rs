mod common;

use axum::http::{Method, StatusCode};
use common::{body_json, TestApp};
use orderflow_api::{entities::order::OrderStatus, errors::ServiceError};
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;

async fn place_order(app: &TestApp, method: &str) -> (Uuid, String) {
    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({
                "items": [{ "reference": "gizmo", "quantity": 1 }],
                "email": "jo@example.com",
                "payment_method": method,
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    let order = &body["data"]["order"];
    (
        order["id"].as_str().unwrap().parse().unwrap(),
        order["order_number"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn forward_transitions_are_accepted() {
    let app = TestApp::new().await;
    app.seed_variant("gizmo", "GIZ-1", dec!(10.00), 5).await;
    let (id, _) = place_order(&app, "cash_on_delivery").await;

    for status in ["processing", "shipped", "delivered"] {
        let response = app
            .request(
                Method::PUT,
                &format!("/api/v1/orders/{}/status", id),
                Some(json!({ "status": status })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK, "moving to {}", status);
        let body = body_json(response).await;
        assert_eq!(body["data"]["status"], status);
    }
}

#[tokio::test]
async fn skipping_a_step_is_rejected() {
    let app = TestApp::new().await;
    app.seed_variant("gizmo", "GIZ-1", dec!(10.00), 5).await;
    let (id, _) = place_order(&app, "cash_on_delivery").await;

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{}/status", id),
            Some(json!({ "status": "delivered" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn terminal_orders_cannot_move() {
    let app = TestApp::new().await;
    app.seed_variant("gizmo", "GIZ-1", dec!(10.00), 5).await;
    let (id, _) = place_order(&app, "cash_on_delivery").await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/cancel", id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{}/status", id),
            Some(json!({ "status": "processing" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn status_change_notifies_once_and_noop_is_silent() {
    let app = TestApp::new().await;
    app.seed_variant("gizmo", "GIZ-1", dec!(10.00), 5).await;
    let (id, _) = place_order(&app, "gateway").await;

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{}/status", id),
            Some(json!({ "status": "processing" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let deliveries = app.notifications.wait_for(1).await;
    assert_eq!(deliveries.len(), 1);
    assert!(deliveries[0].body.contains("processing"));

    // Same status again: 200, but no new notification.
    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{}/status", id),
            Some(json!({ "status": "processing" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(app.notifications.count(), 1);
}

#[tokio::test]
async fn stale_status_update_is_refused() {
    let app = TestApp::new().await;
    app.seed_variant("gizmo", "GIZ-1", dec!(10.00), 5).await;
    let (id, _) = place_order(&app, "gateway").await;

    // Two writers validate against the same read of the row.
    let observed = app.state.services.orders.get_order(id).await.unwrap();

    app.state
        .services
        .state_machine
        .apply_transition(&observed, OrderStatus::Processing, None)
        .await
        .unwrap();

    // The second writer still holds the stale version and must lose, even
    // though pending -> cancelled would have been valid against its read.
    let err = app
        .state
        .services
        .state_machine
        .apply_transition(&observed, OrderStatus::Cancelled, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));

    let order = app.state.services.orders.get_order(id).await.unwrap();
    assert_eq!(order.status.to_string(), "processing");

    // Only the winning transition notified.
    let deliveries = app.notifications.wait_for(1).await;
    assert_eq!(deliveries.len(), 1);
}

#[tokio::test]
async fn tracking_code_change_notifies_even_without_status_change() {
    let app = TestApp::new().await;
    app.seed_variant("gizmo", "GIZ-1", dec!(10.00), 5).await;
    let (id, _) = place_order(&app, "gateway").await;

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{}/status", id),
            Some(json!({ "status": "processing" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    app.notifications.wait_for(1).await;

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{}/status", id),
            Some(json!({ "status": "processing", "tracking_code": "ZZ99YY88" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let deliveries = app.notifications.wait_for(2).await;
    assert_eq!(deliveries.len(), 2);
    assert_eq!(deliveries[1].tracking_code, "ZZ99YY88");
}

#[tokio::test]
async fn reaper_cancels_stale_unpaid_orders_only() {
    let app = TestApp::new().await;
    app.seed_variant("gizmo", "GIZ-1", dec!(10.00), 5).await;
    let (unpaid_id, _) = place_order(&app, "gateway").await;
    let (paid_id, paid_number) = place_order(&app, "gateway").await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/webhook",
            Some(json!({
                "orderReference": paid_number,
                "providerReference": "txn_77",
                "amount": "10.00",
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    // Cutoff in the future makes both orders stale candidates; the guard
    // must still spare the paid one.
    let cutoff = chrono::Utc::now() + chrono::Duration::minutes(1);
    let reaped = app
        .state
        .services
        .state_machine
        .reap_abandoned(cutoff)
        .await
        .unwrap();
    assert_eq!(reaped, 1);

    let unpaid = app.state.services.orders.get_order(unpaid_id).await.unwrap();
    assert_eq!(unpaid.status.to_string(), "cancelled");

    let paid = app.state.services.orders.get_order(paid_id).await.unwrap();
    assert_eq!(paid.status.to_string(), "pending");
    assert_eq!(paid.payment_status.to_string(), "paid");
}

#[tokio::test]
async fn payment_reminder_only_for_unpaid_pending_orders() {
    let app = TestApp::new().await;
    app.seed_variant("gizmo", "GIZ-1", dec!(10.00), 5).await;
    let (id, number) = place_order(&app, "gateway").await;

    let response = app
        .request(Method::POST, &format!("/api/v1/orders/{}/remind", id), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let deliveries = app.notifications.wait_for(1).await;
    assert_eq!(deliveries.len(), 1);
    assert!(deliveries[0].subject.contains("reminder"));

    // Once paid, reminders are refused.
    let webhook = app
        .request(
            Method::POST,
            "/api/v1/payments/webhook",
            Some(json!({
                "orderReference": number,
                "providerReference": "txn_88",
                "amount": "10.00",
            })),
        )
        .await;
    assert_eq!(webhook.status(), StatusCode::OK);

    let response = app
        .request(Method::POST, &format!("/api/v1/orders/{}/remind", id), None)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn order_lookup_by_id_and_number() {
    let app = TestApp::new().await;
    app.seed_variant("gizmo", "GIZ-1", dec!(10.00), 5).await;
    let (id, number) = place_order(&app, "cash_on_delivery").await;

    let by_id = app
        .request(Method::GET, &format!("/api/v1/orders/{}", id), None)
        .await;
    assert_eq!(by_id.status(), StatusCode::OK);
    let body = body_json(by_id).await;
    assert_eq!(body["data"]["order_number"], number.as_str());
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 1);

    let by_number = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/number/{}", number),
            None,
        )
        .await;
    assert_eq!(by_number.status(), StatusCode::OK);

    let missing = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", Uuid::new_v4()),
            None,
        )
        .await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn inventory_endpoints_round_trip() {
    let app = TestApp::new().await;
    let variant = app.seed_variant("gizmo", "GIZ-1", dec!(10.00), 5).await;

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/inventory/{}", variant.id),
            Some(json!({ "on_hand": 42 })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/inventory/{}", variant.id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["on_hand"], 42);

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/inventory/{}", variant.id),
            Some(json!({ "on_hand": -1 })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
