mod common;

use axum::http::{Method, StatusCode};
use common::{body_json, TestApp};
use rust_decimal_macros::dec;
use serde_json::json;

async fn place_order(app: &TestApp) -> (String, String) {
    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({
                "items": [{ "reference": "gizmo", "quantity": 2 }],
                "email": "jo@example.com",
                "payment_method": "cash_on_delivery",
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    let order = &body["data"]["order"];
    (
        order["order_number"].as_str().unwrap().to_string(),
        order["tracking_code"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn tracks_by_order_number_or_tracking_code() {
    let app = TestApp::new().await;
    app.seed_variant("gizmo", "GIZ-1", dec!(10.00), 5).await;
    let (number, code) = place_order(&app).await;

    for reference in [number.as_str(), code.as_str()] {
        let response = app
            .request(
                Method::GET,
                &format!(
                    "/api/v1/orders/track?reference={}&email=jo@example.com",
                    reference
                ),
                None,
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["order_number"], number.as_str());
        assert_eq!(body["data"]["total"], "20.00");
        assert_eq!(body["data"]["items"][0]["quantity"], 2);
    }
}

#[tokio::test]
async fn email_check_is_case_insensitive() {
    let app = TestApp::new().await;
    app.seed_variant("gizmo", "GIZ-1", dec!(10.00), 5).await;
    let (number, _) = place_order(&app).await;

    let response = app
        .request(
            Method::GET,
            &format!(
                "/api/v1/orders/track?reference={}&email=JO@EXAMPLE.COM",
                number
            ),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn wrong_email_is_indistinguishable_from_unknown_reference() {
    let app = TestApp::new().await;
    app.seed_variant("gizmo", "GIZ-1", dec!(10.00), 5).await;
    let (number, _) = place_order(&app).await;

    let wrong_email = app
        .request(
            Method::GET,
            &format!(
                "/api/v1/orders/track?reference={}&email=someone-else@example.com",
                number
            ),
            None,
        )
        .await;
    assert_eq!(wrong_email.status(), StatusCode::NOT_FOUND);
    let wrong_email_body = body_json(wrong_email).await;

    let unknown_reference = app
        .request(
            Method::GET,
            "/api/v1/orders/track?reference=NOPE1234&email=jo@example.com",
            None,
        )
        .await;
    assert_eq!(unknown_reference.status(), StatusCode::NOT_FOUND);
    let unknown_reference_body = body_json(unknown_reference).await;

    // Same message either way, so the endpoint leaks nothing about which
    // orders exist.
    assert_eq!(wrong_email_body["message"], unknown_reference_body["message"]);
}

#[tokio::test]
async fn tracked_view_contains_no_internal_fields() {
    let app = TestApp::new().await;
    app.seed_variant("gizmo", "GIZ-1", dec!(10.00), 5).await;
    let (number, _) = place_order(&app).await;

    let response = app
        .request(
            Method::GET,
            &format!(
                "/api/v1/orders/track?reference={}&email=jo@example.com",
                number
            ),
            None,
        )
        .await;
    let body = body_json(response).await;
    let data = body["data"].as_object().unwrap();

    assert!(!data.contains_key("id"));
    assert!(!data.contains_key("needs_review"));
    assert!(!data.contains_key("review_reason"));
    assert!(!data.contains_key("payment_reference"));
}

#[tokio::test]
async fn missing_parameters_are_rejected() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::GET,
            "/api/v1/orders/track?reference=ORD-1&email=",
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
