//! Lead intake and the referral credit pipeline.

mod common;

use common::TestApp;
use diesel::prelude::*;
use serde_json::json;
use serial_test::serial;
use uuid::Uuid;

use maidflow::schema::{leads, referral_credits};

fn estimate_snapshot() -> serde_json::Value {
    json!({
        "total_before_tax_cents": 27_000,
        "time_on_site_hours": 3.5,
        "line_items": [],
    })
}

#[tokio::test]
#[serial]
async fn public_intake_creates_a_lead_with_referral_code() {
    // Arrange
    let app = TestApp::spawn().await;

    // Act
    let response = app
        .post_public(
            "/v1/leads",
            json!({
                "name": "Dana Miles",
                "phone": "+15551230000",
                "email": "dana@example.com",
                "structured_inputs": { "cleaning_type": "deep", "bedrooms": 2, "bathrooms": 2 },
                "estimate_snapshot": estimate_snapshot(),
            }),
        )
        .await;

    // Assert
    assert_eq!(response.status().as_u16(), 201);
    let body: serde_json::Value = response.json().await.expect("lead");
    assert_eq!(body["status"], "NEW");
    let code = body["referral_code"].as_str().unwrap();
    assert_eq!(code.len(), 8);
}

#[tokio::test]
#[serial]
async fn intake_rejects_a_broken_estimate_snapshot() {
    // Arrange
    let app = TestApp::spawn().await;

    // Act: snapshot missing its total.
    let response = app
        .post_public(
            "/v1/leads",
            json!({
                "name": "Dana Miles",
                "phone": "+15551230000",
                "structured_inputs": {},
                "estimate_snapshot": { "time_on_site_hours": 2.0 },
            }),
        )
        .await;

    // Assert
    assert_eq!(response.status().as_u16(), 422);
}

#[tokio::test]
#[serial]
async fn unknown_referral_code_is_rejected() {
    // Arrange
    let app = TestApp::spawn().await;

    // Act
    let response = app
        .post_public(
            "/v1/leads",
            json!({
                "name": "Dana Miles",
                "phone": "+15551230000",
                "structured_inputs": {},
                "estimate_snapshot": estimate_snapshot(),
                "referral_code": "NOPE9999",
            }),
        )
        .await;

    // Assert
    assert_eq!(response.status().as_u16(), 422);
}

#[tokio::test]
#[serial]
async fn referral_credit_grants_once_on_confirmation_and_voids_on_cancel() {
    // Arrange: referrer lead R, then referred lead L whose booking pays a
    // deposit.
    let app = TestApp::spawn().await;
    let referrer_id = app.create_lead_for_org(app.default_org_id, Some("referrer@example.com"));

    let referrer_code: String = {
        let mut conn = app.conn();
        leads::table
            .find(referrer_id)
            .select(leads::referral_code)
            .first(&mut conn)
            .expect("referrer code")
    };

    let response = app
        .post_public(
            "/v1/leads",
            json!({
                "name": "Referred Friend",
                "phone": "+15559998888",
                "email": "friend@example.com",
                "structured_inputs": { "cleaning_type": "deep" },
                "estimate_snapshot": estimate_snapshot(),
                // Intake normalizes case.
                "referral_code": referrer_code.to_lowercase(),
            }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 201);
    let referred: serde_json::Value = response.json().await.expect("lead");
    let referred_id: Uuid = referred["id"].as_str().unwrap().parse().unwrap();

    let credit_state = |app: &TestApp| -> String {
        let mut conn = app.conn();
        referral_credits::table
            .filter(referral_credits::source_lead_id.eq(referred_id))
            .select(referral_credits::state)
            .first(&mut conn)
            .expect("credit row")
    };
    assert_eq!(credit_state(&app), "PENDING");

    // Act: book with deposit, then pay it.
    let booking = app
        .post_public(
            "/v1/bookings",
            json!({
                "lead_id": referred_id,
                "starts_at": TestApp::saturday_slot(),
                "time_on_site_hours": 3.5,
            }),
        )
        .await;
    assert_eq!(booking.status().as_u16(), 201);
    let body: serde_json::Value = booking.json().await.expect("booking");
    let booking_id = body["booking"]["id"].as_str().unwrap().to_string();

    let session_id: String = {
        let mut conn = app.conn();
        maidflow::schema::bookings::table
            .find(booking_id.parse::<Uuid>().unwrap())
            .select(maidflow::schema::bookings::checkout_session_id)
            .first::<Option<String>>(&mut conn)
            .expect("session")
            .expect("session id")
    };

    let event_id = format!("evt_ref_{}", Uuid::new_v4().simple());
    app.deliver_webhook(&event_id, "checkout.session.completed", &session_id)
        .await;

    // Assert: granted exactly once, replays included.
    assert_eq!(credit_state(&app), "GRANTED");
    app.deliver_webhook(&event_id, "checkout.session.completed", &session_id)
        .await;
    assert_eq!(credit_state(&app), "GRANTED");

    // Act: cancelling the confirmed booking reverses the credit once.
    {
        let mut conn = app.conn();
        maidflow::domain::bookings::cancel(
            &mut conn,
            app.default_org_id,
            booking_id.parse().unwrap(),
        )
        .expect("cancel");
    }
    assert_eq!(credit_state(&app), "VOIDED");
}
