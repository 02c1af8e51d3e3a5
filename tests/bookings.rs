//! Booking lifecycle: deposit flow, slot exclusivity, webhook idempotency,
//! state machine soundness.

mod common;

use common::TestApp;
use diesel::prelude::*;
use serde_json::json;
use serial_test::serial;

#[tokio::test]
#[serial]
async fn deposit_required_booking_confirms_via_webhook() {
    // Arrange: a deep-clean lead and a Saturday slot (weekend + heavy
    // cleaning + new client → deposit required).
    let app = TestApp::spawn().await;
    let lead_id = app.create_lead_for_org(app.default_org_id, Some("dana@example.com"));
    let starts_at = TestApp::saturday_slot();

    // Act: create the booking through the public endpoint.
    let response = app
        .post_public(
            "/v1/bookings",
            json!({
                "lead_id": lead_id,
                "starts_at": starts_at,
                "time_on_site_hours": 3.5,
            }),
        )
        .await;

    // Assert: 201, awaiting deposit, checkout URL present.
    assert_eq!(response.status().as_u16(), 201);
    let body: serde_json::Value = response.json().await.expect("booking response");
    assert_eq!(body["booking"]["status"], "AWAITING_DEPOSIT");
    assert_eq!(body["booking"]["deposit_required"], true);
    let checkout_url = body["checkout_url"].as_str().expect("checkout url");
    assert!(!checkout_url.is_empty());

    let booking_id = body["booking"]["id"].as_str().unwrap().to_string();
    let session_id = checkout_session_for(&app, &booking_id);

    // Act: the provider reports the deposit as paid.
    let webhook = app
        .deliver_webhook("evt_dep_1", "checkout.session.completed", &session_id)
        .await;
    assert_eq!(webhook.status().as_u16(), 200);

    // Assert: confirmed, and exactly one booking_confirmed email row.
    assert_eq!(booking_status(&app, &booking_id), "CONFIRMED");
    assert_eq!(confirmed_email_count(&app, &booking_id), 1);
}

#[tokio::test]
#[serial]
async fn webhook_replay_is_a_noop() {
    // Arrange: a confirmed deposit booking.
    let app = TestApp::spawn().await;
    let lead_id = app.create_lead_for_org(app.default_org_id, Some("replay@example.com"));
    let starts_at = TestApp::saturday_slot();

    let response = app
        .post_public(
            "/v1/bookings",
            json!({ "lead_id": lead_id, "starts_at": starts_at, "time_on_site_hours": 3.0 }),
        )
        .await;
    let body: serde_json::Value = response.json().await.expect("booking");
    let booking_id = body["booking"]["id"].as_str().unwrap().to_string();
    let session_id = checkout_session_for(&app, &booking_id);

    let event_id = format!("evt_replay_{}", uuid::Uuid::new_v4().simple());

    // Act: deliver the same event three times.
    for _ in 0..3 {
        let response = app
            .deliver_webhook(&event_id, "checkout.session.completed", &session_id)
            .await;
        assert_eq!(response.status().as_u16(), 200);
    }

    // Assert: still exactly one confirmation email, still CONFIRMED.
    assert_eq!(booking_status(&app, &booking_id), "CONFIRMED");
    assert_eq!(confirmed_email_count(&app, &booking_id), 1);
}

#[tokio::test]
#[serial]
async fn webhook_with_bad_signature_is_rejected() {
    // Arrange
    let app = TestApp::spawn().await;

    // Act: a payload signed with the wrong secret.
    let payload = json!({
        "id": "evt_forged",
        "type": "checkout.session.completed",
        "data": { "object": { "id": "cs_forged" } }
    })
    .to_string();
    let signature = maidflow::payments::sign_webhook_payload(
        &payload,
        "whsec_not_the_secret",
        chrono::Utc::now().timestamp(),
    );

    let response = app
        .client
        .post(format!("{}/v1/stripe/webhook", app.base_url))
        .header("Stripe-Signature", signature)
        .header("Content-Type", "application/json")
        .body(payload)
        .send()
        .await
        .expect("webhook request");

    // Assert
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
#[serial]
async fn unknown_webhook_event_returns_2xx() {
    // Arrange
    let app = TestApp::spawn().await;

    // Act: a well-signed event for a session nobody knows.
    let response = app
        .deliver_webhook("evt_unknown_1", "checkout.session.completed", "cs_nobody")
        .await;

    // Assert: 2xx so the provider does not retry-storm.
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.expect("webhook body");
    assert_eq!(body["result"], "unknown_session");
}

#[tokio::test]
#[serial]
async fn same_slot_second_booking_conflicts() {
    // Arrange: two clients race for the same interval.
    let app = TestApp::spawn().await;
    let starts_at = TestApp::weekday_slot();

    let body = json!({ "starts_at": starts_at, "time_on_site_hours": 2.0 });

    // Act
    let (r1, r2) = tokio::join!(
        app.post_public("/v1/bookings", body.clone()),
        app.post_public("/v1/bookings", body.clone()),
    );

    // Assert: exactly one 201, one 409 with the slot-conflict type.
    let mut statuses = vec![r1.status().as_u16(), r2.status().as_u16()];
    statuses.sort();
    assert_eq!(statuses, vec![201, 409]);

    let conflict = if r1.status().as_u16() == 409 { r1 } else { r2 };
    let problem: serde_json::Value = conflict.json().await.expect("problem");
    assert!(problem["type"].as_str().unwrap().ends_with("/slot-conflict"));
}

#[tokio::test]
#[serial]
async fn overlapping_interval_conflicts() {
    // Arrange: booking 10:00-12:30; an 11:00 start must collide.
    let app = TestApp::spawn().await;
    let starts_at = TestApp::weekday_slot();

    let first = app
        .post_public(
            "/v1/bookings",
            json!({ "starts_at": starts_at, "time_on_site_hours": 2.5 }),
        )
        .await;
    assert_eq!(first.status().as_u16(), 201);

    // Act
    let overlapping = starts_at + chrono::Duration::hours(1);
    let second = app
        .post_public(
            "/v1/bookings",
            json!({ "starts_at": overlapping, "time_on_site_hours": 2.0 }),
        )
        .await;

    // Assert
    assert_eq!(second.status().as_u16(), 409);
}

#[tokio::test]
#[serial]
async fn invalid_transition_yields_409_and_no_change() {
    // Arrange: a weekday no-deposit booking lands CONFIRMED.
    let app = TestApp::spawn().await;
    let org = admin_for_default_org(&app).await;
    let starts_at = TestApp::weekday_slot();

    let response = app
        .post_public(
            "/v1/bookings",
            json!({ "starts_at": starts_at, "time_on_site_hours": 2.0 }),
        )
        .await;
    let body: serde_json::Value = response.json().await.expect("booking");
    let booking_id = body["booking"]["id"].as_str().unwrap().to_string();
    assert_eq!(body["booking"]["status"], "CONFIRMED");

    // Act: completing a CONFIRMED booking skips IN_PROGRESS — not allowed.
    let response = app
        .post_admin(
            &format!("/v1/admin/bookings/{}/complete", booking_id),
            &org,
            json!({ "actual_duration_minutes": 120 }),
        )
        .await;

    // Assert
    assert_eq!(response.status().as_u16(), 409);
    let problem: serde_json::Value = response.json().await.expect("problem");
    assert!(problem["type"].as_str().unwrap().ends_with("/status-transition"));
    assert_eq!(booking_status(&app, &booking_id), "CONFIRMED");
}

#[tokio::test]
#[serial]
async fn full_lifecycle_start_complete() {
    // Arrange
    let app = TestApp::spawn().await;
    let org = admin_for_default_org(&app).await;
    let starts_at = TestApp::weekday_slot();

    let response = app
        .post_public(
            "/v1/bookings",
            json!({ "starts_at": starts_at, "time_on_site_hours": 2.0 }),
        )
        .await;
    let body: serde_json::Value = response.json().await.expect("booking");
    let booking_id = body["booking"]["id"].as_str().unwrap().to_string();

    // Act + Assert: CONFIRMED → IN_PROGRESS → DONE.
    let started = app
        .post_admin(&format!("/v1/admin/bookings/{}/start", booking_id), &org, json!({}))
        .await;
    assert_eq!(started.status().as_u16(), 200);
    assert_eq!(booking_status(&app, &booking_id), "IN_PROGRESS");

    let completed = app
        .post_admin(
            &format!("/v1/admin/bookings/{}/complete", booking_id),
            &org,
            json!({ "actual_duration_minutes": 135 }),
        )
        .await;
    assert_eq!(completed.status().as_u16(), 200);
    assert_eq!(booking_status(&app, &booking_id), "DONE");

    // DONE is terminal.
    let cancel = app
        .post_admin(&format!("/v1/admin/bookings/{}/cancel", booking_id), &org, json!({}))
        .await;
    assert_eq!(cancel.status().as_u16(), 409);
}

// ---------------------------------------------------------------------------
// helpers

/// Logs in an ADMIN user provisioned inside the default org, where the
/// public funnel creates its bookings.
async fn admin_for_default_org(app: &TestApp) -> String {
    use maidflow::auth::password::PasswordService;
    use maidflow::schema::{memberships, users};

    let email = TestApp::unique_email();
    let password = "admin-password-123";
    {
        let mut conn = app.conn();
        let password_hash = PasswordService::hash_password_with_cost(password, 4).unwrap();
        let user_id: uuid::Uuid = diesel::insert_into(users::table)
            .values((
                users::org_id.eq(app.default_org_id),
                users::email.eq(&email),
                users::password_hash.eq(&password_hash),
                users::must_change_password.eq(false),
            ))
            .returning(users::id)
            .get_result(&mut conn)
            .expect("insert admin");
        diesel::insert_into(memberships::table)
            .values((
                memberships::org_id.eq(app.default_org_id),
                memberships::user_id.eq(user_id),
                memberships::role.eq("ADMIN"),
            ))
            .execute(&mut conn)
            .expect("insert membership");
    }

    app.login(&email, password).await.access_token
}

fn booking_status(app: &TestApp, booking_id: &str) -> String {
    use maidflow::schema::bookings;

    let mut conn = app.conn();
    bookings::table
        .find(booking_id.parse::<uuid::Uuid>().unwrap())
        .select(bookings::status)
        .first(&mut conn)
        .expect("booking status")
}

fn checkout_session_for(app: &TestApp, booking_id: &str) -> String {
    use maidflow::schema::bookings;

    let mut conn = app.conn();
    let session: Option<String> = bookings::table
        .find(booking_id.parse::<uuid::Uuid>().unwrap())
        .select(bookings::checkout_session_id)
        .first(&mut conn)
        .expect("checkout session");
    session.expect("deposit booking has a checkout session")
}

fn confirmed_email_count(app: &TestApp, booking_id: &str) -> i64 {
    use maidflow::schema::outbox_events;

    let mut conn = app.conn();
    outbox_events::table
        .filter(outbox_events::kind.eq("email"))
        .filter(outbox_events::dedupe_key.like(format!("email:b:{}%", booking_id)))
        .filter(outbox_events::dedupe_key.like("%t:booking_confirmed"))
        .count()
        .get_result(&mut conn)
        .expect("email count")
}
