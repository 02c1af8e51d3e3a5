//! Worker and client portals behind signed tokens.

mod common;

use common::TestApp;
use diesel::prelude::*;
use serde_json::json;
use serial_test::serial;
use uuid::Uuid;

use maidflow::auth::tokens::{self, TokenKind};

/// The token secret from the shared test config.
const TEST_SECRET: &str = "test-secret-not-for-production";

async fn confirmed_booking(app: &TestApp, lead_id: Option<Uuid>) -> Uuid {
    let response = app
        .post_public(
            "/v1/bookings",
            json!({
                "lead_id": lead_id,
                "starts_at": TestApp::weekday_slot(),
                "time_on_site_hours": 2.0,
            }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 201);
    let body: serde_json::Value = response.json().await.expect("booking");
    assert_eq!(body["booking"]["status"], "CONFIRMED");
    body["booking"]["id"].as_str().unwrap().parse().unwrap()
}

fn worker_token(app: &TestApp) -> (Uuid, String) {
    use maidflow::auth::password::PasswordService;
    use maidflow::schema::{memberships, users};

    let mut conn = app.conn();
    let hash = PasswordService::hash_password_with_cost("worker-pass", 4).unwrap();
    let worker_id: Uuid = diesel::insert_into(users::table)
        .values((
            users::org_id.eq(app.default_org_id),
            users::email.eq(TestApp::unique_email()),
            users::password_hash.eq(&hash),
            users::must_change_password.eq(false),
        ))
        .returning(users::id)
        .get_result(&mut conn)
        .expect("worker user");
    diesel::insert_into(memberships::table)
        .values((
            memberships::org_id.eq(app.default_org_id),
            memberships::user_id.eq(worker_id),
            memberships::role.eq("WORKER"),
        ))
        .execute(&mut conn)
        .expect("worker membership");

    let token = tokens::mint(TEST_SECRET, TokenKind::Worker, worker_id, app.default_org_id, 3600);
    (worker_id, token)
}

#[tokio::test]
#[serial]
async fn worker_clocks_in_uploads_photo_and_clocks_out() {
    // Arrange
    let app = TestApp::spawn().await;
    let booking_id = confirmed_booking(&app, None).await;
    let (_worker_id, token) = worker_token(&app);

    // Act: clock in; the booking moves to IN_PROGRESS.
    let started = app
        .client
        .post(format!(
            "{}/v1/worker/bookings/{}/time-entries/start",
            app.base_url, booking_id
        ))
        .header("x-worker-token", &token)
        .send()
        .await
        .expect("start entry");
    assert_eq!(started.status().as_u16(), 201);
    let entry: serde_json::Value = started.json().await.expect("entry");
    let entry_id = entry["id"].as_str().unwrap();

    // A second clock-in while one runs is a conflict.
    let again = app
        .client
        .post(format!(
            "{}/v1/worker/bookings/{}/time-entries/start",
            app.base_url, booking_id
        ))
        .header("x-worker-token", &token)
        .send()
        .await
        .expect("second start");
    assert_eq!(again.status().as_u16(), 409);

    // Upload evidence (a tiny JPEG header is enough for the gateway).
    let uploaded = app
        .client
        .post(format!(
            "{}/v1/worker/bookings/{}/photos",
            app.base_url, booking_id
        ))
        .header("x-worker-token", &token)
        .header("Content-Type", "image/jpeg")
        .body(vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10])
        .send()
        .await
        .expect("upload");
    assert_eq!(uploaded.status().as_u16(), 201);
    let photo: serde_json::Value = uploaded.json().await.expect("photo");
    let photo_id = photo["id"].as_str().unwrap();

    // The uploader can mint a short-TTL download URL.
    let url = app
        .client
        .get(format!("{}/v1/worker/photos/{}/url", app.base_url, photo_id))
        .header("x-worker-token", &token)
        .send()
        .await
        .expect("photo url");
    assert_eq!(url.status().as_u16(), 200);
    let body: serde_json::Value = url.json().await.expect("url body");
    let vended = body["url"].as_str().unwrap();
    assert!(vended.contains("/v1/photos/"));
    // The vended URL carries a signed token, never the raw storage key.
    assert!(!vended.contains("orders/"));
    assert!(body["expires_in_secs"].as_u64().unwrap() <= 60);

    // Act: clock out.
    let stopped = app
        .client
        .post(format!(
            "{}/v1/worker/time-entries/{}/stop",
            app.base_url, entry_id
        ))
        .header("x-worker-token", &token)
        .send()
        .await
        .expect("stop entry");
    assert_eq!(stopped.status().as_u16(), 200);
    let entry: serde_json::Value = stopped.json().await.expect("entry");
    assert!(entry["ended_at"].as_str().is_some());
}

#[tokio::test]
#[serial]
async fn photo_upload_rejects_bad_mime_and_oversize() {
    // Arrange
    let app = TestApp::spawn().await;
    let booking_id = confirmed_booking(&app, None).await;
    let (_worker_id, token) = worker_token(&app);

    // Act + Assert: wrong MIME.
    let response = app
        .client
        .post(format!(
            "{}/v1/worker/bookings/{}/photos",
            app.base_url, booking_id
        ))
        .header("x-worker-token", &token)
        .header("Content-Type", "application/zip")
        .body(vec![0x50, 0x4B])
        .send()
        .await
        .expect("upload");
    assert_eq!(response.status().as_u16(), 422);

    // Empty body.
    let response = app
        .client
        .post(format!(
            "{}/v1/worker/bookings/{}/photos",
            app.base_url, booking_id
        ))
        .header("x-worker-token", &token)
        .header("Content-Type", "image/jpeg")
        .body(Vec::<u8>::new())
        .send()
        .await
        .expect("upload");
    assert_eq!(response.status().as_u16(), 422);
}

#[tokio::test]
#[serial]
async fn forged_worker_token_is_rejected() {
    // Arrange
    let app = TestApp::spawn().await;

    // Act: signed with the wrong secret.
    let token = tokens::mint(
        "some-other-secret",
        TokenKind::Worker,
        Uuid::new_v4(),
        app.default_org_id,
        3600,
    );
    let response = app
        .client
        .get(format!("{}/v1/worker/jobs", app.base_url))
        .header("x-worker-token", token)
        .send()
        .await
        .expect("jobs");

    // Assert
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
#[serial]
async fn client_sees_and_cancels_only_their_own_bookings() {
    // Arrange: two leads, one booking each.
    let app = TestApp::spawn().await;
    let lead_a = app.create_lead_for_org(app.default_org_id, Some("a@example.com"));
    let lead_b = app.create_lead_for_org(app.default_org_id, Some("b@example.com"));

    let booking_a = confirmed_booking(&app, Some(lead_a)).await;
    let booking_b = confirmed_booking(&app, Some(lead_b)).await;

    let token_a = tokens::mint(TEST_SECRET, TokenKind::MagicLink, lead_a, app.default_org_id, 3600);

    // Act: A lists bookings.
    let response = app
        .client
        .get(format!("{}/v1/client/bookings", app.base_url))
        .header("x-client-token", &token_a)
        .send()
        .await
        .expect("list");
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.expect("bookings");
    let ids: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["booking"]["id"].as_str().unwrap())
        .collect();

    // Assert: A sees A's booking only.
    assert!(ids.contains(&booking_a.to_string().as_str()));
    assert!(!ids.contains(&booking_b.to_string().as_str()));

    // A cannot cancel B's booking.
    let response = app
        .client
        .post(format!(
            "{}/v1/client/bookings/{}/cancel",
            app.base_url, booking_b
        ))
        .header("x-client-token", &token_a)
        .send()
        .await
        .expect("cancel");
    assert_eq!(response.status().as_u16(), 404);

    // A cancels A's booking.
    let response = app
        .client
        .post(format!(
            "{}/v1/client/bookings/{}/cancel",
            app.base_url, booking_a
        ))
        .header("x-client-token", &token_a)
        .send()
        .await
        .expect("cancel");
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.expect("booking");
    assert_eq!(body["status"], "CANCELLED");
}

#[tokio::test]
#[serial]
async fn expired_magic_link_is_rejected() {
    // Arrange
    let app = TestApp::spawn().await;
    let lead = app.create_lead_for_org(app.default_org_id, None);

    // Act
    let token = tokens::mint(TEST_SECRET, TokenKind::MagicLink, lead, app.default_org_id, -10);
    let response = app
        .client
        .get(format!("{}/v1/client/bookings", app.base_url))
        .header("x-client-token", token)
        .send()
        .await
        .expect("list");

    // Assert
    assert_eq!(response.status().as_u16(), 401);
}
