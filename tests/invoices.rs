//! Invoice ledger: numbering under concurrency, payments, public links.

mod common;

use common::TestApp;
use serde_json::json;
use serial_test::serial;

#[tokio::test]
#[serial]
async fn invoice_numbers_are_strictly_increasing_under_concurrency() {
    // Arrange
    let app = TestApp::spawn().await;
    let org = app.provision_org("inv-concurrent").await;

    // Act: 50 concurrent creations in the same org.
    let mut handles = Vec::new();
    for i in 0..50 {
        let client = app.client.clone();
        let base_url = app.base_url.clone();
        let token = org.access_token.clone();
        handles.push(tokio::spawn(async move {
            let response = client
                .post(format!("{}/v1/admin/invoices", base_url))
                .bearer_auth(&token)
                .header("Idempotency-Key", format!("inv-e-{}", i))
                .json(&json!({
                    "items": [
                        { "description": "Cleaning service", "qty": 1, "unit_price_cents": 12_000 }
                    ]
                }))
                .send()
                .await
                .expect("create invoice");
            assert_eq!(response.status().as_u16(), 201);
            let body: serde_json::Value = response.json().await.expect("invoice body");
            body["invoice"]["number"].as_str().unwrap().to_string()
        }));
    }

    let mut numbers = Vec::new();
    for handle in handles {
        numbers.push(handle.await.expect("task"));
    }

    // Assert: well-formed, unique, strictly increasing once sorted.
    let year = chrono::Utc::now().format("%Y").to_string();
    for number in &numbers {
        assert!(
            number.starts_with(&format!("INV-{}-", year)),
            "unexpected number {}",
            number
        );
    }

    let mut values: Vec<i64> = numbers
        .iter()
        .map(|n| n.rsplit('-').next().unwrap().parse().unwrap())
        .collect();
    values.sort();
    let before_dedup = values.len();
    values.dedup();
    assert_eq!(values.len(), before_dedup, "duplicate invoice numbers");
    for pair in values.windows(2) {
        assert!(pair[1] > pair[0]);
    }
}

#[tokio::test]
#[serial]
async fn payments_roll_status_partial_then_paid() {
    // Arrange: 20000 + 5000 with no tax → 25000 total.
    let app = TestApp::spawn().await;
    let org = app.provision_org("inv-payments").await;

    let response = app
        .post_admin(
            "/v1/admin/invoices",
            &org.access_token,
            json!({
                "items": [
                    { "description": "Deep clean", "qty": 2, "unit_price_cents": 10_000 },
                    { "description": "Windows", "qty": 1, "unit_price_cents": 5_000 }
                ]
            }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 201);
    let body: serde_json::Value = response.json().await.expect("invoice");
    assert_eq!(body["total_cents"], 25_000);
    let invoice_id = body["invoice"]["id"].as_str().unwrap().to_string();

    // Act + Assert: partial payment → PARTIAL.
    let partial = app
        .post_admin(
            &format!("/v1/admin/invoices/{}/payments", invoice_id),
            &org.access_token,
            json!({ "amount_cents": 10_000 }),
        )
        .await;
    assert_eq!(partial.status().as_u16(), 200);
    let body: serde_json::Value = partial.json().await.expect("invoice");
    assert_eq!(body["status"], "PARTIAL");

    // Remaining balance → PAID.
    let full = app
        .post_admin(
            &format!("/v1/admin/invoices/{}/payments", invoice_id),
            &org.access_token,
            json!({ "amount_cents": 15_000 }),
        )
        .await;
    assert_eq!(full.status().as_u16(), 200);
    let body: serde_json::Value = full.json().await.expect("invoice");
    assert_eq!(body["status"], "PAID");

    // A paid invoice takes no more payments.
    let extra = app
        .post_admin(
            &format!("/v1/admin/invoices/{}/payments", invoice_id),
            &org.access_token,
            json!({ "amount_cents": 1_000 }),
        )
        .await;
    assert_eq!(extra.status().as_u16(), 409);
}

#[tokio::test]
#[serial]
async fn public_link_resolves_and_rotates() {
    // Arrange
    let app = TestApp::spawn().await;
    let org = app.provision_org("inv-links").await;

    let response = app
        .post_admin(
            "/v1/admin/invoices",
            &org.access_token,
            json!({
                "items": [{ "description": "Standard clean", "qty": 1, "unit_price_cents": 9_000 }]
            }),
        )
        .await;
    let body: serde_json::Value = response.json().await.expect("invoice");
    let invoice_id = body["invoice"]["id"].as_str().unwrap().to_string();

    // Act: first send mints a link.
    let sent = app
        .post_admin(
            &format!("/v1/admin/invoices/{}/send", invoice_id),
            &org.access_token,
            json!({}),
        )
        .await;
    assert_eq!(sent.status().as_u16(), 200);
    let body: serde_json::Value = sent.json().await.expect("send body");
    let first_url = body["public_url"].as_str().unwrap().to_string();
    let first_token = first_url.rsplit('/').next().unwrap().to_string();

    // The link resolves without any auth and embeds no ids.
    assert!(!first_url.contains(&invoice_id));
    let public = app.get_public(&format!("/i/{}", first_token)).await;
    assert_eq!(public.status().as_u16(), 200);
    let body: serde_json::Value = public.json().await.expect("public invoice");
    assert_eq!(body["status"], "SENT");
    assert_eq!(body["total_cents"], 9_000);

    // Act: resending rotates the token.
    let resent = app
        .post_admin(
            &format!("/v1/admin/invoices/{}/send", invoice_id),
            &org.access_token,
            json!({}),
        )
        .await;
    let body: serde_json::Value = resent.json().await.expect("resend body");
    let second_token = body["public_url"].as_str().unwrap().rsplit('/').next().unwrap().to_string();
    assert_ne!(first_token, second_token);

    // Assert: old link dead, new link live.
    assert_eq!(app.get_public(&format!("/i/{}", first_token)).await.status().as_u16(), 404);
    assert_eq!(app.get_public(&format!("/i/{}", second_token)).await.status().as_u16(), 200);
}

#[tokio::test]
#[serial]
async fn void_is_terminal() {
    // Arrange
    let app = TestApp::spawn().await;
    let org = app.provision_org("inv-void").await;

    let response = app
        .post_admin(
            "/v1/admin/invoices",
            &org.access_token,
            json!({
                "items": [{ "description": "Standard clean", "qty": 1, "unit_price_cents": 9_000 }]
            }),
        )
        .await;
    let body: serde_json::Value = response.json().await.expect("invoice");
    let invoice_id = body["invoice"]["id"].as_str().unwrap().to_string();

    // Act
    let voided = app
        .post_admin(
            &format!("/v1/admin/invoices/{}/void", invoice_id),
            &org.access_token,
            json!({}),
        )
        .await;
    assert_eq!(voided.status().as_u16(), 200);

    // Assert: no sends, no payments.
    let send = app
        .post_admin(
            &format!("/v1/admin/invoices/{}/send", invoice_id),
            &org.access_token,
            json!({}),
        )
        .await;
    assert_eq!(send.status().as_u16(), 409);

    let pay = app
        .post_admin(
            &format!("/v1/admin/invoices/{}/payments", invoice_id),
            &org.access_token,
            json!({ "amount_cents": 100 }),
        )
        .await;
    assert_eq!(pay.status().as_u16(), 409);
}

#[tokio::test]
#[serial]
async fn idempotency_key_replays_the_first_response() {
    // Arrange
    let app = TestApp::spawn().await;
    let org = app.provision_org("inv-idem").await;
    let key = uuid::Uuid::new_v4().to_string();
    let body = json!({
        "items": [{ "description": "Standard clean", "qty": 1, "unit_price_cents": 9_000 }]
    });

    // Act: same key, same body, twice.
    let first = app
        .post_admin_with_key("/v1/admin/invoices", &org.access_token, body.clone(), &key)
        .await;
    assert_eq!(first.status().as_u16(), 201);
    let first_body: serde_json::Value = first.json().await.expect("invoice");

    let second = app
        .post_admin_with_key("/v1/admin/invoices", &org.access_token, body.clone(), &key)
        .await;
    assert_eq!(second.status().as_u16(), 201);
    let second_body: serde_json::Value = second.json().await.expect("replay");

    // Assert: byte-identical outcome, only one invoice exists.
    assert_eq!(
        first_body["invoice"]["number"],
        second_body["invoice"]["number"]
    );

    // A different body under the same key is a conflict.
    let conflicting = app
        .post_admin_with_key(
            "/v1/admin/invoices",
            &org.access_token,
            json!({
                "items": [{ "description": "Other", "qty": 1, "unit_price_cents": 1 }]
            }),
            &key,
        )
        .await;
    assert_eq!(conflicting.status().as_u16(), 409);
}

#[tokio::test]
#[serial]
async fn missing_idempotency_key_is_rejected() {
    // Arrange
    let app = TestApp::spawn().await;
    let org = app.provision_org("inv-nokey").await;

    // Act: an admin write without the header.
    let response = app
        .client
        .post(format!("{}/v1/admin/invoices", app.base_url))
        .bearer_auth(&org.access_token)
        .json(&json!({
            "items": [{ "description": "Standard clean", "qty": 1, "unit_price_cents": 9_000 }]
        }))
        .send()
        .await
        .expect("request");

    // Assert
    assert_eq!(response.status().as_u16(), 422);
}
