//! Tenant isolation: one org can never observe another org's rows.

mod common;

use common::TestApp;
use serial_test::serial;

#[tokio::test]
#[serial]
async fn foreign_lead_is_a_404() {
    // Arrange: org A owns a lead, org B authenticates.
    let app = TestApp::spawn().await;
    let org_a = app.provision_org("iso-a").await;
    let org_b = app.provision_org("iso-b").await;

    let lead_a = app.create_lead_for_org(org_a.org_id, None);

    // Act: B asks for A's lead by id.
    let response = app
        .get_authed(
            &format!("/v1/admin/leads/{}", lead_a),
            &org_b.access_token,
        )
        .await;

    // Assert: indistinguishable from a missing resource.
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
#[serial]
async fn lead_listing_only_shows_own_org() {
    // Arrange
    let app = TestApp::spawn().await;
    let org_a = app.provision_org("iso-list-a").await;
    let org_b = app.provision_org("iso-list-b").await;

    let lead_a = app.create_lead_for_org(org_a.org_id, None);
    let lead_b = app.create_lead_for_org(org_b.org_id, None);

    // Act
    let response = app
        .get_authed("/v1/admin/leads?per_page=100", &org_b.access_token)
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.expect("lead list");

    // Assert: B's listing contains B's lead and never A's.
    let ids: Vec<&str> = body["data"]
        .as_array()
        .expect("data array")
        .iter()
        .filter_map(|l| l["id"].as_str())
        .collect();
    assert!(ids.contains(&lead_b.to_string().as_str()));
    assert!(!ids.contains(&lead_a.to_string().as_str()));
}

#[tokio::test]
#[serial]
async fn own_lead_resolves_fine() {
    // Arrange
    let app = TestApp::spawn().await;
    let org = app.provision_org("iso-self").await;
    let lead = app.create_lead_for_org(org.org_id, None);

    // Act
    let response = app
        .get_authed(&format!("/v1/admin/leads/{}", lead), &org.access_token)
        .await;

    // Assert
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.expect("lead");
    assert_eq!(body["id"].as_str().unwrap(), lead.to_string());
    // org_id is internal and never serialized.
    assert!(body.get("org_id").is_none());
}

#[tokio::test]
#[serial]
async fn dead_letter_replay_is_org_scoped() {
    // Arrange: a DEAD outbox event in org A.
    use diesel::prelude::*;
    use maidflow::schema::outbox_events;

    let app = TestApp::spawn().await;
    let org_a = app.provision_org("iso-dlq-a").await;
    let org_b = app.provision_org("iso-dlq-b").await;

    let event_id: uuid::Uuid = {
        let mut conn = app.conn();
        let event = maidflow::outbox::enqueue(
            &mut conn,
            org_a.org_id,
            maidflow::outbox::KIND_EXPORT_WEBHOOK,
            &format!("iso-dlq-{}", uuid::Uuid::new_v4()),
            serde_json::json!({ "payload": {} }),
        )
        .expect("enqueue");
        diesel::update(outbox_events::table.find(event.id))
            .set((
                outbox_events::status.eq("DEAD"),
                outbox_events::last_error.eq("status_500"),
            ))
            .execute(&mut conn)
            .expect("mark dead");
        event.id
    };

    // Act: org B tries to replay org A's dead letter.
    let response = app
        .post_admin(
            &format!("/v1/admin/outbox/dead-letter/{}/replay", event_id),
            &org_b.access_token,
            serde_json::json!({}),
        )
        .await;

    // Assert
    assert_eq!(response.status().as_u16(), 404);

    // Org A can.
    let response = app
        .post_admin(
            &format!("/v1/admin/outbox/dead-letter/{}/replay", event_id),
            &org_a.access_token,
            serde_json::json!({}),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);
}
