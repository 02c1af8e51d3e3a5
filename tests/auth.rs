//! Session lifecycle integration tests: login, rotation, revocation.

mod common;

use common::TestApp;
use serde_json::json;
use serial_test::serial;

#[tokio::test]
#[serial]
async fn login_returns_session_pair() {
    // Arrange
    let app = TestApp::spawn().await;
    let org = app.provision_org("login-org").await;

    // Act
    let session = app.login(&org.admin_email, &org.admin_password).await;

    // Assert
    assert!(!session.access_token.is_empty());
    assert!(!session.refresh_token.is_empty());
    assert!(!session.must_change_password);
}

#[tokio::test]
#[serial]
async fn login_with_wrong_password_returns_401() {
    // Arrange
    let app = TestApp::spawn().await;
    let org = app.provision_org("badpw-org").await;

    // Act
    let response = app
        .post_public(
            "/v1/auth/login",
            json!({ "email": org.admin_email, "password": "not-the-password" }),
        )
        .await;

    // Assert
    assert_eq!(response.status().as_u16(), 401);
    let body: serde_json::Value = response.json().await.expect("problem body");
    assert_eq!(body["status"], 401);
    assert!(body["request_id"].as_str().is_some());
    // The envelope never reveals whether the account exists.
    assert!(!body["detail"].as_str().unwrap().contains(&org.admin_email));
}

#[tokio::test]
#[serial]
async fn login_with_unknown_email_matches_wrong_password_shape() {
    // Arrange
    let app = TestApp::spawn().await;

    // Act
    let response = app
        .post_public(
            "/v1/auth/login",
            json!({ "email": TestApp::unique_email(), "password": "whatever-pw" }),
        )
        .await;

    // Assert
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
#[serial]
async fn refresh_rotates_the_session() {
    // Arrange
    let app = TestApp::spawn().await;
    let org = app.provision_org("rotate-org").await;
    let session = app.login(&org.admin_email, &org.admin_password).await;

    // Act
    let response = app
        .post_public(
            "/v1/auth/refresh",
            json!({ "refresh_token": session.refresh_token }),
        )
        .await;

    // Assert
    assert_eq!(response.status().as_u16(), 200);
    let rotated: serde_json::Value = response.json().await.expect("session");
    assert_ne!(rotated["refresh_token"].as_str().unwrap(), session.refresh_token);

    // The predecessor refresh token is spent.
    let replayed = app
        .post_public(
            "/v1/auth/refresh",
            json!({ "refresh_token": session.refresh_token }),
        )
        .await;
    assert_eq!(replayed.status().as_u16(), 401);
}

#[tokio::test]
#[serial]
async fn concurrent_refresh_has_exactly_one_winner() {
    // Arrange
    let app = TestApp::spawn().await;
    let org = app.provision_org("race-org").await;
    let session = app.login(&org.admin_email, &org.admin_password).await;

    // Act: two concurrent rotations of the same token.
    let body = json!({ "refresh_token": session.refresh_token });
    let (r1, r2) = tokio::join!(
        app.post_public("/v1/auth/refresh", body.clone()),
        app.post_public("/v1/auth/refresh", body.clone()),
    );

    // Assert: one 200, one 401, in either order.
    let mut statuses = vec![r1.status().as_u16(), r2.status().as_u16()];
    statuses.sort();
    assert_eq!(statuses, vec![200, 401]);
}

#[tokio::test]
#[serial]
async fn logout_revokes_the_access_token() {
    // Arrange
    let app = TestApp::spawn().await;
    let org = app.provision_org("logout-org").await;
    let session = app.login(&org.admin_email, &org.admin_password).await;

    let me = app.get_authed("/v1/auth/me", &session.access_token).await;
    assert_eq!(me.status().as_u16(), 200);

    // Act
    let response = app
        .client
        .post(format!("{}/v1/auth/logout", app.base_url))
        .bearer_auth(&session.access_token)
        .send()
        .await
        .expect("logout");
    assert_eq!(response.status().as_u16(), 204);

    // Assert: the session is gone even though the JWT has not expired.
    let me_after = app.get_authed("/v1/auth/me", &session.access_token).await;
    assert_eq!(me_after.status().as_u16(), 401);
}

#[tokio::test]
#[serial]
async fn change_password_revokes_every_session() {
    // Arrange
    let app = TestApp::spawn().await;
    let org = app.provision_org("chpw-org").await;
    let s1 = app.login(&org.admin_email, &org.admin_password).await;
    let s2 = app.login(&org.admin_email, &org.admin_password).await;

    // Act
    let response = app
        .client
        .post(format!("{}/v1/auth/change-password", app.base_url))
        .bearer_auth(&s1.access_token)
        .json(&json!({
            "current_password": org.admin_password,
            "new_password": "a-brand-new-password",
        }))
        .send()
        .await
        .expect("change password");
    assert_eq!(response.status().as_u16(), 204);

    // Assert: both sessions are dead, old password no longer works.
    assert_eq!(app.get_authed("/v1/auth/me", &s1.access_token).await.status().as_u16(), 401);
    assert_eq!(app.get_authed("/v1/auth/me", &s2.access_token).await.status().as_u16(), 401);

    let old_login = app
        .post_public(
            "/v1/auth/login",
            json!({ "email": org.admin_email, "password": org.admin_password }),
        )
        .await;
    assert_eq!(old_login.status().as_u16(), 401);

    let new_login = app
        .post_public(
            "/v1/auth/login",
            json!({ "email": org.admin_email, "password": "a-brand-new-password" }),
        )
        .await;
    assert_eq!(new_login.status().as_u16(), 200);
}

#[tokio::test]
#[serial]
async fn legacy_hash_verifies_and_upgrades_on_login() {
    // Arrange: a user carried over with a legacy sha256 hash.
    use diesel::prelude::*;
    use maidflow::auth::password::PasswordService;
    use maidflow::schema::users;

    let app = TestApp::spawn().await;
    let org = app.provision_org("legacy-org").await;

    let legacy_email = TestApp::unique_email();
    let legacy_hash = PasswordService::legacy_hash("old-password-123", "salt42");
    {
        use maidflow::schema::memberships;

        let mut conn = app.conn();
        let user_id: uuid::Uuid = diesel::insert_into(users::table)
            .values((
                users::org_id.eq(org.org_id),
                users::email.eq(&legacy_email),
                users::password_hash.eq(&legacy_hash),
                users::must_change_password.eq(false),
            ))
            .returning(users::id)
            .get_result(&mut conn)
            .expect("insert legacy user");
        diesel::insert_into(memberships::table)
            .values((
                memberships::org_id.eq(org.org_id),
                memberships::user_id.eq(user_id),
                memberships::role.eq("VIEWER"),
            ))
            .execute(&mut conn)
            .expect("insert membership");
    }

    // Act
    let session = app.login(&legacy_email, "old-password-123").await;
    assert!(!session.access_token.is_empty());

    // Assert: the stored hash is now argon2id.
    let mut conn = app.conn();
    let stored: String = users::table
        .filter(users::email.eq(&legacy_email))
        .select(users::password_hash)
        .first(&mut conn)
        .expect("stored hash");
    assert!(stored.starts_with("$argon2id$"));
}
