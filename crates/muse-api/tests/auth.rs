mod common;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use serde_json::json;

use common::{PASSWORD, TestApp};

async fn invite(app: &TestApp, token: &str, email: &str) -> (StatusCode, serde_json::Value) {
    app.post("/auth/invite", Some(token), json!({ "email": email })).await
}

fn register_body(email: &str, username: &str, code: &str) -> serde_json::Value {
    json!({
        "name": "Ada Model",
        "username": username,
        "email": email,
        "password": PASSWORD,
        "role": "model",
        "code": code,
    })
}

#[tokio::test]
async fn invited_model_registers_once() {
    let app = TestApp::new().await;
    let sender = app.account("model", "sender");

    let (status, body) = invite(&app, &sender.token, "New@Muse.test").await;
    assert_eq!(status, StatusCode::CREATED);
    let code = body["invitation"]["code"].as_str().unwrap().to_string();
    assert_eq!(body["invitation"]["email"], "new@muse.test");
    assert_eq!(body["invitation"]["status"], "pending");

    let mail = app.mailer.sent_to("new@muse.test");
    assert_eq!(mail.len(), 1);
    assert!(mail[0].text.contains(&code));

    let (status, body) = app
        .get(&format!("/auth/check_invitation/new@muse.test/{}", code), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, body) = app.post("/auth/register", None, register_body("new@muse.test", "newmodel", &code)).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["user"]["role"], "model");
    assert!(body["token"].as_str().is_some_and(|t| !t.is_empty()));

    let (status, body) = app.post("/auth/register", None, register_body("new@muse.test", "othermodel", &code)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (_, body) = app.get("/auth/invitations", Some(&sender.token)).await;
    assert_eq!(body["invitations"][0]["status"], "accepted");

    let stored = app.state.db.get_user_by_email("new@muse.test").unwrap().unwrap();
    assert_eq!(stored.invited_by.as_deref(), Some(sender.id.to_string().as_str()));
}

#[tokio::test]
async fn model_registration_requires_a_matching_invitation() {
    let app = TestApp::new().await;
    let sender = app.account("model", "sender");
    let (_, body) = invite(&app, &sender.token, "a@muse.test").await;
    let code = body["invitation"]["code"].as_str().unwrap().to_string();

    let mut no_code = register_body("a@muse.test", "amodel", "");
    no_code["code"] = serde_json::Value::Null;
    let (status, _) = app.post("/auth/register", None, no_code).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.post("/auth/register", None, register_body("b@muse.test", "bmodel", &code)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.post("/auth/register", None, register_body("a@muse.test", "amodel", "ZZZ-999")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn codes_without_a_dash_are_accepted() {
    let app = TestApp::new().await;
    let sender = app.account("admin", "boss");
    let (_, body) = invite(&app, &sender.token, "c@muse.test").await;
    let code = body["invitation"]["code"].as_str().unwrap().replace('-', "").to_lowercase();

    let (status, body) = app.get(&format!("/auth/check_invitation/c@muse.test/{}", code), None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
}

#[tokio::test]
async fn expired_invitations_are_rejected_and_swept() {
    let app = TestApp::new().await;
    let sender = app.account("model", "sender");
    let (_, body) = invite(&app, &sender.token, "late@muse.test").await;
    let code = body["invitation"]["code"].as_str().unwrap().to_string();

    let past = muse_db::to_db_time(Utc::now() - Duration::days(1));
    app.state
        .db
        .with_conn_mut(|conn| {
            conn.execute("UPDATE invitations SET expires_at = ?1", [&past])?;
            Ok(())
        })
        .unwrap();

    let (_, body) = app.get("/auth/invitations", Some(&sender.token)).await;
    assert_eq!(body["invitations"][0]["status"], "expired");

    let (status, body) = app.post("/auth/register", None, register_body("late@muse.test", "late", &code)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("expired"));

    assert_eq!(muse_api::sweep::sweep_once(&app.state).await.unwrap(), 1);
    assert_eq!(muse_api::sweep::sweep_once(&app.state).await.unwrap(), 0);

    // The lapsed invitation no longer blocks a fresh one
    let (status, _) = invite(&app, &sender.token, "late@muse.test").await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn senders_are_held_to_three_live_invitations() {
    let app = TestApp::new().await;
    let sender = app.account("model", "sender");
    for i in 0..3 {
        let (status, body) = invite(&app, &sender.token, &format!("friend{i}@muse.test")).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
    }

    let (status, body) = invite(&app, &sender.token, "friend3@muse.test").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains('3'));

    // Admins are exempt
    let admin = app.account("admin", "boss");
    for i in 0..4 {
        let (status, _) = app
            .post("/admin/invitations", Some(&admin.token), json!({ "email": format!("x{i}@muse.test") }))
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }
}

#[tokio::test]
async fn one_live_invitation_per_email() {
    let app = TestApp::new().await;
    let first = app.account("model", "first");
    let second = app.account("model", "second");

    assert_eq!(invite(&app, &first.token, "dup@muse.test").await.0, StatusCode::CREATED);
    assert_eq!(invite(&app, &second.token, "dup@muse.test").await.0, StatusCode::BAD_REQUEST);
    // Registered emails cannot be invited
    assert_eq!(invite(&app, &first.token, &second.email).await.0, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn visitors_cannot_invite() {
    let app = TestApp::new().await;
    let visitor = app.account("visitor", "viewer");
    let (status, _) = invite(&app, &visitor.token, "someone@muse.test").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn visitor_signup_and_login() {
    let app = TestApp::new().await;
    let (status, body) = app
        .post(
            "/auth/register",
            None,
            json!({
                "name": "Vic Visitor",
                "username": "vic",
                "email": "vic@muse.test",
                "password": PASSWORD,
                "role": "visitor",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(app.mailer.sent_to("vic@muse.test").len(), 1);

    let (status, body) = app
        .post("/auth/login", None, json!({ "email": "VIC@muse.test", "password": PASSWORD }))
        .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["token"].as_str().unwrap().to_string();

    let (status, body) = app.get("/auth/me", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["username"], "vic");

    let (status, body) = app
        .post("/auth/login", None, json!({ "email": "vic@muse.test", "password": "wrong-pass" }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid credentials");
}

#[tokio::test]
async fn duplicate_username_or_email_conflicts() {
    let app = TestApp::new().await;
    app.account("visitor", "taken");
    let body = |username: &str, email: &str| {
        json!({
            "name": "Someone",
            "username": username,
            "email": email,
            "password": PASSWORD,
            "role": "visitor",
        })
    };

    let (status, msg) = app.post("/auth/register", None, body("taken", "fresh@muse.test")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(msg["message"], "Username is already taken");

    let (status, msg) = app.post("/auth/register", None, body("fresh", "taken@muse.test")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(msg["message"], "Email is already registered");
}

#[tokio::test]
async fn self_registration_cannot_pick_admin() {
    let app = TestApp::new().await;
    let (status, _) = app
        .post(
            "/auth/register",
            None,
            json!({
                "name": "Mallory",
                "username": "mallory",
                "email": "m@muse.test",
                "password": PASSWORD,
                "role": "admin",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_registration_needs_the_key() {
    let app = TestApp::new().await;
    let body = |key: &str| {
        json!({
            "name": "Root Admin",
            "username": "root",
            "email": "root@muse.test",
            "password": PASSWORD,
            "admin_key": key,
        })
    };
    assert_eq!(app.post("/auth/admin-register", None, body("nope")).await.0, StatusCode::FORBIDDEN);
    let (status, created) = app.post("/auth/admin-register", None, body("admin-key")).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["user"]["role"], "admin");

    let closed = TestApp::with_config(|c| c.admin_registration_key = None).await;
    assert_eq!(closed.post("/auth/admin-register", None, body("admin-key")).await.0, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn protected_routes_need_a_valid_token() {
    let app = TestApp::new().await;
    assert_eq!(app.get("/auth/me", None).await.0, StatusCode::UNAUTHORIZED);
    assert_eq!(app.get("/auth/me", Some("garbage")).await.0, StatusCode::UNAUTHORIZED);

    // Tokens of deleted accounts stop working
    let user = app.account("visitor", "gone");
    app.state.db.delete_user(&user.id.to_string()).unwrap();
    assert_eq!(app.get("/auth/me", Some(&user.token)).await.0, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_routes_reject_other_roles() {
    let app = TestApp::new().await;
    let model = app.account("model", "model");
    let visitor = app.account("visitor", "visitor");
    let admin = app.account("superadmin", "root");

    assert_eq!(app.get("/admin/statistics", Some(&model.token)).await.0, StatusCode::FORBIDDEN);
    assert_eq!(app.get("/admin/statistics", Some(&visitor.token)).await.0, StatusCode::FORBIDDEN);
    assert_eq!(app.get("/admin/statistics", None).await.0, StatusCode::UNAUTHORIZED);

    let (status, body) = app.get("/admin/statistics", Some(&admin.token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["statistics"]["models"], 1);
    assert_eq!(body["statistics"]["visitors"], 1);
}
