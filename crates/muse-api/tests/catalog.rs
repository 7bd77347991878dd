mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use chrono::Utc;
use serde_json::{Value, json};
use uuid::Uuid;

use muse_db::models::NewDonation;
use muse_types::models::DonationStatus;

use common::{Account, PASSWORD, TestApp, sample_png};

async fn upload(app: &TestApp, uri: &str, token: &str, bytes: Vec<u8>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "image/png")
        .body(Body::from(bytes))
        .unwrap();
    app.send(request).await
}

async fn upload_photo(app: &TestApp, model: &Account, title: &str) -> Value {
    let (status, body) = upload(
        app,
        &format!("/models/{}/photos?title={}&price=30", model.id, title),
        &model.token,
        sample_png(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["photo"].clone()
}

async fn fetch_raw(app: &TestApp, uri: &str, token: Option<&str>) -> (StatusCode, Vec<u8>, Option<String>) {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let response = tower::ServiceExt::oneshot(muse_api::router(app.state.clone()), builder.body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec(), content_type)
}

/// Record a settled photo donation for `email` without going through the gateway.
fn grant_photo(app: &TestApp, email: &str, photo_id: &str) {
    let id = Uuid::new_v4().to_string();
    let now = muse_db::to_db_time(Utc::now());
    let db = &app.state.db;
    db.insert_donation(
        &NewDonation {
            id: &id,
            donor_email: email,
            donor_type: "visitor",
            amount: 30,
            kind: "photo_unlock",
            target_id: Some(photo_id),
            model_id: None,
            stripe_payment_id: None,
            stripe_session_id: None,
        },
        &now,
    )
    .unwrap();
    db.settle_donation(&id, Some(&format!("pi_{id}")), DonationStatus::Succeeded, &now).unwrap();
}

#[tokio::test]
async fn upload_stores_original_and_preview() {
    let app = TestApp::new().await;
    let model = app.account("model", "ada");
    let photo = upload_photo(&app, &model, "Sunrise").await;

    assert_eq!(photo["title"], "Sunrise");
    assert_eq!(photo["price"], 30);
    let blurred = photo["blurred_url"].as_str().unwrap();
    assert!(blurred.starts_with("/uploads/blurred/"));

    let (status, bytes, _) = fetch_raw(&app, blurred, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(image::guess_format(&bytes).unwrap(), image::ImageFormat::Jpeg);

    // Originals are never served statically
    let stored = app.state.db.get_photo(photo["id"].as_str().unwrap()).unwrap().unwrap();
    let (status, _, _) = fetch_raw(&app, &format!("/uploads/{}", stored.original_key), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn uploads_are_validated() {
    let app = TestApp::new().await;
    let model = app.account("model", "ada");
    let other = app.account("model", "bea");
    let uri = format!("/models/{}/photos?title=Nope", model.id);

    assert_eq!(upload(&app, &uri, &other.token, sample_png()).await.0, StatusCode::FORBIDDEN);
    assert_eq!(upload(&app, &uri, &model.token, b"plain text".to_vec()).await.0, StatusCode::BAD_REQUEST);
    assert_eq!(
        upload(&app, &format!("/models/{}/photos?title=%20", model.id), &model.token, sample_png())
            .await
            .0,
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        upload(&app, &format!("/models/{}/photos?title=Free&price=0", model.id), &model.token, sample_png())
            .await
            .0,
        StatusCode::BAD_REQUEST
    );
}

#[tokio::test]
async fn listing_projects_per_viewer() {
    let app = TestApp::new().await;
    let model = app.account("model", "ada");
    let visitor = app.account("visitor", "vic");
    let first = upload_photo(&app, &model, "One").await;
    upload_photo(&app, &model, "Two").await;
    grant_photo(&app, &visitor.email, first["id"].as_str().unwrap());

    let uri = format!("/models/{}/photos", model.id);

    let (status, anon) = app.get(&uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(anon["total"], 2);
    assert!(anon["photos"].as_array().unwrap().iter().all(|p| p["original_url"].is_null()));

    let (_, donor) = app.get(&uri, Some(&visitor.token)).await;
    let unlocked: Vec<&Value> = donor["photos"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|p| p["unlocked"] == true)
        .collect();
    assert_eq!(unlocked.len(), 1);
    assert_eq!(unlocked[0]["id"], first["id"]);
    assert!(unlocked[0]["original_url"].is_string());

    let (_, owner) = app.get(&uri, Some(&model.token)).await;
    assert!(owner["photos"].as_array().unwrap().iter().all(|p| p["unlocked"] == true));

    // A bad token on an optional route is just anonymous
    let (status, _) = app.get(&uri, Some("garbage")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn listing_is_paginated() {
    let app = TestApp::new().await;
    let model = app.account("model", "ada");
    for _ in 0..5 {
        app.photo(model.id, 25);
    }
    let (_, body) = app.get(&format!("/models/{}/photos?page=2&limit=2", model.id), None).await;
    assert_eq!(body["page"], 2);
    assert_eq!(body["total"], 5);
    assert_eq!(body["total_pages"], 3);
    assert_eq!(body["photos"].as_array().unwrap().len(), 2);

    let (status, _) = app.get(&format!("/models/{}/photos", Uuid::new_v4()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn originals_are_served_only_when_unlocked() {
    let app = TestApp::new().await;
    let model = app.account("model", "ada");
    let visitor = app.account("visitor", "vic");
    let admin = app.account("admin", "boss");
    let photo = upload_photo(&app, &model, "Secret").await;
    let original = photo["original_url"].as_str().unwrap().to_string();

    assert_eq!(fetch_raw(&app, &original, None).await.0, StatusCode::UNAUTHORIZED);
    assert_eq!(fetch_raw(&app, &original, Some(&visitor.token)).await.0, StatusCode::FORBIDDEN);

    let (status, bytes, content_type) = fetch_raw(&app, &original, Some(&model.token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, sample_png());
    assert_eq!(content_type.as_deref(), Some("image/png"));
    assert_eq!(fetch_raw(&app, &original, Some(&admin.token)).await.0, StatusCode::OK);

    grant_photo(&app, &visitor.email, photo["id"].as_str().unwrap());
    assert_eq!(fetch_raw(&app, &original, Some(&visitor.token)).await.0, StatusCode::OK);

    let (_, mine) = app.get("/visitors/me/unlocked-photos", Some(&visitor.token)).await;
    assert_eq!(mine["count"], 1);
    assert_eq!(mine["photos"][0]["id"], photo["id"]);
}

#[tokio::test]
async fn inactive_photos_are_hidden_from_the_public() {
    let app = TestApp::new().await;
    let model = app.account("model", "ada");
    let photo = upload_photo(&app, &model, "Draft").await;
    let uri = format!("/models/{}/photos/{}", model.id, photo["id"].as_str().unwrap());

    let (status, body) = app
        .call(Method::PUT, &uri, Some(&model.token), Some(json!({ "is_active": false, "price": 50 })))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["photo"]["is_active"], false);
    assert_eq!(body["photo"]["price"], 50);

    assert_eq!(app.get(&uri, None).await.0, StatusCode::NOT_FOUND);
    assert_eq!(app.get(&uri, Some(&model.token)).await.0, StatusCode::OK);

    let (_, anon) = app.get(&format!("/models/{}/photos", model.id), None).await;
    assert_eq!(anon["total"], 0);
}

#[tokio::test]
async fn deleting_a_photo_removes_assets_and_grants() {
    let app = TestApp::new().await;
    let model = app.account("model", "ada");
    let visitor = app.account("visitor", "vic");
    let photo = upload_photo(&app, &model, "Gone").await;
    let photo_id = photo["id"].as_str().unwrap().to_string();
    grant_photo(&app, &visitor.email, &photo_id);
    let blurred = photo["blurred_url"].as_str().unwrap().to_string();

    let uri = format!("/models/{}/photos/{}", model.id, photo_id);
    let stranger = app.account("model", "bea");
    assert_eq!(app.call(Method::DELETE, &uri, Some(&stranger.token), None).await.0, StatusCode::FORBIDDEN);

    let (status, _) = app.call(Method::DELETE, &uri, Some(&model.token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(app.state.db.get_photo(&photo_id).unwrap().is_none());
    assert!(app.state.db.list_grants_for_email(&visitor.email).unwrap().is_empty());
    assert_eq!(fetch_raw(&app, &blurred, None).await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn profiles_are_edited_by_owner_or_admin() {
    let app = TestApp::new().await;
    let model = app.account("model", "ada");
    let other = app.account("model", "bea");
    let admin = app.account("admin", "boss");
    let uri = format!("/models/{}", model.id);
    let update = json!({ "name": "Ada Lovelace", "bio": "Numbers", "age": 28, "eyes": "green" });

    let (status, _) = app.call(Method::PUT, &uri, Some(&other.token), Some(update.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.call(Method::PUT, &uri, Some(&model.token), Some(update.clone())).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["user"]["name"], "Ada Lovelace");
    assert_eq!(body["details"]["age"], 28);

    let (status, _) = app.call(Method::PUT, &uri, Some(&admin.token), Some(update)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, profile) = app.get(&uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["model"]["details"]["bio"], "Numbers");
    assert_eq!(profile["model"]["details"]["eyes"], "green");
    // Reads and updates share one details shape
    assert_eq!(profile["model"]["details"], body["details"]);
    assert!(profile["model"]["bio"].is_null());

    let visitor = app.account("visitor", "vic");
    assert_eq!(app.get(&format!("/models/{}", visitor.id), None).await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn directory_lists_models_with_a_profile_photo() {
    let app = TestApp::new().await;
    let ada = app.account("model", "ada");
    app.account("model", "bea");

    let (_, empty) = app.get("/models", None).await;
    assert_eq!(empty["total_models"], 0);

    let uri = format!("/models/{}/profile-photo", ada.id);
    let (status, body) = upload(&app, &uri, &ada.token, sample_png()).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let profile_url = body["profile_photo"].as_str().unwrap().to_string();
    assert!(profile_url.starts_with("/uploads/profiles/"));
    assert_eq!(fetch_raw(&app, &profile_url, None).await.0, StatusCode::OK);

    let (_, listed) = app.get("/models?q=ad", None).await;
    assert_eq!(listed["total_models"], 1);
    assert_eq!(listed["models"][0]["id"], ada.id.to_string());
    let (_, none) = app.get("/models?q=zzz", None).await;
    assert_eq!(none["total_models"], 0);

    // Replacing the photo removes the previous file
    let (_, body) = upload(&app, &uri, &ada.token, sample_png()).await;
    assert_ne!(body["profile_photo"].as_str().unwrap(), profile_url);
    assert_eq!(fetch_raw(&app, &profile_url, None).await.0, StatusCode::NOT_FOUND);

    let (status, _) = app.call(Method::DELETE, &uri, Some(&ada.token), None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, listed) = app.get("/models", None).await;
    assert_eq!(listed["total_models"], 0);
}

#[tokio::test]
async fn password_changes_are_owner_only() {
    let app = TestApp::new().await;
    let model = app.account("model", "ada");
    let admin = app.account("admin", "boss");
    let uri = format!("/models/{}/update-password", model.id);

    let (status, _) = app
        .post(&uri, Some(&admin.token), json!({ "password": "brandnew1", "confirm_password": "brandnew1" }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .post(&uri, Some(&model.token), json!({ "password": "brandnew1", "confirm_password": "different" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post(&uri, Some(&model.token), json!({ "password": "brandnew1", "confirm_password": "brandnew1" }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let login = |password: &str| json!({ "email": model.email, "password": password });
    assert_eq!(app.post("/auth/login", None, login(PASSWORD)).await.0, StatusCode::UNAUTHORIZED);
    assert_eq!(app.post("/auth/login", None, login("brandnew1")).await.0, StatusCode::OK);
}

#[tokio::test]
async fn admin_model_removal_cascades() {
    let app = TestApp::new().await;
    let admin = app.account("admin", "boss");
    let model = app.account("model", "ada");
    let visitor = app.account("visitor", "vic");
    let photo = upload_photo(&app, &model, "Last").await;
    grant_photo(&app, &visitor.email, photo["id"].as_str().unwrap());

    let (_, listed) = app.get(&format!("/admin/models/{}/photos", model.id), Some(&admin.token)).await;
    assert_eq!(listed["total"], 1);

    let (status, _) = app
        .call(Method::DELETE, &format!("/admin/models/{}", model.id), Some(&admin.token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(app.state.db.get_user_by_id(&model.id.to_string()).unwrap().is_none());
    assert!(app.state.db.get_photo(photo["id"].as_str().unwrap()).unwrap().is_none());
    assert!(app.state.db.list_grants_for_email(&visitor.email).unwrap().is_empty());
    assert_eq!(
        fetch_raw(&app, photo["blurred_url"].as_str().unwrap(), None).await.0,
        StatusCode::NOT_FOUND
    );

    let (status, _) = app
        .call(Method::DELETE, &format!("/admin/models/{}", model.id), Some(&admin.token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_manages_visitors() {
    let app = TestApp::new().await;
    let admin = app.account("admin", "boss");

    let (status, body) = app
        .post("/admin/visitors", Some(&admin.token), json!({ "name": "Guest User", "email": "guest@muse.test" }))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["visitor"]["name"], "Guest User");
    assert_eq!(app.mailer.sent_to("guest@muse.test").len(), 1);

    let (status, _) = app
        .post("/admin/visitors", Some(&admin.token), json!({ "name": "Guest User", "email": "guest@muse.test" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, listed) = app.get("/admin/visitors", Some(&admin.token)).await;
    assert_eq!(listed["count"], 1);

    let id = body["visitor"]["id"].as_str().unwrap();
    let (status, _) = app
        .call(Method::DELETE, &format!("/admin/visitors/{}", id), Some(&admin.token), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    // Only visitors can be removed through this route
    let (status, _) = app
        .call(Method::DELETE, &format!("/admin/visitors/{}", admin.id), Some(&admin.token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
