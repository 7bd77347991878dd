#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use chrono::Utc;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use muse_api::auth::{create_token, hash_password};
use muse_api::mail::{Email, MailError, Mailer};
use muse_api::storage::Storage;
use muse_api::{AppState, AppStateInner, Config, router};
use muse_billing::{
    BillingError, ChargeRequest, CheckoutRequest, CheckoutSession, PaymentGateway, PaymentIntent, sign_payload,
};
use muse_db::Database;
use muse_db::models::{NewPhoto, NewUser};
use muse_gateway::dispatcher::Dispatcher;

pub const WEBHOOK_SECRET: &str = "whsec_test_muse";
pub const PASSWORD: &str = "secret123";

/// In-process gateway. Intents start as `requires_payment_method`; tests
/// move them along with [`FakeGateway::set_status`].
#[derive(Default)]
pub struct FakeGateway {
    intents: Mutex<HashMap<String, PaymentIntent>>,
    sessions: Mutex<Vec<CheckoutSession>>,
    counter: AtomicUsize,
}

impl FakeGateway {
    pub fn set_status(&self, id: &str, status: &str) {
        if let Some(intent) = self.intents.lock().unwrap().get_mut(id) {
            intent.status = status.to_string();
        }
    }

    pub fn intent(&self, id: &str) -> PaymentIntent {
        self.intents.lock().unwrap().get(id).cloned().expect("unknown intent")
    }

    pub fn intent_count(&self) -> usize {
        self.intents.lock().unwrap().len()
    }

    fn next(&self) -> usize {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_payment_intent(&self, charge: &ChargeRequest) -> Result<PaymentIntent, BillingError> {
        let n = self.next();
        let intent = PaymentIntent {
            id: format!("pi_test_{n}"),
            client_secret: Some(format!("pi_test_{n}_secret")),
            status: "requires_payment_method".into(),
            metadata: charge.metadata.to_map(),
        };
        self.intents.lock().unwrap().insert(intent.id.clone(), intent.clone());
        Ok(intent)
    }

    async fn retrieve_payment_intent(&self, id: &str) -> Result<PaymentIntent, BillingError> {
        self.intents
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| BillingError::Provider(format!("No such payment_intent: '{id}'")))
    }

    async fn create_checkout_session(&self, checkout: &CheckoutRequest) -> Result<CheckoutSession, BillingError> {
        let n = self.next();
        let session = CheckoutSession {
            id: format!("cs_test_{n}"),
            url: Some(format!("https://checkout.test/cs_test_{n}")),
            payment_intent: None,
            payment_status: Some("unpaid".into()),
            metadata: checkout.metadata.to_map(),
        };
        self.sessions.lock().unwrap().push(session.clone());
        Ok(session)
    }
}

#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<Email>>,
}

impl RecordingMailer {
    pub fn sent_to(&self, to: &str) -> Vec<Email> {
        self.sent.lock().unwrap().iter().filter(|e| e.to == to).cloned().collect()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: Email) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(email);
        Ok(())
    }
}

pub struct TestApp {
    pub state: AppState,
    pub gateway: Arc<FakeGateway>,
    pub mailer: Arc<RecordingMailer>,
    upload_dir: PathBuf,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.upload_dir);
    }
}

pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub token: String,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        let upload_dir = std::env::temp_dir().join(format!("muse-api-test-{}", Uuid::new_v4()));
        let mut config = Config::for_tests(upload_dir.clone());
        adjust(&mut config);

        let gateway = Arc::new(FakeGateway::default());
        let mailer = Arc::new(RecordingMailer::default());
        let storage = Storage::new(upload_dir.clone());
        storage.ensure_dirs().await.unwrap();

        let state: AppState = Arc::new(AppStateInner {
            db: Arc::new(Database::open_in_memory().unwrap()),
            config,
            dispatcher: Dispatcher::new(),
            gateway: gateway.clone(),
            mailer: mailer.clone(),
            storage,
        });
        Self {
            state,
            gateway,
            mailer,
            upload_dir,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = router(self.state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
        };
        (status, body)
    }

    pub async fn call(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.call(Method::GET, uri, token, None).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, uri, token, Some(body)).await
    }

    /// Deliver a webhook signed with the configured secret.
    pub async fn webhook(&self, event: &Value) -> (StatusCode, Value) {
        let payload = event.to_string();
        let signature = sign_payload(payload.as_bytes(), WEBHOOK_SECRET, Utc::now().timestamp()).unwrap();
        self.webhook_with_signature(payload, &signature).await
    }

    pub async fn webhook_with_signature(&self, payload: String, signature: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/payments/webhook")
            .header("stripe-signature", signature)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(payload))
            .unwrap();
        self.send(request).await
    }

    /// Insert an account directly and mint a token for it.
    pub fn account(&self, role: &str, username: &str) -> Account {
        let id = Uuid::new_v4();
        let email = format!("{username}@muse.test");
        let hash = hash_password(PASSWORD).unwrap();
        self.state
            .db
            .create_user(&NewUser {
                id: &id.to_string(),
                name: username,
                username,
                email: &email,
                password_hash: &hash,
                role,
                invited_by: None,
            })
            .unwrap();
        let token = create_token(&self.state.config.jwt_secret, id, username, 1).unwrap();
        Account { id, email, token }
    }

    /// Insert an active photo row without stored assets.
    pub fn photo(&self, model_id: Uuid, price: u32) -> Uuid {
        let id = Uuid::new_v4();
        self.state
            .db
            .insert_photo(
                &NewPhoto {
                    id: &id.to_string(),
                    model_id: &model_id.to_string(),
                    title: "Sunset",
                    description: "",
                    original_key: &format!("locked/{id}.png"),
                    blurred_key: &format!("blurred/{id}.jpg"),
                    price,
                },
                &muse_db::to_db_time(Utc::now()),
            )
            .unwrap();
        id
    }
}

/// A small valid PNG.
pub fn sample_png() -> Vec<u8> {
    let img = image::RgbImage::from_fn(16, 16, |x, y| image::Rgb([(x * 16) as u8, (y * 16) as u8, 90]));
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

pub fn payment_succeeded(payment_id: &str, metadata: &BTreeMap<String, String>) -> Value {
    serde_json::json!({
        "id": format!("evt_{payment_id}"),
        "type": "payment_intent.succeeded",
        "data": { "object": { "id": payment_id, "status": "succeeded", "metadata": metadata } }
    })
}
