use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::warn;

use muse_billing::BillingConfig;

const DEV_JWT_SECRET: &str = "dev-secret-change-me";

/// SMTP transport settings. Absent means mail is logged instead of sent.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub pass: Option<String>,
}

/// Runtime configuration, read once at startup.
#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub upload_dir: PathBuf,
    pub jwt_secret: String,
    pub token_ttl_days: i64,
    pub frontend_url: String,
    pub admin_registration_key: Option<String>,
    pub require_signup_fee: bool,
    pub sweep_interval: Duration,
    pub billing: BillingConfig,
    pub smtp: Option<SmtpConfig>,
    pub mail_from_address: String,
    pub mail_from_name: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let jwt_secret = var("MUSE_JWT_SECRET").unwrap_or_else(|| {
            warn!("MUSE_JWT_SECRET not set, using the development secret");
            DEV_JWT_SECRET.into()
        });

        let smtp = match var("SMTP_HOST") {
            Some(host) => Some(SmtpConfig {
                host,
                port: parse_var("SMTP_PORT", 587)?,
                user: var("SMTP_USER"),
                pass: var("SMTP_PASS"),
            }),
            None => None,
        };

        Ok(Self {
            host: var("MUSE_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_var("MUSE_PORT", 5000)?,
            db_path: PathBuf::from(var("MUSE_DB_PATH").unwrap_or_else(|| "muse.db".into())),
            upload_dir: PathBuf::from(var("MUSE_UPLOAD_DIR").unwrap_or_else(|| "./uploads".into())),
            jwt_secret,
            token_ttl_days: parse_var("MUSE_TOKEN_TTL_DAYS", 30)?,
            frontend_url: var("MUSE_FRONTEND_URL")
                .unwrap_or_else(|| "http://localhost:5173".into())
                .trim_end_matches('/')
                .to_string(),
            admin_registration_key: var("MUSE_ADMIN_REGISTRATION_KEY"),
            require_signup_fee: parse_var("MUSE_REQUIRE_SIGNUP_FEE", false)?,
            sweep_interval: Duration::from_secs(parse_var("MUSE_SWEEP_INTERVAL_SECS", 3600)?),
            billing: BillingConfig::from_env(),
            smtp,
            mail_from_address: var("EMAIL_FROM_ADDRESS").unwrap_or_else(|| "no-reply@localhost".into()),
            mail_from_name: var("EMAIL_FROM_NAME").unwrap_or_else(|| "Muse".into()),
        })
    }

    /// Settings for tests: no SMTP, fixed secrets, assets under `upload_dir`.
    pub fn for_tests(upload_dir: PathBuf) -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            db_path: PathBuf::from(":memory:"),
            upload_dir,
            jwt_secret: "test-secret".into(),
            token_ttl_days: 30,
            frontend_url: "http://localhost:5173".into(),
            admin_registration_key: Some("admin-key".into()),
            require_signup_fee: false,
            sweep_interval: Duration::from_secs(3600),
            billing: BillingConfig::test(),
            smtp: None,
            mail_from_address: "no-reply@muse.test".into(),
            mail_from_name: "Muse".into(),
        }
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid {} value '{}'", name, raw)),
        None => Ok(default),
    }
}
