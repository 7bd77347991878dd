pub mod admin;
pub mod auth;
pub mod chat;
pub mod config;
pub mod error;
pub mod invitations;
pub mod mail;
pub mod middleware;
pub mod models;
pub mod payments;
pub mod photos;
pub mod routes;
pub mod storage;
pub mod sweep;
pub mod validation;
pub mod views;

pub use auth::{AppState, AppStateInner};
pub use config::Config;
pub use error::ApiError;
pub use routes::router;
