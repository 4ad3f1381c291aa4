//! The HTTP front: authenticate (HAWK), authorize (capability set),
//! validate, enqueue. Grounded on the teacher's `channels/webhook_server.rs`
//! (single `axum::Router`, `tokio::net::TcpListener`, graceful shutdown)
//! and `channels/http.rs`'s handler shape, plus
//! `original_source/.../views.py`/`permissions.py` for the request
//! pipeline itself (spec.md §4.1).

pub mod auth;
pub mod error;
pub mod routes;

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::Config;
use crate::registry::Registry;
use crate::worker::store::JobStore;
use crate::worker::Job;

use auth::AuthVerifier;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub registry: Arc<Registry>,
    pub auth_verifier: Arc<dyn AuthVerifier>,
    pub job_store: Arc<dyn JobStore>,
    pub job_tx: mpsc::Sender<Job>,
}

pub fn build_router(state: AppState) -> axum::Router {
    routes::build_router(state)
}
