use ebt_booking::{BookingEngine, ReconciliationScanner};
use ebt_catalog::{MarkupConfigRepository, SearchService};
use std::sync::Arc;

use crate::middleware::resiliency::Resiliency;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub expiration: u64,
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<BookingEngine>,
    pub search: Arc<SearchService>,
    pub markups: Arc<dyn MarkupConfigRepository>,
    pub reconciliation: Arc<ReconciliationScanner>,
    pub resiliency: Arc<Resiliency>,
    pub auth: AuthConfig,
    /// Webhook signatures are only checked when set.
    pub webhook_secret: Option<String>,
}
