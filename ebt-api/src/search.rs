use axum::{extract::State, Json};
use ebt_catalog::{PricedOffer, SearchService};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

use crate::dto::SearchRequest;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub currency: String,
    pub lowest_total: Option<Decimal>,
    pub offers: Vec<PricedOffer>,
}

/// POST /v1/search
pub async fn search_offers(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let currency = req.currency.to_uppercase();
    let offers = state.search.search(&req.criteria, &currency).await?;
    info!(
        "Search {} returned {} offers in {}",
        req.criteria.cache_key(),
        offers.len(),
        currency
    );

    Ok(Json(SearchResponse {
        lowest_total: SearchService::lowest_total(&offers),
        currency,
        offers,
    }))
}
