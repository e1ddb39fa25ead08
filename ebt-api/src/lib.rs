use axum::{
    http::Method,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod admin;
pub mod bookings;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod search;
pub mod state;
pub mod webhooks;
pub mod worker;

pub use state::{AppState, AuthConfig};

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
        ]);

    let customer = Router::new()
        .route("/v1/search", post(search::search_offers))
        .route("/v1/bookings", post(bookings::create_booking))
        .route("/v1/bookings/{id}", get(bookings::get_booking))
        .route("/v1/bookings/{id}/payment-intent", post(bookings::create_payment_intent))
        .route("/v1/bookings/{id}/cancel", post(bookings::cancel_booking))
        .route(
            "/v1/bookings/{id}/hotel-cancellation",
            post(bookings::request_hotel_cancellation),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::customer_auth_middleware,
        ));

    let admin = Router::new()
        .route("/v1/admin/cancellation-requests", get(admin::list_pending_cancellations))
        .route(
            "/v1/admin/cancellation-requests/{id}/process",
            post(admin::process_cancellation),
        )
        .route("/v1/admin/bookings/{id}/dispute-evidence", get(admin::dispute_evidence))
        .route("/v1/admin/bookings/{id}/confirm", post(admin::confirm_booking))
        .route("/v1/admin/reconciliation", get(admin::list_unfulfilled))
        .route("/v1/admin/markup-configs", post(admin::activate_markup))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::admin_auth_middleware,
        ));

    let public = Router::new()
        .route(
            "/v1/guest/bookings/{reference}/payment-intent",
            post(bookings::create_guest_payment_intent),
        )
        .route("/v1/webhooks/payments", post(webhooks::handle_payment_webhook))
        .route("/health", get(|| async { "ok" }));

    Router::new()
        .merge(customer)
        .merge(admin)
        .merge(public)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::circuit_breaker_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
