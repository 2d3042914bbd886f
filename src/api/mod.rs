pub mod handlers;
pub mod middleware;
pub mod state;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    trace::TraceLayer,
};
use std::sync::Arc;

use crate::{
    config::Settings,
    gateway::VirtualGateway,
    service::ServiceContext,
};
use state::AppState;

pub fn create_app(
    service_context: Arc<ServiceContext>,
    virtual_gateway: Option<Arc<VirtualGateway>>,
    settings: Arc<Settings>,
) -> Router {
    let app_state = AppState::new(service_context, virtual_gateway, settings);

    let mut router = Router::new()
        .route("/", get(handlers::root::root))
        .route("/health", get(handlers::root::health_check))

        .nest("/auth", auth_routes())
        .nest("/api", api_routes(app_state.clone()))
        .nest("/admin", admin_routes(app_state.clone()));

    if app_state.virtual_gateway.is_some() {
        router = router.nest("/virtual-gateway", virtual_gateway_routes());
    }

    router
        .with_state(app_state)
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(handlers::auth::login))
        .route("/refresh", post(handlers::auth::refresh))
        .route("/revoke", post(handlers::auth::revoke))
}

fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .nest("/payments", payment_routes(state.clone()))
        .nest("/memberships", membership_routes(state.clone()))
        .nest("/attendance", attendance_routes(state))
}

fn payment_routes(state: AppState) -> Router<AppState> {
    // The gateway redirects the customer here, so no auth.
    let callbacks = Router::new()
        .route(
            "/callback",
            get(handlers::payments::callback).post(handlers::payments::callback),
        )
        .route(
            "/callback/:payment_id",
            get(handlers::payments::callback_with_id).post(handlers::payments::callback_with_id),
        );

    let admin = Router::new()
        .route("/refund", post(handlers::payments::refund))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_gym_admin,
        ));

    let authenticated = Router::new()
        .route("/", post(handlers::payments::create))
        .route("/my", get(handlers::payments::my_payments))
        .route("/:id", get(handlers::payments::get))
        .route("/:id/cancel", post(handlers::payments::cancel))
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            middleware::auth::require_auth,
        ));

    callbacks.merge(admin).merge(authenticated)
}

fn membership_routes(state: AppState) -> Router<AppState> {
    let admin = Router::new()
        .route("/", post(handlers::memberships::create))
        .route("/:id/renew", post(handlers::memberships::renew))
        .route("/:id/deduct-session", post(handlers::memberships::deduct_session))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_gym_admin,
        ));

    let authenticated = Router::new()
        .route("/my", get(handlers::memberships::my_memberships))
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            middleware::auth::require_auth,
        ));

    admin.merge(authenticated)
}

fn attendance_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::attendance::check_in))
        .route("/today", get(handlers::attendance::today))
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            middleware::auth::require_gym_admin,
        ))
}

fn admin_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/payments/expire-stale", post(handlers::admin::expire_stale))
        .route("/payments/reconcile", post(handlers::admin::reconcile))
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            middleware::auth::require_gym_admin,
        ))
}

fn virtual_gateway_routes() -> Router<AppState> {
    Router::new()
        .route("/:tracking_number", get(handlers::virtual_gateway::show))
        .route("/:tracking_number/pay", post(handlers::virtual_gateway::pay))
        .route("/:tracking_number/decline", post(handlers::virtual_gateway::decline))
}
