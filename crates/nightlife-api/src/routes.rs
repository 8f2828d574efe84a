use axum::{
    Extension, Json, Router, middleware,
    routing::{get, post},
};
use serde_json::{Value, json};

use nightlife_types::models::Identity;

use crate::auth::{self, AppState};
use crate::bars;
use crate::middleware::{require_auth, resolve_identity};

/// All HTTP routes. Transport layers (CORS, tracing) are added by the binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", get(auth::logout))
        .route("/auth/user", get(auth::current_user))
        .route("/bars/search", get(bars::search));

    let protected_routes = Router::new()
        .route("/auth/user/last-location", get(auth::last_location))
        .route("/bars/{venue_id}/go", post(bars::go).delete(bars::leave))
        .layer(middleware::from_fn(require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(middleware::from_fn_with_state(state.clone(), resolve_identity))
        .with_state(state)
}

async fn index(Extension(identity): Extension<Identity>) -> String {
    let (status, user) = match identity.user() {
        Some(user) => ("Authenticated", user.username.as_str()),
        None => ("Not Authenticated", "Guest"),
    };
    format!("Nightlife backend is running! Status: {}, User: {}", status, user)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
