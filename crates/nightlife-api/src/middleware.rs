use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;

use nightlife_types::models::Identity;

use crate::auth::{AppState, SESSION_COOKIE};
use crate::authenticator::Authenticator;

/// Resolve the session cookie to an `Identity` and attach it to the request.
/// Runs on every route; never rejects.
pub async fn resolve_identity(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let jar = CookieJar::from_headers(req.headers());
    let token = jar.get(SESSION_COOKIE).map(|c| c.value().to_string());

    let identity = state.authenticator.resolve_caller(token.as_deref()).await;
    req.extensions_mut().insert(identity);
    next.run(req).await
}

/// Reject anonymous callers with 401. Authenticated callers get their
/// `UserSummary` attached for the handler.
pub async fn require_auth(mut req: Request, next: Next) -> Response {
    let identity = req
        .extensions()
        .get::<Identity>()
        .cloned()
        .unwrap_or(Identity::Anonymous);

    match Authenticator::require_authenticated(&identity) {
        Ok(user) => {
            req.extensions_mut().insert(user);
            next.run(req).await
        }
        Err(e) => e.into_response(),
    }
}
