use std::sync::Arc;

use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use axum_extra::extract::WithRejection;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

use nightlife_db::Database;
use nightlife_types::api::{
    CurrentUserResponse, LastLocationResponse, LoginRequest, LoginResponse, MessageResponse, RegisterRequest,
};
use nightlife_types::models::{Identity, UserSummary};

use crate::attendance::AttendanceReconciler;
use crate::authenticator::Authenticator;
use crate::error::{ApiError, ApiResult};
use crate::provider::VenueProvider;
use crate::search::{SearchOrchestrator, SearchSettings};
use crate::session::SessionStore;

pub const SESSION_COOKIE: &str = "nightlife.sid";

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub authenticator: Authenticator,
    pub attendance: AttendanceReconciler,
    pub search: SearchOrchestrator,
    pub cookie_secure: bool,
}

impl AppStateInner {
    pub fn new(
        db: Arc<Database>,
        sessions: SessionStore,
        provider: Arc<dyn VenueProvider>,
        search_settings: SearchSettings,
        cookie_secure: bool,
    ) -> Self {
        let attendance = AttendanceReconciler::new(db.clone());
        Self {
            authenticator: Authenticator::new(db.clone(), sessions),
            search: SearchOrchestrator::new(provider, attendance.clone(), db, search_settings),
            attendance,
            cookie_secure,
        }
    }
}

fn session_cookie(token: String, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .build()
}

pub async fn register(
    State(state): State<AppState>,
    WithRejection(Json(req), _): WithRejection<Json<RegisterRequest>, ApiError>,
) -> ApiResult<impl IntoResponse> {
    state.authenticator.register(&req.username, &req.password).await?;

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::new("User registered successfully.")),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    WithRejection(Json(req), _): WithRejection<Json<LoginRequest>, ApiError>,
) -> ApiResult<impl IntoResponse> {
    let (token, user) = state.authenticator.login(&req.username, &req.password).await?;

    // A browser holds one cookie, so its previous session is dead weight.
    if let Some(previous) = jar.get(SESSION_COOKIE) {
        state.authenticator.logout(Some(previous.value())).await;
    }

    let jar = jar.add(session_cookie(token, state.cookie_secure));
    Ok((
        jar,
        Json(LoginResponse {
            message: "Login successful.".into(),
            user,
        }),
    ))
}

pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    let token = jar.get(SESSION_COOKIE).map(|c| c.value().to_string());
    state.authenticator.logout(token.as_deref()).await;

    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    (jar, Json(MessageResponse::new("Logout successful.")))
}

pub async fn current_user(Extension(identity): Extension<Identity>) -> Json<CurrentUserResponse> {
    Json(CurrentUserResponse {
        is_authenticated: identity.is_authenticated(),
        user: identity.user().cloned(),
    })
}

pub async fn last_location(
    State(state): State<AppState>,
    Extension(user): Extension<UserSummary>,
) -> ApiResult<Json<LastLocationResponse>> {
    let last_search_location = state.authenticator.last_search_location(&user).await?;
    Ok(Json(LastLocationResponse { last_search_location }))
}
