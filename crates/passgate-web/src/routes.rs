//! Request handlers.
//!
//! Each handler wraps the request's private cookie jar in
//! [`SessionCookies`](crate::cookies::SessionCookies), runs
//! one [`FlowController`](passgate_auth::FlowController) operation, and
//! returns the updated jar alongside a `302 Found`.

use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum_extra::extract::PrivateCookieJar;
use passgate_auth::{CallbackParams, CurrentUser, LOGOUT_PATH};
use serde::Deserialize;

use crate::frontend;
use crate::state::AppState;

/// `302 Found` to `location`.
pub fn found(location: impl Into<String>) -> impl IntoResponse {
    (StatusCode::FOUND, [(header::LOCATION, location.into())])
}

/// `GET /auth/login`
pub async fn login(State(state): State<AppState>, jar: PrivateCookieJar) -> Response {
    let cookies = state.cookies(jar);
    let mut attempts = state.attempts(&cookies);

    match state.flow.initiate(&mut attempts).await {
        Ok(url) => (cookies.take_jar(), found(url.to_string())).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "failed to start authorization");
            (StatusCode::INTERNAL_SERVER_ERROR, "sign-in is unavailable").into_response()
        }
    }
}

/// `GET /auth/callback`
pub async fn callback(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Query(params): Query<CallbackParams>,
) -> Response {
    let cookies = state.cookies(jar);
    let mut attempts = state.attempts(&cookies);
    let mut logins = cookies.login();

    let result = state
        .flow
        .callback(&params, &mut attempts, &mut logins)
        .await;

    (cookies.take_jar(), found(result.redirect_to)).into_response()
}

/// `GET /auth/logout`
pub async fn logout(State(state): State<AppState>, jar: PrivateCookieJar) -> Response {
    let cookies = state.cookies(jar);

    if let Err(err) = state.flow.logout(&mut cookies.login()).await {
        tracing::warn!(error = %err, "failed to clear login session");
    }

    (cookies.take_jar(), found("/")).into_response()
}

/// Query parameters accepted by the landing page.
#[derive(Debug, Default, Deserialize)]
pub struct IndexParams {
    pub error: Option<String>,
}

/// `GET /`
pub async fn index(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Query(params): Query<IndexParams>,
) -> Response {
    let cookies = state.cookies(jar);
    let error = params.error.as_deref().filter(|e| !e.is_empty());

    match state.flow.current_user(&cookies.login()).await {
        Ok(CurrentUser::Guest) => Html(frontend::render(None, error)).into_response(),
        Ok(CurrentUser::SignedIn(user)) => {
            Html(frontend::render(Some(&user), error)).into_response()
        }
        Ok(CurrentUser::Dangling { user_id }) => {
            tracing::warn!(%user_id, "login session names an unknown user");
            found(LOGOUT_PATH).into_response()
        }
        Err(err) => {
            tracing::error!(error = %err, "failed to resolve login session");
            found(LOGOUT_PATH).into_response()
        }
    }
}
