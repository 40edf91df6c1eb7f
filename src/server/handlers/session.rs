//! Session endpoints: login, read (with rotation), logout.

use axum::{
    extract::Extension,
    http::{
        header::{COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::error;

use crate::directive::CookieDirective;
use crate::machine::SessionState;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub state: &'static str,
    pub rotated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_data: Option<Value>,
}

/// Start a session. The JSON body is stored as the session's application data.
pub async fn login(
    Extension(state): Extension<Arc<AppState>>,
    Json(application_data): Json<Value>,
) -> Response {
    match state.manager.login(application_data).await {
        Ok(login) => with_cookie(StatusCode::CREATED, &state, Some(&login.cookie), ()),
        Err(err) => {
            error!("Failed to create session: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Evaluate the session cookie, rotating the token when due.
pub async fn session(Extension(state): Extension<Arc<AppState>>, headers: HeaderMap) -> Response {
    let cookie_value = extract_session_cookie(&headers, &state.cookie_name);
    let transition = match state.manager.consume(cookie_value.as_deref()).await {
        Ok(transition) => transition,
        Err(err) => {
            error!("Failed to evaluate session: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let status = if transition.state.is_active() {
        StatusCode::OK
    } else {
        StatusCode::UNAUTHORIZED
    };
    let body = Json(SessionResponse {
        state: transition.state.as_str(),
        rotated: transition.state == (SessionState::Active { rotated: true }),
        application_data: transition.application_data,
    });
    with_cookie(status, &state, transition.cookie.as_ref(), body)
}

/// End the session. Always clears the cookie, even if the record was missing.
pub async fn logout(Extension(state): Extension<Arc<AppState>>, headers: HeaderMap) -> Response {
    let cookie_value = extract_session_cookie(&headers, &state.cookie_name);
    match state.manager.logout(cookie_value.as_deref()).await {
        Ok(cookie) => with_cookie(StatusCode::NO_CONTENT, &state, Some(&cookie), ()),
        Err(err) => {
            error!("Failed to delete session: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn with_cookie(
    status: StatusCode,
    state: &AppState,
    cookie: Option<&CookieDirective>,
    body: impl IntoResponse,
) -> Response {
    let mut headers = HeaderMap::new();
    if let Some(cookie) = cookie {
        match HeaderValue::from_str(&cookie.to_header(&state.cookie_name)) {
            Ok(value) => {
                headers.insert(SET_COOKIE, value);
            }
            Err(err) => {
                error!("Failed to build session cookie: {err}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
    }
    (status, headers, body).into_response()
}

/// Find the named cookie in the `Cookie` header(s).
pub(crate) fn extract_session_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let key = parts.next().unwrap_or_default().trim();
            let Some(val) = parts.next() else {
                continue;
            };
            if key == name {
                return Some(val.trim().to_string());
            }
        }
    }
    None
}
