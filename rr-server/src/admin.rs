use std::time::Instant;

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Request, State},
    http::{Response, StatusCode},
    middleware::{self, Next},
    response::IntoResponse,
    routing::{get, post, put},
};
use common::general_key_by_name;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    control_channel::{ControlChannel, ControlEvent},
    logging::{category_access, category_settings, method_label, status_label},
    mirror::{Coalition, SharedMirror, set_password},
    relay::SharedRoster,
    run_state::{SharedRunState, request_start_stop},
};

/// Handle bundle behind the admin surface. Everything is shared with the
/// relay side; the surface holds no state of its own.
#[derive(Clone)]
pub struct AdminState {
    pub mirror: SharedMirror,
    pub run_state: SharedRunState,
    pub channel: ControlChannel,
    pub roster: SharedRoster,
}

pub fn build_admin_app(state: AdminState) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/server/toggle", post(server_toggle_handler))
        .route("/settings", get(settings_handler))
        .route(
            "/settings/general/{key}/toggle",
            post(toggle_setting_handler),
        )
        .route(
            "/settings/external-access/{coalition}/password",
            put(set_password_handler),
        )
        .route("/clients", get(clients_handler))
        .layer(middleware::from_fn(access_log_middleware))
        .with_state(state)
}

#[derive(Serialize)]
struct StatusResponse {
    is_running: bool,
    client_count: usize,
    start_stop_label: &'static str,
    listening_port: String,
}

async fn status_handler(State(state): State<AdminState>) -> impl IntoResponse {
    let run = state.run_state.current();
    Json(StatusResponse {
        is_running: run.is_running,
        client_count: run.client_count,
        start_stop_label: run.start_stop_label(),
        listening_port: state.mirror.listening_port(),
    })
}

#[derive(Serialize)]
struct IntentResponse {
    requested: &'static str,
}

async fn server_toggle_handler(State(state): State<AdminState>) -> impl IntoResponse {
    let intent = request_start_stop(&state.run_state, &state.channel);
    let requested = match intent {
        ControlEvent::StopServerRequested => "stop",
        _ => "start",
    };
    (StatusCode::ACCEPTED, Json(IntentResponse { requested }))
}

async fn settings_handler(State(state): State<AdminState>) -> impl IntoResponse {
    Json(state.mirror.snapshot())
}

#[derive(Serialize)]
struct ToggleResponse {
    key: &'static str,
    value: bool,
    label: &'static str,
}

async fn toggle_setting_handler(
    State(state): State<AdminState>,
    Path(key): Path<String>,
) -> Response<Body> {
    let Some(key) = general_key_by_name(&key) else {
        return text_response(StatusCode::NOT_FOUND, &format!("unknown setting: {key}"));
    };
    match state.mirror.toggle(key) {
        Ok(value) => Json(ToggleResponse {
            key: key.name(),
            value,
            label: key.display_label(value),
        })
        .into_response(),
        Err(err) => {
            warn!("{} toggle {} failed: {err}", category_settings(), key.name());
            text_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
        }
    }
}

#[derive(Deserialize)]
struct PasswordBody {
    value: String,
}

async fn set_password_handler(
    State(state): State<AdminState>,
    Path(coalition): Path<String>,
    Json(body): Json<PasswordBody>,
) -> Response<Body> {
    let coalition = match coalition.as_str() {
        "blue" => Coalition::Blue,
        "red" => Coalition::Red,
        other => {
            return text_response(StatusCode::NOT_FOUND, &format!("unknown coalition: {other}"));
        }
    };
    set_password(&state.mirror, coalition, &body.value);
    // The commit lands after the quiet period; the edit is visible already.
    StatusCode::ACCEPTED.into_response()
}

async fn clients_handler(State(state): State<AdminState>) -> impl IntoResponse {
    Json(state.roster.summaries())
}

async fn access_log_middleware(request: Request, next: Next) -> Response<Body> {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let started = Instant::now();
    let response = next.run(request).await;
    let elapsed_ms = started.elapsed().as_millis();
    let status = response.status();

    info!(
        "{} {} {} {} {}ms",
        category_access(),
        method_label(method.as_str()),
        status_label(status.as_u16()),
        uri,
        elapsed_ms
    );

    response
}

fn text_response(status: StatusCode, text: &str) -> Response<Body> {
    let mut response = Response::new(Body::from(text.to_string()));
    *response.status_mut() = status;
    response
}
