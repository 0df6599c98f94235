//! Server-rendered HTML frontend. Every page is a pure function of a state token.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::logscope_api::SearchApi;
use crate::logscope_app::{App, AppConfig, Phase};
use crate::logscope_core::{Mode, Timeframe};
use crate::logscope_driver::settle;
use crate::logscope_render::html;
use crate::logscope_state::{decode_or_default, encode, reduce, HashState, StateAction};

#[derive(Debug, Error)]
pub enum WebError {
    #[error("refusing to bind to non-loopback address {0}; set LOGSCOPE_ALLOW_REMOTE=1 to allow it")]
    RemoteBindRefused(SocketAddr),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("http server failed: {0}")]
    Serve(#[source] std::io::Error),
}

#[derive(Clone)]
struct WebState {
    api: Arc<dyn SearchApi>,
    config: AppConfig,
}

#[derive(Debug, Default, Deserialize)]
struct ViewQuery {
    row: Option<usize>,
}

/// Fields submitted by the search form.
#[derive(Debug, Default, Deserialize)]
struct ApplyForm {
    search: Option<String>,
    timeframe: Option<String>,
    mode: Option<String>,
    field: Option<String>,
}

pub fn router(api: Arc<dyn SearchApi>, config: AppConfig) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/view/{token}", get(view_handler))
        .route("/apply/{token}", get(apply_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(WebState { api, config })
}

pub async fn serve(
    api: Arc<dyn SearchApi>,
    config: AppConfig,
    addr: SocketAddr,
    allow_remote: bool,
) -> Result<(), WebError> {
    if !allow_remote && !addr.ip().is_loopback() {
        return Err(WebError::RemoteBindRefused(addr));
    }
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| WebError::Bind { addr, source })?;
    info!(%addr, "serving html frontend");
    axum::serve(listener, router(api, config))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .map_err(WebError::Serve)
}

async fn index_handler(State(web): State<WebState>) -> Html<String> {
    Html(render_view(web.api.as_ref(), &web.config, HashState::default(), None).await)
}

async fn view_handler(
    State(web): State<WebState>,
    Path(token): Path<String>,
    Query(query): Query<ViewQuery>,
) -> Html<String> {
    let state = decode_or_default(&token);
    Html(render_view(web.api.as_ref(), &web.config, state, query.row).await)
}

async fn apply_handler(Path(token): Path<String>, Query(form): Query<ApplyForm>) -> Response {
    let state = apply_form(&decode_or_default(&token), form);
    Redirect::to(&html::view_href(&state)).into_response()
}

async fn healthz_handler() -> &'static str {
    "ok"
}

fn parse_mode(value: &str) -> Option<Mode> {
    let value = value.trim();
    Mode::CYCLE.into_iter().chain([Mode::Document]).find(|mode| mode.as_str() == value)
}

/// Folds a search form submission into `state`.
fn apply_form(state: &HashState, form: ApplyForm) -> HashState {
    let mut next = state.clone();
    if let Some(search) = form.search {
        next = reduce(&next, StateAction::SetSearch(search.trim().to_string()));
    }
    let timeframe = form.timeframe.as_deref().and_then(|value| value.parse::<Timeframe>().ok());
    if let Some(timeframe) = timeframe {
        if timeframe != Timeframe::Custom && timeframe != next.timeframe {
            next = reduce(&next, StateAction::SetTimeframe(timeframe));
        }
    }
    let field = form.field.map(|field| field.trim().to_string()).filter(|field| !field.is_empty());
    if let Some(mode) = form.mode.as_deref().and_then(parse_mode) {
        next = match field {
            Some(field) if mode.is_analysis() => {
                reduce(&next, StateAction::Analyze { field, mode })
            }
            _ if mode != next.mode => reduce(&next, StateAction::SetMode(mode)),
            _ => next,
        };
    }
    debug!(from = %encode(state), to = %encode(&next), "applied form");
    next
}

/// Runs `state` through the app and renders the resulting page.
pub async fn render_view(
    api: &dyn SearchApi,
    config: &AppConfig,
    state: HashState,
    expanded: Option<usize>,
) -> String {
    let now = Utc::now();
    let mut app = App::new(config.clone(), state);
    let effects = app.start(now);
    settle(&mut app, api, effects, now).await;
    render_page(&app, expanded)
}

pub fn render_page(app: &App, expanded: Option<usize>) -> String {
    let state = app.state();
    let mut body = html::search_form(state);

    if let Some(histogram) = app.histogram() {
        body.push_str(&html::graph_mode_toggle(state));
        body.push_str(&html::histogram(histogram, state));
    }
    if let Some(error) = app.graph_error() {
        body.push_str(&html::error_panel(error));
    }

    match app.phase() {
        Phase::Failed(message) => body.push_str(&html::error_panel(message)),
        Phase::NoMatches => body.push_str(&html::no_matches_panel(state)),
        Phase::Idle | Phase::Fetching => body.push_str(&html::loading_panel()),
        Phase::Rendered => {
            if let Some(view) = app.analysis() {
                body.push_str(&html::analysis(view, state));
            } else if let Some(view) = app.document() {
                body.push_str(&html::detail(&view, state));
            } else if !app.table().is_empty() {
                let columns = app.columns();
                body.push_str(&html::column_picker(state, app.known_fields(), &columns));
                body.push_str(&html::table(app.table(), state, expanded));
                if let Some(view) = expanded.and_then(|row| app.detail(row)) {
                    body.push_str(&html::detail(&view, state));
                }
                if state.mode != Mode::Stream {
                    body.push_str(&html::pagination(state, app.total(), app.config().per_page));
                }
            }
        }
    }

    let title = if state.search.is_empty() { "*" } else { state.search.as_str() };
    html::page(title, &app.location(), &body)
}
