//! Application state machine.
//!
//! `App` owns the current hash state and the result set fetched for it. Every input
//! (navigation, user action, completed request, timer) goes through a method that
//! returns the effects the driver must execute; `App` itself never performs I/O.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::logscope_api::ApiError;
use crate::logscope_core::{ApiPayload, GraphResponse, Millis, Mode, SearchResponse, TimeRange};
use crate::logscope_dispatch::{
    dispatch, graph_range, graph_request, ApiRequest, DispatchContext, Lane, RequestTracker, Ticket,
    TicketId,
};
use crate::logscope_graph::{bucket_interval, ChartGeometry, Histogram};
use crate::logscope_render::{
    effective_columns, flatten_hits, known_fields, AnalysisView, DetailView, FlatHit, TableView,
};
use crate::logscope_state::{decode_or_default, encode, reduce, HashState, History, StateAction};

pub const DEFAULT_PER_PAGE: usize = 50;
pub const DEFAULT_MAX_BUCKETS: usize = 100;
pub const DEFAULT_REFRESH_MS: u64 = 10_000;
pub const DEFAULT_STREAM_BUFFER: usize = 200;
pub const DEFAULT_TIMESTAMP_FIELD: &str = "@timestamp";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub per_page: usize,
    pub max_buckets: usize,
    pub refresh: Duration,
    pub stream_buffer: usize,
    pub default_fields: Vec<String>,
    pub timestamp_field: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            per_page: DEFAULT_PER_PAGE,
            max_buckets: DEFAULT_MAX_BUCKETS,
            refresh: Duration::from_millis(DEFAULT_REFRESH_MS),
            stream_buffer: DEFAULT_STREAM_BUFFER,
            default_fields: vec!["@message".to_string()],
            timestamp_field: DEFAULT_TIMESTAMP_FIELD.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Fetching,
    Rendered,
    NoMatches,
    Failed(String),
}

/// Work the app asks the driver to do.
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    Fetch { ticket: Ticket, request: ApiRequest },
    Abort(TicketId),
    ClearRefresh,
    ArmRefresh(Duration),
}

#[derive(Clone, Debug, Default, PartialEq)]
enum ResultSet {
    #[default]
    Empty,
    Hits { total: u64, hits: Vec<FlatHit> },
    Analysis(AnalysisView),
    Document(FlatHit),
}

#[derive(Debug)]
pub struct App {
    config: AppConfig,
    state: HashState,
    history: History,
    tracker: RequestTracker,
    phase: Phase,
    results: ResultSet,
    table: TableView,
    known_fields: Vec<String>,
    server_defaults: Vec<String>,
    histogram: Option<Histogram>,
    graph_error: Option<String>,
    last_range: Option<TimeRange>,
    stream_since: Option<Millis>,
    refresh_armed: bool,
}

impl App {
    pub fn new(config: AppConfig, state: HashState) -> Self {
        Self {
            config,
            state: state.normalized(),
            history: History::default(),
            tracker: RequestTracker::default(),
            phase: Phase::Idle,
            results: ResultSet::Empty,
            table: TableView::default(),
            known_fields: Vec::new(),
            server_defaults: Vec::new(),
            histogram: None,
            graph_error: None,
            last_range: None,
            stream_since: None,
            refresh_armed: false,
        }
    }

    /// Issues the initial fetch for the state the app was created with.
    pub fn start(&mut self, now: DateTime<Utc>) -> Vec<Effect> {
        let state = self.state.clone();
        self.navigate(state, now)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn state(&self) -> &HashState {
        &self.state
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn location(&self) -> String {
        self.state.location()
    }

    pub fn is_busy(&self) -> bool {
        !self.tracker.is_idle()
    }

    pub fn refresh_armed(&self) -> bool {
        self.refresh_armed
    }

    fn context(&self, now: DateTime<Utc>) -> DispatchContext {
        DispatchContext {
            now,
            max_buckets: self.config.max_buckets,
            since: self.stream_since,
            last_range: self.last_range.clone(),
        }
    }

    pub fn navigate(&mut self, state: HashState, now: DateTime<Utc>) -> Vec<Effect> {
        let next = state.normalized();
        self.history.push(encode(&next));
        let query_changed = next.fetch_token() != self.state.fetch_token();
        let left_stream = self.state.mode == Mode::Stream && next.mode != Mode::Stream;
        self.state = next;

        let mut effects = Vec::new();
        if self.refresh_armed && (query_changed || left_stream) {
            self.refresh_armed = false;
            effects.push(Effect::ClearRefresh);
        }
        let has_results =
            matches!(self.phase, Phase::Fetching | Phase::Rendered | Phase::NoMatches);
        if !query_changed && has_results {
            self.reproject();
            return effects;
        }

        self.discard_results();
        if let Some(id) = self.tracker.cancel(Lane::Graph) {
            effects.push(Effect::Abort(id));
        }
        self.fetch_primary(now, &mut effects);
        effects
    }

    pub fn apply(&mut self, action: StateAction, now: DateTime<Utc>) -> Vec<Effect> {
        let mut base = self.state.clone();
        if matches!(action, StateAction::MoveField { .. }) && base.fields.is_empty() {
            base.fields = self.columns();
        }
        let next = reduce(&base, action);
        self.navigate(next, now)
    }

    pub fn open_token(&mut self, token: &str, now: DateTime<Utc>) -> Vec<Effect> {
        self.navigate(decode_or_default(token), now)
    }

    pub fn back(&mut self, now: DateTime<Utc>) -> Vec<Effect> {
        match self.history.back().map(decode_or_default) {
            Some(state) => self.navigate(state, now),
            None => Vec::new(),
        }
    }

    pub fn forward(&mut self, now: DateTime<Utc>) -> Vec<Effect> {
        match self.history.forward().map(decode_or_default) {
            Some(state) => self.navigate(state, now),
            None => Vec::new(),
        }
    }

    /// Drops everything in flight. Nothing replaces it, so the app goes idle.
    pub fn cancel(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        for lane in [Lane::Primary, Lane::Graph] {
            if let Some(id) = self.tracker.cancel(lane) {
                effects.push(Effect::Abort(id));
            }
        }
        if self.refresh_armed {
            self.refresh_armed = false;
            effects.push(Effect::ClearRefresh);
        }
        if self.phase == Phase::Fetching {
            self.phase = Phase::Idle;
        }
        effects
    }

    fn discard_results(&mut self) {
        self.results = ResultSet::Empty;
        self.table = TableView::default();
        self.known_fields.clear();
        self.histogram = None;
        self.graph_error = None;
        self.stream_since = None;
    }

    fn fetch_primary(&mut self, now: DateTime<Utc>, effects: &mut Vec<Effect>) {
        let ctx = self.context(now);
        match dispatch(&self.state, &ctx) {
            Ok(request) => {
                if self.state.mode == Mode::Graph {
                    let range = graph_range(&self.state, &ctx);
                    let interval = bucket_interval(&range, self.config.max_buckets);
                    self.histogram = Some(Histogram::empty(range, interval));
                }
                self.issue(Lane::Primary, request, effects);
                self.phase = Phase::Fetching;
            }
            Err(error) => {
                warn!(%error, "cannot dispatch state");
                if let Some(id) = self.tracker.cancel(Lane::Primary) {
                    effects.push(Effect::Abort(id));
                }
                self.phase = Phase::Failed(error.to_string());
            }
        }
    }

    fn issue(&mut self, lane: Lane, request: ApiRequest, effects: &mut Vec<Effect>) {
        let (ticket, superseded) = self.tracker.begin(lane, self.state.fetch_token());
        if let Some(id) = superseded {
            effects.push(Effect::Abort(id));
        }
        effects.push(Effect::Fetch { ticket, request });
    }

    /// Feeds a finished request back in. Responses for anything but the lane's live
    /// ticket and the current fetch token are dropped without touching the view.
    pub fn complete(
        &mut self,
        ticket: Ticket,
        result: Result<ApiPayload, ApiError>,
        now: DateTime<Utc>,
    ) -> Vec<Effect> {
        if !self.tracker.accept(&ticket, &self.state.fetch_token()) {
            debug!(ticket = ticket.id, lane = ?ticket.lane, "dropping stale response");
            return Vec::new();
        }
        self.tracker.finish(&ticket);

        let payload = match result {
            Ok(payload) => payload,
            Err(error) => {
                warn!(%error, lane = ?ticket.lane, "request failed");
                match ticket.lane {
                    Lane::Primary => self.phase = Phase::Failed(error.to_string()),
                    Lane::Graph => self.graph_error = Some(error.to_string()),
                }
                return Vec::new();
            }
        };

        let mut effects = Vec::new();
        match (ticket.lane, payload) {
            (Lane::Primary, ApiPayload::Search(response)) => {
                self.on_search(response, now, &mut effects)
            }
            (Lane::Primary, ApiPayload::Graph(response)) => {
                self.on_graph(response, Lane::Primary, &mut effects);
            }
            (Lane::Graph, ApiPayload::Graph(response)) => {
                self.on_graph(response, Lane::Graph, &mut effects);
            }
            (Lane::Primary, ApiPayload::Analyze(response)) => {
                let field = self.state.analyze_field.clone().unwrap_or_default();
                let view = AnalysisView::new(self.state.mode, &field, &response);
                self.phase = if response.is_empty() { Phase::NoMatches } else { Phase::Rendered };
                self.results = ResultSet::Analysis(view);
            }
            (Lane::Primary, ApiPayload::Document(response)) => {
                let hits = flatten_hits(&response.hits.hits, &self.config.timestamp_field);
                match hits.into_iter().next() {
                    Some(hit) => {
                        self.known_fields = hit.fields.keys().cloned().collect();
                        self.results = ResultSet::Document(hit);
                        self.phase = Phase::Rendered;
                    }
                    None => self.phase = Phase::NoMatches,
                }
            }
            (Lane::Primary, ApiPayload::Stream(response)) => {
                self.on_stream(response, now, &mut effects)
            }
            (lane, payload) => {
                warn!(lane = ?lane, payload = ?payload_kind(&payload), "unexpected payload");
                if lane == Lane::Primary {
                    self.phase = Phase::Failed(format!(
                        "unexpected {} response for {} mode",
                        payload_kind(&payload),
                        self.state.mode
                    ));
                }
            }
        }
        effects
    }

    fn on_search(
        &mut self,
        response: SearchResponse,
        now: DateTime<Utc>,
        effects: &mut Vec<Effect>,
    ) {
        self.last_range = response.meta.time.clone();
        self.server_defaults = response.meta.default_fields.clone();
        let hits = flatten_hits(&response.hits.hits, &self.config.timestamp_field);
        let total = response.hits.total.max(hits.len() as u64);
        self.known_fields = known_fields(&hits);
        self.results = ResultSet::Hits { total, hits };
        self.reproject();

        if response.is_empty() {
            self.phase = Phase::NoMatches;
            return;
        }
        self.phase = Phase::Rendered;

        let ctx = self.context(now);
        let range = graph_range(&self.state, &ctx);
        let interval = bucket_interval(&range, self.config.max_buckets);
        self.histogram = Some(Histogram::empty(range, interval));
        let request = graph_request(&self.state, interval, 0);
        self.issue(Lane::Graph, request, effects);
    }

    fn on_graph(&mut self, response: GraphResponse, lane: Lane, effects: &mut Vec<Effect>) {
        let Some(histogram) = self.histogram.as_mut() else {
            return;
        };
        histogram.merge_entries(&response.entries);
        let interval = histogram.interval_ms;
        let total = histogram.total();

        if let Some(segment) = response.next {
            let request = graph_request(&self.state, interval, segment);
            self.issue(lane, request, effects);
            return;
        }
        if lane == Lane::Primary {
            self.phase = if total == 0 { Phase::NoMatches } else { Phase::Rendered };
        }
    }

    fn on_stream(
        &mut self,
        response: SearchResponse,
        now: DateTime<Utc>,
        effects: &mut Vec<Effect>,
    ) {
        let incoming = flatten_hits(&response.hits.hits, &self.config.timestamp_field);
        let mut hits = match std::mem::take(&mut self.results) {
            ResultSet::Hits { hits, .. } => hits,
            _ => Vec::new(),
        };
        for hit in incoming {
            if !hits.iter().any(|existing| existing.id == hit.id && existing.index == hit.index) {
                hits.push(hit);
            }
        }
        hits.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        hits.truncate(self.config.stream_buffer);

        let newest = hits.iter().filter_map(|hit| hit.timestamp).max();
        self.stream_since = newest.or(self.stream_since);
        self.known_fields = known_fields(&hits);

        let ctx = self.context(now);
        let range = graph_range(&self.state, &ctx);
        let interval = bucket_interval(&range, self.config.max_buckets);
        self.histogram = Some(Histogram::from_timestamps(
            range,
            interval,
            hits.iter().filter_map(|hit| hit.timestamp),
        ));

        self.phase = if hits.is_empty() { Phase::NoMatches } else { Phase::Rendered };
        self.results = ResultSet::Hits { total: hits.len() as u64, hits };
        self.reproject();

        effects.push(Effect::ClearRefresh);
        effects.push(Effect::ArmRefresh(self.config.refresh));
        self.refresh_armed = true;
    }

    /// The stream timer fired. Polls once unless a poll is already in flight.
    pub fn refresh_due(&mut self, now: DateTime<Utc>) -> Vec<Effect> {
        self.refresh_armed = false;
        if self.state.mode != Mode::Stream || self.tracker.in_flight(Lane::Primary).is_some() {
            return Vec::new();
        }
        let mut effects = Vec::new();
        match dispatch(&self.state, &self.context(now)) {
            Ok(request) => self.issue(Lane::Primary, request, &mut effects),
            Err(error) => self.phase = Phase::Failed(error.to_string()),
        }
        effects
    }

    /// Time range the histogram is drawn over.
    pub fn chart_range(&self) -> Option<&TimeRange> {
        self.histogram.as_ref().map(|histogram| &histogram.range)
    }

    /// Narrows the time range to a pixel selection on a chart `width` pixels wide.
    pub fn brush(
        &mut self,
        px_from: u32,
        px_to: u32,
        width: u32,
        now: DateTime<Utc>,
    ) -> Vec<Effect> {
        let Some(range) = self.chart_range().cloned() else {
            return Vec::new();
        };
        match ChartGeometry::new(width, range).brush(px_from, px_to) {
            Some(selected) => self.apply(StateAction::SetTimeRange(selected), now),
            None => Vec::new(),
        }
    }

    fn reproject(&mut self) {
        let columns = self.columns();
        self.table = match &self.results {
            ResultSet::Hits { hits, .. } => TableView::project(hits, &columns),
            _ => TableView::default(),
        };
    }

    pub fn columns(&self) -> Vec<String> {
        let defaults = if self.server_defaults.is_empty() {
            &self.config.default_fields
        } else {
            &self.server_defaults
        };
        effective_columns(&self.state.fields, defaults)
    }

    pub fn table(&self) -> &TableView {
        &self.table
    }

    pub fn hits(&self) -> &[FlatHit] {
        match &self.results {
            ResultSet::Hits { hits, .. } => hits,
            _ => &[],
        }
    }

    pub fn total(&self) -> u64 {
        match &self.results {
            ResultSet::Hits { total, .. } => *total,
            ResultSet::Document(_) => 1,
            ResultSet::Analysis(view) => view.total_count(),
            ResultSet::Empty => 0,
        }
    }

    pub fn known_fields(&self) -> &[String] {
        &self.known_fields
    }

    pub fn histogram(&self) -> Option<&Histogram> {
        self.histogram.as_ref()
    }

    pub fn graph_error(&self) -> Option<&str> {
        self.graph_error.as_deref()
    }

    pub fn analysis(&self) -> Option<&AnalysisView> {
        match &self.results {
            ResultSet::Analysis(view) => Some(view),
            _ => None,
        }
    }

    pub fn document(&self) -> Option<DetailView> {
        match &self.results {
            ResultSet::Document(hit) => Some(DetailView::from_hit(hit)),
            _ => None,
        }
    }

    pub fn detail(&self, row: usize) -> Option<DetailView> {
        self.hits().get(row).map(DetailView::from_hit)
    }
}

fn payload_kind(payload: &ApiPayload) -> &'static str {
    match payload {
        ApiPayload::Search(_) => "search",
        ApiPayload::Graph(_) => "graph",
        ApiPayload::Analyze(_) => "analyze",
        ApiPayload::Document(_) => "document",
        ApiPayload::Stream(_) => "stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logscope_core::{AnalyzeResponse, AnalyzeRow, GraphEntry, Hit, Hits, Timeframe};
    use crate::logscope_dispatch::Endpoint;
    use chrono::TimeZone;
    use rstest::{fixture, rstest};
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[fixture]
    fn app() -> App {
        App::new(AppConfig::default(), HashState::default())
    }

    fn hit(id: &str, millis: Millis, message: &str) -> Hit {
        Hit {
            id: id.to_string(),
            index: "logs".to_string(),
            source: json!({ "@timestamp": millis, "@message": message, "host": "web-1" }),
            highlight: Default::default(),
        }
    }

    fn search(hits: Vec<Hit>) -> ApiPayload {
        ApiPayload::Search(SearchResponse {
            hits: Hits { total: hits.len() as u64, hits },
            ..SearchResponse::default()
        })
    }

    fn fetches(effects: &[Effect]) -> Vec<(Ticket, ApiRequest)> {
        effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::Fetch { ticket, request } => Some((ticket.clone(), request.clone())),
                _ => None,
            })
            .collect()
    }

    fn single_fetch(effects: &[Effect]) -> (Ticket, ApiRequest) {
        let mut all = fetches(effects);
        assert_eq!(all.len(), 1, "expected exactly one fetch in {effects:?}");
        all.remove(0)
    }

    #[rstest]
    fn start_dispatches_one_search(mut app: App) {
        let effects = app.start(now());
        let (ticket, request) = single_fetch(&effects);
        assert_eq!(ticket.lane, Lane::Primary);
        assert_eq!(request.endpoint, Endpoint::Search);
        assert_eq!(app.phase(), &Phase::Fetching);
    }

    #[rstest]
    fn stale_response_never_reaches_the_view(mut app: App) {
        let effects = app.apply(StateAction::SetSearch("x".to_string()), now());
        let (ticket_x, _) = single_fetch(&effects);
        let effects = app.apply(StateAction::SetSearch("y".to_string()), now());
        assert!(effects.contains(&Effect::Abort(ticket_x.id)));
        let (ticket_y, _) = single_fetch(&effects);

        let late = app.complete(ticket_x, Ok(search(vec![hit("x1", 1, "from x")])), now());
        assert!(late.is_empty());
        assert!(app.hits().is_empty());
        assert_eq!(app.phase(), &Phase::Fetching);

        app.complete(ticket_y, Ok(search(vec![hit("y1", 1, "from y")])), now());
        assert_eq!(app.hits().len(), 1);
        assert_eq!(app.hits()[0].id, "y1");
        assert_eq!(app.state().search, "y");
    }

    #[rstest]
    fn zero_hits_show_no_matches_without_graph_fetch(mut app: App) {
        let (ticket, _) = single_fetch(&app.start(now()));
        let effects = app.complete(ticket, Ok(search(Vec::new())), now());
        assert!(effects.is_empty());
        assert_eq!(app.phase(), &Phase::NoMatches);
        assert!(app.histogram().is_none());
    }

    #[rstest]
    fn hits_trigger_one_graph_follow_up(mut app: App) {
        let (ticket, _) = single_fetch(&app.start(now()));
        let effects = app.complete(ticket, Ok(search(vec![hit("a", 1, "m")])), now());
        let (graph_ticket, request) = single_fetch(&effects);
        assert_eq!(graph_ticket.lane, Lane::Graph);
        assert_eq!(request.endpoint, Endpoint::Graph);
        assert_eq!(request.segments[5], "0");
        assert_eq!(app.phase(), &Phase::Rendered);
        assert_eq!(app.table().rows.len(), 1);
    }

    #[rstest]
    fn segmented_graph_requests_next_segment(mut app: App) {
        let (ticket, _) = single_fetch(&app.start(now()));
        let (graph_ticket, request) =
            single_fetch(&app.complete(ticket, Ok(search(vec![hit("a", 1, "m")])), now()));
        let interval: Millis = request.segments[3].parse().unwrap();
        let start = app.histogram().unwrap().buckets[0].start;

        let first = GraphResponse {
            entries: vec![GraphEntry { time: start, count: 2, mean: None }],
            next: Some(1),
        };
        let effects = app.complete(graph_ticket, Ok(ApiPayload::Graph(first)), now());
        let (next_ticket, next_request) = single_fetch(&effects);
        assert_eq!(next_request.segments[5], "1");

        let last = GraphResponse {
            entries: vec![GraphEntry { time: start + interval, count: 3, mean: None }],
            next: None,
        };
        assert!(app.complete(next_ticket, Ok(ApiPayload::Graph(last)), now()).is_empty());
        assert_eq!(app.histogram().unwrap().total(), 5);
        assert!(!app.is_busy());
    }

    #[rstest]
    fn presentation_changes_reuse_result_set(mut app: App) {
        let (ticket, _) = single_fetch(&app.start(now()));
        app.complete(ticket, Ok(search(vec![hit("a", 1, "m")])), now());

        let effects = app.apply(StateAction::ToggleField("host".to_string()), now());
        assert!(effects.is_empty());
        assert_eq!(app.table().columns, vec!["host".to_string()]);
        assert_eq!(app.table().rows[0].cells[0].text(), "web-1");

        let effects = app.apply(StateAction::ToggleField("host".to_string()), now());
        assert!(effects.is_empty());
        assert_eq!(app.table().columns, vec!["@message".to_string()]);
        assert_eq!(app.state(), &HashState::default());
    }

    #[rstest]
    fn moving_a_default_column_materializes_defaults(mut app: App) {
        let (ticket, _) = single_fetch(&app.start(now()));
        app.complete(ticket, Ok(search(vec![hit("a", 1, "m")])), now());
        app.apply(StateAction::ToggleField("host".to_string()), now());
        app.apply(StateAction::ResetFields, now());
        let effects =
            app.apply(StateAction::MoveField { field: "@message".to_string(), delta: 1 }, now());
        assert!(effects.is_empty());
        assert_eq!(app.state().fields, vec!["@message".to_string()]);
    }

    #[rstest]
    fn brush_sets_proportional_range_and_fetches_once(mut app: App) {
        let (ticket, _) = single_fetch(&app.start(now()));
        app.complete(ticket, Ok(search(vec![hit("a", 1, "m")])), now());
        let chart = app.chart_range().cloned().unwrap();

        let effects = app.brush(100, 300, 400, now());
        let (ticket, request) = single_fetch(&effects);
        assert_eq!(ticket.lane, Lane::Primary);
        assert_eq!(request.endpoint, Endpoint::Search);

        let span = chart.span_ms();
        let range = app.state().time.clone().unwrap();
        assert_eq!(app.state().timeframe, Timeframe::Custom);
        assert_eq!(range.from_ms(), chart.from_ms() + span / 4);
        assert_eq!(range.to_ms(), chart.from_ms() + span * 3 / 4);
        assert!(app.brush(5, 5, 400, now()).is_empty());
    }

    #[rstest]
    fn failures_show_message_and_do_not_retry(mut app: App) {
        let (ticket, _) = single_fetch(&app.start(now()));
        let error = ApiError::Status {
            request: "/api/search/x".to_string(),
            status: 502,
            body: "bad gateway".to_string(),
        };
        let effects = app.complete(ticket, Err(error), now());
        assert!(effects.is_empty());
        match app.phase() {
            Phase::Failed(message) => assert!(message.contains("502")),
            other => panic!("unexpected phase {other:?}"),
        }
    }

    #[rstest]
    fn navigating_to_a_failed_view_fetches_again(mut app: App) {
        let (ticket, first) = single_fetch(&app.start(now()));
        let error = ApiError::InvalidUrl("x".to_string());
        app.complete(ticket, Err(error), now());
        assert!(matches!(app.phase(), Phase::Failed(_)));

        let same = app.state().clone();
        let (ticket, again) = single_fetch(&app.navigate(same, now()));
        assert_eq!(again, first);
        assert_eq!(app.phase(), &Phase::Fetching);

        let effects = app.complete(ticket, Ok(search(vec![hit("a", 1, "up")])), now());
        assert_eq!(fetches(&effects).len(), 1, "graph follow-up");
        assert_eq!(app.phase(), &Phase::Rendered);

        let search_again = app.state().search.clone();
        assert!(fetches(&app.apply(StateAction::SetSearch(search_again), now())).is_empty());
    }

    #[rstest]
    fn analysis_without_field_fails_inline(mut app: App) {
        let effects = app.apply(StateAction::SetMode(Mode::Score), now());
        assert!(fetches(&effects).is_empty());
        assert!(matches!(app.phase(), Phase::Failed(_)));
    }

    #[rstest]
    fn analysis_results_render(mut app: App) {
        let effects =
            app.apply(StateAction::Analyze { field: "host".to_string(), mode: Mode::Terms }, now());
        let (ticket, request) = single_fetch(&effects);
        assert_eq!(request.endpoint, Endpoint::Analyze);
        let response = AnalyzeResponse {
            rows: vec![AnalyzeRow {
                term: "web-1".to_string(),
                count: 4,
                score: None,
                trend: None,
            }],
            stats: None,
        };
        app.complete(ticket, Ok(ApiPayload::Analyze(response)), now());
        assert_eq!(app.phase(), &Phase::Rendered);
        assert_eq!(app.analysis().unwrap().rows[0].term, "web-1");
    }

    #[rstest]
    fn stream_merges_and_rearms_timer(mut app: App) {
        let (ticket, _) = single_fetch(&app.apply(StateAction::SetMode(Mode::Stream), now()));
        let first = ApiPayload::Stream(SearchResponse {
            hits: Hits { total: 2, hits: vec![hit("a", 1_000, "one"), hit("b", 2_000, "two")] },
            ..SearchResponse::default()
        });
        let effects = app.complete(ticket, Ok(first), now());
        assert_eq!(effects, vec![Effect::ClearRefresh, Effect::ArmRefresh(app.config().refresh)]);
        assert!(app.refresh_armed());

        let (ticket, request) = single_fetch(&app.refresh_due(now()));
        assert_eq!(request.segments[3], "2000");
        let second = ApiPayload::Stream(SearchResponse {
            hits: Hits { total: 2, hits: vec![hit("b", 2_000, "two"), hit("c", 3_000, "three")] },
            ..SearchResponse::default()
        });
        app.complete(ticket, Ok(second), now());
        let ids: Vec<&str> = app.hits().iter().map(|hit| hit.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);

        let effects = app.apply(StateAction::SetMode(Mode::Search), now());
        assert_eq!(effects[0], Effect::ClearRefresh);
        assert!(!app.refresh_armed());
        assert!(app.refresh_due(now()).is_empty());
    }

    #[test]
    fn stream_buffer_is_capped() {
        let config = AppConfig { stream_buffer: 2, ..AppConfig::default() };
        let mut app = App::new(config, HashState { mode: Mode::Stream, ..HashState::default() });
        let (ticket, _) = single_fetch(&app.start(now()));
        let payload = ApiPayload::Stream(SearchResponse {
            hits: Hits {
                total: 3,
                hits: vec![hit("a", 1, "1"), hit("b", 2, "2"), hit("c", 3, "3")],
            },
            ..SearchResponse::default()
        });
        app.complete(ticket, Ok(payload), now());
        let ids: Vec<&str> = app.hits().iter().map(|hit| hit.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[rstest]
    fn history_replays_states(mut app: App) {
        app.start(now());
        app.apply(StateAction::SetSearch("a".to_string()), now());
        app.apply(StateAction::SetSearch("b".to_string()), now());
        let effects = app.back(now());
        assert_eq!(app.state().search, "a");
        assert_eq!(fetches(&effects).len(), 1);
        app.forward(now());
        assert_eq!(app.state().search, "b");
        assert!(app.forward(now()).is_empty());
    }

    #[rstest]
    fn malformed_tokens_open_default_state(mut app: App) {
        app.apply(StateAction::SetSearch("a".to_string()), now());
        let effects = app.open_token("%%%", now());
        assert_eq!(app.state(), &HashState::default());
        assert_eq!(fetches(&effects).len(), 1);
    }

    #[rstest]
    fn document_view_uses_first_hit(mut app: App) {
        let effects = app.apply(
            StateAction::ShowDocument { id: "a".to_string(), index: "logs".to_string() },
            now(),
        );
        let (ticket, request) = single_fetch(&effects);
        assert_eq!(request.to_string(), "/api/id/a/logs");
        let payload = ApiPayload::Document(SearchResponse {
            hits: Hits { total: 1, hits: vec![hit("a", 1, "doc")] },
            ..SearchResponse::default()
        });
        app.complete(ticket, Ok(payload), now());
        let document = app.document().unwrap();
        assert_eq!(document.id, "a");
        assert!(document
            .entries
            .iter()
            .any(|entry| entry.field == "@message" && entry.value == "doc"));
    }

    #[rstest]
    fn cancel_goes_idle(mut app: App) {
        let (ticket, _) = single_fetch(&app.start(now()));
        assert_eq!(app.cancel(), vec![Effect::Abort(ticket.id)]);
        assert_eq!(app.phase(), &Phase::Idle);
        assert!(app.complete(ticket, Ok(search(Vec::new())), now()).is_empty());
    }
}
