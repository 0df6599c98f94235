//! Query dispatch: which endpoint a state calls, and which responses are still wanted.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use reqwest::Url;
use tracing::debug;

use crate::logscope_core::{GraphMode, Millis, Mode, TimeRange};
use crate::logscope_graph::bucket_interval;
use crate::logscope_state::HashState;

const FALLBACK_GRAPH_DAYS: i64 = 7;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Search,
    Graph,
    Analyze,
    Document,
    Stream,
}

impl Endpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Search => "search",
            Endpoint::Graph => "graph",
            Endpoint::Analyze => "analyze",
            Endpoint::Document => "id",
            Endpoint::Stream => "stream",
        }
    }
}

/// The endpoint a mode calls. Nothing else in the state takes part in the choice.
pub fn endpoint_for(mode: Mode) -> Endpoint {
    match mode {
        Mode::Search => Endpoint::Search,
        Mode::Graph => Endpoint::Graph,
        Mode::Terms | Mode::Score | Mode::Trend | Mode::Mean => Endpoint::Analyze,
        Mode::Document => Endpoint::Document,
        Mode::Stream => Endpoint::Stream,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Lane {
    Primary,
    Graph,
}

/// A GET request against the search API, kept as raw path segments until it meets a base URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiRequest {
    pub endpoint: Endpoint,
    pub segments: Vec<String>,
}

impl ApiRequest {
    fn new(endpoint: Endpoint, rest: impl IntoIterator<Item = String>) -> Self {
        let mut segments = vec!["api".to_string(), endpoint.as_str().to_string()];
        segments.extend(rest);
        Self { endpoint, segments }
    }

    /// Joins the segments onto `base`, percent-encoding each one. `None` when `base`
    /// cannot carry a path (e.g. `mailto:`).
    pub fn url(&self, base: &Url) -> Option<Url> {
        let mut url = base.clone();
        url.set_query(None);
        url.set_fragment(None);
        {
            let mut path = url.path_segments_mut().ok()?;
            path.pop_if_empty();
            path.extend(self.segments.iter());
        }
        Some(url)
    }
}

impl fmt::Display for ApiRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("{mode} analysis needs a field; pick one from a row's detail view")]
    MissingAnalyzeField { mode: Mode },
    #[error("document view needs both an id and an index")]
    MissingDocument,
}

/// Inputs to dispatch that do not live in the hash state.
#[derive(Clone, Debug)]
pub struct DispatchContext {
    pub now: DateTime<Utc>,
    pub max_buckets: usize,
    /// Newest timestamp already shown in stream mode.
    pub since: Option<Millis>,
    /// Range reported by the last search, used to size the histogram for `all`.
    pub last_range: Option<TimeRange>,
}

impl DispatchContext {
    pub fn new(now: DateTime<Utc>, max_buckets: usize) -> Self {
        Self { now, max_buckets, since: None, last_range: None }
    }
}

/// The time range the histogram covers for `state`.
pub fn graph_range(state: &HashState, ctx: &DispatchContext) -> TimeRange {
    state
        .timeframe
        .resolve(ctx.now, state.time.as_ref())
        .or_else(|| ctx.last_range.clone())
        .unwrap_or_else(|| {
            let from = ctx
                .now
                .checked_sub_signed(Duration::days(FALLBACK_GRAPH_DAYS))
                .unwrap_or(DateTime::<Utc>::MIN_UTC);
            TimeRange::new(from, ctx.now)
        })
}

pub fn graph_interval(state: &HashState, ctx: &DispatchContext) -> Millis {
    bucket_interval(&graph_range(state, ctx), ctx.max_buckets)
}

pub fn dispatch(state: &HashState, ctx: &DispatchContext) -> Result<ApiRequest, DispatchError> {
    let token = state.fetch_token();
    let request = match endpoint_for(state.mode) {
        Endpoint::Search => ApiRequest::new(Endpoint::Search, [token]),
        Endpoint::Graph => graph_request(state, graph_interval(state, ctx), 0),
        Endpoint::Analyze => {
            let field = state
                .analyze_field
                .clone()
                .ok_or(DispatchError::MissingAnalyzeField { mode: state.mode })?;
            ApiRequest::new(Endpoint::Analyze, [field, state.mode.as_str().to_string(), token])
        }
        Endpoint::Document => match (&state.id, &state.index) {
            (Some(id), Some(index)) => {
                ApiRequest::new(Endpoint::Document, [id.clone(), index.clone()])
            }
            _ => return Err(DispatchError::MissingDocument),
        },
        Endpoint::Stream => {
            let since = ctx.since.unwrap_or_else(|| {
                state
                    .timeframe
                    .resolve(ctx.now, state.time.as_ref())
                    .map(|range| range.from_ms())
                    .unwrap_or_else(|| ctx.now.timestamp_millis())
            });
            ApiRequest::new(Endpoint::Stream, [token, since.to_string()])
        }
    };
    debug!(mode = %state.mode, request = %request, "dispatching");
    Ok(request)
}

/// Histogram request for one segment. Segment `0` starts a new histogram.
pub fn graph_request(state: &HashState, interval_ms: Millis, segment: u32) -> ApiRequest {
    let graph_mode = match state.graph_mode {
        GraphMode::Mean if state.analyze_field.is_some() => GraphMode::Mean,
        _ => GraphMode::Count,
    };
    ApiRequest::new(
        Endpoint::Graph,
        [
            graph_mode.as_str().to_string(),
            interval_ms.to_string(),
            state.fetch_token(),
            segment.to_string(),
        ],
    )
}

pub type TicketId = u64;

/// A request in flight, with the fetch token it was issued for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ticket {
    pub id: TicketId,
    pub lane: Lane,
    pub fetch_token: String,
}

/// At most one ticket per lane. A newer ticket supersedes the older one.
#[derive(Debug, Default)]
pub struct RequestTracker {
    next_id: TicketId,
    primary: Option<Ticket>,
    graph: Option<Ticket>,
}

impl RequestTracker {
    fn slot(&mut self, lane: Lane) -> &mut Option<Ticket> {
        match lane {
            Lane::Primary => &mut self.primary,
            Lane::Graph => &mut self.graph,
        }
    }

    fn peek(&self, lane: Lane) -> Option<&Ticket> {
        match lane {
            Lane::Primary => self.primary.as_ref(),
            Lane::Graph => self.graph.as_ref(),
        }
    }

    /// Issues a ticket for `lane`, returning the id of the ticket it superseded.
    pub fn begin(&mut self, lane: Lane, fetch_token: String) -> (Ticket, Option<TicketId>) {
        self.next_id += 1;
        let ticket = Ticket { id: self.next_id, lane, fetch_token };
        let superseded = self.slot(lane).replace(ticket.clone()).map(|old| old.id);
        if let Some(old) = superseded {
            debug!(lane = ?lane, superseded = old, ticket = ticket.id, "request superseded");
        }
        (ticket, superseded)
    }

    /// Whether a completed `ticket` may update the view.
    pub fn accept(&self, ticket: &Ticket, current_fetch_token: &str) -> bool {
        match self.peek(ticket.lane) {
            Some(live) => live.id == ticket.id && ticket.fetch_token == current_fetch_token,
            None => false,
        }
    }

    /// Clears the lane if `ticket` is still its current one.
    pub fn finish(&mut self, ticket: &Ticket) -> bool {
        let slot = self.slot(ticket.lane);
        if slot.as_ref().is_some_and(|live| live.id == ticket.id) {
            *slot = None;
            true
        } else {
            false
        }
    }

    pub fn cancel(&mut self, lane: Lane) -> Option<TicketId> {
        self.slot(lane).take().map(|ticket| ticket.id)
    }

    pub fn in_flight(&self, lane: Lane) -> Option<&Ticket> {
        self.peek(lane)
    }

    pub fn is_idle(&self) -> bool {
        self.primary.is_none() && self.graph.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logscope_core::Timeframe;
    use chrono::TimeZone;
    use rstest::{fixture, rstest};

    #[fixture]
    fn ctx() -> DispatchContext {
        DispatchContext::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(), 100)
    }

    fn state(mode: Mode) -> HashState {
        HashState {
            search: "status:500".to_string(),
            mode,
            analyze_field: Some("host".to_string()),
            id: Some("abc".to_string()),
            index: Some("logs-1".to_string()),
            ..HashState::default()
        }
    }

    #[rstest]
    #[case(Mode::Search, Endpoint::Search)]
    #[case(Mode::Graph, Endpoint::Graph)]
    #[case(Mode::Terms, Endpoint::Analyze)]
    #[case(Mode::Score, Endpoint::Analyze)]
    #[case(Mode::Trend, Endpoint::Analyze)]
    #[case(Mode::Mean, Endpoint::Analyze)]
    #[case(Mode::Document, Endpoint::Document)]
    #[case(Mode::Stream, Endpoint::Stream)]
    fn endpoint_depends_on_mode_only(
        ctx: DispatchContext,
        #[case] mode: Mode,
        #[case] expected: Endpoint,
    ) {
        assert_eq!(endpoint_for(mode), expected);
        let variants = [
            state(mode),
            HashState {
                search: "other".to_string(),
                offset: 100,
                timeframe: Timeframe::All,
                ..state(mode)
            },
            HashState { fields: vec!["x".to_string()], ..state(mode) },
        ];
        for variant in variants {
            assert_eq!(dispatch(&variant, &ctx).unwrap().endpoint, expected);
        }
    }

    #[rstest]
    fn search_and_analyze_paths(ctx: DispatchContext) {
        let search = state(Mode::Search);
        let token = search.fetch_token();
        assert_eq!(
            dispatch(&search, &ctx).unwrap().segments,
            vec!["api", "search", token.as_str()]
        );

        let trend = state(Mode::Trend);
        assert_eq!(
            dispatch(&trend, &ctx).unwrap().segments,
            vec!["api", "analyze", "host", "trend", trend.fetch_token().as_str()]
        );

        let doc = state(Mode::Document);
        assert_eq!(dispatch(&doc, &ctx).unwrap().to_string(), "/api/id/abc/logs-1");
    }

    #[rstest]
    fn graph_mode_uses_interval_and_first_segment(ctx: DispatchContext) {
        let graph = state(Mode::Graph);
        let request = dispatch(&graph, &ctx).unwrap();
        // 15 minutes over 100 buckets rounds up to 10 seconds.
        assert_eq!(request.segments[2], "count");
        assert_eq!(request.segments[3], "10000");
        assert_eq!(request.segments[5], "0");
        let next = graph_request(&HashState { graph_mode: GraphMode::Mean, ..graph }, 10_000, 3);
        assert_eq!(next.segments[2], "mean");
        assert_eq!(next.segments[5], "3");
    }

    #[test]
    fn mean_graph_without_field_counts() {
        let state = HashState { graph_mode: GraphMode::Mean, ..HashState::default() };
        assert_eq!(graph_request(&state, 1_000, 0).segments[2], "count");
    }

    #[rstest]
    fn stream_starts_at_window_or_newest_seen(ctx: DispatchContext) {
        let stream = state(Mode::Stream);
        let request = dispatch(&stream, &ctx).unwrap();
        let expected_from = ctx.now.timestamp_millis() - 900_000;
        assert_eq!(request.segments[3], expected_from.to_string());

        let ctx = DispatchContext { since: Some(42), ..ctx };
        assert_eq!(dispatch(&stream, &ctx).unwrap().segments[3], "42");
    }

    #[rstest]
    fn incomplete_states_fail_dispatch(ctx: DispatchContext) {
        let terms = HashState { mode: Mode::Terms, ..HashState::default() };
        assert_eq!(
            dispatch(&terms, &ctx),
            Err(DispatchError::MissingAnalyzeField { mode: Mode::Terms })
        );
        let doc = HashState {
            mode: Mode::Document,
            id: Some("x".to_string()),
            ..HashState::default()
        };
        assert_eq!(dispatch(&doc, &ctx), Err(DispatchError::MissingDocument));
    }

    #[rstest]
    fn all_time_graph_falls_back_to_last_range(ctx: DispatchContext) {
        let all = HashState { timeframe: Timeframe::All, ..HashState::default() };
        assert_eq!(graph_range(&all, &ctx).span_ms(), 7 * 86_400_000);
        let last = TimeRange::from_millis(0, 3_600_000).unwrap();
        let ctx = DispatchContext { last_range: Some(last.clone()), ..ctx };
        assert_eq!(graph_range(&all, &ctx), last);
    }

    #[test]
    fn url_encodes_each_segment_under_base_path() {
        let request = ApiRequest {
            endpoint: Endpoint::Document,
            segments: vec!["api".into(), "id".into(), "a/b c".into(), "logs?x".into()],
        };
        let base = Url::parse("http://search.local/kibana/?q=1#frag").unwrap();
        let url = request.url(&base).unwrap();
        assert_eq!(url.as_str(), "http://search.local/kibana/api/id/a%2Fb%20c/logs%3Fx");
        let root = Url::parse("http://search.local").unwrap();
        assert_eq!(request.url(&root).unwrap().path(), "/api/id/a%2Fb%20c/logs%3Fx");
        assert!(request.url(&Url::parse("mailto:a@b").unwrap()).is_none());
    }

    #[test]
    fn tracker_keeps_one_ticket_per_lane() {
        let mut tracker = RequestTracker::default();
        let (a, superseded) = tracker.begin(Lane::Primary, "x".to_string());
        assert_eq!(superseded, None);
        let (g, _) = tracker.begin(Lane::Graph, "x".to_string());
        let (b, superseded) = tracker.begin(Lane::Primary, "y".to_string());
        assert_eq!(superseded, Some(a.id));

        assert!(!tracker.accept(&a, "x"));
        assert!(!tracker.accept(&a, "y"));
        assert!(tracker.accept(&b, "y"));
        assert!(!tracker.accept(&b, "z"));
        assert!(tracker.accept(&g, "x"));

        assert!(!tracker.finish(&a));
        assert!(tracker.finish(&b));
        assert!(!tracker.is_idle());
        assert_eq!(tracker.cancel(Lane::Graph), Some(g.id));
        assert!(tracker.is_idle());
    }
}
