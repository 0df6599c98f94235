//! Hash state: the bookmarkable query/display configuration and its token codec.
//!
//! The state travels as base64 (URL-safe alphabet, no padding) encoded JSON. Tokens
//! produced by older clients used the standard alphabet with padding; both decode.
//! Decoding never takes the page down: `decode_or_default` falls back to the default
//! state and logs why.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::logscope_core::{GraphMode, Mode, SortOrder, SortSpec, TimeRange, Timeframe};

pub const MAX_TOKEN_LEN: usize = 8 * 1024;
const HISTORY_LIMIT: usize = 256;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HashState {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub search: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    #[serde(skip_serializing_if = "is_zero")]
    pub offset: usize,
    pub timeframe: Timeframe,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<TimeRange>,
    #[serde(alias = "graphmode")]
    pub graph_mode: GraphMode,
    pub mode: Mode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analyze_field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
}

fn is_zero(value: &usize) -> bool {
    *value == 0
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("state token too long ({len} bytes, max {MAX_TOKEN_LEN})")]
    TooLong { len: usize },
    #[error("state token is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("state token is not a valid state: {0}")]
    Json(#[from] serde_json::Error),
}

impl HashState {
    pub fn normalized(&self) -> HashState {
        let mut state = self.clone();
        state.search = state.search.trim().to_string();

        let mut fields: Vec<String> = Vec::with_capacity(state.fields.len());
        for field in &self.fields {
            let field = field.trim();
            if field.is_empty() || fields.iter().any(|existing| existing == field) {
                continue;
            }
            fields.push(field.to_string());
        }
        state.fields = fields;

        state.time = state.time.map(TimeRange::ordered);
        if state.timeframe == Timeframe::Custom && state.time.is_none() {
            state.timeframe = Timeframe::default();
        }
        if state.timeframe != Timeframe::Custom {
            state.time = None;
        }

        state.analyze_field = trimmed_option(state.analyze_field);
        state.id = trimmed_option(state.id);
        state.index = trimmed_option(state.index);
        if let Some(sort) = &state.sort {
            if sort.field.trim().is_empty() {
                state.sort = None;
            }
        }
        state
    }

    /// Encoding of the state without presentation-only fields. Requests carry this token
    /// and responses are matched against it.
    pub fn fetch_token(&self) -> String {
        let mut query = self.normalized();
        query.fields.clear();
        encode(&query)
    }

    pub fn location(&self) -> String {
        format!("#{}", encode(self))
    }
}

fn trimmed_option(value: Option<String>) -> Option<String> {
    value.map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

pub fn encode(state: &HashState) -> String {
    let normalized = state.normalized();
    // Serializing plain data into a Vec cannot fail.
    let json = serde_json::to_vec(&normalized).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(json)
}

pub fn decode(token: &str) -> Result<HashState, StateError> {
    let token = token.trim();
    let token = token.strip_prefix('#').unwrap_or(token);
    if token.is_empty() {
        return Ok(HashState::default());
    }
    if token.len() > MAX_TOKEN_LEN {
        return Err(StateError::TooLong { len: token.len() });
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(token)
        .or_else(|_| URL_SAFE.decode(token))
        .or_else(|_| STANDARD.decode(token))
        .or_else(|_| STANDARD_NO_PAD.decode(token))?;
    let state: HashState = serde_json::from_slice(&bytes)?;
    Ok(state.normalized())
}

pub fn decode_or_default(token: &str) -> HashState {
    match decode(token) {
        Ok(state) => state,
        Err(error) => {
            warn!(%error, "resetting malformed state token to defaults");
            HashState::default()
        }
    }
}

/// User-level state transitions. Applied with [`reduce`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StateAction {
    SetSearch(String),
    SetTimeframe(Timeframe),
    SetTimeRange(TimeRange),
    SetMode(Mode),
    Analyze { field: String, mode: Mode },
    SetGraphMode(GraphMode),
    ToggleField(String),
    MoveField { field: String, delta: isize },
    ResetFields,
    NextPage { per_page: usize },
    PrevPage { per_page: usize },
    SetOffset(usize),
    SortBy(String),
    ShowDocument { id: String, index: String },
    AddFilter { field: String, value: String, negate: bool },
    Reset,
}

impl StateAction {
    /// Actions that only change how the current results are presented.
    pub fn is_presentation_only(&self) -> bool {
        matches!(
            self,
            StateAction::ToggleField(_) | StateAction::MoveField { .. } | StateAction::ResetFields
        )
    }
}

pub fn reduce(state: &HashState, action: StateAction) -> HashState {
    let mut next = state.clone();
    match action {
        StateAction::SetSearch(search) => {
            next.search = search;
            next.offset = 0;
        }
        StateAction::SetTimeframe(timeframe) => {
            next.timeframe = timeframe;
            if timeframe != Timeframe::Custom {
                next.time = None;
            }
            next.offset = 0;
        }
        StateAction::SetTimeRange(range) => {
            next.timeframe = Timeframe::Custom;
            next.time = Some(range.ordered());
            next.offset = 0;
        }
        StateAction::SetMode(mode) => {
            next.mode = mode;
            next.offset = 0;
        }
        StateAction::Analyze { field, mode } => {
            next.analyze_field = Some(field);
            next.mode = if mode.is_analysis() { mode } else { Mode::Terms };
            next.offset = 0;
        }
        StateAction::SetGraphMode(graph_mode) => {
            next.graph_mode = graph_mode;
        }
        StateAction::ToggleField(field) => {
            let field = field.trim().to_string();
            if let Some(pos) = next.fields.iter().position(|existing| *existing == field) {
                next.fields.remove(pos);
            } else if !field.is_empty() {
                next.fields.push(field);
            }
        }
        StateAction::MoveField { field, delta } => {
            if let Some(pos) = next.fields.iter().position(|existing| *existing == field) {
                let last = next.fields.len() as isize - 1;
                let target = (pos as isize + delta).clamp(0, last.max(0)) as usize;
                let moved = next.fields.remove(pos);
                next.fields.insert(target, moved);
            }
        }
        StateAction::ResetFields => {
            next.fields.clear();
        }
        StateAction::NextPage { per_page } => {
            next.offset = next.offset.saturating_add(per_page);
        }
        StateAction::PrevPage { per_page } => {
            next.offset = next.offset.saturating_sub(per_page);
        }
        StateAction::SetOffset(offset) => {
            next.offset = offset;
        }
        StateAction::SortBy(field) => {
            next.sort = match next.sort.take() {
                Some(sort) if sort.field == field => {
                    Some(SortSpec { field, order: sort.order.flipped() })
                }
                _ => Some(SortSpec { field, order: SortOrder::Desc }),
            };
            next.offset = 0;
        }
        StateAction::ShowDocument { id, index } => {
            next.mode = Mode::Document;
            next.id = Some(id);
            next.index = Some(index);
        }
        StateAction::AddFilter { field, value, negate } => {
            next.search = refine_search(&next.search, &field, &value, negate);
            next.offset = 0;
        }
        StateAction::Reset => {
            next = HashState::default();
        }
    }
    next.normalized()
}

fn refine_search(search: &str, field: &str, value: &str, negate: bool) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    let clause = if negate {
        format!("NOT {field}:\"{escaped}\"")
    } else {
        format!("{field}:\"{escaped}\"")
    };
    let search = search.trim();
    if search.is_empty() || search == "*" {
        clause
    } else {
        format!("({search}) AND {clause}")
    }
}

/// Visited state tokens with a cursor for back/forward navigation.
#[derive(Clone, Debug, Default)]
pub struct History {
    entries: Vec<String>,
    cursor: usize,
}

impl History {
    pub fn push(&mut self, token: String) {
        if self.current() == Some(token.as_str()) {
            return;
        }
        if !self.entries.is_empty() {
            self.entries.truncate(self.cursor + 1);
        }
        self.entries.push(token);
        if self.entries.len() > HISTORY_LIMIT {
            let overflow = self.entries.len() - HISTORY_LIMIT;
            self.entries.drain(0..overflow);
        }
        self.cursor = self.entries.len() - 1;
    }

    pub fn current(&self) -> Option<&str> {
        self.entries.get(self.cursor).map(String::as_str)
    }

    pub fn back(&mut self) -> Option<&str> {
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        self.current()
    }

    pub fn forward(&mut self) -> Option<&str> {
        if self.cursor + 1 >= self.entries.len() {
            return None;
        }
        self.cursor += 1;
        self.current()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rstest::{fixture, rstest};

    #[fixture]
    fn rich_state() -> HashState {
        HashState {
            search: "status:500".to_string(),
            fields: vec!["host".to_string(), "@message".to_string()],
            offset: 50,
            timeframe: Timeframe::Custom,
            time: Some(TimeRange::new(
                Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            )),
            graph_mode: GraphMode::Mean,
            mode: Mode::Trend,
            analyze_field: Some("response_time".to_string()),
            sort: Some(SortSpec { field: "@timestamp".to_string(), order: SortOrder::Asc }),
            id: None,
            index: None,
        }
    }

    #[rstest]
    fn round_trip_preserves_state(rich_state: HashState) {
        let token = encode(&rich_state);
        assert!(!token.contains('='));
        assert!(!token.contains('+') && !token.contains('/'));
        assert_eq!(decode(&token).unwrap(), rich_state);
        assert_eq!(decode(&format!("#{token}")).unwrap(), rich_state);
    }

    #[test]
    fn round_trip_of_default_state() {
        let state = HashState::default();
        assert_eq!(decode(&encode(&state)).unwrap(), state);
    }

    #[test]
    fn empty_fragment_is_default_state() {
        assert_eq!(decode("").unwrap(), HashState::default());
        assert_eq!(decode("#").unwrap(), HashState::default());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let token = URL_SAFE_NO_PAD.encode(br#"{"search":"error"}"#);
        let state = decode(&token).unwrap();
        assert_eq!(state.search, "error");
        assert_eq!(state.timeframe, Timeframe::default());
        assert_eq!(state.graph_mode, GraphMode::Count);
        assert_eq!(state.mode, Mode::Search);
        assert!(state.fields.is_empty());
    }

    #[test]
    fn legacy_standard_base64_tokens_decode() {
        let legacy = STANDARD.encode(
            br#"{"search":"a b","graphmode":"mean","mode":"analyze","timeframe":"3600"}"#,
        );
        let state = decode(&legacy).unwrap();
        assert_eq!(state.search, "a b");
        assert_eq!(state.graph_mode, GraphMode::Mean);
        assert_eq!(state.mode, Mode::Terms);
        assert_eq!(state.timeframe, Timeframe::Last(3600));
    }

    #[rstest]
    #[case("not base64 at all!")]
    #[case("eyJzZWFyY2giOg")] // {"search":
    #[case("WzEsMiwzXQ")] // [1,2,3]
    #[case("eyJ0aW1lZnJhbWUiOiJzb29uIn0")] // {"timeframe":"soon"}
    fn malformed_tokens_fail_soft(#[case] token: &str) {
        assert!(decode(token).is_err());
        assert_eq!(decode_or_default(token), HashState::default());
    }

    #[test]
    fn oversized_tokens_are_rejected() {
        let token = "A".repeat(MAX_TOKEN_LEN + 1);
        assert!(matches!(decode(&token), Err(StateError::TooLong { .. })));
        assert_eq!(decode_or_default(&token), HashState::default());
    }

    #[test]
    fn normalization_cleans_fields_and_ranges() {
        let from = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let state = HashState {
            search: "  x  ".to_string(),
            fields: vec![" a ".to_string(), "".to_string(), "a".to_string(), "b".to_string()],
            timeframe: Timeframe::Custom,
            time: Some(TimeRange::new(from, to)),
            analyze_field: Some("  ".to_string()),
            ..HashState::default()
        };
        let normalized = state.normalized();
        assert_eq!(normalized.search, "x");
        assert_eq!(normalized.fields, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(normalized.time, Some(TimeRange::new(to, from)));
        assert_eq!(normalized.analyze_field, None);

        let dangling = HashState { timeframe: Timeframe::Custom, ..HashState::default() };
        assert_eq!(dangling.normalized().timeframe, Timeframe::default());
    }

    #[test]
    fn toggling_a_field_twice_restores_default_columns() {
        let state = HashState::default();
        let on = reduce(&state, StateAction::ToggleField("host".to_string()));
        assert_eq!(on.fields, vec!["host".to_string()]);
        let off = reduce(&on, StateAction::ToggleField("host".to_string()));
        assert_eq!(off, state);
        assert!(off.fields.is_empty());
    }

    #[rstest]
    fn presentation_actions_keep_fetch_token(rich_state: HashState) {
        let token = rich_state.fetch_token();
        for action in [
            StateAction::ToggleField("extra".to_string()),
            StateAction::MoveField { field: "host".to_string(), delta: 1 },
            StateAction::ResetFields,
        ] {
            assert!(action.is_presentation_only());
            assert_eq!(reduce(&rich_state, action).fetch_token(), token);
        }
        let searched = reduce(&rich_state, StateAction::SetSearch("other".to_string()));
        assert_ne!(searched.fetch_token(), token);
    }

    #[rstest]
    fn reduce_does_not_mutate_input(rich_state: HashState) {
        let before = rich_state.clone();
        let _ = reduce(&rich_state, StateAction::Reset);
        assert_eq!(rich_state, before);
    }

    #[rstest]
    fn query_changes_reset_offset(rich_state: HashState) {
        assert_eq!(rich_state.offset, 50);
        let next = reduce(&rich_state, StateAction::SetSearch("x".to_string()));
        assert_eq!(next.offset, 0);
        let paged = reduce(&next, StateAction::NextPage { per_page: 25 });
        assert_eq!(paged.offset, 25);
        let back = reduce(&paged, StateAction::PrevPage { per_page: 50 });
        assert_eq!(back.offset, 0);
    }

    #[test]
    fn move_field_clamps_to_bounds() {
        let state = HashState {
            fields: vec!["a".to_string(), "b".to_string(), "c".to_string()],
            ..HashState::default()
        };
        let moved = reduce(&state, StateAction::MoveField { field: "a".to_string(), delta: 5 });
        assert_eq!(moved.fields, vec!["b", "c", "a"]);
        let moved = reduce(&moved, StateAction::MoveField { field: "a".to_string(), delta: -1 });
        assert_eq!(moved.fields, vec!["b", "a", "c"]);
    }

    #[test]
    fn sort_by_same_field_flips_order() {
        let state = reduce(&HashState::default(), StateAction::SortBy("bytes".to_string()));
        assert_eq!(state.sort.as_ref().map(|sort| sort.order), Some(SortOrder::Desc));
        let state = reduce(&state, StateAction::SortBy("bytes".to_string()));
        assert_eq!(state.sort.as_ref().map(|sort| sort.order), Some(SortOrder::Asc));
        let state = reduce(&state, StateAction::SortBy("host".to_string()));
        assert_eq!(
            state.sort,
            Some(SortSpec { field: "host".to_string(), order: SortOrder::Desc })
        );
    }

    #[rstest]
    #[case("", false, "host:\"web \\\"1\\\"\"")]
    #[case("*", true, "NOT host:\"web \\\"1\\\"\"")]
    #[case("error", false, "(error) AND host:\"web \\\"1\\\"\"")]
    fn add_filter_refines_search(
        #[case] search: &str,
        #[case] negate: bool,
        #[case] expected: &str,
    ) {
        let state = HashState { search: search.to_string(), offset: 10, ..HashState::default() };
        let next = reduce(
            &state,
            StateAction::AddFilter {
                field: "host".to_string(),
                value: "web \"1\"".to_string(),
                negate,
            },
        );
        assert_eq!(next.search, expected);
        assert_eq!(next.offset, 0);
    }

    #[test]
    fn analyze_and_document_actions_switch_modes() {
        let state = reduce(
            &HashState::default(),
            StateAction::Analyze { field: "host".to_string(), mode: Mode::Search },
        );
        assert_eq!(state.mode, Mode::Terms);
        assert_eq!(state.analyze_field.as_deref(), Some("host"));

        let doc = reduce(
            &state,
            StateAction::ShowDocument { id: "abc".to_string(), index: "logs".to_string() },
        );
        assert_eq!(doc.mode, Mode::Document);
        assert_eq!(doc.id.as_deref(), Some("abc"));
    }

    #[test]
    fn history_navigates_and_truncates_forward_tail() {
        let mut history = History::default();
        history.push("a".to_string());
        history.push("b".to_string());
        history.push("b".to_string());
        history.push("c".to_string());
        assert_eq!(history.len(), 3);
        assert_eq!(history.back(), Some("b"));
        assert_eq!(history.back(), Some("a"));
        assert_eq!(history.back(), None);
        assert_eq!(history.forward(), Some("b"));
        history.push("d".to_string());
        assert_eq!(history.forward(), None);
        assert_eq!(history.back(), Some("b"));
        assert_eq!(history.back(), Some("a"));
        assert_eq!(history.len(), 3);
    }
}
