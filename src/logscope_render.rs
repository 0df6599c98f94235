//! Result rendering: flattened hits, table projection, detail and analysis views.
//!
//! Hits are flattened once per fetch. Column changes only re-project the flattened
//! rows, so they never touch the network.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::logscope_core::{AnalyzeResponse, FieldStats, Hit, Millis, Mode};
use crate::logscope_state::StateAction;
use crate::sanitize::highlight_parts;

pub const PLACEHOLDER: &str = "-";
const FRAGMENT_SEPARATOR: &str = " ... ";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    pub highlighted: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cell {
    pub segments: Vec<Segment>,
    pub present: bool,
}

impl Cell {
    fn plain(text: &str) -> Self {
        Self {
            segments: vec![Segment { text: text.to_string(), highlighted: false }],
            present: true,
        }
    }

    fn placeholder() -> Self {
        Self {
            segments: vec![Segment { text: PLACEHOLDER.to_string(), highlighted: false }],
            present: false,
        }
    }

    fn highlighted(fragment: &str) -> Self {
        let segments = highlight_parts(fragment)
            .into_iter()
            .map(|(text, highlighted)| Segment { text, highlighted })
            .collect();
        Self { segments, present: true }
    }

    pub fn text(&self) -> String {
        self.segments.iter().map(|segment| segment.text.as_str()).collect()
    }
}

/// A hit with its source flattened to dotted field names.
#[derive(Clone, Debug, PartialEq)]
pub struct FlatHit {
    pub id: String,
    pub index: String,
    pub timestamp: Option<Millis>,
    pub fields: BTreeMap<String, String>,
    pub highlight: BTreeMap<String, String>,
}

impl FlatHit {
    pub fn from_hit(hit: &Hit, timestamp_field: &str) -> Self {
        let mut fields = BTreeMap::new();
        flatten_value("", &hit.source, &mut fields);
        let highlight = hit
            .highlight
            .iter()
            .filter(|(_, fragments)| !fragments.is_empty())
            .map(|(field, fragments)| (field.clone(), fragments.join(FRAGMENT_SEPARATOR)))
            .collect();
        Self {
            id: hit.id.clone(),
            index: hit.index.clone(),
            timestamp: hit.timestamp_ms(timestamp_field),
            fields,
            highlight,
        }
    }

    pub fn value(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn cell(&self, field: &str) -> Cell {
        if let Some(fragment) = self.highlight.get(field) {
            return Cell::highlighted(fragment);
        }
        match self.value(field) {
            Some(value) => Cell::plain(value),
            None => Cell::placeholder(),
        }
    }
}

pub fn flatten_hits(hits: &[Hit], timestamp_field: &str) -> Vec<FlatHit> {
    hits.iter().map(|hit| FlatHit::from_hit(hit, timestamp_field)).collect()
}

fn flatten_value(prefix: &str, value: &Value, out: &mut BTreeMap<String, String>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                let path = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
                flatten_value(&path, child, out);
            }
        }
        _ if prefix.is_empty() => {}
        other => {
            out.insert(prefix.to_string(), display_value(other));
        }
    }
}

/// Text form of a JSON value: strings unquoted, scalar arrays comma separated.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Array(items) if items.iter().all(|item| !item.is_object() && !item.is_array()) => {
            items.iter().map(display_value).collect::<Vec<_>>().join(", ")
        }
        other => other.to_string(),
    }
}

/// Every field present in any hit, sorted by name.
pub fn known_fields(hits: &[FlatHit]) -> Vec<String> {
    let names: BTreeSet<&String> = hits.iter().flat_map(|hit| hit.fields.keys()).collect();
    names.into_iter().cloned().collect()
}

pub fn effective_columns(fields: &[String], defaults: &[String]) -> Vec<String> {
    if fields.is_empty() {
        defaults.to_vec()
    } else {
        fields.to_vec()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    /// Position of the hit in the flattened result set.
    pub hit: usize,
    pub id: String,
    pub index: String,
    pub cells: Vec<Cell>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TableView {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl TableView {
    pub fn project(hits: &[FlatHit], columns: &[String]) -> Self {
        let rows = hits
            .iter()
            .enumerate()
            .map(|(idx, hit)| Row {
                hit: idx,
                id: hit.id.clone(),
                index: hit.index.clone(),
                cells: columns.iter().map(|column| hit.cell(column)).collect(),
            })
            .collect();
        Self { columns: columns.to_vec(), rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DetailEntry {
    pub field: String,
    pub value: String,
    pub cell: Cell,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DetailView {
    pub id: String,
    pub index: String,
    pub entries: Vec<DetailEntry>,
}

impl DetailView {
    pub fn from_hit(hit: &FlatHit) -> Self {
        let entries = hit
            .fields
            .iter()
            .map(|(field, value)| DetailEntry {
                field: field.clone(),
                value: value.clone(),
                cell: hit.cell(field),
            })
            .collect();
        Self { id: hit.id.clone(), index: hit.index.clone(), entries }
    }

    /// Search refinement for the entry at `idx`; `negate` filters the value out.
    pub fn filter_action(&self, idx: usize, negate: bool) -> Option<StateAction> {
        let entry = self.entries.get(idx)?;
        Some(StateAction::AddFilter {
            field: entry.field.clone(),
            value: entry.value.clone(),
            negate,
        })
    }

    pub fn analyze_action(&self, idx: usize) -> Option<StateAction> {
        let entry = self.entries.get(idx)?;
        Some(StateAction::Analyze { field: entry.field.clone(), mode: Mode::Terms })
    }

    pub fn document_action(&self) -> StateAction {
        StateAction::ShowDocument { id: self.id.clone(), index: self.index.clone() }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AnalysisRow {
    pub term: String,
    pub count: u64,
    pub metric: Option<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AnalysisView {
    pub mode: Mode,
    pub field: String,
    pub rows: Vec<AnalysisRow>,
    pub stats: Option<FieldStats>,
}

impl AnalysisView {
    pub fn new(mode: Mode, field: &str, response: &AnalyzeResponse) -> Self {
        let rows = response
            .rows
            .iter()
            .map(|row| AnalysisRow {
                term: row.term.clone(),
                count: row.count,
                metric: match mode {
                    Mode::Score => row.score,
                    Mode::Trend => row.trend,
                    _ => None,
                },
            })
            .collect();
        Self { mode, field: field.to_string(), rows, stats: response.stats.clone() }
    }

    pub fn metric_label(&self) -> Option<&'static str> {
        match self.mode {
            Mode::Score => Some("score"),
            Mode::Trend => Some("trend"),
            _ => None,
        }
    }

    pub fn total_count(&self) -> u64 {
        self.rows.iter().map(|row| row.count).sum()
    }
}

pub fn format_metric(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        format!("{value:.3}")
    }
}

/// Plain-text renderings for headless output.
pub mod text {
    use super::{format_metric, AnalysisView, DetailView, TableView, PLACEHOLDER};
    use crate::logscope_graph::Histogram;
    use crate::sanitize::terminal_safe;

    const MAX_CELL: usize = 60;
    const SPARK: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

    fn clip(text: &str) -> String {
        let text = terminal_safe(text);
        if text.chars().count() <= MAX_CELL {
            text
        } else {
            let mut clipped: String = text.chars().take(MAX_CELL - 1).collect();
            clipped.push('…');
            clipped
        }
    }

    fn grid(header: Vec<String>, rows: Vec<Vec<String>>) -> String {
        let mut widths: Vec<usize> = header.iter().map(|cell| cell.chars().count()).collect();
        for row in &rows {
            for (idx, cell) in row.iter().enumerate() {
                widths[idx] = widths[idx].max(cell.chars().count());
            }
        }
        let line = |cells: &[String]| {
            cells
                .iter()
                .enumerate()
                .map(|(idx, cell)| format!("{cell:<width$}", width = widths[idx]))
                .collect::<Vec<_>>()
                .join("  ")
                .trim_end()
                .to_string()
        };
        let mut out = vec![line(header.as_slice())];
        out.extend(rows.iter().map(|row| line(row.as_slice())));
        out.join("\n")
    }

    pub fn table(view: &TableView) -> String {
        let header = view.columns.iter().map(|column| clip(column)).collect();
        let rows = view
            .rows
            .iter()
            .map(|row| row.cells.iter().map(|cell| clip(&cell.text())).collect())
            .collect();
        grid(header, rows)
    }

    pub fn detail(view: &DetailView) -> String {
        let header = vec!["field".to_string(), "value".to_string()];
        let rows = view
            .entries
            .iter()
            .map(|entry| vec![clip(&entry.field), clip(&entry.cell.text())])
            .collect();
        format!("{} / {}\n{}", view.index, view.id, grid(header, rows))
    }

    pub fn analysis(view: &AnalysisView) -> String {
        let mut out = String::new();
        if !view.rows.is_empty() {
            let mut header = vec![view.field.clone(), "count".to_string()];
            if let Some(label) = view.metric_label() {
                header.push(label.to_string());
            }
            let rows = view
                .rows
                .iter()
                .map(|row| {
                    let mut cells = vec![clip(&row.term), row.count.to_string()];
                    if view.metric_label().is_some() {
                        let metric = row.metric.map(format_metric);
                        cells.push(metric.unwrap_or_else(|| PLACEHOLDER.to_string()));
                    }
                    cells
                })
                .collect();
            out.push_str(&grid(header, rows));
        }
        if let Some(stats) = &view.stats {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&format!(
                "count {}  min {}  max {}  mean {}  total {}",
                stats.count,
                format_metric(stats.min),
                format_metric(stats.max),
                format_metric(stats.mean),
                format_metric(stats.total)
            ));
        }
        out
    }

    pub fn sparkline(histogram: &Histogram) -> String {
        let max = histogram.max_count();
        histogram
            .buckets
            .iter()
            .map(|bucket| {
                if max == 0 || bucket.count == 0 {
                    ' '
                } else {
                    let level = (bucket.count * (SPARK.len() as u64 - 1)) / max;
                    SPARK[level as usize]
                }
            })
            .collect()
    }
}

/// HTML fragments. All text is escaped here; callers never build markup from data.
pub mod html {
    use super::{format_metric, AnalysisView, Cell, DetailView, TableView, PLACEHOLDER};
    use crate::logscope_core::{Mode, TimeRange, Timeframe};
    use crate::logscope_graph::{interval_label, Histogram};
    use crate::logscope_state::{encode, reduce, HashState, StateAction};
    use crate::sanitize::escape_html;

    const STYLE: &str = r#"
body { font-family: system-ui, sans-serif; margin: 0; background: #f7f7f5; color: #222; }
header { padding: 0.75rem 1rem; background: #1f2933; color: #eee; }
header a { color: #9fd3ff; }
main { padding: 1rem; }
table { border-collapse: collapse; width: 100%; background: #fff; }
th, td { text-align: left; padding: 0.25rem 0.5rem; border-bottom: 1px solid #ddd; vertical-align: top; }
th a, td a { text-decoration: none; }
mark { background: #ffe58a; }
.panel { padding: 1rem; margin: 1rem 0; border-radius: 4px; background: #fff; }
.panel.error { border-left: 4px solid #c0392b; }
.panel.empty { border-left: 4px solid #7f8c8d; }
.histogram { display: flex; align-items: flex-end; height: 120px; gap: 1px; margin: 1rem 0; }
.histogram a { flex: 1; background: #4a90d9; min-height: 1px; display: block; }
.muted { color: #888; }
.pager a { margin-right: 1rem; }
"#;

    pub fn view_href(state: &HashState) -> String {
        format!("/view/{}", encode(state))
    }

    pub fn action_href(state: &HashState, action: StateAction) -> String {
        view_href(&reduce(state, action))
    }

    fn link(href: &str, label: &str) -> String {
        format!(r#"<a href="{}">{}</a>"#, escape_html(href), escape_html(label))
    }

    pub fn cell(cell: &Cell) -> String {
        if !cell.present {
            return format!(r#"<span class="muted">{}</span>"#, escape_html(PLACEHOLDER));
        }
        cell.segments
            .iter()
            .map(|segment| {
                let text = escape_html(&segment.text);
                if segment.highlighted {
                    format!("<mark>{text}</mark>")
                } else {
                    text
                }
            })
            .collect()
    }

    pub fn page(title: &str, location: &str, body: &str) -> String {
        format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<title>{title} - logscope</title>
<style>{STYLE}</style>
</head>
<body>
<header><strong>logscope</strong> <span class="muted">{location}</span></header>
<main>
{body}
</main>
</body>
</html>
"#,
            title = escape_html(title),
            location = escape_html(location),
        )
    }

    pub fn search_form(state: &HashState) -> String {
        let token = encode(state);
        let timeframes: String = Timeframe::PRESETS
            .iter()
            .map(|preset| {
                let selected = if *preset == state.timeframe { " selected" } else { "" };
                format!(
                    r#"<option value="{}"{selected}>{}</option>"#,
                    escape_html(&preset.to_string()),
                    escape_html(&preset.label())
                )
            })
            .collect();
        let custom = if state.timeframe == Timeframe::Custom {
            r#"<option value="custom" selected>custom</option>"#
        } else {
            ""
        };
        let modes: String = Mode::CYCLE
            .iter()
            .map(|mode| {
                let selected = if *mode == state.mode { " selected" } else { "" };
                format!(r#"<option value="{0}"{selected}>{0}</option>"#, mode.as_str())
            })
            .collect();
        format!(
            r#"<form method="get" action="/apply/{token}">
<input type="text" name="search" size="60" value="{search}" placeholder="*">
<select name="timeframe">{custom}{timeframes}</select>
<select name="mode">{modes}</select>
<input type="text" name="field" size="16" value="{field}" placeholder="analyze field">
<button type="submit">search</button>
</form>"#,
            token = escape_html(&token),
            search = escape_html(&state.search),
            field = escape_html(state.analyze_field.as_deref().unwrap_or_default()),
        )
    }

    pub fn graph_mode_toggle(state: &HashState) -> String {
        let next = state.graph_mode.toggled();
        format!(
            r#"<p class="muted">graph: {} ({})</p>"#,
            escape_html(state.graph_mode.as_str()),
            link(&action_href(state, StateAction::SetGraphMode(next)), next.as_str())
        )
    }

    /// Bars link to their own bucket range, the HTML stand-in for a brush selection.
    pub fn histogram(histogram: &Histogram, state: &HashState) -> String {
        let max = histogram.max_count().max(1);
        let bars: String = histogram
            .buckets
            .iter()
            .map(|bucket| {
                let height = (bucket.count * 100) / max;
                let href = TimeRange::from_millis(
                    bucket.start,
                    bucket.start + histogram.interval_ms,
                )
                .map(|range| action_href(state, StateAction::SetTimeRange(range)))
                .unwrap_or_else(|| view_href(state));
                let mean = bucket
                    .mean
                    .map(|mean| format!(", mean {}", format_metric(mean)))
                    .unwrap_or_default();
                format!(
                    r#"<a href="{href}" style="height:{height}%" title="{title}"></a>"#,
                    href = escape_html(&href),
                    title = escape_html(&format!("{} events{mean}", bucket.count)),
                )
            })
            .collect();
        format!(
            r#"<div class="histogram" title="{}">{bars}</div>
<p class="muted">{} events, {} buckets</p>"#,
            escape_html(&interval_label(histogram.interval_ms)),
            histogram.total(),
            escape_html(&interval_label(histogram.interval_ms)),
        )
    }

    pub fn table(view: &TableView, state: &HashState, expanded: Option<usize>) -> String {
        let token_href = view_href(state);
        let header: String = view
            .columns
            .iter()
            .map(|column| {
                let sort = link(&action_href(state, StateAction::SortBy(column.clone())), column);
                let left = link(
                    &action_href(
                        state,
                        StateAction::MoveField { field: column.clone(), delta: -1 },
                    ),
                    "<",
                );
                let right = link(
                    &action_href(state, StateAction::MoveField { field: column.clone(), delta: 1 }),
                    ">",
                );
                let remove = if state.fields.is_empty() {
                    String::new()
                } else {
                    link(&action_href(state, StateAction::ToggleField(column.clone())), "x")
                };
                format!("<th>{sort} {left}{right} {remove}</th>")
            })
            .collect();
        let rows: String = view
            .rows
            .iter()
            .map(|row| {
                let cells: String =
                    row.cells.iter().map(|value| format!("<td>{}</td>", cell(value))).collect();
                let href = format!("{token_href}?row={}", row.hit);
                let open = if expanded == Some(row.hit) { "v" } else { ">" };
                format!(r#"<tr><td>{}</td>{cells}</tr>"#, link(&href, open))
            })
            .collect();
        format!("<table>\n<tr><th></th>{header}</tr>\n{rows}</table>")
    }

    pub fn detail(view: &DetailView, state: &HashState) -> String {
        let rows: String = view
            .entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| {
                let mut actions = Vec::new();
                if let Some(action) = view.filter_action(idx, false) {
                    actions.push(link(&action_href(state, action), "+"));
                }
                if let Some(action) = view.filter_action(idx, true) {
                    actions.push(link(&action_href(state, action), "-"));
                }
                if let Some(action) = view.analyze_action(idx) {
                    actions.push(link(&action_href(state, action), "analyze"));
                }
                let toggle = StateAction::ToggleField(entry.field.clone());
                let label = if state.fields.contains(&entry.field) { "hide" } else { "show" };
                actions.push(link(&action_href(state, toggle), label));
                format!(
                    "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
                    escape_html(&entry.field),
                    cell(&entry.cell),
                    actions.join(" ")
                )
            })
            .collect();
        format!(
            r#"<div class="panel"><p>{} / {} {}</p>
<table>{rows}</table></div>"#,
            escape_html(&view.index),
            escape_html(&view.id),
            link(&action_href(state, view.document_action()), "permalink"),
        )
    }

    pub fn analysis(view: &AnalysisView, state: &HashState) -> String {
        let mut out = String::new();
        if !view.rows.is_empty() {
            let metric_header = view
                .metric_label()
                .map(|label| format!("<th>{}</th>", escape_html(label)))
                .unwrap_or_default();
            let rows: String = view
                .rows
                .iter()
                .map(|row| {
                    let filter = StateAction::AddFilter {
                        field: view.field.clone(),
                        value: row.term.clone(),
                        negate: false,
                    };
                    let metric = if view.metric_label().is_some() {
                        let value = row
                            .metric
                            .map(format_metric)
                            .unwrap_or_else(|| PLACEHOLDER.to_string());
                        format!("<td>{}</td>", escape_html(&value))
                    } else {
                        String::new()
                    };
                    format!(
                        "<tr><td>{}</td><td>{}</td>{metric}</tr>",
                        link(&action_href(state, filter), &row.term),
                        row.count
                    )
                })
                .collect();
            out.push_str(&format!(
                "<table><tr><th>{}</th><th>count</th>{metric_header}</tr>{rows}</table>",
                escape_html(&view.field)
            ));
        }
        if let Some(stats) = &view.stats {
            out.push_str(&format!(
                r#"<div class="panel"><table>
<tr><th>count</th><th>min</th><th>max</th><th>mean</th><th>total</th></tr>
<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>
</table></div>"#,
                stats.count,
                format_metric(stats.min),
                format_metric(stats.max),
                format_metric(stats.mean),
                format_metric(stats.total),
            ));
        }
        out
    }

    pub fn pagination(state: &HashState, total: u64, per_page: usize) -> String {
        let shown_from = if total == 0 { 0 } else { state.offset as u64 + 1 };
        let shown_to = (state.offset as u64 + per_page as u64).min(total);
        let mut parts = vec![format!("{shown_from}-{shown_to} of {total}")];
        if state.offset > 0 {
            parts.push(link(&action_href(state, StateAction::PrevPage { per_page }), "previous"));
        }
        if (state.offset as u64 + per_page as u64) < total {
            parts.push(link(&action_href(state, StateAction::NextPage { per_page }), "next"));
        }
        format!(r#"<p class="pager">{}</p>"#, parts.join(" "))
    }

    pub fn column_picker(state: &HashState, known: &[String], columns: &[String]) -> String {
        let toggles: Vec<String> = known
            .iter()
            .map(|field| {
                let label = if columns.contains(field) {
                    format!("[x] {field}")
                } else {
                    format!("[ ] {field}")
                };
                link(&action_href(state, StateAction::ToggleField(field.clone())), &label)
            })
            .collect();
        let reset = if state.fields.is_empty() {
            String::new()
        } else {
            format!(" {}", link(&action_href(state, StateAction::ResetFields), "default columns"))
        };
        format!(r#"<p class="muted">columns: {}{reset}</p>"#, toggles.join(" "))
    }

    pub fn error_panel(message: &str) -> String {
        format!(
            r#"<div class="panel error"><strong>request failed</strong><p>{}</p></div>"#,
            escape_html(message)
        )
    }

    pub fn no_matches_panel(state: &HashState) -> String {
        let query = if state.search.is_empty() { "*" } else { state.search.as_str() };
        format!(
            r#"<div class="panel empty"><strong>no events matched</strong><p class="muted">{} in {}</p></div>"#,
            escape_html(query),
            escape_html(&state.timeframe.label())
        )
    }

    pub fn loading_panel() -> String {
        r#"<div class="panel"><p class="muted">waiting for results</p></div>"#.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logscope_core::{AnalyzeRow, TimeRange};
    use crate::logscope_graph::Histogram;
    use crate::logscope_state::{decode, HashState};
    use rstest::{fixture, rstest};
    use serde_json::json;

    #[fixture]
    fn hits() -> Vec<FlatHit> {
        let raw: Vec<Hit> = serde_json::from_value(json!([
            {
                "_id": "1",
                "_index": "logs-a",
                "_source": {
                    "@timestamp": "2024-05-01T12:00:00Z",
                    "@message": "GET /login 500",
                    "http": { "status": 500, "tags": ["a", "b"] },
                    "user": null
                },
                "highlight": { "@message": ["GET @HIGHLIGHT_START@/login@HIGHLIGHT_END@ 500"] }
            },
            {
                "_id": "2",
                "_index": "logs-a",
                "_source": { "@message": "<script>x</script>", "host": "web-1" }
            }
        ]))
        .unwrap();
        flatten_hits(&raw, "@timestamp")
    }

    #[rstest]
    fn flattening_joins_paths_and_arrays(hits: Vec<FlatHit>) {
        let first = &hits[0];
        assert_eq!(first.value("http.status"), Some("500"));
        assert_eq!(first.value("http.tags"), Some("a, b"));
        assert_eq!(first.value("user"), Some("null"));
        assert_eq!(first.timestamp, Some(1_714_564_800_000));
        assert_eq!(hits[1].timestamp, None);
    }

    #[rstest]
    fn absent_fields_render_placeholder(hits: Vec<FlatHit>) {
        let view = TableView::project(&hits, &["host".to_string()]);
        assert_eq!(view.rows[0].cells[0].text(), PLACEHOLDER);
        assert!(!view.rows[0].cells[0].present);
        assert_eq!(view.rows[1].cells[0].text(), "web-1");
    }

    #[rstest]
    fn highlighted_fields_split_into_segments(hits: Vec<FlatHit>) {
        let view = TableView::project(&hits, &["@message".to_string()]);
        let cell = &view.rows[0].cells[0];
        assert_eq!(cell.text(), "GET /login 500");
        assert_eq!(
            cell.segments.iter().filter(|segment| segment.highlighted).count(),
            1
        );
        assert_eq!(cell.segments[1].text, "/login");
    }

    #[test]
    fn highlighted_log_text_and_filters_keep_every_character() {
        let raw_message = "if a<b && c>d then x &amp; y";
        let raw: Vec<Hit> = serde_json::from_value(json!([{
            "_id": "9",
            "_index": "logs-a",
            "_source": { "@message": raw_message },
            "highlight": { "@message": ["if a<b && c>d then <em>x</em> &amp; y"] }
        }]))
        .unwrap();
        let flat = flatten_hits(&raw, "@timestamp");

        let view = TableView::project(&flat, &["@message".to_string()]);
        let cell = &view.rows[0].cells[0];
        assert_eq!(cell.text(), raw_message);
        assert_eq!(
            html::cell(cell),
            "if a&lt;b &amp;&amp; c&gt;d then <mark>x</mark> &amp;amp; y"
        );

        let detail = DetailView::from_hit(&flat[0]);
        let idx = detail.entries.iter().position(|entry| entry.field == "@message").unwrap();
        assert_eq!(
            detail.filter_action(idx, false),
            Some(StateAction::AddFilter {
                field: "@message".to_string(),
                value: raw_message.to_string(),
                negate: false,
            })
        );
    }

    #[rstest]
    fn reprojection_only_changes_columns(hits: Vec<FlatHit>) {
        let first = TableView::project(&hits, &["@message".to_string()]);
        let second = TableView::project(&hits, &["host".to_string(), "@message".to_string()]);
        assert_eq!(first.rows.len(), second.rows.len());
        assert_eq!(second.rows[1].cells[1], first.rows[1].cells[0]);
    }

    #[rstest]
    fn known_fields_are_sorted_union(hits: Vec<FlatHit>) {
        let fields = known_fields(&hits);
        assert_eq!(
            fields,
            vec!["@message", "@timestamp", "host", "http.status", "http.tags", "user"]
        );
    }

    #[test]
    fn default_columns_apply_without_explicit_fields() {
        let defaults = vec!["@message".to_string()];
        assert_eq!(effective_columns(&[], &defaults), defaults);
        assert_eq!(effective_columns(&["host".to_string()], &defaults), vec!["host".to_string()]);
    }

    #[rstest]
    fn detail_actions_refine_search(hits: Vec<FlatHit>) {
        let detail = DetailView::from_hit(&hits[0]);
        let idx = detail.entries.iter().position(|entry| entry.field == "@message").unwrap();
        assert_eq!(
            detail.filter_action(idx, true),
            Some(StateAction::AddFilter {
                field: "@message".to_string(),
                value: "GET /login 500".to_string(),
                negate: true,
            })
        );
        assert_eq!(detail.filter_action(99, false), None);
        assert_eq!(
            detail.document_action(),
            StateAction::ShowDocument { id: "1".to_string(), index: "logs-a".to_string() }
        );
    }

    #[test]
    fn analysis_view_picks_metric_for_mode() {
        let response = AnalyzeResponse {
            rows: vec![AnalyzeRow {
                term: "web-1".to_string(),
                count: 3,
                score: Some(0.5),
                trend: Some(-2.0),
            }],
            stats: None,
        };
        let trend = AnalysisView::new(Mode::Trend, "host", &response);
        assert_eq!(trend.metric_label(), Some("trend"));
        assert_eq!(trend.rows[0].metric, Some(-2.0));
        let terms = AnalysisView::new(Mode::Terms, "host", &response);
        assert_eq!(terms.metric_label(), None);
        assert_eq!(terms.total_count(), 3);
        assert!(text::analysis(&terms).contains("web-1"));
    }

    #[rstest]
    fn html_table_escapes_values_and_marks_highlights(hits: Vec<FlatHit>) {
        let state = HashState::default();
        let view = TableView::project(&hits, &["@message".to_string()]);
        let markup = html::table(&view, &state, None);
        assert!(markup.contains("<mark>/login</mark>"));
        assert!(markup.contains("&lt;script&gt;x&lt;/script&gt;"));
        assert!(!markup.contains("<script>"));
    }

    #[test]
    fn html_links_carry_reduced_state() {
        let state = HashState { offset: 50, ..HashState::default() };
        let markup = html::pagination(&state, 120, 50);
        assert!(markup.contains("51-100 of 120"));
        let next = markup.split("href=\"/view/").nth(2).unwrap();
        let token = next.split('"').next().unwrap();
        assert_eq!(decode(token).unwrap().offset, 100);
    }

    #[test]
    fn error_and_empty_panels_escape_text() {
        assert!(html::error_panel("<b>boom</b>").contains("&lt;b&gt;boom&lt;/b&gt;"));
        let state = HashState { search: "a<b".to_string(), ..HashState::default() };
        let panel = html::no_matches_panel(&state);
        assert!(panel.contains("no events matched"));
        assert!(panel.contains("a&lt;b"));
    }

    #[test]
    fn sparkline_scales_to_max_bucket() {
        let range = TimeRange::from_millis(0, 3_999).unwrap();
        let histogram = Histogram::from_timestamps(range, 1_000, [0, 0, 0, 0, 1_000, 3_000, 3_000]);
        assert_eq!(text::sparkline(&histogram), "█▂ ▄");
    }
}
