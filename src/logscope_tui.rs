//! Ratatui interface for logscope.
//!
//! The TUI never performs I/O. Keys and mouse events become state actions on the
//! [`App`]; whatever effects the app returns are handed back to the caller as
//! [`Action::Dispatch`] for the driver to run.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind};
use rapidfuzz::fuzz;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{
    Block, Borders, Cell as TableCell, Clear, List, ListItem, ListState, Paragraph, Row as TableRow,
    Table, TableState, Wrap,
};
use ratatui::Frame;
use thiserror::Error;

use crate::logscope_app::{App, Effect, Phase};
use crate::logscope_core::{datetime_from_millis, Millis, Mode};
use crate::logscope_driver::DriverEvent;
use crate::logscope_graph::{interval_label, ChartGeometry, Histogram};
use crate::logscope_render::{format_metric, Cell, DetailView, PLACEHOLDER};
use crate::logscope_state::{reduce, StateAction};
use crate::sanitize::terminal_safe;

const HISTOGRAM_HEIGHT: u16 = 8;
const MAX_QUERY_LEN: usize = 1024;
const BAR_LEVELS: [char; 9] = [' ', '▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Key handling modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Search,
    Picker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusPane {
    Results,
    Detail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickerItem {
    pub label: String,
    pub active: bool,
}

/// Fuzzy field picker; toggling an item toggles the column.
#[derive(Debug, Clone)]
pub struct PickerState {
    pub query: InputState,
    pub items: Vec<PickerItem>,
    pub filtered: Vec<usize>,
    pub selected: usize,
}

impl PickerState {
    pub fn new(items: Vec<PickerItem>) -> Self {
        let mut picker =
            Self { query: InputState::default(), items, filtered: Vec::new(), selected: 0 };
        picker.recompute();
        picker
    }

    fn recompute(&mut self) {
        let query = self.query.buffer.trim();
        if query.is_empty() {
            self.filtered = (0..self.items.len()).collect();
        } else {
            self.filtered = fuzzy_rank_items(&self.items, query);
        }
        if self.filtered.is_empty() {
            self.selected = 0;
        } else if self.selected >= self.filtered.len() {
            self.selected = self.filtered.len() - 1;
        }
    }

    fn move_selection(&mut self, delta: i32) {
        let len = self.filtered.len();
        if len == 0 {
            self.selected = 0;
            return;
        }
        self.selected = (self.selected as i32 + delta).clamp(0, len as i32 - 1) as usize;
    }

    fn selected_item(&self) -> Option<&PickerItem> {
        let idx = *self.filtered.get(self.selected)?;
        self.items.get(idx)
    }
}

/// Input buffer with a cursor.
#[derive(Debug, Clone, Default)]
pub struct InputState {
    pub buffer: String,
    pub cursor: usize,
}

impl InputState {
    pub fn set(&mut self, value: &str) {
        self.buffer = value.to_string();
        self.cursor = self.buffer.len();
    }

    pub fn insert_char(&mut self, ch: char) {
        if self.buffer.len() >= MAX_QUERY_LEN {
            return;
        }
        self.buffer.insert(self.cursor, ch);
        self.cursor += ch.len_utf8();
    }

    pub fn backspace(&mut self) {
        let Some(prev) = self.buffer[..self.cursor].chars().next_back() else {
            return;
        };
        self.cursor -= prev.len_utf8();
        self.buffer.remove(self.cursor);
    }

    pub fn move_left(&mut self) {
        if let Some(prev) = self.buffer[..self.cursor].chars().next_back() {
            self.cursor -= prev.len_utf8();
        }
    }

    pub fn move_right(&mut self) {
        if let Some(next) = self.buffer[self.cursor..].chars().next() {
            self.cursor += next.len_utf8();
        }
    }
}

/// What the caller should do after an input event.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    None,
    Dispatch(Vec<Effect>),
    Quit,
}

impl Action {
    fn from_effects(effects: Vec<Effect>) -> Self {
        if effects.is_empty() {
            Action::None
        } else {
            Action::Dispatch(effects)
        }
    }
}

#[derive(Debug, Error)]
pub enum TuiError {
    #[error("terminal error: {0}")]
    Terminal(#[from] std::io::Error),
}

#[derive(Debug)]
pub struct TuiState {
    pub input_mode: InputMode,
    pub focus: FocusPane,
    pub search: InputState,
    pub selected_row: usize,
    pub selected_column: usize,
    /// Row whose detail pane is open.
    pub detail_row: Option<usize>,
    pub detail_selected: usize,
    pub picker: Option<PickerState>,
    pub notice: Option<String>,
    pub chart_area: Rect,
    pub brush_anchor: Option<u16>,
    pub brush_cursor: Option<u16>,
}

impl Default for TuiState {
    fn default() -> Self {
        Self {
            input_mode: InputMode::Normal,
            focus: FocusPane::Results,
            search: InputState::default(),
            selected_row: 0,
            selected_column: 0,
            detail_row: None,
            detail_selected: 0,
            picker: None,
            notice: None,
            chart_area: Rect::default(),
            brush_anchor: None,
            brush_cursor: None,
        }
    }
}

pub struct Tui {
    pub app: App,
    pub state: TuiState,
}

impl Tui {
    pub fn new(app: App) -> Self {
        let mut state = TuiState::default();
        state.search.set(&app.state().search);
        Self { app, state }
    }

    /// Feeds a driver event into the app.
    pub fn on_driver_event(&mut self, event: DriverEvent, now: DateTime<Utc>) -> Vec<Effect> {
        let effects = match event {
            DriverEvent::Completed { ticket, result } => self.app.complete(ticket, result, now),
            DriverEvent::RefreshDue => self.app.refresh_due(now),
        };
        self.clamp_selection();
        effects
    }

    fn run(&mut self, action: StateAction) -> Action {
        let query_before = self.app.state().fetch_token();
        let effects = self.app.apply(action, Utc::now());
        self.after_navigation(query_before);
        Action::from_effects(effects)
    }

    fn after_navigation(&mut self, query_before: String) {
        if self.app.state().fetch_token() != query_before {
            self.state.selected_row = 0;
            self.state.detail_row = None;
            self.state.detail_selected = 0;
            self.state.focus = FocusPane::Results;
        }
        self.state.search.set(&self.app.state().search);
        self.state.notice = None;
        self.clamp_selection();
    }

    fn clamp_selection(&mut self) {
        let rows = self.row_count();
        if rows == 0 {
            self.state.selected_row = 0;
        } else if self.state.selected_row >= rows {
            self.state.selected_row = rows - 1;
        }
        let columns = self.app.columns().len();
        if columns == 0 {
            self.state.selected_column = 0;
        } else if self.state.selected_column >= columns {
            self.state.selected_column = columns - 1;
        }
        if self.state.detail_row.is_some_and(|row| row >= self.app.hits().len()) {
            self.state.detail_row = None;
        }
    }

    fn row_count(&self) -> usize {
        match self.app.analysis() {
            Some(view) => view.rows.len(),
            None => self.app.table().rows.len(),
        }
    }

    fn selected_column_name(&self) -> Option<String> {
        self.app.columns().get(self.state.selected_column).cloned()
    }

    /// Detail view for the open row, or the document in document mode.
    fn open_detail(&self) -> Option<DetailView> {
        match self.state.detail_row {
            Some(row) => self.app.detail(row),
            None => self.app.document(),
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Action {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            if let KeyCode::Char('c') | KeyCode::Char('C') = key.code {
                return Action::Quit;
            }
        }
        match self.state.input_mode {
            InputMode::Normal => self.handle_normal(key),
            InputMode::Search => self.handle_search(key),
            InputMode::Picker => self.handle_picker(key),
        }
    }

    fn handle_normal(&mut self, key: KeyEvent) -> Action {
        let per_page = self.app.config().per_page;
        match key {
            KeyEvent { code: KeyCode::Char('q'), modifiers: KeyModifiers::NONE, .. } => {
                Action::Quit
            }
            KeyEvent { code: KeyCode::Char('/'), .. } => {
                self.state.search.set(&self.app.state().search);
                self.state.input_mode = InputMode::Search;
                Action::None
            }
            KeyEvent { code: KeyCode::Left, modifiers: KeyModifiers::ALT, .. } => {
                self.history(false)
            }
            KeyEvent { code: KeyCode::Right, modifiers: KeyModifiers::ALT, .. } => {
                self.history(true)
            }
            KeyEvent { code: KeyCode::Backspace, .. } => self.history(false),
            KeyEvent { code: KeyCode::Esc, .. } => {
                if self.state.detail_row.is_some() {
                    self.state.detail_row = None;
                    self.state.focus = FocusPane::Results;
                    Action::None
                } else {
                    Action::from_effects(self.app.cancel())
                }
            }
            KeyEvent { code: KeyCode::Char('m'), .. } => {
                self.run(StateAction::SetMode(self.app.state().mode.next()))
            }
            KeyEvent { code: KeyCode::Char('t'), .. } => {
                self.run(StateAction::SetTimeframe(self.app.state().timeframe.next_preset()))
            }
            KeyEvent { code: KeyCode::Char('g'), .. } => {
                self.run(StateAction::SetGraphMode(self.app.state().graph_mode.toggled()))
            }
            KeyEvent { code: KeyCode::Char('f'), .. } => {
                self.open_field_picker();
                Action::None
            }
            KeyEvent { code: KeyCode::Char('r'), .. } => self.run(StateAction::ResetFields),
            KeyEvent { code: KeyCode::Char('n'), .. } => {
                self.run(StateAction::NextPage { per_page })
            }
            KeyEvent { code: KeyCode::Char('p'), .. } => {
                self.run(StateAction::PrevPage { per_page })
            }
            KeyEvent { code: KeyCode::Char('h'), .. } | KeyEvent { code: KeyCode::Left, .. } => {
                self.state.selected_column = self.state.selected_column.saturating_sub(1);
                Action::None
            }
            KeyEvent { code: KeyCode::Char('l'), .. } | KeyEvent { code: KeyCode::Right, .. } => {
                let last = self.app.columns().len().saturating_sub(1);
                self.state.selected_column = (self.state.selected_column + 1).min(last);
                Action::None
            }
            KeyEvent { code: KeyCode::Char('<'), .. } => self.move_column(-1),
            KeyEvent { code: KeyCode::Char('>'), .. } => self.move_column(1),
            KeyEvent { code: KeyCode::Char('s'), .. } => match self.selected_column_name() {
                Some(column) => self.run(StateAction::SortBy(column)),
                None => Action::None,
            },
            KeyEvent { code: KeyCode::Char('j'), .. } | KeyEvent { code: KeyCode::Down, .. } => {
                self.move_selection(1);
                Action::None
            }
            KeyEvent { code: KeyCode::Char('k'), .. } | KeyEvent { code: KeyCode::Up, .. } => {
                self.move_selection(-1);
                Action::None
            }
            KeyEvent { code: KeyCode::Tab, .. } => {
                if self.open_detail().is_some() {
                    self.state.focus = match self.state.focus {
                        FocusPane::Results => FocusPane::Detail,
                        FocusPane::Detail => FocusPane::Results,
                    };
                }
                Action::None
            }
            KeyEvent { code: KeyCode::Enter, .. } => self.activate(),
            KeyEvent { code: KeyCode::Char('+'), .. } => {
                self.detail_action(|view, idx| view.filter_action(idx, false))
            }
            KeyEvent { code: KeyCode::Char('-'), .. } => {
                self.detail_action(|view, idx| view.filter_action(idx, true))
            }
            KeyEvent { code: KeyCode::Char('a'), .. } => {
                self.detail_action(|view, idx| view.analyze_action(idx))
            }
            KeyEvent { code: KeyCode::Char('c'), .. } => self.detail_action(|view, idx| {
                view.entries.get(idx).map(|entry| StateAction::ToggleField(entry.field.clone()))
            }),
            KeyEvent { code: KeyCode::Char('d'), .. } => {
                let row = self.state.detail_row.unwrap_or(self.state.selected_row);
                match self.app.detail(row) {
                    Some(view) => self.run(view.document_action()),
                    None => Action::None,
                }
            }
            _ => Action::None,
        }
    }

    fn history(&mut self, forward: bool) -> Action {
        let query_before = self.app.state().fetch_token();
        let now = Utc::now();
        let effects = if forward { self.app.forward(now) } else { self.app.back(now) };
        self.after_navigation(query_before);
        Action::from_effects(effects)
    }

    fn move_column(&mut self, delta: isize) -> Action {
        let Some(column) = self.selected_column_name() else {
            return Action::None;
        };
        let action = self.run(StateAction::MoveField { field: column.clone(), delta });
        if let Some(pos) = self.app.columns().iter().position(|existing| *existing == column) {
            self.state.selected_column = pos;
        }
        action
    }

    fn move_selection(&mut self, delta: i32) {
        if self.state.focus == FocusPane::Detail {
            let len = self.open_detail().map_or(0, |view| view.entries.len());
            if len > 0 {
                self.state.detail_selected =
                    (self.state.detail_selected as i32 + delta).clamp(0, len as i32 - 1) as usize;
            }
            return;
        }
        let len = self.row_count();
        if len > 0 {
            self.state.selected_row =
                (self.state.selected_row as i32 + delta).clamp(0, len as i32 - 1) as usize;
        }
    }

    fn activate(&mut self) -> Action {
        if let Some(view) = self.app.analysis() {
            let Some(row) = view.rows.get(self.state.selected_row) else {
                return Action::None;
            };
            let filter = StateAction::AddFilter {
                field: view.field.clone(),
                value: row.term.clone(),
                negate: false,
            };
            let next =
                reduce(&reduce(self.app.state(), filter), StateAction::SetMode(Mode::Search));
            let query_before = self.app.state().fetch_token();
            let effects = self.app.navigate(next, Utc::now());
            self.after_navigation(query_before);
            return Action::from_effects(effects);
        }
        if self.state.focus == FocusPane::Detail {
            return self.detail_action(|view, idx| view.filter_action(idx, false));
        }
        if self.app.table().rows.is_empty() {
            return Action::None;
        }
        let row = self.state.selected_row;
        if self.state.detail_row == Some(row) {
            self.state.detail_row = None;
            self.state.focus = FocusPane::Results;
        } else {
            self.state.detail_row = Some(row);
            self.state.detail_selected = 0;
            self.state.focus = FocusPane::Detail;
        }
        Action::None
    }

    fn detail_action(
        &mut self,
        build: impl Fn(&DetailView, usize) -> Option<StateAction>,
    ) -> Action {
        let Some(view) = self.open_detail() else {
            self.state.notice = Some("open a row with Enter first".to_string());
            return Action::None;
        };
        match build(&view, self.state.detail_selected) {
            Some(action) => self.run(action),
            None => Action::None,
        }
    }

    fn handle_search(&mut self, key: KeyEvent) -> Action {
        match key {
            KeyEvent { code: KeyCode::Esc, .. } => {
                self.state.search.set(&self.app.state().search);
                self.state.input_mode = InputMode::Normal;
                Action::None
            }
            KeyEvent { code: KeyCode::Enter, .. } => {
                self.state.input_mode = InputMode::Normal;
                let search = self.state.search.buffer.clone();
                self.run(StateAction::SetSearch(search))
            }
            KeyEvent { code: KeyCode::Backspace, .. } => {
                self.state.search.backspace();
                Action::None
            }
            KeyEvent { code: KeyCode::Left, .. } => {
                self.state.search.move_left();
                Action::None
            }
            KeyEvent { code: KeyCode::Right, .. } => {
                self.state.search.move_right();
                Action::None
            }
            KeyEvent { code: KeyCode::Char(c), modifiers, .. }
                if !modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) =>
            {
                self.state.search.insert_char(c);
                Action::None
            }
            _ => Action::None,
        }
    }

    fn open_field_picker(&mut self) {
        let columns = self.app.columns();
        let mut labels: Vec<String> = self.app.known_fields().to_vec();
        for column in &columns {
            if !labels.contains(column) {
                labels.push(column.clone());
            }
        }
        let items = labels
            .into_iter()
            .map(|label| PickerItem { active: columns.contains(&label), label })
            .collect();
        self.state.picker = Some(PickerState::new(items));
        self.state.input_mode = InputMode::Picker;
    }

    fn close_picker(&mut self) {
        self.state.picker = None;
        self.state.input_mode = InputMode::Normal;
    }

    fn handle_picker(&mut self, key: KeyEvent) -> Action {
        let mut toggle = None;
        {
            let Some(picker) = self.state.picker.as_mut() else {
                self.state.input_mode = InputMode::Normal;
                return Action::None;
            };
            match key {
                KeyEvent { code: KeyCode::Esc, .. } => {
                    self.close_picker();
                    return Action::None;
                }
                KeyEvent { code: KeyCode::Enter, .. }
                | KeyEvent { code: KeyCode::Char(' '), modifiers: KeyModifiers::NONE, .. } => {
                    toggle = picker.selected_item().map(|item| item.label.clone());
                }
                KeyEvent { code: KeyCode::Down, .. } => picker.move_selection(1),
                KeyEvent { code: KeyCode::Up, .. } => picker.move_selection(-1),
                KeyEvent { code: KeyCode::Backspace, .. } => {
                    picker.query.backspace();
                    picker.recompute();
                }
                KeyEvent { code: KeyCode::Char(c), modifiers, .. }
                    if !modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) =>
                {
                    picker.query.insert_char(c);
                    picker.recompute();
                }
                _ => {}
            }
        }

        let Some(field) = toggle else {
            return Action::None;
        };
        let action = self.run(StateAction::ToggleField(field));
        let columns = self.app.columns();
        if let Some(picker) = self.state.picker.as_mut() {
            for item in &mut picker.items {
                item.active = columns.contains(&item.label);
            }
        }
        action
    }

    pub fn handle_mouse(&mut self, event: MouseEvent) -> Action {
        if self.state.picker.is_some() {
            return Action::None;
        }
        let area = self.state.chart_area;
        let inside_x = |column: u16| column.clamp(area.x, area.x + area.width) - area.x;
        match event.kind {
            MouseEventKind::Down(MouseButton::Left) => {
                let inside = event.column >= area.x
                    && event.column < area.x + area.width
                    && event.row >= area.y
                    && event.row < area.y + area.height;
                if inside && self.app.chart_range().is_some() {
                    self.state.brush_anchor = Some(event.column - area.x);
                    self.state.brush_cursor = Some(event.column - area.x);
                }
                Action::None
            }
            MouseEventKind::Drag(MouseButton::Left) => {
                if self.state.brush_anchor.is_some() {
                    self.state.brush_cursor = Some(inside_x(event.column));
                }
                Action::None
            }
            MouseEventKind::Up(MouseButton::Left) => {
                let Some(anchor) = self.state.brush_anchor.take() else {
                    return Action::None;
                };
                self.state.brush_cursor = None;
                let release = inside_x(event.column);
                let query_before = self.app.state().fetch_token();
                let effects = self.app.brush(
                    u32::from(anchor),
                    u32::from(release),
                    u32::from(area.width),
                    Utc::now(),
                );
                self.after_navigation(query_before);
                Action::from_effects(effects)
            }
            MouseEventKind::ScrollDown => {
                self.move_selection(1);
                Action::None
            }
            MouseEventKind::ScrollUp => {
                self.move_selection(-1);
                Action::None
            }
            _ => Action::None,
        }
    }

    pub fn render(&mut self, frame: &mut Frame<'_>) {
        let size = frame.area();
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Length(HISTOGRAM_HEIGHT),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(size);

        self.render_top_bar(frame, chunks[0]);
        self.render_histogram(frame, chunks[1]);
        self.render_main(frame, chunks[2]);
        self.render_footer(frame, chunks[3]);
        if self.state.picker.is_some() {
            self.render_picker(frame);
        }
    }

    fn panel_border_style(&self, focused: bool) -> Style {
        if focused {
            Style::default().fg(Color::Green)
        } else {
            Style::default()
        }
    }

    fn dimmed_style(&self) -> Style {
        Style::default().fg(Color::DarkGray)
    }

    fn selection_style(&self) -> Style {
        Style::default().add_modifier(Modifier::REVERSED | Modifier::BOLD)
    }

    fn render_top_bar(&self, frame: &mut Frame<'_>, area: Rect) {
        let editing = self.state.input_mode == InputMode::Search;
        let state = self.app.state();
        let block = Block::default()
            .borders(Borders::ALL)
            .title(format!("─ {} · {} ", state.mode, state.timeframe.label()))
            .title_bottom(Line::from(format!(" {} ", self.app.location())).right_aligned())
            .border_style(self.panel_border_style(editing));
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let query = if editing {
            self.state.search.buffer.clone()
        } else if state.search.is_empty() {
            "*".to_string()
        } else {
            state.search.clone()
        };
        let query_style = if editing {
            Style::default().add_modifier(Modifier::BOLD)
        } else {
            Style::default()
        };
        let mut spans = vec![
            Span::styled(" Q ", Style::default().add_modifier(Modifier::REVERSED | Modifier::BOLD)),
            Span::raw(" "),
            Span::styled(query, query_style),
        ];
        if let Some(sort) = &state.sort {
            spans.push(Span::styled(
                format!("  sort {} {:?}", sort.field, sort.order).to_lowercase(),
                self.dimmed_style(),
            ));
        }
        if let Some(notice) = &self.state.notice {
            spans.push(Span::styled(format!("  {notice}"), Style::default().fg(Color::Yellow)));
        }
        frame.render_widget(Paragraph::new(Line::from(spans)), inner);
        if editing {
            let prefix = " Q  ".chars().count() as u16;
            let typed = self.state.search.buffer[..self.state.search.cursor].chars().count() as u16;
            frame.set_cursor_position((inner.x + prefix + typed, inner.y));
        }
    }

    fn render_histogram(&mut self, frame: &mut Frame<'_>, area: Rect) {
        let histogram = self.app.histogram();
        let title = match histogram {
            Some(histogram) => format!(
                "─ {} events · {} buckets · graph {} ",
                histogram.total(),
                interval_label(histogram.interval_ms),
                self.app.state().graph_mode.as_str()
            ),
            None => "─ histogram ".to_string(),
        };
        let mut block = Block::default().borders(Borders::ALL).title(title);
        if let (Some(anchor), Some(cursor)) = (self.state.brush_anchor, self.state.brush_cursor) {
            if let Some(range) = self.app.chart_range() {
                let width = u32::from(self.state.chart_area.width);
                let geometry = ChartGeometry::new(width, range.clone());
                if let Some(selected) = geometry.brush(u32::from(anchor), u32::from(cursor)) {
                    block = block.title_bottom(
                        Line::from(format!(
                            " {} → {} ",
                            format_time(selected.from_ms()),
                            format_time(selected.to_ms())
                        ))
                        .right_aligned(),
                    );
                }
            }
        }
        if let Some(error) = self.app.graph_error() {
            block = block.title_bottom(
                Line::from(format!(" {error} ")).style(Style::default().fg(Color::Red)),
            );
        }
        let inner = block.inner(area);
        frame.render_widget(block, area);
        self.state.chart_area = inner;

        let Some(histogram) = self.app.histogram() else {
            return;
        };
        let selection = match (self.state.brush_anchor, self.state.brush_cursor) {
            (Some(a), Some(b)) => Some((a.min(b), a.max(b))),
            _ => None,
        };
        let lines = bar_lines(&column_values(histogram, inner.width), inner.height, selection);
        frame.render_widget(Paragraph::new(lines).style(Style::default().fg(Color::Cyan)), inner);
    }

    fn render_main(&self, frame: &mut Frame<'_>, area: Rect) {
        let detail = self.open_detail();
        let (results_area, detail_area) = match (&detail, self.app.state().mode) {
            (Some(_), Mode::Document) => (None, Some(area)),
            (Some(_), _) => {
                let chunks = Layout::default()
                    .direction(Direction::Horizontal)
                    .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
                    .split(area);
                (Some(chunks[0]), Some(chunks[1]))
            }
            (None, _) => (Some(area), None),
        };

        if let Some(results_area) = results_area {
            match self.app.phase() {
                Phase::Failed(message) => {
                    self.render_panel(frame, results_area, "request failed", message, Color::Red)
                }
                Phase::NoMatches => {
                    let state = self.app.state();
                    let query = if state.search.is_empty() { "*" } else { state.search.as_str() };
                    let message = format!("{query} in {}", state.timeframe.label());
                    let title = "no events matched";
                    self.render_panel(frame, results_area, title, &message, Color::DarkGray);
                }
                Phase::Idle if self.app.table().is_empty() => {
                    let message = "press / to search";
                    self.render_panel(frame, results_area, "idle", message, Color::DarkGray);
                }
                Phase::Fetching if self.app.table().is_empty() && self.app.analysis().is_none() => {
                    let message = "waiting for results";
                    self.render_panel(frame, results_area, "fetching", message, Color::DarkGray);
                }
                _ => match self.app.analysis() {
                    Some(_) => self.render_analysis(frame, results_area),
                    None => self.render_table(frame, results_area),
                },
            }
        }
        if let (Some(view), Some(detail_area)) = (detail, detail_area) {
            self.render_detail(frame, detail_area, &view);
        }
    }

    fn render_panel(
        &self,
        frame: &mut Frame<'_>,
        area: Rect,
        title: &str,
        message: &str,
        color: Color,
    ) {
        let block = Block::default()
            .borders(Borders::ALL)
            .title(format!("─ {title} "))
            .border_style(Style::default().fg(color));
        let paragraph = Paragraph::new(terminal_safe(message))
            .block(block)
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true });
        frame.render_widget(paragraph, area);
    }

    fn render_table(&self, frame: &mut Frame<'_>, area: Rect) {
        let focused = self.state.focus == FocusPane::Results;
        let table = self.app.table();
        let state = self.app.state();
        let total = self.app.total();
        let first = if table.rows.is_empty() { 0 } else { state.offset + 1 };
        let last = state.offset + table.rows.len();
        let block = Block::default()
            .borders(Borders::ALL)
            .title(format!("─ {first}-{last} of {total} "))
            .border_style(self.panel_border_style(focused));

        let column_cells = table.columns.iter().enumerate().map(|(idx, column)| {
            let style = if idx == self.state.selected_column {
                Style::default().add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
            } else {
                Style::default().add_modifier(Modifier::BOLD)
            };
            TableCell::from(Span::styled(column.clone(), style))
        });
        let header_cells = std::iter::once(TableCell::from("time")).chain(column_cells);
        let header = TableRow::new(header_cells);
        let hits = self.app.hits();
        let rows = table.rows.iter().map(|row| {
            let time = hits
                .get(row.hit)
                .and_then(|hit| hit.timestamp)
                .map(format_time)
                .unwrap_or_else(|| PLACEHOLDER.to_string());
            let cells = std::iter::once(TableCell::from(time))
                .chain(row.cells.iter().map(cell_line).map(TableCell::from));
            TableRow::new(cells)
        });
        let mut widths = vec![Constraint::Length(8)];
        widths.extend(table.columns.iter().map(|_| Constraint::Fill(1)));
        let widget = Table::new(rows, widths)
            .header(header)
            .block(block)
            .row_highlight_style(self.selection_style());
        let mut table_state = TableState::default();
        if !table.rows.is_empty() {
            table_state.select(Some(self.state.selected_row));
        }
        frame.render_stateful_widget(widget, area, &mut table_state);
    }

    fn render_analysis(&self, frame: &mut Frame<'_>, area: Rect) {
        let Some(view) = self.app.analysis() else {
            return;
        };
        let block = Block::default()
            .borders(Borders::ALL)
            .title(format!("─ {} of {} ", view.mode, view.field))
            .border_style(self.panel_border_style(true));
        let mut header = vec![view.field.clone(), "count".to_string()];
        if let Some(label) = view.metric_label() {
            header.push(label.to_string());
        }
        let rows = view.rows.iter().map(|row| {
            let mut cells = vec![terminal_safe(&row.term), row.count.to_string()];
            if view.metric_label().is_some() {
                let metric = row.metric.map(format_metric);
                cells.push(metric.unwrap_or_else(|| PLACEHOLDER.to_string()));
            }
            TableRow::new(cells)
        });
        let widths = vec![Constraint::Fill(3), Constraint::Length(10), Constraint::Length(12)];
        let mut table = Table::new(rows, widths)
            .header(TableRow::new(header).style(Style::default().add_modifier(Modifier::BOLD)))
            .row_highlight_style(self.selection_style());
        if let Some(stats) = &view.stats {
            table = table.footer(TableRow::new(vec![
                format!(
                    "count {} min {} max {} mean {} total {}",
                    stats.count,
                    format_metric(stats.min),
                    format_metric(stats.max),
                    format_metric(stats.mean),
                    format_metric(stats.total)
                ),
                String::new(),
                String::new(),
            ]));
        }
        let mut table_state = TableState::default();
        if !view.rows.is_empty() {
            table_state.select(Some(self.state.selected_row));
        }
        frame.render_stateful_widget(table.block(block), area, &mut table_state);
    }

    fn render_detail(&self, frame: &mut Frame<'_>, area: Rect, view: &DetailView) {
        let focused =
            self.state.focus == FocusPane::Detail || self.app.state().mode == Mode::Document;
        let block = Block::default()
            .borders(Borders::ALL)
            .title(format!("─ {} / {} ", view.index, view.id))
            .title_bottom(
                Line::from(" +/- filter · a analyze · c column · d document ").right_aligned(),
            )
            .border_style(self.panel_border_style(focused));
        let width = view.entries.iter().map(|entry| entry.field.chars().count()).max().unwrap_or(0);
        let items: Vec<ListItem> = view
            .entries
            .iter()
            .map(|entry| {
                let mut spans = vec![Span::styled(
                    format!("{:<width$}  ", entry.field),
                    Style::default().add_modifier(Modifier::BOLD),
                )];
                spans.extend(cell_line(&entry.cell).spans);
                ListItem::new(Line::from(spans))
            })
            .collect();
        let mut list_state = ListState::default();
        if !items.is_empty() {
            list_state.select(Some(self.state.detail_selected.min(items.len() - 1)));
        }
        let list = List::new(items).block(block).highlight_style(self.selection_style());
        frame.render_stateful_widget(list, area, &mut list_state);
    }

    fn render_footer(&self, frame: &mut Frame<'_>, area: Rect) {
        let key_style = Style::default().fg(Color::LightBlue).add_modifier(Modifier::BOLD);
        let sep_style = self.dimmed_style();
        let mut spans: Vec<Span<'static>> = Vec::new();
        let mut push_item = |label: &'static str, key: &'static str| {
            if !spans.is_empty() {
                spans.push(Span::styled(" | ", sep_style));
            }
            spans.push(Span::styled(label, sep_style));
            spans.push(Span::raw(":"));
            spans.push(Span::styled(key, key_style));
        };
        match self.state.input_mode {
            InputMode::Search => {
                push_item("Submit", "Enter");
                push_item("Cancel", "Esc");
            }
            InputMode::Picker => {
                push_item("Toggle", "Enter");
                push_item("Close", "Esc");
            }
            InputMode::Normal => {
                push_item("Search", "/");
                push_item("Mode", "m");
                push_item("Time", "t");
                push_item("Fields", "f");
                push_item("Sort", "s");
                push_item("Page", "n/p");
                push_item("Back", "Bksp");
                push_item("Quit", "q");
            }
        }
        let phase = match self.app.phase() {
            Phase::Idle => Span::styled("idle", sep_style),
            Phase::Fetching => Span::styled("fetching", Style::default().fg(Color::Yellow)),
            Phase::Rendered => Span::styled("ok", Style::default().fg(Color::Green)),
            Phase::NoMatches => Span::styled("no matches", sep_style),
            Phase::Failed(_) => Span::styled("error", Style::default().fg(Color::Red)),
        };
        let mut line = vec![phase, Span::raw(" ")];
        if self.app.refresh_armed() {
            line.push(Span::styled("live ", Style::default().fg(Color::Green)));
        }
        line.extend(spans);
        frame.render_widget(Paragraph::new(Line::from(line)), area);
    }

    fn render_picker(&self, frame: &mut Frame<'_>) {
        let Some(picker) = &self.state.picker else {
            return;
        };
        let area = centered_rect(60, 60, frame.area());
        frame.render_widget(Clear, area);
        let block = Block::default()
            .borders(Borders::ALL)
            .title("─ Fields ─")
            .border_style(self.panel_border_style(true));
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(2), Constraint::Min(0)])
            .split(inner);
        let header = Paragraph::new(Line::from(vec![
            Span::styled("Filter: ", self.dimmed_style()),
            Span::styled(
                picker.query.buffer.clone(),
                Style::default().add_modifier(Modifier::BOLD),
            ),
        ]));
        frame.render_widget(header, chunks[0]);

        let items: Vec<ListItem> = if picker.filtered.is_empty() {
            vec![ListItem::new("No matches")]
        } else {
            picker
                .filtered
                .iter()
                .filter_map(|idx| picker.items.get(*idx))
                .map(|item| {
                    let mark = if item.active { "[x] " } else { "[ ] " };
                    ListItem::new(format!("{mark}{}", item.label))
                })
                .collect()
        };
        let mut list_state = ListState::default();
        if !picker.filtered.is_empty() {
            list_state.select(Some(picker.selected));
        }
        let list = List::new(items).highlight_style(self.selection_style());
        frame.render_stateful_widget(list, chunks[1], &mut list_state);
    }
}

fn cell_line(cell: &Cell) -> Line<'static> {
    if !cell.present {
        return Line::from(Span::styled(PLACEHOLDER, Style::default().fg(Color::DarkGray)));
    }
    let spans: Vec<Span<'static>> = cell
        .segments
        .iter()
        .map(|segment| {
            let text = terminal_safe(&segment.text);
            if segment.highlighted {
                Span::styled(text, Style::default().fg(Color::Black).bg(Color::Yellow))
            } else {
                Span::raw(text)
            }
        })
        .collect();
    Line::from(spans)
}

fn format_time(millis: Millis) -> String {
    datetime_from_millis(millis)
        .map(|time| time.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| PLACEHOLDER.to_string())
}

/// Resamples histogram buckets to one value per terminal column.
fn column_values(histogram: &Histogram, width: u16) -> Vec<u64> {
    let buckets = &histogram.buckets;
    if buckets.is_empty() || width == 0 {
        return Vec::new();
    }
    let width = usize::from(width);
    (0..width)
        .map(|x| {
            let idx = (x * buckets.len()) / width;
            buckets[idx.min(buckets.len() - 1)].count
        })
        .collect()
}

/// Vertical bars built from eighth blocks, tallest bar filling `height` rows.
fn bar_lines(values: &[u64], height: u16, selection: Option<(u16, u16)>) -> Vec<Line<'static>> {
    let max = values.iter().copied().max().unwrap_or(0);
    let height = u64::from(height);
    let levels = BAR_LEVELS.len() as u64 - 1;
    (0..height)
        .map(|row| {
            let row_from_bottom = height - 1 - row;
            let spans: Vec<Span<'static>> = values
                .iter()
                .enumerate()
                .map(|(x, value)| {
                    let filled = if max == 0 { 0 } else { value * height * levels / max };
                    let in_row = filled.saturating_sub(row_from_bottom * levels).min(levels);
                    let ch = BAR_LEVELS[in_row as usize].to_string();
                    let selected = selection.is_some_and(|(from, to)| {
                        let x = x as u16;
                        x >= from && x <= to
                    });
                    if selected {
                        Span::styled(ch, Style::default().bg(Color::DarkGray))
                    } else {
                        Span::raw(ch)
                    }
                })
                .collect();
            Line::from(spans)
        })
        .collect()
}

pub fn fuzzy_rank_items(items: &[PickerItem], query: &str) -> Vec<usize> {
    let query_lower = query.to_lowercase();
    let threshold = if query_lower.len() <= 2 { 0.2 } else { 0.35 };

    let mut scored: Vec<(usize, f64)> = items
        .iter()
        .enumerate()
        .filter_map(|(idx, item)| {
            let candidate = item.label.to_lowercase();
            if candidate.contains(&query_lower) {
                return Some((idx, 1.0));
            }
            let score = fuzz::ratio(query_lower.chars(), candidate.chars());
            (score >= threshold).then_some((idx, score))
        })
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal).then_with(|| a.0.cmp(&b.0))
    });
    scored.into_iter().map(|(idx, _)| idx).collect()
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
