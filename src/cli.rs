use std::{
    collections::BTreeMap,
    env,
    io,
    net::{SocketAddr, ToSocketAddrs},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use crate::logscope_api::{HttpSearchApi, SearchApi};
use crate::logscope_app::{
    App, AppConfig, Phase, DEFAULT_MAX_BUCKETS, DEFAULT_PER_PAGE, DEFAULT_REFRESH_MS,
    DEFAULT_STREAM_BUFFER, DEFAULT_TIMESTAMP_FIELD,
};
use crate::logscope_driver::{settle, Driver};
use crate::logscope_render::text;
use crate::logscope_state::{decode_or_default, HashState};
use crate::logscope_tui::{Action, Tui, TuiError};
use crate::logscope_web;
use chrono::Utc;
use clap::Parser;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use serde::Deserialize;
use tokio::runtime::Handle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const CONFIG_FILE: &str = "logscope.json";
const DEFAULT_API_URL: &str = "http://127.0.0.1:5601";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 7878;
const DEFAULT_TUI_ENABLED: bool = true;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;
const TUI_TICK_MS: u64 = 50;

pub type DynError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser, Debug)]
#[command(
    name = "logscope",
    version,
    about = "Browse a log-search API from the terminal or a browser"
)]
struct Cli {
    #[arg(long)]
    api_url: Option<String>,
    #[arg(long)]
    config: Option<PathBuf>,
    /// State token, or a URL whose fragment carries one.
    #[arg(long)]
    state: Option<String>,
    #[arg(long)]
    per_page: Option<usize>,
    #[arg(long, action = clap::ArgAction::SetTrue)]
    tui: bool,
    #[arg(long, action = clap::ArgAction::SetTrue)]
    no_tui: bool,
    /// Print an HTML page instead of text in headless mode.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    html: bool,
    #[arg(long, action = clap::ArgAction::SetTrue)]
    serve: bool,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Debug, Clone)]
struct Config {
    api_url: String,
    api_token: Option<String>,
    per_page: usize,
    max_buckets: usize,
    refresh_ms: u64,
    request_timeout_ms: u64,
    stream_buffer: usize,
    default_fields: Vec<String>,
    timestamp_field: String,
    host: String,
    port: u16,
    allow_remote: bool,
    tui_enabled: bool,
}

#[derive(Debug, Default, Clone)]
struct PartialConfig {
    api_url: Option<String>,
    api_token: Option<String>,
    per_page: Option<usize>,
    max_buckets: Option<usize>,
    refresh_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
    stream_buffer: Option<usize>,
    default_fields: Option<Vec<String>>,
    timestamp_field: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    allow_remote: Option<bool>,
    tui_enabled: Option<bool>,
}

impl PartialConfig {
    fn merge(&mut self, other: PartialConfig) {
        if other.api_url.is_some() {
            self.api_url = other.api_url;
        }
        if other.api_token.is_some() {
            self.api_token = other.api_token;
        }
        if other.per_page.is_some() {
            self.per_page = other.per_page;
        }
        if other.max_buckets.is_some() {
            self.max_buckets = other.max_buckets;
        }
        if other.refresh_ms.is_some() {
            self.refresh_ms = other.refresh_ms;
        }
        if other.request_timeout_ms.is_some() {
            self.request_timeout_ms = other.request_timeout_ms;
        }
        if other.stream_buffer.is_some() {
            self.stream_buffer = other.stream_buffer;
        }
        if other.default_fields.is_some() {
            self.default_fields = other.default_fields;
        }
        if other.timestamp_field.is_some() {
            self.timestamp_field = other.timestamp_field;
        }
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.allow_remote.is_some() {
            self.allow_remote = other.allow_remote;
        }
        if other.tui_enabled.is_some() {
            self.tui_enabled = other.tui_enabled;
        }
    }
}

impl Config {
    fn from_partial(partial: PartialConfig) -> Self {
        let default_fields = partial
            .default_fields
            .filter(|fields| !fields.is_empty())
            .unwrap_or_else(|| AppConfig::default().default_fields);
        Self {
            api_url: partial.api_url.unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            api_token: partial.api_token,
            per_page: partial.per_page.filter(|value| *value > 0).unwrap_or(DEFAULT_PER_PAGE),
            max_buckets: partial
                .max_buckets
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_MAX_BUCKETS),
            refresh_ms: partial.refresh_ms.filter(|value| *value > 0).unwrap_or(DEFAULT_REFRESH_MS),
            request_timeout_ms: partial.request_timeout_ms.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
            stream_buffer: partial
                .stream_buffer
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_STREAM_BUFFER),
            default_fields,
            timestamp_field: partial
                .timestamp_field
                .unwrap_or_else(|| DEFAULT_TIMESTAMP_FIELD.to_string()),
            host: partial.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: partial.port.unwrap_or(DEFAULT_PORT),
            allow_remote: partial.allow_remote.unwrap_or(false),
            tui_enabled: partial.tui_enabled.unwrap_or(DEFAULT_TUI_ENABLED),
        }
    }

    fn app_config(&self) -> AppConfig {
        AppConfig {
            per_page: self.per_page,
            max_buckets: self.max_buckets,
            refresh: Duration::from_millis(self.refresh_ms),
            stream_buffer: self.stream_buffer,
            default_fields: self.default_fields.clone(),
            timestamp_field: self.timestamp_field.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct FileConfig {
    #[serde(alias = "apiUrl")]
    api_url: Option<String>,
    #[serde(alias = "apiToken")]
    api_token: Option<String>,
    #[serde(alias = "perPage")]
    per_page: Option<usize>,
    #[serde(alias = "maxBuckets")]
    max_buckets: Option<usize>,
    #[serde(alias = "refreshMs")]
    refresh_ms: Option<u64>,
    #[serde(alias = "requestTimeoutMs")]
    request_timeout_ms: Option<u64>,
    #[serde(alias = "streamBuffer")]
    stream_buffer: Option<usize>,
    #[serde(alias = "defaultFields")]
    default_fields: Option<Vec<String>>,
    #[serde(alias = "timestampField")]
    timestamp_field: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    #[serde(alias = "allowRemote")]
    allow_remote: Option<bool>,
    tui: Option<bool>,
    #[serde(alias = "noTui", alias = "no-tui")]
    no_tui: Option<bool>,
}

impl FileConfig {
    fn into_partial(self) -> PartialConfig {
        let tui_enabled = match (self.tui, self.no_tui) {
            (_, Some(no_tui)) => Some(!no_tui),
            (Some(tui), None) => Some(tui),
            (None, None) => None,
        };

        PartialConfig {
            api_url: self.api_url,
            api_token: self.api_token.filter(|token| !token.trim().is_empty()),
            per_page: self.per_page,
            max_buckets: self.max_buckets,
            refresh_ms: self.refresh_ms,
            request_timeout_ms: self.request_timeout_ms,
            stream_buffer: self.stream_buffer,
            default_fields: self.default_fields,
            timestamp_field: self.timestamp_field,
            host: self.host,
            port: self.port,
            allow_remote: self.allow_remote,
            tui_enabled,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    ParseFile { path: PathBuf, source: serde_json::Error },
    #[error("config file not found: {path}")]
    MissingConfig { path: PathBuf },
    #[error("invalid value for {name}: {value}")]
    InvalidEnv { name: String, value: String },
}

fn cli_overrides(cli: &Cli) -> PartialConfig {
    let tui_enabled = if cli.no_tui {
        Some(false)
    } else if cli.tui {
        Some(true)
    } else {
        None
    };
    PartialConfig {
        api_url: cli.api_url.clone(),
        per_page: cli.per_page,
        host: cli.host.clone(),
        port: cli.port,
        tui_enabled,
        ..PartialConfig::default()
    }
}

fn env_overrides(env: &BTreeMap<String, String>) -> Result<PartialConfig, ConfigError> {
    let mut partial = PartialConfig::default();
    if let Some(value) = env.get("LOGSCOPE_API_URL") {
        partial.api_url = Some(value.clone());
    }
    if let Some(value) = env.get("LOGSCOPE_API_TOKEN") {
        if !value.trim().is_empty() {
            partial.api_token = Some(value.clone());
        }
    }
    if let Some(value) = env.get("LOGSCOPE_PER_PAGE") {
        partial.per_page = Some(parse_usize("LOGSCOPE_PER_PAGE", value)?);
    }
    if let Some(value) = env.get("LOGSCOPE_MAX_BUCKETS") {
        partial.max_buckets = Some(parse_usize("LOGSCOPE_MAX_BUCKETS", value)?);
    }
    if let Some(value) = env.get("LOGSCOPE_REFRESH_MS") {
        partial.refresh_ms = Some(parse_u64("LOGSCOPE_REFRESH_MS", value)?);
    }
    if let Some(value) = env.get("LOGSCOPE_REQUEST_TIMEOUT_MS") {
        partial.request_timeout_ms = Some(parse_u64("LOGSCOPE_REQUEST_TIMEOUT_MS", value)?);
    }
    if let Some(value) = env.get("LOGSCOPE_STREAM_BUFFER") {
        partial.stream_buffer = Some(parse_usize("LOGSCOPE_STREAM_BUFFER", value)?);
    }
    if let Some(value) = env.get("LOGSCOPE_DEFAULT_FIELDS") {
        partial.default_fields = Some(parse_list(value));
    }
    if let Some(value) = env.get("LOGSCOPE_TIMESTAMP_FIELD") {
        partial.timestamp_field = Some(value.trim().to_string());
    }
    if let Some(host) = env.get("LOGSCOPE_HOST") {
        partial.host = Some(host.clone());
    }
    if let Some(port) = env.get("LOGSCOPE_PORT") {
        partial.port = Some(parse_u16("LOGSCOPE_PORT", port)?);
    }
    if let Some(value) = env.get("LOGSCOPE_ALLOW_REMOTE") {
        partial.allow_remote = Some(parse_bool("LOGSCOPE_ALLOW_REMOTE", value)?);
    }
    if let Some(no_tui) = env.get("LOGSCOPE_NO_TUI") {
        let disabled = parse_bool("LOGSCOPE_NO_TUI", no_tui)?;
        partial.tui_enabled = Some(!disabled);
    }
    if partial.tui_enabled.is_none() {
        if let Some(tui) = env.get("LOGSCOPE_TUI") {
            partial.tui_enabled = Some(parse_bool("LOGSCOPE_TUI", tui)?);
        }
    }
    Ok(partial)
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_u16(name: &str, value: &str) -> Result<u16, ConfigError> {
    value
        .parse::<u16>()
        .map_err(|_| ConfigError::InvalidEnv { name: name.to_string(), value: value.to_string() })
}

fn parse_usize(name: &str, value: &str) -> Result<usize, ConfigError> {
    value
        .parse::<usize>()
        .map_err(|_| ConfigError::InvalidEnv { name: name.to_string(), value: value.to_string() })
}

fn parse_u64(name: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidEnv { name: name.to_string(), value: value.to_string() })
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv { name: name.to_string(), value: value.to_string() }),
    }
}

fn load_config_file(path: &Path) -> Result<PartialConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
    let parsed: FileConfig = serde_json::from_str(&contents)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })?;
    Ok(parsed.into_partial())
}

fn find_config_path(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        let candidate = current.join(CONFIG_FILE);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !current.pop() {
            break;
        }
    }
    None
}

fn resolve_config(
    cli: &Cli,
    cwd: &Path,
    env: &BTreeMap<String, String>,
) -> Result<(Config, Option<PathBuf>), ConfigError> {
    let mut partial = PartialConfig::default();

    let config_path = if let Some(path) = &cli.config {
        if !path.is_file() {
            return Err(ConfigError::MissingConfig { path: path.clone() });
        }
        Some(path.clone())
    } else {
        find_config_path(cwd)
    };

    if let Some(path) = config_path.as_ref() {
        partial.merge(load_config_file(path)?);
    }
    partial.merge(env_overrides(env)?);
    partial.merge(cli_overrides(cli));

    Ok((Config::from_partial(partial), config_path))
}

/// Accepts a bare token, `#token`, or a full URL carrying the token in its fragment.
fn initial_state(value: Option<&str>) -> HashState {
    let Some(value) = value.map(str::trim).filter(|value| !value.is_empty()) else {
        return HashState::default();
    };
    let token = value.rsplit_once('#').map_or(value, |(_, token)| token);
    decode_or_default(token)
}

fn resolve_bind_addr(host: &str, port: u16) -> Result<SocketAddr, std::io::Error> {
    let mut addrs = (host, port).to_socket_addrs()?;
    addrs.next().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "no bind addresses resolved")
    })
}

/// Plain-text rendering of whatever the app currently shows.
pub fn render_text(app: &App) -> String {
    let state = app.state();
    let mut out = format!("{} · {} · {}\n", state.mode, state.timeframe.label(), app.location());
    if let Some(histogram) = app.histogram() {
        out.push_str(&text::sparkline(histogram));
        out.push('\n');
    }
    if let Some(error) = app.graph_error() {
        out.push_str(&format!("graph failed: {error}\n"));
    }
    match app.phase() {
        Phase::Failed(message) => out.push_str(&format!("request failed: {message}")),
        Phase::NoMatches => out.push_str("no events matched"),
        Phase::Idle | Phase::Fetching => out.push_str("waiting for results"),
        Phase::Rendered => {
            if let Some(view) = app.analysis() {
                out.push_str(&text::analysis(view));
            } else if let Some(view) = app.document() {
                out.push_str(&text::detail(&view));
            } else {
                out.push_str(&text::table(app.table()));
                out.push_str(&format!("\n{} of {}", app.table().rows.len(), app.total()));
            }
        }
    }
    out
}

async fn run_headless(
    api: &dyn SearchApi,
    config: AppConfig,
    state: HashState,
    html: bool,
) -> String {
    let now = Utc::now();
    let mut app = App::new(config, state);
    let effects = app.start(now);
    settle(&mut app, api, effects, now).await;
    if html {
        logscope_web::render_page(&app, None)
    } else {
        render_text(&app)
    }
}

async fn run_tui(api: Arc<dyn SearchApi>, app: App) -> Result<String, DynError> {
    let runtime = Handle::current();
    let location = tokio::task::spawn_blocking(move || run_tui_loop(api, app, runtime)).await??;
    Ok(location)
}

fn run_tui_loop(api: Arc<dyn SearchApi>, app: App, runtime: Handle) -> Result<String, TuiError> {
    let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
    let mut driver = Driver::new(api, runtime, events_tx);

    let _guard = TerminalGuard::enter()?;
    let backend = CrosstermBackend::new(io::stdout());
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let mut tui = Tui::new(app);
    driver.execute(tui.app.start(Utc::now()));

    loop {
        while let Ok(event) = events_rx.try_recv() {
            let effects = tui.on_driver_event(event, Utc::now());
            driver.execute(effects);
        }

        terminal.draw(|frame| {
            tui.render(frame);
        })?;

        if event::poll(Duration::from_millis(TUI_TICK_MS))? {
            let action = match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => tui.handle_key(key),
                Event::Mouse(mouse) => tui.handle_mouse(mouse),
                _ => Action::None,
            };
            match action {
                Action::Quit => break,
                Action::Dispatch(effects) => driver.execute(effects),
                Action::None => {}
            }
        }
    }

    driver.shutdown();
    terminal.show_cursor()?;
    Ok(tui.app.location())
}

struct TerminalGuard;

impl TerminalGuard {
    fn enter() -> Result<Self, io::Error> {
        enable_raw_mode()?;
        execute!(io::stdout(), EnterAlternateScreen, EnableMouseCapture)?;
        Ok(Self)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), DisableMouseCapture, LeaveAlternateScreen);
    }
}

pub async fn run() -> Result<(), DynError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let cwd = env::current_dir()?;
    let env_map: BTreeMap<String, String> = env::vars().collect();
    let (config, config_path) = resolve_config(&cli, &cwd, &env_map)?;

    if let Some(path) = &config_path {
        info!(path = %path.display(), "loaded config file");
    } else {
        info!("no {CONFIG_FILE} found, using defaults and env/cli overrides");
    }

    info!(
        api_url = %config.api_url,
        auth_enabled = config.api_token.is_some(),
        per_page = config.per_page,
        max_buckets = config.max_buckets,
        refresh_ms = config.refresh_ms,
        request_timeout_ms = config.request_timeout_ms,
        stream_buffer = config.stream_buffer,
        default_fields = ?config.default_fields,
        timestamp_field = %config.timestamp_field,
        host = %config.host,
        port = config.port,
        allow_remote = config.allow_remote,
        tui_enabled = config.tui_enabled,
        "resolved config"
    );

    let api: Arc<dyn SearchApi> = Arc::new(HttpSearchApi::new(
        &config.api_url,
        config.api_token.as_deref(),
        Duration::from_millis(config.request_timeout_ms),
    )?);
    let state = initial_state(cli.state.as_deref());

    if cli.serve {
        let addr = resolve_bind_addr(&config.host, config.port)?;
        logscope_web::serve(api, config.app_config(), addr, config.allow_remote).await?;
        return Ok(());
    }

    if !config.tui_enabled || cli.html {
        let output = run_headless(api.as_ref(), config.app_config(), state, cli.html).await;
        println!("{output}");
        return Ok(());
    }

    let location = run_tui(api, App::new(config.app_config(), state)).await?;
    if location.is_empty() {
        warn!("tui exited without a location");
    } else {
        println!("{location}");
    }
    Ok(())
}
