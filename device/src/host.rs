use std::{
    collections::HashMap,
    io::ErrorKind,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    net::TcpListener,
    sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        Mutex, Notify,
    },
};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use flame_common::{
    config::PREFS_NAMESPACE,
    keypad::position_of,
    portal::CONTENT_TYPE_HTML,
    Clock, ConfigService, Device, DeviceConfig, DisplayError, DisplaySurface, EndpointSettings, Frame,
    KeypadMatrix, LinkError, LinkEvent, LinkStatus, MonotonicClock, NetworkLink, PortalResponse,
    RuntimeConfig, SettingsError, SettingsStore, StatusSnapshot, TickOutcome,
};

const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_ATTEMPTS_TO_CONNECT: u32 = 3;

type Portal = ConfigService<FileStore>;

#[derive(Clone)]
struct AppState {
    portal: Arc<Mutex<Portal>>,
    snapshot: Arc<Mutex<StatusSnapshot>>,
    restart: Arc<Notify>,
}

/// Radio stand-in: reports connected after a configurable number of polls.
struct SimulatedLink {
    attempts_to_connect: Option<u32>,
    polls: u32,
    associated: bool,
}

/// Keys typed on stdin. Each key stays down for `hold_scans` scans, long
/// enough to clear the scanner's debounce window, then is released.
struct StdinKeypad {
    keys: UnboundedReceiver<char>,
    hold_scans: u64,
    held: Option<((usize, usize), u64)>,
}

#[derive(Default)]
struct LogDisplay {
    last: Option<Frame>,
}

/// Preferences persisted as one JSON object per namespace.
struct FileStore {
    path: PathBuf,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PrefsFile {
    #[serde(flatten)]
    values: HashMap<String, String>,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut runtime = load_runtime_config().unwrap_or_else(|err| {
        warn!("failed to load runtime config: {err:#}");
        host_default_config()
    });
    apply_env_overrides(&mut runtime);
    runtime.sanitize();

    let data_dir = std::env::var("FLAME_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./.flame"));
    let mut settings = EndpointSettings::new(FileStore::open(&data_dir, PREFS_NAMESPACE));
    let endpoint = settings.endpoint().unwrap_or_else(|err| {
        warn!("failed to read endpoint setting: {err}");
        String::new()
    });
    info!(
        "endpoint setting loaded from `{}`: `{endpoint}`",
        settings.namespace()
    );

    let restart = Arc::new(Notify::new());
    let app_state = AppState {
        portal: Arc::new(Mutex::new(ConfigService::new(
            settings,
            runtime.portal.restart_delay_ms,
        ))),
        snapshot: Arc::new(Mutex::new(StatusSnapshot::default())),
        restart: restart.clone(),
    };

    let (key_tx, key_rx) = mpsc::unbounded_channel();
    spawn_stdin_reader(key_tx);

    let mut clock = MonotonicClock::new();
    let mut device = Device::new(
        &runtime,
        SimulatedLink::from_env(),
        StdinKeypad::new(key_rx, &runtime.device),
        LogDisplay::default(),
    );

    if let Err(err) = device.redraw(clock.now_ms()) {
        warn!("failed to draw boot frame: {err}");
    }

    info!("connecting to `{}`", runtime.network.wifi_ssid);
    let connected = tokio::task::block_in_place(|| {
        device.connect_blocking(&mut clock, |event, display_err| {
            log_link_event(event);
            if let Some(err) = display_err {
                warn!("display update failed: {err}");
            }
        })
    });
    if let Err(err) = connected {
        warn!("wifi start failed: {err}");
    }

    spawn_http_server(app_state.clone(), runtime.portal.http_port).await?;

    let mut interval =
        tokio::time::interval(Duration::from_millis(runtime.device.tick_interval_ms));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now_ms = clock.now_ms();
                let outcome = device.tick(now_ms);
                log_tick_outcome(&outcome);

                let snapshot = device.snapshot(now_ms, &endpoint);
                *app_state.snapshot.lock().await = snapshot;
            }
            _ = restart.notified() => {
                info!("restart requested; leaving control loop");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted; shutting down");
                break;
            }
        }
    }

    Ok(())
}

async fn spawn_http_server(app_state: AppState, port: u16) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/", get(handle_index))
        .route("/save", post(handle_save))
        .route("/restart", post(handle_restart))
        .route("/api/status", get(handle_get_status))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind config server at {addr}"))?;

    info!("config portal listening on http://{addr}");
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            warn!("config server stopped: {err}");
        }
    });
    Ok(())
}

fn spawn_stdin_reader(keys: UnboundedSender<char>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    for key in line.chars().filter(|ch| !ch.is_whitespace()) {
                        if keys.send(key.to_ascii_uppercase()).is_err() {
                            return;
                        }
                    }
                }
                Ok(None) => return,
                Err(err) => {
                    warn!("stdin read error: {err}");
                    return;
                }
            }
        }
    });
}

async fn handle_index(State(state): State<AppState>) -> Response {
    let response = state.portal.lock().await.index();
    portal_response(response)
}

async fn handle_save(State(state): State<AppState>, body: Bytes) -> Response {
    let response = state.portal.lock().await.save_body(&body);
    match response.status {
        200 => info!("endpoint setting saved"),
        status => warn!("endpoint save rejected with status {status}"),
    }
    portal_response(response)
}

async fn handle_restart(State(state): State<AppState>) -> Response {
    let response = state.portal.lock().await.restart();
    if let Some(delay_ms) = response.restart_after_ms {
        info!("restart requested via portal; restarting in {delay_ms} ms");
        let restart = state.restart.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            restart.notify_one();
        });
    }
    portal_response(response)
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let mut snapshot = state.snapshot.lock().await.clone();
    match state.portal.lock().await.settings_mut().endpoint() {
        Ok(endpoint) => snapshot.endpoint = endpoint,
        Err(err) => warn!("failed to read endpoint for status: {err}"),
    }
    Json(snapshot)
}

fn portal_response(response: PortalResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, [(header::CONTENT_TYPE, CONTENT_TYPE_HTML)], response.body).into_response()
}

fn load_runtime_config() -> anyhow::Result<RuntimeConfig> {
    let Ok(path) = std::env::var("FLAME_CONFIG") else {
        return Ok(host_default_config());
    };
    let raw = std::fs::read(&path).with_context(|| format!("failed to read {path}"))?;
    serde_json::from_slice(&raw).with_context(|| format!("invalid runtime config in {path}"))
}

fn host_default_config() -> RuntimeConfig {
    let mut runtime = RuntimeConfig::default();
    runtime.portal.http_port = DEFAULT_HTTP_PORT;
    runtime
}

fn apply_env_overrides(runtime: &mut RuntimeConfig) {
    if let Ok(ssid) = std::env::var("WIFI_SSID") {
        runtime.network.wifi_ssid = ssid;
    }
    if let Ok(pass) = std::env::var("WIFI_PASS") {
        runtime.network.wifi_pass = pass;
    }
    if runtime.network.wifi_ssid.is_empty() {
        runtime.network.wifi_ssid = "simulated".to_string();
    }

    apply_port_override(runtime, std::env::var("FLAME_HTTP_PORT").ok().as_deref());
}

fn apply_port_override(runtime: &mut RuntimeConfig, value: Option<&str>) {
    let Some(value) = value else {
        return;
    };
    match value.parse::<u16>() {
        Ok(port) => runtime.portal.http_port = port,
        Err(err) => warn!("ignoring FLAME_HTTP_PORT `{value}`: {err}"),
    }
}

fn log_link_event(event: &LinkEvent) {
    match event {
        LinkEvent::Started => info!("wifi connect started"),
        LinkEvent::Attempt(attempt) => debug!("wifi connect attempt {attempt}"),
        LinkEvent::Connected(ip) => info!("wifi connected, ip address {ip}"),
        LinkEvent::Failed => warn!("failed to connect to wifi; check credentials and signal"),
        LinkEvent::Lost => warn!("wifi link lost; reconnecting"),
    }
}

fn log_tick_outcome(outcome: &TickOutcome) {
    if let Some(key) = outcome.key {
        debug!("key pressed: {key}");
    }
    if let Some((from, to)) = outcome.transition {
        info!("status {} -> {}", from.as_str(), to.as_str());
    }
    if let Some(event) = &outcome.link_event {
        log_link_event(event);
    }
    if let Some(err) = &outcome.link_error {
        warn!("wifi start failed: {err}");
    }
    if let Some(err) = &outcome.display_error {
        warn!("display update failed: {err}");
    }
}

impl SimulatedLink {
    fn from_env() -> Self {
        let attempts_to_connect = match std::env::var("FLAME_LINK_ATTEMPTS_TO_CONNECT") {
            Ok(value) if value.eq_ignore_ascii_case("never") => None,
            Ok(value) => value.parse::<u32>().ok().or(Some(DEFAULT_ATTEMPTS_TO_CONNECT)),
            Err(_) => Some(DEFAULT_ATTEMPTS_TO_CONNECT),
        };
        Self {
            attempts_to_connect,
            polls: 0,
            associated: false,
        }
    }
}

impl NetworkLink for SimulatedLink {
    fn begin_station(&mut self) -> Result<(), LinkError> {
        Ok(())
    }

    fn connect(&mut self, ssid: &str, _password: &str) -> Result<(), LinkError> {
        if ssid.len() > 32 {
            return Err(LinkError::Config(format!("ssid `{ssid}` too long")));
        }
        self.associated = true;
        self.polls = 0;
        Ok(())
    }

    fn status(&mut self) -> LinkStatus {
        if !self.associated {
            return LinkStatus::Disconnected;
        }
        self.polls = self.polls.saturating_add(1);
        match self.attempts_to_connect {
            Some(attempts) if self.polls > attempts => LinkStatus::Connected,
            _ => LinkStatus::Disconnected,
        }
    }

    fn local_address(&mut self) -> Option<String> {
        Some("127.0.0.1".to_string())
    }
}

impl StdinKeypad {
    fn new(keys: UnboundedReceiver<char>, config: &DeviceConfig) -> Self {
        let hold_scans = config
            .keypad_debounce_ms
            .div_ceil(config.tick_interval_ms.max(1))
            + 1;
        Self {
            keys,
            hold_scans,
            held: None,
        }
    }
}

impl KeypadMatrix for StdinKeypad {
    fn pressed(&mut self) -> Option<(usize, usize)> {
        if let Some((position, remaining)) = self.held.as_mut() {
            if *remaining > 0 {
                *remaining -= 1;
                return Some(*position);
            }
            self.held = None;
            return None;
        }

        let key = self.keys.try_recv().ok()?;
        let Some(position) = position_of(key) else {
            debug!("ignoring `{key}`: not on the keypad");
            return None;
        };
        self.held = Some((position, self.hold_scans - 1));
        Some(position)
    }
}

impl DisplaySurface for LogDisplay {
    fn present(&mut self, frame: &Frame) -> Result<(), DisplayError> {
        if self.last.as_ref() == Some(frame) {
            return Ok(());
        }
        let text = frame
            .lines
            .iter()
            .map(|line| line.text.as_str())
            .collect::<Vec<_>>()
            .join(" | ");
        info!("[display] {text}");
        self.last = Some(frame.clone());
        Ok(())
    }
}

impl FileStore {
    fn open(data_dir: &Path, namespace: &str) -> Self {
        Self {
            path: data_dir.join(format!("{namespace}.json")),
        }
    }

    fn load(&self) -> Result<PrefsFile, SettingsError> {
        match std::fs::read(&self.path) {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|err| SettingsError::Read {
                key: self.path.display().to_string(),
                reason: err.to_string(),
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(PrefsFile::default()),
            Err(err) => Err(SettingsError::Read {
                key: self.path.display().to_string(),
                reason: err.to_string(),
            }),
        }
    }
}

impl SettingsStore for FileStore {
    fn get_string(&mut self, key: &str) -> Result<Option<String>, SettingsError> {
        Ok(self.load()?.values.remove(key))
    }

    fn put_string(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
        let write_err = |reason: String| SettingsError::Write {
            key: key.to_string(),
            reason,
        };

        let mut prefs = self.load()?;
        prefs.values.insert(key.to_string(), value.to_string());

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| write_err(err.to_string()))?;
        }
        let payload =
            serde_json::to_vec_pretty(&prefs).map_err(|err| write_err(err.to_string()))?;
        std::fs::write(&self.path, payload).map_err(|err| write_err(err.to_string()))
    }
}
