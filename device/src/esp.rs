use core::convert::TryInto;
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
    time::Duration,
};

use anyhow::{anyhow, Context};
use embedded_svc::{
    http::Method,
    io::{Read, Write},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    gpio::{IOPin, OutputPin},
    i2c::{I2cConfig, I2cDriver},
    units::Hertz,
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::prelude::Peripherals,
    http::server::{Configuration as HttpConfiguration, EspHttpConnection, EspHttpServer, Request},
    log::EspLogger,
    nvs::{EspDefaultNvsPartition, EspNvs},
    wifi::EspWifi,
};
use log::{debug, error, info, warn};

use flame_common::{
    config::PREFS_NAMESPACE, portal::CONTENT_TYPE_HTML, Clock, ConfigService, Device,
    EndpointSettings, LinkError, LinkEvent, LinkStatus, MonotonicClock, NetworkLink,
    PortalResponse, RuntimeConfig, SettingsError, SettingsStore, StatusSnapshot, TickOutcome,
};

use crate::{matrix::GpioMatrix, oled::OledDisplay};

const MAX_HTTP_BODY: usize = 1024;
const NVS_VALUE_CAPACITY: usize = 512;
const DISPLAY_I2C_BAUDRATE: u32 = 400_000;

type Portal = ConfigService<NvsStore>;

/// NVS-backed preferences, one namespace per store.
struct NvsStore {
    partition: EspDefaultNvsPartition,
    namespace: &'static str,
}

/// Station-mode WiFi driven through the non-blocking `EspWifi` calls.
struct EspLink {
    wifi: EspWifi<'static>,
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    info!("digital flame booting");

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    let mut runtime = RuntimeConfig::default();
    ensure_wifi_defaults(&mut runtime);
    runtime.sanitize();

    let mut settings = EndpointSettings::new(NvsStore {
        partition: nvs_partition.clone(),
        namespace: PREFS_NAMESPACE,
    });
    let endpoint = settings.endpoint().unwrap_or_else(|err| {
        warn!("failed to read endpoint from NVS: {err}");
        String::new()
    });
    info!(
        "endpoint setting loaded from `{}`: `{endpoint}`",
        settings.namespace()
    );
    let portal = Arc::new(Mutex::new(ConfigService::new(
        settings,
        runtime.portal.restart_delay_ms,
    )));

    let Peripherals {
        modem, pins, i2c0, ..
    } = Peripherals::take()?;

    let i2c = I2cDriver::new(
        i2c0,
        pins.gpio21,
        pins.gpio22,
        &I2cConfig::new().baudrate(Hertz(DISPLAY_I2C_BAUDRATE)),
    )
    .context("failed to open display i2c bus")?;
    let display = match OledDisplay::new(i2c) {
        Ok(display) => display,
        Err(err) => {
            error!("{err}; halting");
            loop {
                thread::sleep(Duration::from_secs(1));
            }
        }
    };

    let matrix = GpioMatrix::new(
        [
            pins.gpio13.downgrade_output(),
            pins.gpio12.downgrade_output(),
            pins.gpio14.downgrade_output(),
            pins.gpio27.downgrade_output(),
        ],
        [
            pins.gpio26.downgrade(),
            pins.gpio25.downgrade(),
            pins.gpio33.downgrade(),
            pins.gpio32.downgrade(),
        ],
    )
    .context("failed to initialize keypad matrix")?;

    let wifi = EspWifi::new(modem, sys_loop, Some(nvs_partition))?;
    let mut device = Device::new(&runtime, EspLink { wifi }, matrix, display);
    let mut clock = MonotonicClock::new();

    if let Err(err) = device.redraw(clock.now_ms()) {
        warn!("failed to draw boot frame: {err}");
    }

    info!("connecting to `{}`", runtime.network.wifi_ssid);
    let connected = device.connect_blocking(&mut clock, |event, display_err| {
        log_link_event(event);
        if let Some(err) = display_err {
            warn!("display update failed: {err}");
        }
    });
    if let Err(err) = connected {
        warn!("wifi start failed: {err}");
    }

    let snapshot = Arc::new(Mutex::new(StatusSnapshot::default()));
    let _server = create_http_server(&runtime, portal, snapshot.clone())?;

    loop {
        let now_ms = clock.now_ms();
        let outcome = device.tick(now_ms);
        log_tick_outcome(&outcome);

        *lock(&snapshot) = device.snapshot(now_ms, &endpoint);

        thread::sleep(Duration::from_millis(runtime.device.tick_interval_ms));
    }
}

fn create_http_server(
    runtime: &RuntimeConfig,
    portal: Arc<Mutex<Portal>>,
    snapshot: Arc<Mutex<StatusSnapshot>>,
) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        http_port: runtime.portal.http_port,
        stack_size: 16 * 1024,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;

    {
        let portal = portal.clone();
        server.fn_handler::<anyhow::Error, _>("/", Method::Get, move |req| {
            let response = lock(&portal).index();
            write_portal_response(req, &response)
        })?;
    }

    {
        let portal = portal.clone();
        server.fn_handler::<anyhow::Error, _>("/save", Method::Post, move |mut req| {
            let response = match read_request_body(&mut req) {
                Ok(body) => lock(&portal).save_body(&body),
                Err(err) => {
                    warn!("rejecting save request: {err:#}");
                    PortalResponse::bad_request("Request body too large")
                }
            };
            match response.status {
                200 => info!("endpoint setting saved"),
                status => warn!("endpoint save rejected with status {status}"),
            }
            write_portal_response(req, &response)
        })?;
    }

    {
        let portal = portal.clone();
        server.fn_handler::<anyhow::Error, _>("/restart", Method::Post, move |req| {
            let response = lock(&portal).restart();
            if let Some(delay_ms) = response.restart_after_ms {
                info!("restart requested via portal; restarting in {delay_ms} ms");
                thread::Builder::new()
                    .name("restart-request".into())
                    .spawn(move || {
                        thread::sleep(Duration::from_millis(delay_ms));
                        unsafe { esp_idf_svc::sys::esp_restart() };
                    })
                    .context("failed to spawn restart thread")?;
            }
            write_portal_response(req, &response)
        })?;
    }

    server.fn_handler::<anyhow::Error, _>("/api/status", Method::Get, move |req| {
        let mut status = lock(&snapshot).clone();
        match lock(&portal).settings_mut().endpoint() {
            Ok(endpoint) => status.endpoint = endpoint,
            Err(err) => warn!("failed to read endpoint for status: {err}"),
        }
        let body = serde_json::to_vec(&status)?;
        req.into_response(
            200,
            Some("OK"),
            &[("Content-Type", "application/json; charset=utf-8")],
        )?
        .write_all(&body)?;
        Ok(())
    })?;

    info!("config portal listening on port {}", runtime.portal.http_port);
    Ok(server)
}

fn read_request_body(req: &mut Request<&mut EspHttpConnection<'_>>) -> anyhow::Result<Vec<u8>> {
    let len = req.content_len().unwrap_or(0) as usize;
    if len > MAX_HTTP_BODY {
        return Err(anyhow!("request body too large ({len} bytes)"));
    }

    let mut body = vec![0_u8; len];
    if len > 0 {
        req.read_exact(&mut body)
            .map_err(|err| anyhow!("failed to read request body: {err:?}"))?;
    }
    Ok(body)
}

fn write_portal_response(
    req: Request<&mut EspHttpConnection<'_>>,
    response: &PortalResponse,
) -> anyhow::Result<()> {
    req.into_response(response.status, None, &[("Content-Type", CONTENT_TYPE_HTML)])?
        .write_all(response.body.as_bytes())?;
    Ok(())
}

fn ensure_wifi_defaults(runtime: &mut RuntimeConfig) {
    if runtime.network.wifi_ssid.is_empty() {
        runtime.network.wifi_ssid = option_env!("WIFI_SSID").unwrap_or("CHANGE_ME").to_string();
    }

    if runtime.network.wifi_pass.is_empty() {
        runtime.network.wifi_pass = option_env!("WIFI_PASS").unwrap_or("CHANGE_ME").to_string();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
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

impl NvsStore {
    fn open(&self) -> Result<EspNvs<esp_idf_svc::nvs::NvsDefault>, SettingsError> {
        EspNvs::new(self.partition.clone(), self.namespace, true)
            .map_err(|err| SettingsError::Namespace(format!("{}: {err}", self.namespace)))
    }
}

impl SettingsStore for NvsStore {
    fn get_string(&mut self, key: &str) -> Result<Option<String>, SettingsError> {
        let nvs = self.open()?;
        let mut buffer = vec![0_u8; NVS_VALUE_CAPACITY];
        nvs.get_str(key, &mut buffer)
            .map(|value| value.map(str::to_string))
            .map_err(|err| SettingsError::Read {
                key: key.to_string(),
                reason: err.to_string(),
            })
    }

    fn put_string(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
        let mut nvs = self.open()?;
        nvs.set_str(key, value).map_err(|err| SettingsError::Write {
            key: key.to_string(),
            reason: err.to_string(),
        })
    }
}

impl NetworkLink for EspLink {
    fn begin_station(&mut self) -> Result<(), LinkError> {
        let started = self
            .wifi
            .is_started()
            .map_err(|err| LinkError::Driver(err.to_string()))?;
        if started {
            return Ok(());
        }
        self.wifi
            .set_configuration(&Configuration::Client(ClientConfiguration::default()))
            .map_err(|err| LinkError::Driver(err.to_string()))?;
        self.wifi
            .start()
            .map_err(|err| LinkError::Driver(err.to_string()))
    }

    fn connect(&mut self, ssid: &str, password: &str) -> Result<(), LinkError> {
        let auth_method = if password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPAWPA2Personal
        };

        self.wifi
            .set_configuration(&Configuration::Client(ClientConfiguration {
                ssid: ssid
                    .try_into()
                    .map_err(|_| LinkError::Config("wifi ssid too long".to_string()))?,
                password: password
                    .try_into()
                    .map_err(|_| LinkError::Config("wifi password too long".to_string()))?,
                auth_method,
                ..Default::default()
            }))
            .map_err(|err| LinkError::Driver(err.to_string()))?;

        self.wifi
            .connect()
            .map_err(|err| LinkError::Driver(err.to_string()))
    }

    fn status(&mut self) -> LinkStatus {
        match self.wifi.is_up() {
            Ok(true) => LinkStatus::Connected,
            _ => LinkStatus::Disconnected,
        }
    }

    fn local_address(&mut self) -> Option<String> {
        self.wifi
            .sta_netif()
            .get_ip_info()
            .ok()
            .map(|info| info.ip.to_string())
    }
}
