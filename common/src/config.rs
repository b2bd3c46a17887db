use serde::{Deserialize, Serialize};

pub const PREFS_NAMESPACE: &str = "flame";
pub const ENDPOINT_KEY: &str = "endpoint";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DeviceConfig {
    pub arming_duration_secs: u64,
    pub tick_interval_ms: u64,
    pub keypad_debounce_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            arming_duration_secs: 10,
            tick_interval_ms: 50,
            keypad_debounce_ms: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LinkConfig {
    pub max_connection_attempts: u8,
    pub retry_delay_ms: u64,
    /// How long a failed connect stays on screen before the next attempt.
    pub failure_hold_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            max_connection_attempts: 20,
            retry_delay_ms: 500,
            failure_hold_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PortalConfig {
    pub http_port: u16,
    pub restart_delay_ms: u64,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            http_port: 80,
            restart_delay_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub portal: PortalConfig,
}

impl DeviceConfig {
    pub fn sanitize(&mut self) {
        self.arming_duration_secs = self.arming_duration_secs.clamp(1, 3_600);
        self.tick_interval_ms = self.tick_interval_ms.clamp(10, 1_000);
        self.keypad_debounce_ms = self.keypad_debounce_ms.min(200);
    }
}

impl LinkConfig {
    pub fn sanitize(&mut self) {
        if self.max_connection_attempts == 0 {
            self.max_connection_attempts = 20;
        }
        self.retry_delay_ms = self.retry_delay_ms.clamp(50, 10_000);
        self.failure_hold_ms = self.failure_hold_ms.min(60_000);
    }
}

impl PortalConfig {
    pub fn sanitize(&mut self) {
        if self.http_port == 0 {
            self.http_port = 80;
        }
        self.restart_delay_ms = self.restart_delay_ms.min(10_000);
    }
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.device.sanitize();
        self.link.sanitize();
        self.portal.sanitize();
    }
}
