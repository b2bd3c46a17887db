use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceStatus {
    Idle,
    Armed,
    Defused,
    Exploded,
}

impl DeviceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Armed => "Armed",
            Self::Defused => "Defused",
            Self::Exploded => "Exploded",
        }
    }
}

/// Raw link status as reported by the radio driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Disconnected,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting { attempt: u8 },
    Connected { ip: String },
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting { .. } => "CONNECTING",
            Self::Connected { .. } => "CONNECTED",
            Self::Failed => "FAILED",
        }
    }

    pub fn ip(&self) -> Option<&str> {
        match self {
            Self::Connected { ip } => Some(ip.as_str()),
            _ => None,
        }
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting { .. })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub status: &'static str,
    #[serde(rename = "remainingSecs")]
    pub remaining_secs: Option<u64>,
    pub connection: &'static str,
    pub ip: Option<String>,
    pub endpoint: String,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            status: DeviceStatus::Idle.as_str(),
            remaining_secs: None,
            connection: ConnectionState::Disconnected.as_str(),
            ip: None,
            endpoint: String::new(),
        }
    }
}
