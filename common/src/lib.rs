pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod keypad;
pub mod link;
pub mod machine;
pub mod portal;
pub mod render;
pub mod settings;
pub mod types;

pub use clock::{Clock, MonotonicClock};
pub use config::{DeviceConfig, LinkConfig, NetworkConfig, PortalConfig, RuntimeConfig};
pub use device::{Device, TickOutcome};
pub use error::{DisplayError, LinkError, SettingsError};
pub use keypad::{scan_matrix, KeypadMatrix, KeypadScanner, MatrixLines, KEYMAP};
pub use link::{LinkAdapter, LinkEvent, NetworkLink};
pub use machine::{ArmingTimer, DeviceMachine};
pub use portal::{ConfigService, PortalResponse, SaveForm};
pub use render::{render, AuxLines, DisplaySurface, FontSize, Frame, TextLine};
pub use settings::{EndpointSettings, MemoryStore, SettingsStore};
pub use types::{ConnectionState, DeviceStatus, LinkStatus, StatusSnapshot};
