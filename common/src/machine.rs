use crate::{config::DeviceConfig, types::DeviceStatus};

pub const KEY_ARM: char = 'A';
pub const KEY_DEFUSE: char = 'B';
pub const KEY_EXPLODE: char = 'C';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmingTimer {
    armed_at_ms: u64,
    duration_secs: u64,
}

impl ArmingTimer {
    pub fn new(armed_at_ms: u64, duration_secs: u64) -> Self {
        Self {
            armed_at_ms,
            duration_secs,
        }
    }

    pub fn remaining_secs(&self, now_ms: u64) -> u64 {
        let elapsed_secs = now_ms.saturating_sub(self.armed_at_ms) / 1_000;
        self.duration_secs.saturating_sub(elapsed_secs)
    }
}

// The timer lives inside `Armed` so it cannot outlive the armed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceState {
    Idle,
    Armed(ArmingTimer),
    Defused,
    Exploded,
}

#[derive(Debug, Clone)]
pub struct DeviceMachine {
    config: DeviceConfig,
    state: DeviceState,
    render_requested: bool,
}

impl DeviceMachine {
    pub fn new(mut config: DeviceConfig) -> Self {
        config.sanitize();
        Self {
            config,
            state: DeviceState::Idle,
            // The boot frame has to be drawn once.
            render_requested: true,
        }
    }

    pub fn status(&self) -> DeviceStatus {
        match self.state {
            DeviceState::Idle => DeviceStatus::Idle,
            DeviceState::Armed(_) => DeviceStatus::Armed,
            DeviceState::Defused => DeviceStatus::Defused,
            DeviceState::Exploded => DeviceStatus::Exploded,
        }
    }

    pub fn timer(&self) -> Option<&ArmingTimer> {
        match &self.state {
            DeviceState::Armed(timer) => Some(timer),
            _ => None,
        }
    }

    pub fn remaining_secs(&self, now_ms: u64) -> Option<u64> {
        self.timer().map(|timer| timer.remaining_secs(now_ms))
    }

    /// Applies one keypad event. Returns the status the key left the device in.
    pub fn on_key(&mut self, key: char, now_ms: u64) -> DeviceStatus {
        let next = match key {
            KEY_ARM => {
                DeviceState::Armed(ArmingTimer::new(now_ms, self.config.arming_duration_secs))
            }
            KEY_DEFUSE => DeviceState::Defused,
            KEY_EXPLODE => DeviceState::Exploded,
            _ => DeviceState::Idle,
        };

        // Re-arming keeps the status but restarts the countdown, so it redraws too.
        if next != self.state {
            self.render_requested = true;
        }
        self.state = next;
        self.status()
    }

    /// Evaluates the countdown. Returns true when this tick detonated the device.
    pub fn on_tick(&mut self, now_ms: u64) -> bool {
        let DeviceState::Armed(timer) = self.state else {
            return false;
        };

        self.render_requested = true;
        if timer.remaining_secs(now_ms) == 0 {
            self.state = DeviceState::Exploded;
            return true;
        }
        false
    }

    pub fn request_render(&mut self) {
        self.render_requested = true;
    }

    pub fn take_render_request(&mut self) -> bool {
        std::mem::take(&mut self.render_requested)
    }
}
