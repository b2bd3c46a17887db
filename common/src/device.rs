use crate::{
    clock::Clock,
    config::RuntimeConfig,
    error::{DisplayError, LinkError},
    keypad::{KeypadMatrix, KeypadScanner},
    link::{LinkAdapter, LinkEvent, NetworkLink},
    machine::DeviceMachine,
    render::{render, AuxLines, DisplaySurface, Frame},
    types::{ConnectionState, DeviceStatus, StatusSnapshot},
};

/// Everything that happened during one tick, for the caller to log.
#[derive(Debug, Default)]
pub struct TickOutcome {
    pub key: Option<char>,
    pub transition: Option<(DeviceStatus, DeviceStatus)>,
    pub link_event: Option<LinkEvent>,
    pub link_error: Option<LinkError>,
    pub frame: Option<Frame>,
    pub display_error: Option<DisplayError>,
}

/// The device context owned by the tick loop: state machine, link adapter,
/// the current aux text and the three peripherals.
pub struct Device<R, M, D> {
    machine: DeviceMachine,
    link: LinkAdapter,
    aux: AuxLines,
    keypad: KeypadScanner<M>,
    radio: R,
    display: D,
}

impl<R, M, D> Device<R, M, D>
where
    R: NetworkLink,
    M: KeypadMatrix,
    D: DisplaySurface,
{
    pub fn new(config: &RuntimeConfig, radio: R, matrix: M, display: D) -> Self {
        Self {
            machine: DeviceMachine::new(config.device.clone()),
            link: LinkAdapter::new(
                config.link.clone(),
                config.network.wifi_ssid.as_str(),
                config.network.wifi_pass.as_str(),
            ),
            aux: AuxLines::booting(),
            keypad: KeypadScanner::new(matrix, config.device.keypad_debounce_ms),
            radio,
            display,
        }
    }

    pub fn status(&self) -> DeviceStatus {
        self.machine.status()
    }

    pub fn connection(&self) -> &ConnectionState {
        self.link.state()
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn keypad_mut(&mut self) -> &mut M {
        self.keypad.matrix_mut()
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    /// Draws the current state immediately, regardless of pending requests.
    pub fn redraw(&mut self, now_ms: u64) -> Result<Frame, DisplayError> {
        let frame = render(
            self.machine.status(),
            self.machine.remaining_secs(now_ms),
            &self.aux,
        );
        self.display.present(&frame)?;
        Ok(frame)
    }

    /// Runs the blocking connect sequence, drawing every step as it happens.
    /// Keypad input is not serviced until this returns.
    pub fn connect_blocking<C, F>(
        &mut self,
        clock: &mut C,
        mut observe: F,
    ) -> Result<ConnectionState, LinkError>
    where
        C: Clock,
        F: FnMut(&LinkEvent, Option<DisplayError>),
    {
        let Self {
            machine,
            link,
            aux,
            radio,
            display,
            ..
        } = self;
        let ssid = link.ssid().to_string();
        let max_attempts = link.max_attempts();
        let now_ms = clock.now_ms();

        let result = link.connect(radio, clock, |event, state| {
            *aux = AuxLines::for_connection(state, &ssid, max_attempts);
            let frame = render(machine.status(), machine.remaining_secs(now_ms), aux);
            observe(event, display.present(&frame).err());
        });

        match result {
            Ok(state) => Ok(state.clone()),
            Err(err) => {
                self.aux = AuxLines::for_connection(&ConnectionState::Failed, &ssid, max_attempts);
                self.machine.request_render();
                Err(err)
            }
        }
    }

    pub fn tick(&mut self, now_ms: u64) -> TickOutcome {
        let mut outcome = TickOutcome::default();

        if let Some(key) = self.keypad.scan(now_ms) {
            let before = self.machine.status();
            let after = self.machine.on_key(key, now_ms);
            outcome.key = Some(key);
            if before != after {
                outcome.transition = Some((before, after));
            }
        }

        self.step_link(now_ms, &mut outcome);

        if self.machine.on_tick(now_ms) {
            outcome.transition = Some((DeviceStatus::Armed, DeviceStatus::Exploded));
        }

        if self.machine.take_render_request() {
            match self.redraw(now_ms) {
                Ok(frame) => outcome.frame = Some(frame),
                Err(err) => outcome.display_error = Some(err),
            }
        }

        outcome
    }

    pub fn snapshot(&self, now_ms: u64, endpoint: &str) -> StatusSnapshot {
        let connection = self.link.state();
        StatusSnapshot {
            status: self.machine.status().as_str(),
            remaining_secs: self.machine.remaining_secs(now_ms),
            connection: connection.as_str(),
            ip: connection.ip().map(str::to_string),
            endpoint: endpoint.to_string(),
        }
    }

    fn step_link(&mut self, now_ms: u64, outcome: &mut TickOutcome) {
        let event = if self.link.needs_reconnect(&mut self.radio, now_ms) {
            match self.link.start(&mut self.radio, now_ms) {
                Ok(event) => Some(event),
                Err(err) => {
                    outcome.link_error = Some(err);
                    self.refresh_aux();
                    return;
                }
            }
        } else {
            self.link.poll(&mut self.radio, now_ms)
        };

        if event.is_some() {
            self.refresh_aux();
        }
        outcome.link_event = event;
    }

    fn refresh_aux(&mut self) {
        let aux = AuxLines::for_connection(
            self.link.state(),
            self.link.ssid(),
            self.link.max_attempts(),
        );
        if aux != self.aux {
            self.aux = aux;
            self.machine.request_render();
        }
    }
}
