use crate::{
    clock::Clock,
    config::LinkConfig,
    error::LinkError,
    types::{ConnectionState, LinkStatus},
};

/// Station-mode network radio.
pub trait NetworkLink {
    fn begin_station(&mut self) -> Result<(), LinkError>;
    fn connect(&mut self, ssid: &str, password: &str) -> Result<(), LinkError>;
    fn status(&mut self) -> LinkStatus;
    fn local_address(&mut self) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Started,
    Attempt(u8),
    Connected(String),
    Failed,
    Lost,
}

/// Bounded connect/retry state machine over a [`NetworkLink`].
///
/// `poll` advances at most one retry step per call, so it can run inside the
/// tick loop without blocking it. `connect` drives the same steps to
/// completion for callers that can afford to block.
#[derive(Debug, Clone)]
pub struct LinkAdapter {
    config: LinkConfig,
    ssid: String,
    password: String,
    state: ConnectionState,
    next_attempt_ms: u64,
    failed_at_ms: u64,
}

impl LinkAdapter {
    pub fn new(mut config: LinkConfig, ssid: impl Into<String>, password: impl Into<String>) -> Self {
        config.sanitize();
        Self {
            config,
            ssid: ssid.into(),
            password: password.into(),
            state: ConnectionState::Disconnected,
            next_attempt_ms: 0,
            failed_at_ms: 0,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    pub fn max_attempts(&self) -> u8 {
        self.config.max_connection_attempts
    }

    pub fn start<L: NetworkLink>(&mut self, link: &mut L, now_ms: u64) -> Result<LinkEvent, LinkError> {
        let begun = link
            .begin_station()
            .and_then(|()| link.connect(&self.ssid, &self.password));

        if let Err(err) = begun {
            self.mark_failed(now_ms);
            return Err(err);
        }

        self.state = ConnectionState::Connecting { attempt: 0 };
        self.next_attempt_ms = now_ms.saturating_add(self.config.retry_delay_ms);
        Ok(LinkEvent::Started)
    }

    pub fn poll<L: NetworkLink>(&mut self, link: &mut L, now_ms: u64) -> Option<LinkEvent> {
        match self.state {
            ConnectionState::Connecting { attempt } => {
                if link.status() == LinkStatus::Connected {
                    return Some(self.mark_connected(link));
                }
                // The last attempt has been shown; it is checked once more, then given up.
                if attempt >= self.config.max_connection_attempts {
                    self.mark_failed(now_ms);
                    return Some(LinkEvent::Failed);
                }
                if now_ms < self.next_attempt_ms {
                    return None;
                }

                let attempt = attempt.saturating_add(1);
                self.state = ConnectionState::Connecting { attempt };
                self.next_attempt_ms = if attempt >= self.config.max_connection_attempts {
                    now_ms
                } else {
                    now_ms.saturating_add(self.config.retry_delay_ms)
                };
                Some(LinkEvent::Attempt(attempt))
            }
            ConnectionState::Connected { .. } => {
                if link.status() == LinkStatus::Connected {
                    return None;
                }
                self.state = ConnectionState::Disconnected;
                Some(LinkEvent::Lost)
            }
            // The radio may have come back on its own.
            ConnectionState::Disconnected | ConnectionState::Failed => {
                if link.status() == LinkStatus::Connected {
                    return Some(self.mark_connected(link));
                }
                None
            }
        }
    }

    /// True when the adapter is idle and the radio reports no connection.
    /// A `Failed` adapter waits out `failure_hold_ms` first.
    pub fn needs_reconnect<L: NetworkLink>(&self, link: &mut L, now_ms: u64) -> bool {
        let idle = match self.state {
            ConnectionState::Disconnected => true,
            ConnectionState::Failed => {
                now_ms.saturating_sub(self.failed_at_ms) >= self.config.failure_hold_ms
            }
            _ => false,
        };
        idle && link.status() == LinkStatus::Disconnected
    }

    /// Blocking connect: starts the sequence and sleeps between polls until
    /// the adapter reaches `Connected` or `Failed`.
    pub fn connect<L, C, F>(
        &mut self,
        link: &mut L,
        clock: &mut C,
        mut on_event: F,
    ) -> Result<&ConnectionState, LinkError>
    where
        L: NetworkLink,
        C: Clock,
        F: FnMut(&LinkEvent, &ConnectionState),
    {
        let started = self.start(link, clock.now_ms())?;
        on_event(&started, &self.state);

        while self.state.is_connecting() {
            let wait_ms = self.next_attempt_ms.saturating_sub(clock.now_ms());
            if wait_ms > 0 {
                clock.sleep_ms(wait_ms);
            }
            if let Some(event) = self.poll(link, clock.now_ms()) {
                on_event(&event, &self.state);
            }
        }

        Ok(&self.state)
    }

    fn mark_failed(&mut self, now_ms: u64) {
        self.state = ConnectionState::Failed;
        self.failed_at_ms = now_ms;
    }

    fn mark_connected<L: NetworkLink>(&mut self, link: &mut L) -> LinkEvent {
        let ip = link
            .local_address()
            .unwrap_or_else(|| "0.0.0.0".to_string());
        self.state = ConnectionState::Connected { ip: ip.clone() };
        LinkEvent::Connected(ip)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Default)]
    struct FakeLink {
        connect_after_polls: Option<u32>,
        status_polls: u32,
        connect_calls: u32,
        drop_link: bool,
        refuse: bool,
    }

    impl NetworkLink for FakeLink {
        fn begin_station(&mut self) -> Result<(), LinkError> {
            Ok(())
        }

        fn connect(&mut self, _ssid: &str, _password: &str) -> Result<(), LinkError> {
            if self.refuse {
                return Err(LinkError::Config("ssid too long".to_string()));
            }
            self.connect_calls += 1;
            self.status_polls = 0;
            self.drop_link = false;
            Ok(())
        }

        fn status(&mut self) -> LinkStatus {
            self.status_polls += 1;
            match self.connect_after_polls {
                Some(polls) if !self.drop_link && self.status_polls > polls => {
                    LinkStatus::Connected
                }
                _ => LinkStatus::Disconnected,
            }
        }

        fn local_address(&mut self) -> Option<String> {
            Some("10.0.0.7".to_string())
        }
    }

    struct ManualClock {
        now_ms: u64,
        sleeps: Vec<u64>,
    }

    impl Clock for ManualClock {
        fn now_ms(&self) -> u64 {
            self.now_ms
        }

        fn sleep_ms(&mut self, ms: u64) {
            self.sleeps.push(ms);
            self.now_ms += ms;
        }
    }

    fn adapter() -> LinkAdapter {
        LinkAdapter::new(LinkConfig::default(), "lab", "secret")
    }

    #[test]
    fn blocking_connect_gives_up_after_max_attempts() {
        let mut link = FakeLink::default();
        let mut clock = ManualClock {
            now_ms: 0,
            sleeps: Vec::new(),
        };
        let mut events = Vec::new();

        let state = adapter()
            .connect(&mut link, &mut clock, |event, _| events.push(event.clone()))
            .unwrap()
            .clone();

        assert_eq!(state, ConnectionState::Failed);
        assert_eq!(clock.sleeps, vec![500; 20]);
        assert_eq!(clock.now_ms, 10_000);
        assert_eq!(events.first(), Some(&LinkEvent::Started));
        assert_eq!(events.get(1), Some(&LinkEvent::Attempt(1)));
        assert_eq!(events.get(20), Some(&LinkEvent::Attempt(20)));
        assert_eq!(events.last(), Some(&LinkEvent::Failed));
        assert_eq!(events.len(), 22);
    }

    #[test]
    fn blocking_connect_reports_ip() {
        let mut link = FakeLink {
            connect_after_polls: Some(3),
            ..FakeLink::default()
        };
        let mut clock = ManualClock {
            now_ms: 0,
            sleeps: Vec::new(),
        };
        let mut events = Vec::new();

        let mut adapter = adapter();
        let state = adapter
            .connect(&mut link, &mut clock, |event, _| events.push(event.clone()))
            .unwrap();

        assert_eq!(
            state,
            &ConnectionState::Connected {
                ip: "10.0.0.7".to_string()
            }
        );
        assert_eq!(
            events,
            vec![
                LinkEvent::Started,
                LinkEvent::Attempt(1),
                LinkEvent::Attempt(2),
                LinkEvent::Attempt(3),
                LinkEvent::Connected("10.0.0.7".to_string()),
            ]
        );
    }

    #[test]
    fn poll_waits_for_retry_delay() {
        let mut link = FakeLink::default();
        let mut adapter = adapter();

        assert_eq!(adapter.start(&mut link, 1_000).unwrap(), LinkEvent::Started);
        assert_eq!(adapter.poll(&mut link, 1_200), None);
        assert_eq!(adapter.poll(&mut link, 1_500), Some(LinkEvent::Attempt(1)));
        assert_eq!(adapter.poll(&mut link, 1_700), None);
        assert_eq!(adapter.state(), &ConnectionState::Connecting { attempt: 1 });
    }

    #[test]
    fn lost_link_is_reported_and_reconnect_requested() {
        let mut link = FakeLink {
            connect_after_polls: Some(0),
            ..FakeLink::default()
        };
        let mut adapter = adapter();

        adapter.start(&mut link, 0).unwrap();
        assert_eq!(
            adapter.poll(&mut link, 10),
            Some(LinkEvent::Connected("10.0.0.7".to_string()))
        );
        assert!(!adapter.needs_reconnect(&mut link, 10));

        link.drop_link = true;
        assert_eq!(adapter.poll(&mut link, 20), Some(LinkEvent::Lost));
        assert_eq!(adapter.state(), &ConnectionState::Disconnected);
        assert!(adapter.needs_reconnect(&mut link, 20));

        adapter.start(&mut link, 30).unwrap();
        assert_eq!(link.connect_calls, 2);
    }

    #[test]
    fn refused_configuration_marks_failed() {
        let mut link = FakeLink {
            refuse: true,
            ..FakeLink::default()
        };
        let mut adapter = adapter();

        assert!(adapter.start(&mut link, 0).is_err());
        assert_eq!(adapter.state(), &ConnectionState::Failed);
        assert_eq!(adapter.poll(&mut link, 10_000), None);
        assert!(adapter.needs_reconnect(&mut link, 10_000));
    }

    #[test]
    fn last_attempt_is_reported_before_failing() {
        let mut link = FakeLink::default();
        let mut adapter = LinkAdapter::new(
            LinkConfig {
                max_connection_attempts: 2,
                ..LinkConfig::default()
            },
            "lab",
            "secret",
        );

        adapter.start(&mut link, 0).unwrap();
        assert_eq!(adapter.poll(&mut link, 500), Some(LinkEvent::Attempt(1)));
        assert_eq!(adapter.poll(&mut link, 1_000), Some(LinkEvent::Attempt(2)));
        assert_eq!(adapter.state(), &ConnectionState::Connecting { attempt: 2 });
        assert_eq!(adapter.poll(&mut link, 1_050), Some(LinkEvent::Failed));
    }

    #[test]
    fn failure_is_held_before_reconnecting() {
        let mut link = FakeLink::default();
        let mut adapter = adapter();

        adapter.start(&mut link, 0).unwrap();
        let mut now = 0;
        while adapter.state().is_connecting() {
            now += 50;
            adapter.poll(&mut link, now);
        }
        assert_eq!(adapter.state(), &ConnectionState::Failed);

        assert!(!adapter.needs_reconnect(&mut link, now));
        assert!(!adapter.needs_reconnect(&mut link, now + 999));
        assert!(adapter.needs_reconnect(&mut link, now + 1_000));
    }
}
