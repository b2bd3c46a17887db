//! Frame composition for the 128x32 status display.
//!
//! Rendering is a pure function of the device state. The result is a [`Frame`]
//! description that a [`DisplaySurface`] clears, draws and flushes as one unit.

use crate::{
    error::DisplayError,
    types::{ConnectionState, DeviceStatus},
};

pub const SCREEN_WIDTH: u32 = 128;
pub const SCREEN_HEIGHT: u32 = 32;

const STATUS_ORIGIN: (i32, i32) = (0, 0);
const TIMER_ORIGIN: (i32, i32) = (0, 10);
const AUX_ORIGIN: (i32, i32) = (0, 12);
const AUX_LINE_HEIGHT: i32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontSize {
    /// 5x8, for lines too wide for the normal font.
    Small,
    /// 6x10.
    Normal,
    /// 10x20.
    Large,
}

impl FontSize {
    pub fn glyph_width(self) -> u32 {
        match self {
            Self::Small => 5,
            Self::Normal => 6,
            Self::Large => 10,
        }
    }

    pub fn glyph_height(self) -> u32 {
        match self {
            Self::Small => 8,
            Self::Normal => 10,
            Self::Large => 20,
        }
    }

    pub fn fits(self, text: &str) -> bool {
        text.chars().count() as u32 * self.glyph_width() <= SCREEN_WIDTH
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextLine {
    pub x: i32,
    pub y: i32,
    pub size: FontSize,
    pub text: String,
}

/// A full screen. Presenting a frame always starts from a cleared buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub lines: Vec<TextLine>,
}

pub trait DisplaySurface {
    fn present(&mut self, frame: &Frame) -> Result<(), DisplayError>;
}

/// Up to two lines of connection or error text drawn under the status line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuxLines {
    first: String,
    second: String,
}

impl AuxLines {
    pub fn new(first: impl Into<String>, second: impl Into<String>) -> Self {
        Self {
            first: first.into(),
            second: second.into(),
        }
    }

    pub fn booting() -> Self {
        Self::new("Initializing...", "Starting WiFi")
    }

    pub fn connecting_to(ssid: &str) -> Self {
        Self::new("Connecting to", ssid)
    }

    pub fn for_connection(state: &ConnectionState, ssid: &str, max_attempts: u8) -> Self {
        match state {
            ConnectionState::Disconnected => Self::new("WiFi lost", "Reconnecting"),
            ConnectionState::Connecting { attempt: 0 } => Self::connecting_to(ssid),
            ConnectionState::Connecting { attempt } => {
                Self::new("Connecting...", format!("Attempt {attempt}/{max_attempts}"))
            }
            ConnectionState::Connected { ip } => Self::new("WiFi connected", ip.as_str()),
            ConnectionState::Failed => Self::new("WiFi failed", "Check settings"),
        }
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        [self.first.as_str(), self.second.as_str()]
            .into_iter()
            .filter(|line| !line.is_empty())
    }
}

pub fn render(status: DeviceStatus, remaining_secs: Option<u64>, aux: &AuxLines) -> Frame {
    let status_text = format!("Digital Flame: {}", status.as_str());
    let status_size = if FontSize::Normal.fits(&status_text) {
        FontSize::Normal
    } else {
        FontSize::Small
    };
    let mut lines = vec![TextLine {
        x: STATUS_ORIGIN.0,
        y: STATUS_ORIGIN.1,
        size: status_size,
        text: status_text,
    }];

    match (status, remaining_secs) {
        (DeviceStatus::Armed, Some(remaining)) => lines.push(TextLine {
            x: TIMER_ORIGIN.0,
            y: TIMER_ORIGIN.1,
            size: FontSize::Large,
            text: format!("Timer: {remaining}s"),
        }),
        _ => {
            for (row, text) in aux.lines().enumerate() {
                let y = AUX_ORIGIN.1 + row as i32 * AUX_LINE_HEIGHT;
                if y as u32 + FontSize::Normal.glyph_height() > SCREEN_HEIGHT {
                    break;
                }
                lines.push(TextLine {
                    x: AUX_ORIGIN.0,
                    y,
                    size: FontSize::Normal,
                    text: text.to_string(),
                });
            }
        }
    }

    Frame { lines }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn texts(frame: &Frame) -> Vec<&str> {
        frame.lines.iter().map(|line| line.text.as_str()).collect()
    }

    #[test]
    fn armed_frame_shows_large_timer() {
        let frame = render(DeviceStatus::Armed, Some(7), &AuxLines::booting());

        assert_eq!(
            frame.lines,
            vec![
                TextLine {
                    x: 0,
                    y: 0,
                    size: FontSize::Normal,
                    text: "Digital Flame: Armed".to_string(),
                },
                TextLine {
                    x: 0,
                    y: 10,
                    size: FontSize::Large,
                    text: "Timer: 7s".to_string(),
                },
            ]
        );
    }

    #[test]
    fn idle_frame_overlays_aux_lines() {
        let aux = AuxLines::for_connection(
            &ConnectionState::Connected {
                ip: "192.168.1.42".to_string(),
            },
            "lab",
            20,
        );
        let frame = render(DeviceStatus::Idle, None, &aux);

        assert_eq!(
            texts(&frame),
            vec!["Digital Flame: Idle", "WiFi connected", "192.168.1.42"]
        );
        assert_eq!(frame.lines[1].y, 12);
        assert_eq!(frame.lines[2].y, 22);
    }

    #[test]
    fn timer_never_drawn_outside_armed() {
        for status in [
            DeviceStatus::Idle,
            DeviceStatus::Defused,
            DeviceStatus::Exploded,
        ] {
            let frame = render(status, Some(3), &AuxLines::default());
            assert_eq!(frame.lines.len(), 1);
            assert!(frame.lines.iter().all(|line| line.size != FontSize::Large));
        }
    }

    #[test]
    fn render_is_idempotent() {
        let aux = AuxLines::new("WiFi failed", "Check settings");

        assert_eq!(
            render(DeviceStatus::Defused, None, &aux),
            render(DeviceStatus::Defused, None, &aux)
        );
    }

    #[test]
    fn connection_texts() {
        let cases = [
            (ConnectionState::Connecting { attempt: 0 }, "Connecting to", "lab"),
            (
                ConnectionState::Connecting { attempt: 4 },
                "Connecting...",
                "Attempt 4/20",
            ),
            (ConnectionState::Failed, "WiFi failed", "Check settings"),
        ];

        for (state, first, second) in cases {
            let aux = AuxLines::for_connection(&state, "lab", 20);
            assert_eq!(aux.lines().collect::<Vec<_>>(), vec![first, second]);
        }
    }

    #[test]
    fn empty_aux_lines_are_skipped() {
        let aux = AuxLines::new("", "only second");
        let frame = render(DeviceStatus::Exploded, None, &aux);

        assert_eq!(texts(&frame), vec!["Digital Flame: Exploded", "only second"]);
        assert_eq!(frame.lines[1].y, 12);
    }

    #[test]
    fn status_line_fits_panel_for_every_status() {
        for status in [
            DeviceStatus::Idle,
            DeviceStatus::Armed,
            DeviceStatus::Defused,
            DeviceStatus::Exploded,
        ] {
            let frame = render(status, None, &AuxLines::default());
            let line = &frame.lines[0];

            assert_eq!(line.text, format!("Digital Flame: {}", status.as_str()));
            assert!(
                line.text.len() as u32 * line.size.glyph_width() <= SCREEN_WIDTH,
                "`{}` overflows the panel",
                line.text
            );
        }
        assert_eq!(
            render(DeviceStatus::Idle, None, &AuxLines::default()).lines[0].size,
            FontSize::Normal
        );
        assert_eq!(
            render(DeviceStatus::Exploded, None, &AuxLines::default()).lines[0].size,
            FontSize::Small
        );
    }

    #[test]
    fn every_line_stays_on_screen() {
        let longest_timer = render(DeviceStatus::Armed, Some(3_600), &AuxLines::default());
        let connected = render(
            DeviceStatus::Defused,
            None,
            &AuxLines::new("WiFi connected", "192.168.100.200"),
        );

        for line in longest_timer.lines.iter().chain(&connected.lines) {
            assert!(line.size.fits(&line.text), "`{}` too wide", line.text);
            assert!(line.y as u32 + line.size.glyph_height() <= SCREEN_HEIGHT);
        }
    }
}
