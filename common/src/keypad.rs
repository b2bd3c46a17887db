//! 4x4 matrix keypad scanning.
//!
//! The matrix collaborator reports which key is physically down right now.
//! [`KeypadScanner`] turns that level signal into single press events: a key
//! is reported once, after it has been stable for the debounce window, and
//! not again until it is released.

pub const KEYPAD_ROWS: usize = 4;
pub const KEYPAD_COLS: usize = 4;

pub const KEYMAP: [[char; KEYPAD_COLS]; KEYPAD_ROWS] = [
    ['1', '2', '3', 'A'],
    ['4', '5', '6', 'B'],
    ['7', '8', '9', 'C'],
    ['*', '0', '#', 'D'],
];

pub trait KeypadMatrix {
    /// Row and column of the key currently held down, if any.
    fn pressed(&mut self) -> Option<(usize, usize)>;
}

/// Row and column lines of a passive key matrix.
pub trait MatrixLines {
    type Error;

    fn set_row(&mut self, row: usize, active: bool) -> Result<(), Self::Error>;
    fn column_active(&mut self, col: usize) -> bool;
    fn settle(&mut self) {}
}

/// Drives each row active in turn and returns the first key found.
/// Any line error aborts the scan; a row left active would show up as a
/// press on every later row.
pub fn scan_matrix<L: MatrixLines>(lines: &mut L) -> Result<Option<(usize, usize)>, L::Error> {
    let mut hit = None;

    for row in 0..KEYPAD_ROWS {
        lines.set_row(row, true)?;
        lines.settle();

        if hit.is_none() {
            hit = (0..KEYPAD_COLS)
                .find(|&col| lines.column_active(col))
                .map(|col| (row, col));
        }

        lines.set_row(row, false)?;
    }

    Ok(hit)
}

pub fn key_at(row: usize, col: usize) -> Option<char> {
    KEYMAP.get(row)?.get(col).copied()
}

pub fn position_of(key: char) -> Option<(usize, usize)> {
    KEYMAP.iter().enumerate().find_map(|(row, keys)| {
        keys.iter()
            .position(|candidate| *candidate == key)
            .map(|col| (row, col))
    })
}

#[derive(Debug)]
pub struct KeypadScanner<M> {
    matrix: M,
    debounce_ms: u64,
    raw: Option<char>,
    raw_since_ms: u64,
    stable: Option<char>,
}

impl<M: KeypadMatrix> KeypadScanner<M> {
    pub fn new(matrix: M, debounce_ms: u64) -> Self {
        Self {
            matrix,
            debounce_ms,
            raw: None,
            raw_since_ms: 0,
            stable: None,
        }
    }

    pub fn matrix_mut(&mut self) -> &mut M {
        &mut self.matrix
    }

    /// Returns the key that was newly pressed since the last scan, if any.
    pub fn scan(&mut self, now_ms: u64) -> Option<char> {
        let reading = self
            .matrix
            .pressed()
            .and_then(|(row, col)| key_at(row, col));

        if reading != self.raw {
            self.raw = reading;
            self.raw_since_ms = now_ms;
        }

        if self.raw == self.stable
            || now_ms.saturating_sub(self.raw_since_ms) < self.debounce_ms
        {
            return None;
        }

        self.stable = self.raw;
        self.stable
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    #[derive(Default)]
    struct ScriptedMatrix {
        readings: VecDeque<Option<char>>,
    }

    impl ScriptedMatrix {
        fn with(readings: &[Option<char>]) -> Self {
            Self {
                readings: readings.iter().copied().collect(),
            }
        }
    }

    impl KeypadMatrix for ScriptedMatrix {
        fn pressed(&mut self) -> Option<(usize, usize)> {
            self.readings.pop_front().flatten().and_then(position_of)
        }
    }

    fn run(readings: &[Option<char>], debounce_ms: u64, step_ms: u64) -> Vec<Option<char>> {
        let mut scanner = KeypadScanner::new(ScriptedMatrix::with(readings), debounce_ms);
        (0..readings.len() as u64)
            .map(|step| scanner.scan(step * step_ms))
            .collect()
    }

    #[test]
    fn keymap_layout() {
        assert_eq!(key_at(0, 3), Some('A'));
        assert_eq!(key_at(1, 3), Some('B'));
        assert_eq!(key_at(2, 3), Some('C'));
        assert_eq!(key_at(3, 0), Some('*'));
        assert_eq!(key_at(3, 1), Some('0'));
        assert_eq!(key_at(3, 2), Some('#'));
        assert_eq!(key_at(4, 0), None);
        assert_eq!(key_at(0, 4), None);
        assert_eq!(position_of('D'), Some((3, 3)));
        assert_eq!(position_of('x'), None);
    }

    #[test]
    fn held_key_reported_once() {
        let events = run(&[Some('A'), Some('A'), Some('A'), Some('A')], 0, 10);

        assert_eq!(events, vec![Some('A'), None, None, None]);
    }

    #[test]
    fn release_and_press_again_is_reported() {
        let events = run(&[Some('5'), None, Some('5')], 0, 10);

        assert_eq!(events, vec![Some('5'), None, Some('5')]);
    }

    #[test]
    fn bounce_shorter_than_debounce_is_ignored() {
        let events = run(
            &[Some('B'), None, Some('B'), Some('B'), Some('B'), Some('B')],
            20,
            10,
        );

        // Stable from t=20; reported once the 20 ms window has elapsed at t=40.
        assert_eq!(events, vec![None, None, None, None, Some('B'), None]);
    }

    #[test]
    fn switching_keys_while_held_reports_new_key() {
        let events = run(&[Some('1'), Some('C'), Some('C')], 0, 10);

        assert_eq!(events, vec![Some('1'), Some('C'), None]);
    }

    #[derive(Default)]
    struct FakeLines {
        key: Option<(usize, usize)>,
        active_rows: [bool; KEYPAD_ROWS],
        stuck_row: Option<usize>,
        releases: usize,
    }

    impl MatrixLines for FakeLines {
        type Error = usize;

        fn set_row(&mut self, row: usize, active: bool) -> Result<(), usize> {
            if !active && self.stuck_row == Some(row) {
                return Err(row);
            }
            self.active_rows[row] = active;
            if !active {
                self.releases += 1;
            }
            Ok(())
        }

        fn column_active(&mut self, col: usize) -> bool {
            self.active_rows
                .iter()
                .enumerate()
                .any(|(row, active)| *active && self.key == Some((row, col)))
        }
    }

    #[test]
    fn matrix_scan_finds_key_and_releases_rows() {
        let mut lines = FakeLines {
            key: position_of('9'),
            ..FakeLines::default()
        };

        assert_eq!(scan_matrix(&mut lines), Ok(Some((2, 2))));
        assert_eq!(lines.active_rows, [false; KEYPAD_ROWS]);
        assert_eq!(lines.releases, KEYPAD_ROWS);

        lines.key = None;
        assert_eq!(scan_matrix(&mut lines), Ok(None));
    }

    #[test]
    fn matrix_scan_stops_at_row_that_cannot_be_released() {
        let mut lines = FakeLines {
            stuck_row: Some(1),
            ..FakeLines::default()
        };

        assert_eq!(scan_matrix(&mut lines), Err(1));
        assert_eq!(lines.releases, 1);
        assert!(!lines.active_rows[2]);
        assert!(!lines.active_rows[3]);
    }

    #[test]
    fn no_key_is_a_no_op() {
        let events = run(&[None, None, None], 20, 10);

        assert_eq!(events, vec![None, None, None]);
    }
}
