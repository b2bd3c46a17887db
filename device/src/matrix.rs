//! 4x4 keypad wired straight to GPIO: rows driven low one at a time, columns
//! read back through pull-ups.

use esp_idf_hal::{
    delay::Ets,
    gpio::{AnyIOPin, AnyOutputPin, Input, Output, PinDriver, Pull},
    sys::EspError,
};
use log::warn;

use flame_common::{
    keypad::{KEYPAD_COLS, KEYPAD_ROWS},
    scan_matrix, KeypadMatrix, MatrixLines,
};

const ROW_SETTLE_US: u32 = 5;

pub struct GpioMatrix {
    rows: Vec<PinDriver<'static, AnyOutputPin, Output>>,
    cols: Vec<PinDriver<'static, AnyIOPin, Input>>,
}

impl GpioMatrix {
    pub fn new(
        rows: [AnyOutputPin; KEYPAD_ROWS],
        cols: [AnyIOPin; KEYPAD_COLS],
    ) -> Result<Self, EspError> {
        let rows = rows
            .into_iter()
            .map(|pin| {
                let mut driver = PinDriver::output(pin)?;
                driver.set_high()?;
                Ok(driver)
            })
            .collect::<Result<Vec<_>, EspError>>()?;

        let cols = cols
            .into_iter()
            .map(|pin| {
                let mut driver = PinDriver::input(pin)?;
                driver.set_pull(Pull::Up)?;
                Ok(driver)
            })
            .collect::<Result<Vec<_>, EspError>>()?;

        Ok(Self { rows, cols })
    }
}

impl MatrixLines for GpioMatrix {
    type Error = EspError;

    fn set_row(&mut self, row: usize, active: bool) -> Result<(), EspError> {
        let Some(line) = self.rows.get_mut(row) else {
            return Ok(());
        };
        if active {
            line.set_low()
        } else {
            line.set_high()
        }
    }

    fn column_active(&mut self, col: usize) -> bool {
        self.cols.get(col).is_some_and(|pin| pin.is_low())
    }

    fn settle(&mut self) {
        Ets::delay_us(ROW_SETTLE_US);
    }
}

impl KeypadMatrix for GpioMatrix {
    fn pressed(&mut self) -> Option<(usize, usize)> {
        match scan_matrix(self) {
            Ok(hit) => hit,
            Err(err) => {
                warn!("keypad scan aborted: {err}");
                None
            }
        }
    }
}
