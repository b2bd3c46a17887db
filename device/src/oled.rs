//! SSD1306 128x32 panel on I2C.

use embedded_graphics::{
    mono_font::{
        ascii::{FONT_10X20, FONT_5X8, FONT_6X10},
        MonoTextStyle, MonoTextStyleBuilder,
    },
    pixelcolor::BinaryColor,
    prelude::*,
    text::{Baseline, Text},
};
use esp_idf_hal::i2c::I2cDriver;
use ssd1306::{
    mode::{BufferedGraphicsMode, DisplayConfig},
    prelude::{DisplayRotation, DisplaySize128x32, I2CInterface},
    I2CDisplayInterface, Ssd1306,
};

use flame_common::{DisplayError, DisplaySurface, FontSize, Frame};

type Panel = Ssd1306<
    I2CInterface<I2cDriver<'static>>,
    DisplaySize128x32,
    BufferedGraphicsMode<DisplaySize128x32>,
>;

pub struct OledDisplay {
    panel: Panel,
}

impl OledDisplay {
    pub fn new(i2c: I2cDriver<'static>) -> Result<Self, DisplayError> {
        let interface = I2CDisplayInterface::new(i2c);
        let mut panel = Ssd1306::new(interface, DisplaySize128x32, DisplayRotation::Rotate0)
            .into_buffered_graphics_mode();

        panel
            .init()
            .map_err(|err| DisplayError::Init(format!("{err:?}")))?;
        panel.clear_buffer();
        panel
            .flush()
            .map_err(|err| DisplayError::Init(format!("{err:?}")))?;

        Ok(Self { panel })
    }
}

impl DisplaySurface for OledDisplay {
    fn present(&mut self, frame: &Frame) -> Result<(), DisplayError> {
        self.panel.clear_buffer();

        for line in &frame.lines {
            Text::with_baseline(
                &line.text,
                Point::new(line.x, line.y),
                text_style(line.size),
                Baseline::Top,
            )
            .draw(&mut self.panel)
            .map_err(|err| DisplayError::Bus(format!("{err:?}")))?;
        }

        self.panel
            .flush()
            .map_err(|err| DisplayError::Bus(format!("{err:?}")))
    }
}

fn text_style(size: FontSize) -> MonoTextStyle<'static, BinaryColor> {
    let font = match size {
        FontSize::Small => &FONT_5X8,
        FontSize::Normal => &FONT_6X10,
        FontSize::Large => &FONT_10X20,
    };
    MonoTextStyleBuilder::new()
        .font(font)
        .text_color(BinaryColor::On)
        .build()
}
