use bms_core::indicator::BiColor;
use embassy_stm32::gpio::Output;

/// Two-die LED package; both dies lit reads as yellow.
pub struct BiColorLed<'d> {
    red: Output<'d>,
    green: Output<'d>,
}

impl<'d> BiColorLed<'d> {
    pub fn new(red: Output<'d>, green: Output<'d>) -> Self {
        Self { red, green }
    }

    /// Drives the dies for one render tick; `None` turns both off.
    pub fn show(&mut self, level: Option<BiColor>) {
        let (red, green) = match level {
            None => (false, false),
            Some(BiColor::Red) => (true, false),
            Some(BiColor::Green) => (false, true),
            Some(BiColor::Yellow) => (true, true),
        };
        set(&mut self.red, red);
        set(&mut self.green, green);
    }
}

fn set(pin: &mut Output<'_>, lit: bool) {
    if lit {
        pin.set_high();
    } else {
        pin.set_low();
    }
}
