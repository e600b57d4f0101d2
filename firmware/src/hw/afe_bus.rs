//! Blocking I2C transport for the BQ769x0 analog front end.

use bms_core::afe::{AfeRegisters, I2C_ADDRESS};
use embassy_stm32::i2c::{Error as I2cError, I2c, Master};
use embassy_stm32::mode::Blocking;

/// Register access over I2C1 without CRC framing.
pub struct I2cAfeBus<'d> {
    i2c: I2c<'d, Blocking, Master>,
}

impl<'d> I2cAfeBus<'d> {
    pub fn new(i2c: I2c<'d, Blocking, Master>) -> Self {
        Self { i2c }
    }
}

impl AfeRegisters for I2cAfeBus<'_> {
    type Error = I2cError;

    fn read_register(&mut self, register: u8) -> Result<u8, Self::Error> {
        let mut value = [0u8; 1];
        self.i2c
            .blocking_write_read(I2C_ADDRESS, &[register], &mut value)?;
        Ok(value[0])
    }

    fn read_block(&mut self, start: u8, buffer: &mut [u8]) -> Result<(), Self::Error> {
        self.i2c.blocking_write_read(I2C_ADDRESS, &[start], buffer)
    }

    fn write_register(&mut self, register: u8, value: u8) -> Result<(), Self::Error> {
        self.i2c.blocking_write(I2C_ADDRESS, &[register, value])
    }
}
