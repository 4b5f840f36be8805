//! Raspberry Pi GPIO backend (feature `rpi`)

use crate::infra::config::PinConfig;
use crate::io::gpio::{GpioBackend, GpioError, Level};
use rppal::gpio::{Gpio, InputPin, OutputPin};
use std::collections::HashMap;
use tracing::info;

pub struct RppalGpio {
    inputs: HashMap<u8, InputPin>,
    outputs: HashMap<u8, OutputPin>,
}

impl RppalGpio {
    /// Claim every configured pin. Relays start de-energized (high), the
    /// rangefinder trigger starts low.
    pub fn new(pins: &PinConfig) -> Result<Self, GpioError> {
        let gpio = Gpio::new().map_err(|e| GpioError::Init(e.to_string()))?;

        let mut outputs = HashMap::new();
        for pin in pins.relays() {
            let out = gpio.get(pin).map_err(|e| io_err(pin, e))?.into_output_high();
            outputs.insert(pin, out);
        }
        let trig = gpio.get(pins.trig).map_err(|e| io_err(pins.trig, e))?.into_output_low();
        outputs.insert(pins.trig, trig);

        let mut inputs = HashMap::new();
        for pin in pins.inputs() {
            let input = gpio.get(pin).map_err(|e| io_err(pin, e))?.into_input_pullup();
            inputs.insert(pin, input);
        }

        info!(inputs = inputs.len(), outputs = outputs.len(), "gpio_initialized");
        Ok(Self { inputs, outputs })
    }
}

fn io_err(pin: u8, e: rppal::gpio::Error) -> GpioError {
    GpioError::Io { pin, message: e.to_string() }
}

impl GpioBackend for RppalGpio {
    fn read(&mut self, pin: u8) -> Result<Level, GpioError> {
        if let Some(input) = self.inputs.get(&pin) {
            return Ok(if input.is_low() { Level::Low } else { Level::High });
        }
        match self.outputs.get(&pin) {
            Some(output) => Ok(if output.is_set_low() { Level::Low } else { Level::High }),
            None => Err(GpioError::UnknownPin(pin)),
        }
    }

    fn write(&mut self, pin: u8, level: Level) -> Result<(), GpioError> {
        let output = self.outputs.get_mut(&pin).ok_or(GpioError::UnknownPin(pin))?;
        match level {
            Level::Low => output.set_low(),
            Level::High => output.set_high(),
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "rppal"
    }
}
