//! Actuator driver: two active-low relays per motor
//!
//! Relay levels: `Low` energizes, `High` releases. A motor is stopped when
//! both of its relays are released; at most one is ever energized.

use crate::domain::types::{ConveyorCommand, PusherCommand};
use crate::infra::config::PinConfig;
use crate::io::gpio::{GpioError, Level, SharedGpio};
use tracing::{debug, warn};

pub struct ActuatorDriver {
    gpio: SharedGpio,
    pins: PinConfig,
    conveyor: ConveyorCommand,
    pusher: PusherCommand,
    /// Conveyor forward/reverse commands that actually energized a relay
    motion_commands: u64,
}

impl ActuatorDriver {
    pub fn new(gpio: SharedGpio, pins: PinConfig) -> Self {
        Self {
            gpio,
            pins,
            conveyor: ConveyorCommand::Stop,
            pusher: PusherCommand::Stop,
            motion_commands: 0,
        }
    }

    pub fn conveyor_state(&self) -> ConveyorCommand {
        self.conveyor
    }

    pub fn pusher_state(&self) -> PusherCommand {
        self.pusher
    }

    pub fn motion_commands(&self) -> u64 {
        self.motion_commands
    }

    fn release_pair(&self, a: u8, b: u8) -> Result<(), GpioError> {
        let mut gpio = self.gpio.lock();
        gpio.write(a, Level::High)?;
        gpio.write(b, Level::High)
    }

    /// Drive the conveyor. Re-commanding the current direction is a no-op.
    pub fn conveyor(&mut self, cmd: ConveyorCommand) -> Result<(), GpioError> {
        if cmd == self.conveyor {
            return Ok(());
        }
        let (fwd, rev) = (self.pins.conveyor_forward, self.pins.conveyor_reverse);

        self.release_pair(fwd, rev)?;
        self.conveyor = ConveyorCommand::Stop;

        let energize = match cmd {
            ConveyorCommand::Forward => Some(fwd),
            ConveyorCommand::Reverse => Some(rev),
            ConveyorCommand::Stop => None,
        };
        if let Some(pin) = energize {
            self.gpio.lock().write(pin, Level::Low)?;
            self.motion_commands += 1;
        }
        self.conveyor = cmd;
        debug!(command = ?cmd, "conveyor");
        Ok(())
    }

    /// Drive the pusher. Re-commanding the current direction is a no-op.
    pub fn pusher(&mut self, cmd: PusherCommand) -> Result<(), GpioError> {
        if cmd == self.pusher {
            return Ok(());
        }
        let (down, up) = (self.pins.pusher_down, self.pins.pusher_up);

        self.release_pair(down, up)?;
        self.pusher = PusherCommand::Stop;

        let energize = match cmd {
            PusherCommand::Down => Some(down),
            PusherCommand::Up => Some(up),
            PusherCommand::Stop => None,
        };
        if let Some(pin) = energize {
            self.gpio.lock().write(pin, Level::Low)?;
        }
        self.pusher = cmd;
        debug!(command = ?cmd, "pusher");
        Ok(())
    }

    /// Release every relay regardless of tracked state
    pub fn all_off(&mut self) -> Result<(), GpioError> {
        let result = all_off(&self.gpio, &self.pins);
        self.conveyor = ConveyorCommand::Stop;
        self.pusher = PusherCommand::Stop;
        result
    }
}

/// De-energize all outputs. Every pin is attempted; the first error is returned.
pub fn all_off(gpio: &SharedGpio, pins: &PinConfig) -> Result<(), GpioError> {
    let mut gpio = gpio.lock();
    let mut first_err = None;
    for pin in pins.relays() {
        if let Err(e) = gpio.write(pin, Level::High) {
            warn!(pin, error = %e, "all_off_write_failed");
            first_err.get_or_insert(e);
        }
    }
    if let Err(e) = gpio.write(pins.trig, Level::Low) {
        first_err.get_or_insert(e);
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
