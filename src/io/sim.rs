//! Simulated sorting rig
//!
//! A small plant model driven by virtual time: conveyor travel integrates
//! over the time the forward/reverse relays are energized, sensors derive
//! from the simulated position, the door follows a schedule and the
//! rangefinder echo is generated from the distance of the presented item.
//!
//! `SimGpio` and `SimClock` are two handles onto the same `RigState`, so a
//! sleep on the clock moves the conveyor that the GPIO handle reads.

use crate::domain::types::Sensor;
use crate::infra::clock::{Clock, StopSignal};
use crate::infra::config::{PinConfig, SimulationConfig};
use crate::io::gpio::{GpioBackend, GpioError, Level};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const SPEED_OF_SOUND_CM_S: f64 = 34300.0;
/// Delay between trigger falling edge and echo rising edge
const ECHO_LATENCY: Duration = Duration::from_micros(60);
/// Virtual time consumed by one busy-wait iteration
const SPIN_STEP: Duration = Duration::from_micros(10);
/// Travel span over which each limit switch stays closed
const LIMIT_WIDTH: Duration = Duration::from_millis(20);
/// Distance reported when nothing sits in front of the rangefinder
const EMPTY_DISTANCE_CM: f64 = 80.0;
const FEED_DOOR_OPEN_FOR: Duration = Duration::from_millis(1000);

/// Conveyor geometry expressed as travel time from HOME at full speed
#[derive(Debug, Clone, Copy)]
pub struct RigLayout {
    pub plastic_at: Duration,
    pub can_at: Duration,
    pub end_at: Duration,
    pub sensor_width: Duration,
    pub glass_width: Duration,
}

impl Default for RigLayout {
    fn default() -> Self {
        Self::from(&SimulationConfig::default())
    }
}

impl From<&SimulationConfig> for RigLayout {
    fn from(sim: &SimulationConfig) -> Self {
        Self {
            plastic_at: Duration::from_millis(sim.plastic_at_ms),
            can_at: Duration::from_millis(sim.can_at_ms),
            end_at: Duration::from_millis(sim.end_at_ms),
            sensor_width: Duration::from_millis(sim.sensor_width_ms),
            glass_width: Duration::from_millis(sim.glass_width_ms),
        }
    }
}

/// Rangefinder fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoMode {
    Normal,
    /// Echo never rises
    Silent,
    /// Echo rises and never falls
    StuckHigh,
}

#[derive(Debug, Clone, Copy)]
struct DoorSchedule {
    open_at: Duration,
    close_at: Duration,
    distance_cm: f64,
}

struct RigState {
    now: Duration,
    /// Travel from HOME, clamped to [0, end_at]
    position: Duration,
    layout: RigLayout,
    pins: PinConfig,
    outputs: HashMap<u8, Level>,
    overrides: [Option<bool>; 6],
    failing_pins: Vec<u8>,
    writes: Vec<(Duration, u8, Level)>,
    door: Option<DoorSchedule>,
    /// Distance of the item sitting against the scan window
    item_cm: Option<f64>,
    /// Set by a down stroke, cleared by the up stroke
    pusher_extended: bool,
    echo: Option<(Duration, Duration)>,
    echo_mode: EchoMode,
    feed_interval: Option<Duration>,
    next_feed_at: Duration,
    feed_distance_cm: f64,
    items_presented: u64,
    items_ejected: u64,
    stop_at: Option<(Duration, StopSignal)>,
}

impl RigState {
    fn new(pins: PinConfig, layout: RigLayout) -> Self {
        let mut outputs = HashMap::new();
        for pin in pins.relays() {
            outputs.insert(pin, Level::High);
        }
        outputs.insert(pins.trig, Level::Low);

        Self {
            now: Duration::ZERO,
            position: Duration::ZERO,
            layout,
            pins,
            outputs,
            overrides: [None; 6],
            failing_pins: Vec::new(),
            writes: Vec::new(),
            door: None,
            item_cm: None,
            pusher_extended: false,
            echo: None,
            echo_mode: EchoMode::Normal,
            feed_interval: None,
            next_feed_at: Duration::ZERO,
            feed_distance_cm: 2.0,
            items_presented: 0,
            items_ejected: 0,
            stop_at: None,
        }
    }

    fn output(&self, pin: u8) -> Level {
        self.outputs.get(&pin).copied().unwrap_or(Level::High)
    }

    /// +1 forward, -1 reverse, 0 stopped or ambiguous
    fn conveyor_direction(&self) -> i8 {
        let fwd = self.output(self.pins.conveyor_forward).is_low();
        let rev = self.output(self.pins.conveyor_reverse).is_low();
        match (fwd, rev) {
            (true, false) => 1,
            (false, true) => -1,
            _ => 0,
        }
    }

    fn advance(&mut self, dt: Duration) {
        match self.conveyor_direction() {
            1 => self.position = (self.position + dt).min(self.layout.end_at),
            -1 => self.position = self.position.saturating_sub(dt),
            _ => {}
        }
        self.now += dt;

        if let Some(door) = self.door {
            if self.now >= door.close_at {
                self.item_cm = Some(door.distance_cm);
                self.items_presented += 1;
                self.door = None;
            }
        }

        if let Some(interval) = self.feed_interval {
            let ready = self.door.is_none() && self.item_cm.is_none() && self.idle_at_home();
            if ready && self.now >= self.next_feed_at {
                let open_at = self.now;
                let close_at = open_at + FEED_DOOR_OPEN_FOR;
                self.door = Some(DoorSchedule { open_at, close_at, distance_cm: self.feed_distance_cm });
                self.next_feed_at = close_at + interval;
            }
        }

        if let Some((at, stop)) = &self.stop_at {
            if self.now >= *at {
                stop.stop();
            }
        }
    }

    /// Conveyor parked at the glass end with the pusher retracted
    fn idle_at_home(&self) -> bool {
        let pusher_off = self.output(self.pins.pusher_down).is_high() && self.output(self.pins.pusher_up).is_high();
        self.conveyor_direction() == 0
            && pusher_off
            && !self.pusher_extended
            && self.position <= self.layout.glass_width
    }

    fn near(&self, at: Duration, width: Duration) -> bool {
        let half = width / 2;
        self.position + half >= at && self.position <= at + half
    }

    fn sensor_triggered(&self, sensor: Sensor) -> bool {
        if let Some(forced) = self.overrides[sensor.index()] {
            return forced;
        }
        let layout = &self.layout;
        match sensor {
            Sensor::HomeLimit => self.position <= LIMIT_WIDTH,
            Sensor::Glass => self.position <= layout.glass_width,
            Sensor::Plastic => self.near(layout.plastic_at, layout.sensor_width),
            Sensor::Can => self.near(layout.can_at, layout.sensor_width),
            Sensor::EndLimit => self.position + LIMIT_WIDTH >= layout.end_at,
            Sensor::Door => match self.door {
                Some(door) => !(self.now >= door.open_at && self.now < door.close_at),
                None => true,
            },
        }
    }

    fn echo_level(&self) -> Level {
        match self.echo {
            Some((rise, fall)) if self.now >= rise && self.now < fall => Level::High,
            _ => Level::Low,
        }
    }

    fn on_trigger_fall(&mut self) {
        let rise = self.now + ECHO_LATENCY;
        self.echo = match self.echo_mode {
            EchoMode::Normal => {
                let cm = self.item_cm.unwrap_or(EMPTY_DISTANCE_CM);
                let high = Duration::from_secs_f64(cm * 2.0 / SPEED_OF_SOUND_CM_S);
                Some((rise, rise + high))
            }
            EchoMode::Silent => None,
            EchoMode::StuckHigh => Some((rise, Duration::MAX)),
        };
    }

    fn check_pin(&self, pin: u8) -> Result<(), GpioError> {
        if self.failing_pins.contains(&pin) {
            return Err(GpioError::Io { pin, message: "simulated fault".to_string() });
        }
        Ok(())
    }
}

/// Shared handle to the simulated rig
#[derive(Clone)]
pub struct SimRig {
    state: Arc<Mutex<RigState>>,
}

impl SimRig {
    pub fn new(pins: PinConfig, layout: RigLayout) -> Self {
        Self { state: Arc::new(Mutex::new(RigState::new(pins, layout))) }
    }

    /// Rig with default wiring and geometry
    pub fn standard() -> Self {
        Self::new(PinConfig::default(), RigLayout::default())
    }

    pub fn gpio(&self) -> SimGpio {
        SimGpio { rig: self.clone() }
    }

    /// Virtual clock; `pace` also sleeps in real time
    pub fn clock(&self, pace: bool) -> SimClock {
        SimClock { rig: self.clone(), pace }
    }

    pub fn now(&self) -> Duration {
        self.state.lock().now
    }

    /// Travel from HOME
    pub fn position(&self) -> Duration {
        self.state.lock().position
    }

    pub fn set_position(&self, position: Duration) {
        let mut state = self.state.lock();
        state.position = position.min(state.layout.end_at);
    }

    pub fn advance(&self, dt: Duration) {
        self.state.lock().advance(dt);
    }

    /// Force a sensor reading (`Some(true)` triggered, `Some(false)` clear)
    pub fn override_sensor(&self, sensor: Sensor, forced: Option<bool>) {
        self.state.lock().overrides[sensor.index()] = forced;
    }

    pub fn is_triggered(&self, sensor: Sensor) -> bool {
        self.state.lock().sensor_triggered(sensor)
    }

    pub fn fail_pin(&self, pin: u8) {
        self.state.lock().failing_pins.push(pin);
    }

    pub fn set_echo_mode(&self, mode: EchoMode) {
        self.state.lock().echo_mode = mode;
    }

    /// Open the door after `open_after`, close it after `close_after` and
    /// leave an item `distance_cm` from the rangefinder
    pub fn present_item(&self, open_after: Duration, close_after: Duration, distance_cm: f64) {
        let mut state = self.state.lock();
        let now = state.now;
        state.door = Some(DoorSchedule {
            open_at: now + open_after,
            close_at: now + close_after.max(open_after),
            distance_cm,
        });
    }

    /// Place an item in front of the rangefinder without a door cycle
    pub fn place_item(&self, distance_cm: f64) {
        self.state.lock().item_cm = Some(distance_cm);
    }

    pub fn item_present(&self) -> bool {
        self.state.lock().item_cm.is_some()
    }

    /// Present a new item every `interval` once the previous one is ejected
    /// and the machine is back at home
    pub fn auto_feed(&self, interval: Duration, distance_cm: f64) {
        let mut state = self.state.lock();
        state.feed_interval = Some(interval);
        state.next_feed_at = state.now + interval;
        state.feed_distance_cm = distance_cm;
    }

    /// Raise `stop` once virtual time passes `at`
    pub fn stop_at(&self, at: Duration, stop: StopSignal) {
        self.state.lock().stop_at = Some((at, stop));
    }

    pub fn output(&self, pin: u8) -> Level {
        self.state.lock().output(pin)
    }

    /// True when no relay is energized
    pub fn all_relays_off(&self) -> bool {
        let state = self.state.lock();
        state.pins.relays().iter().all(|pin| state.output(*pin).is_high())
    }

    /// Number of writes recorded for `pin`
    pub fn writes_to(&self, pin: u8) -> usize {
        self.state.lock().writes.iter().filter(|(_, p, _)| *p == pin).count()
    }

    /// Writes to the relay outputs that energize a coil
    pub fn energize_count(&self, pin: u8) -> usize {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|(_, p, level)| *p == pin && level.is_low())
            .count()
    }

    pub fn items_presented(&self) -> u64 {
        self.state.lock().items_presented
    }

    pub fn items_ejected(&self) -> u64 {
        self.state.lock().items_ejected
    }
}

/// GPIO handle onto the simulated rig
pub struct SimGpio {
    rig: SimRig,
}

impl GpioBackend for SimGpio {
    fn read(&mut self, pin: u8) -> Result<Level, GpioError> {
        let state = self.rig.state.lock();
        state.check_pin(pin)?;

        if pin == state.pins.echo {
            return Ok(state.echo_level());
        }
        let sensor = Sensor::ALL.into_iter().find(|s| state.pins.sensor_pin(*s) == pin);
        match sensor {
            Some(sensor) if state.sensor_triggered(sensor) => Ok(Level::Low),
            Some(_) => Ok(Level::High),
            None => state.outputs.get(&pin).copied().ok_or(GpioError::UnknownPin(pin)),
        }
    }

    fn write(&mut self, pin: u8, level: Level) -> Result<(), GpioError> {
        let mut state = self.rig.state.lock();
        state.check_pin(pin)?;
        if !state.pins.outputs().contains(&pin) {
            return Err(GpioError::UnknownPin(pin));
        }

        let previous = state.output(pin);
        let now = state.now;
        state.outputs.insert(pin, level);
        state.writes.push((now, pin, level));

        if pin == state.pins.trig && previous.is_high() && level.is_low() {
            state.on_trigger_fall();
        }
        if pin == state.pins.pusher_down && level.is_low() {
            state.pusher_extended = true;
            if state.item_cm.take().is_some() {
                state.items_ejected += 1;
            }
        }
        if pin == state.pins.pusher_up && level.is_low() {
            state.pusher_extended = false;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sim"
    }
}

/// Virtual clock onto the simulated rig
#[derive(Clone)]
pub struct SimClock {
    rig: SimRig,
    pace: bool,
}

impl Clock for SimClock {
    fn now(&self) -> Duration {
        self.rig.now()
    }

    fn sleep(&self, duration: Duration) {
        self.rig.advance(duration);
        if self.pace {
            std::thread::sleep(duration);
        }
    }

    fn spin(&self) {
        self.rig.advance(SPIN_STEP);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forward(gpio: &mut SimGpio, pins: &PinConfig) {
        gpio.write(pins.conveyor_reverse, Level::High).unwrap();
        gpio.write(pins.conveyor_forward, Level::Low).unwrap();
    }

    #[test]
    fn test_conveyor_travel_follows_relays() {
        let rig = SimRig::standard();
        let pins = PinConfig::default();
        let mut gpio = rig.gpio();
        let clock = rig.clock(false);

        forward(&mut gpio, &pins);
        clock.sleep(Duration::from_millis(2500));
        assert!(rig.is_triggered(Sensor::Plastic));
        assert!(!rig.is_triggered(Sensor::HomeLimit));

        // Both relays energized is not a direction
        gpio.write(pins.conveyor_reverse, Level::Low).unwrap();
        clock.sleep(Duration::from_millis(500));
        assert_eq!(rig.position(), Duration::from_millis(2500));

        gpio.write(pins.conveyor_forward, Level::High).unwrap();
        clock.sleep(Duration::from_secs(10));
        assert_eq!(rig.position(), Duration::ZERO);
        assert!(rig.is_triggered(Sensor::HomeLimit));
        assert!(rig.is_triggered(Sensor::Glass));
    }

    #[test]
    fn test_travel_clamps_at_end_limit() {
        let rig = SimRig::standard();
        let pins = PinConfig::default();
        let mut gpio = rig.gpio();
        forward(&mut gpio, &pins);
        rig.advance(Duration::from_secs(60));
        assert_eq!(rig.position(), RigLayout::default().end_at);
        assert!(rig.is_triggered(Sensor::EndLimit));
    }

    #[test]
    fn test_sensors_read_active_low() {
        let rig = SimRig::standard();
        let pins = PinConfig::default();
        let mut gpio = rig.gpio();
        assert_eq!(gpio.read(pins.limit_home).unwrap(), Level::Low);
        assert_eq!(gpio.read(pins.limit_end).unwrap(), Level::High);
        // Door closed by default
        assert_eq!(gpio.read(pins.ir_door).unwrap(), Level::Low);
    }

    #[test]
    fn test_door_schedule_leaves_item() {
        let rig = SimRig::standard();
        rig.present_item(Duration::from_millis(100), Duration::from_millis(600), 2.0);
        assert!(rig.is_triggered(Sensor::Door));
        rig.advance(Duration::from_millis(200));
        assert!(!rig.is_triggered(Sensor::Door));
        assert!(!rig.item_present());
        rig.advance(Duration::from_millis(500));
        assert!(rig.is_triggered(Sensor::Door));
        assert!(rig.item_present());
        assert_eq!(rig.items_presented(), 1);
    }

    #[test]
    fn test_echo_generated_on_trigger_fall() {
        let rig = SimRig::standard();
        let pins = PinConfig::default();
        let mut gpio = rig.gpio();
        rig.place_item(10.0);

        gpio.write(pins.trig, Level::High).unwrap();
        gpio.write(pins.trig, Level::Low).unwrap();
        assert_eq!(gpio.read(pins.echo).unwrap(), Level::Low);
        rig.advance(Duration::from_micros(100));
        assert_eq!(gpio.read(pins.echo).unwrap(), Level::High);
        // 10 cm round trip is ~583 us
        rig.advance(Duration::from_micros(600));
        assert_eq!(gpio.read(pins.echo).unwrap(), Level::Low);
    }

    #[test]
    fn test_pusher_down_removes_item() {
        let rig = SimRig::standard();
        let pins = PinConfig::default();
        let mut gpio = rig.gpio();
        rig.place_item(2.0);
        gpio.write(pins.pusher_down, Level::Low).unwrap();
        assert!(!rig.item_present());
        assert_eq!(rig.items_ejected(), 1);
    }

    #[test]
    fn test_auto_feed_waits_for_idle_machine() {
        let rig = SimRig::standard();
        let pins = PinConfig::default();
        let mut gpio = rig.gpio();
        rig.auto_feed(Duration::from_secs(2), 2.0);

        // Door cycle 2 s..3 s leaves the item
        rig.advance(Duration::from_millis(2000));
        assert!(!rig.is_triggered(Sensor::Door));
        rig.advance(Duration::from_millis(1000));
        assert!(rig.item_present());
        assert_eq!(rig.items_presented(), 1);

        // Ejected, but the pusher is still out: no new door cycle
        gpio.write(pins.pusher_down, Level::Low).unwrap();
        rig.advance(Duration::from_secs(5));
        gpio.write(pins.pusher_down, Level::High).unwrap();
        rig.advance(Duration::from_secs(5));
        assert!(rig.is_triggered(Sensor::Door));

        gpio.write(pins.pusher_up, Level::Low).unwrap();
        rig.advance(Duration::from_secs(1));
        assert!(rig.is_triggered(Sensor::Door));
        gpio.write(pins.pusher_up, Level::High).unwrap();
        rig.advance(Duration::from_millis(10));
        assert!(!rig.is_triggered(Sensor::Door));
    }

    #[test]
    fn test_failing_pin_reports_error() {
        let rig = SimRig::standard();
        let pins = PinConfig::default();
        let mut gpio = rig.gpio();
        rig.fail_pin(pins.ir_can);
        assert!(matches!(gpio.read(pins.ir_can), Err(GpioError::Io { pin: 19, .. })));
        assert_eq!(gpio.write(99, Level::Low), Err(GpioError::UnknownPin(99)));
    }

    #[test]
    fn test_stop_at_raises_signal() {
        let rig = SimRig::standard();
        let stop = StopSignal::new();
        rig.stop_at(Duration::from_secs(1), stop.clone());
        rig.advance(Duration::from_millis(999));
        assert!(!stop.is_stopped());
        rig.advance(Duration::from_millis(1));
        assert!(stop.is_stopped());
    }
}
