//! GPIO backend selection

use crate::infra::clock::{Clock, SystemClock};
use crate::infra::config::Config;
use crate::io::gpio::{share, SharedGpio};
use crate::io::sim::{RigLayout, SimRig};
use std::sync::Arc;
use tracing::{info, warn};

pub enum Backend {
    /// Real pins, real time
    Gpio(SharedGpio),
    /// Simulated rig with its virtual clock
    Simulated(SimRig),
}

impl Backend {
    pub fn gpio(&self) -> SharedGpio {
        match self {
            Backend::Gpio(gpio) => gpio.clone(),
            Backend::Simulated(rig) => share(Box::new(rig.gpio())),
        }
    }

    pub fn clock(&self, pace: bool) -> Arc<dyn Clock> {
        match self {
            Backend::Gpio(_) => Arc::new(SystemClock::new()),
            Backend::Simulated(rig) => Arc::new(rig.clock(pace)),
        }
    }

    pub fn is_simulated(&self) -> bool {
        matches!(self, Backend::Simulated(_))
    }
}

/// Open the Raspberry Pi backend, or fall back to the simulated rig when
/// GPIO is unavailable or simulation is requested
pub fn open_backend(config: &Config, force_sim: bool) -> Backend {
    if force_sim || config.simulation().enabled {
        info!("simulation_requested");
        return simulated(config);
    }

    #[cfg(feature = "rpi")]
    {
        match crate::io::rpi::RppalGpio::new(config.pins()) {
            Ok(gpio) => return Backend::Gpio(share(Box::new(gpio))),
            Err(e) => warn!(error = %e, "gpio_unavailable_falling_back_to_simulation"),
        }
    }
    #[cfg(not(feature = "rpi"))]
    warn!("gpio_support_not_built_falling_back_to_simulation");

    simulated(config)
}

fn simulated(config: &Config) -> Backend {
    let sim = config.simulation();
    let rig = SimRig::new(config.pins().clone(), RigLayout::from(sim));
    if sim.feed_interval_ms > 0 {
        rig.auto_feed(std::time::Duration::from_millis(sim.feed_interval_ms), sim.item_distance_cm);
    }
    Backend::Simulated(rig)
}
