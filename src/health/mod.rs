pub mod layers;
pub mod process_state;

use std::fmt;

pub use layers::{
    BusProbe, BusRoundTripProbe, DevicePresenceProbe, HandshakeProbe, LayeredProbe, TransportProbe,
};
pub use process_state::{ProcessState, ProcessStateProbe, ProcessStateReader, ProcfsStateReader};

/// Which of the five layers (§4.4) produced a given [`ProbeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    L0DevicePresence,
    L1ProcessState,
    L2Transport,
    L3Handshake,
    L4BusRoundTrip,
}

/// A health-probe failure, carrying the recoverable/non-recoverable classification the
/// watchdog consumes without guessing (§4.4, §7). L0 failures are always non-recoverable;
/// every other layer is recoverable.
#[derive(Debug, Clone)]
pub struct ProbeError {
    pub layer: Layer,
    pub recoverable: bool,
    pub message: String,
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.layer, self.message)
    }
}

impl std::error::Error for ProbeError {}

/// The single callable the watchdog invokes each tick (§4.3, §9: "the probe is a single
/// callable injected at construction"). [`LayeredProbe`] is the recommended composition of
/// L0-L4 behind this one trait object.
pub trait HealthProbe: Send {
    fn check(&mut self, pid: u32, timeout: std::time::Duration) -> Result<(), ProbeError>;
}
