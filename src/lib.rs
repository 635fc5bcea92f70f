//! Subprocess supervisor, layered watchdog, and USB recovery chain for a KNX bus daemon.
//!
//! This crate is embedded in a larger binary (the CLI, MQTT bridge, HTTP API, device registry,
//! and wall-panel UI that make up the rest of the building-automation controller are out of
//! scope here) and exposes no CLI surface of its own.

pub mod backoff;
pub mod clock;
pub mod context;
pub mod error;
pub mod health;
pub mod hooks;
pub mod policy;
pub mod process;
pub mod stats;
pub mod supervisor;
pub mod usb;
mod watchdog;

pub use backoff::{compute_backoff, Backoff};
pub use clock::{Clock, SystemClock};
pub use context::{Context, Done};
pub use error::{KillOutcome, SupervisorError};
pub use health::{
    BusProbe, BusRoundTripProbe, DevicePresenceProbe, HandshakeProbe, HealthProbe, Layer,
    LayeredProbe, ProbeError, ProcessState, ProcessStateProbe, ProcessStateReader,
    ProcfsStateReader, TransportProbe,
};
pub use hooks::{ClosureHooks, NoopHooks, SupervisorHooks};
pub use policy::{SupervisorPolicy, UsbIdentity};
pub use process::{Logger, Stream, TracingLogger};
pub use stats::{Stats, Status};
pub use supervisor::Supervisor;
pub use usb::{UsbResetError, UsbResetter};
