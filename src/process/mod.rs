pub mod error;
pub mod handle;
pub mod output_capture;

pub use error::ProcessError;
pub use handle::{kill_group, signal_group, spawn_in_new_group, terminate_group};
pub use output_capture::{spawn_readers, Logger, Stream, TracingLogger};
