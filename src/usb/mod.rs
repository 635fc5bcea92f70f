pub mod error;
pub mod resetter;

pub use error::UsbResetError;
pub use resetter::{UsbResetter, SETTLING_DELAY};
