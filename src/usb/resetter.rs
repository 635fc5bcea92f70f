use std::process::Command;
use std::time::Duration;

use crate::clock::Clock;
use crate::policy::UsbIdentity;

use super::error::UsbResetError;

/// The delay after a successful reset, to let the device re-enumerate before the child is
/// respawned (§4.5).
pub const SETTLING_DELAY: Duration = Duration::from_millis(500);

/// Invokes an unprivileged bus-reset on a USB device (§4.5). No crate in this corpus binds the
/// OS's USB-reset ioctl directly, so rather than hand-roll an FFI binding this shells out to the
/// standard unprivileged Linux `usbreset` utility, addressed by `vendor:product`, the same
/// spawn-and-wait shape used for the supervised child itself.
pub struct UsbResetter {
    reset_binary: String,
}

impl Default for UsbResetter {
    fn default() -> Self {
        Self {
            reset_binary: "usbreset".to_string(),
        }
    }
}

impl UsbResetter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binary(reset_binary: impl Into<String>) -> Self {
        Self {
            reset_binary: reset_binary.into(),
        }
    }

    fn reset(&self, identity: &UsbIdentity) -> Result<(), UsbResetError> {
        let address = format!("{:04x}:{:04x}", identity.vendor_id, identity.product_id);
        let status = Command::new(&self.reset_binary)
            .arg(&address)
            .status()
            .map_err(UsbResetError::UtilityNotFound)?;

        if status.success() {
            Ok(())
        } else {
            Err(UsbResetError::UtilityFailed(status))
        }
    }

    /// Resets the device and then waits [`SETTLING_DELAY`] for it to re-enumerate. Reset
    /// failure is never treated as fatal by the caller (§4.5): this only logs and returns the
    /// error so the supervisor can decide to proceed with respawn regardless.
    pub fn reset_and_settle(&self, identity: &UsbIdentity, clock: &dyn Clock) -> Result<(), UsbResetError> {
        match self.reset(identity) {
            Ok(()) => {
                clock.sleep(SETTLING_DELAY);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "usb bus reset failed, proceeding without it");
                Err(e)
            }
        }
    }
}
