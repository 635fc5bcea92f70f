use thiserror::Error;

#[derive(Error, Debug)]
pub enum UsbResetError {
    #[error("reset utility not found on PATH: {0}")]
    UtilityNotFound(#[source] std::io::Error),

    #[error("reset utility exited with failure status: {0}")]
    UtilityFailed(std::process::ExitStatus),
}
