use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("io error")]
    Io(#[source] std::io::Error),

    #[error("system error")]
    Nix(#[source] nix::Error),
}

impl From<std::io::Error> for ProcessError {
    fn from(value: std::io::Error) -> Self {
        ProcessError::Io(value)
    }
}

impl From<nix::Error> for ProcessError {
    fn from(value: nix::Error) -> Self {
        ProcessError::Nix(value)
    }
}
