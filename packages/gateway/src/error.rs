//! The gateway crate's top-level error type (spec §7): wraps the lower
//! crates' own error types with `#[from]`, the same pattern
//! `zwip_serial::error::Error` and `zwip_security::error::Error` use one
//! layer down, plus the couple of failure modes native to this crate.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] zwip_core::error::Error),
    #[error(transparent)]
    Serial(#[from] zwip_serial::error::Error),
    #[error(transparent)]
    Security(#[from] zwip_security::error::Error),
    #[error("malformed Z/IP packet: {0}")]
    ZipFraming(String),
    #[error("missing required configuration: {0}")]
    ConfigMissing(&'static str),
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
}

pub type Result<T> = std::result::Result<T, Error>;
