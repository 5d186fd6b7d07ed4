/// The four S0 failure kinds named in spec §4.E, kept distinct so the
/// command-handler's retry policy can tell a MAC failure from an expired
/// handshake.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("CBC-MAC did not match")]
    MacMismatch,
    #[error("no registered reply-nonce matches the frame's nonce identifier")]
    NonceUnknown,
    #[error("nonce was already consumed")]
    NonceReplay,
    #[error("Nonce-Get/Nonce-Report handshake did not complete in time")]
    NonceTimeout,
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for zwip_core::error::Error {
    fn from(value: Error) -> Self {
        match value {
            Error::MacMismatch => zwip_core::error::Error::MacMismatch,
            Error::NonceUnknown => zwip_core::error::Error::NonceUnknown,
            Error::NonceReplay => zwip_core::error::Error::NonceReplay,
            Error::NonceTimeout => zwip_core::error::Error::NonceTimeout,
        }
    }
}
