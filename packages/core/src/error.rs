//! The shared error taxonomy (spec §7). Lower-level crates produce these
//! variants directly; higher-level crates wrap them with `#[from]`.

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("no ACK/RESPONSE received within budget")]
    SerialTimeout,
    #[error("serial framing error: {0}")]
    SerialFramingError(String),
    #[error("command {0:#04x} is not in the module's supported-command bitmap")]
    UnsupportedCommand(u8),
    #[error("RX queue is full, frame dropped")]
    QueueOverflow,
    #[error("nonce handshake timed out")]
    NonceTimeout,
    #[error("nonce was reused (replay)")]
    NonceReplay,
    #[error("CBC-MAC did not match")]
    MacMismatch,
    #[error("no receiver nonce registered for this exchange")]
    NonceUnknown,
    #[error("no resource directory entry for node {0}")]
    NodeUnknown(u16),
    #[error("out of memory / table full")]
    OutOfMemory,
    #[error("on-disk record was invalid and has been ignored: {0}")]
    ConfigInvalid(String),
}

pub type Result<T> = std::result::Result<T, Error>;
