#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialport(#[from] tokio_serial::Error),
    #[error("no ACK/RESPONSE received within budget")]
    Timeout,
    #[error("bad checksum or frame length")]
    Framing,
    #[error("command {0:#04x} is not in the module's supported-command bitmap")]
    Unsupported(u8),
    #[error("RX queue is full, frame dropped")]
    QueueOverflow,
    #[error("the dispatcher actor has shut down")]
    Disconnected,
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for zwip_core::error::Error {
    fn from(value: Error) -> Self {
        match value {
            Error::Timeout => zwip_core::error::Error::SerialTimeout,
            Error::Framing => zwip_core::error::Error::SerialFramingError("checksum/length".into()),
            Error::Unsupported(cmd) => zwip_core::error::Error::UnsupportedCommand(cmd),
            Error::QueueOverflow => zwip_core::error::Error::QueueOverflow,
            other => zwip_core::error::Error::SerialFramingError(other.to_string()),
        }
    }
}
