//! The byte-stream backend behind the [`crate::ring::RxRing`]+framer,
//! grounded in the teacher's `serial/src/binding.rs` (`SerialBinding`
//! trait) and `serial/src/serialport.rs` (a real `tokio_serial` port and a
//! TCP-loopback stand-in used for tests without a physical UART).

use crate::error::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::SerialPortBuilderExt;

pub trait SerialBinding: Send {
    fn write(&mut self, bytes: &[u8]) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Reads whatever bytes are currently available, blocking until at
    /// least one arrives. Returns `None` on EOF/disconnect.
    fn read(&mut self) -> impl std::future::Future<Output = Option<Vec<u8>>> + Send;
}

pub struct UartPort {
    inner: tokio_serial::SerialStream,
}

impl UartPort {
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        let mut port = tokio_serial::new(path, baud_rate).open_native_async()?;
        #[cfg(unix)]
        port.set_exclusive(false)?;
        Ok(Self { inner: port })
    }
}

impl SerialBinding for UartPort {
    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes).await?;
        Ok(())
    }

    async fn read(&mut self) -> Option<Vec<u8>> {
        let mut buf = [0u8; 256];
        match self.inner.read(&mut buf).await {
            Ok(0) | Err(_) => None,
            Ok(n) => Some(buf[..n].to_vec()),
        }
    }
}

/// A TCP-socket stand-in for the UART, used by integration tests and by
/// the `--tcp` CLI flag when no physical radio module is attached.
pub struct TcpPort {
    inner: tokio::net::TcpStream,
}

impl TcpPort {
    pub async fn connect(addr: &str) -> Result<Self> {
        let inner = tokio::net::TcpStream::connect(addr).await?;
        Ok(Self { inner })
    }

    pub fn from_stream(inner: tokio::net::TcpStream) -> Self {
        Self { inner }
    }
}

impl SerialBinding for TcpPort {
    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes).await?;
        Ok(())
    }

    async fn read(&mut self) -> Option<Vec<u8>> {
        let mut buf = [0u8; 256];
        match self.inner.read(&mut buf).await {
            Ok(0) | Err(_) => None,
            Ok(n) => Some(buf[..n].to_vec()),
        }
    }
}
