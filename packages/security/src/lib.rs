//! Z-Wave Security S0 (spec §4.D/§4.E): nonce bookkeeping and the
//! encrypt/decrypt transport built on top of it. Grounded in the teacher's
//! `zwave-core::security` module, trimmed to the S0 subset this gateway
//! needs (no S2 CCM/ECDH/CMAC chain).

pub mod crypto;
pub mod error;
pub mod nonce;
pub mod transport;

pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::nonce::{NonceBlacklist, NonceStore, BLACKLIST_CAPACITY, NONCE_CAPACITY};
    pub use crate::transport::{S0Keys, S0Transport};
}
