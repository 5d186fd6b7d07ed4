//! SHMP — the Serial Host-Module Protocol link to the Z-Wave radio module
//! (spec §4.A–§4.C). Grounded in the teacher's `zwave-serial` crate: a
//! `SerialBinding` trait over the byte stream (`binding.rs`), a `nom`-based
//! frame grammar (`frame.rs`), and a capability-gated request/response
//! dispatcher built as an actor + handle pair (`driver/serial_api/actor.rs`,
//! `handle.rs`).

pub mod binding;
pub mod consts;
pub mod dispatcher;
pub mod error;
pub mod frame;
pub mod ring;

pub mod prelude {
    pub use crate::consts::*;
    pub use crate::dispatcher::{await_func_id_callback, Dispatcher, DispatcherHandle, CALLBACK_BUDGET};
    pub use crate::error::{Error, Result};
    pub use crate::frame::{CommandFrame, SerialFrame};
}
