pub use crate::definitions::*;
pub use crate::error::{Error, Result};
pub use crate::log::{LogPayload, Loglevel, ToLogPayload};
pub use crate::parse::{ParseResult, Parsable};
pub use crate::serialize::Serializable;
