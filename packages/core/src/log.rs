//! A deliberately smaller structured-logging payload type than the
//! teacher's `zwave_core::log` (which supports nested dict/list/text trees
//! with indentation math); this keeps the `Text`/`Dict`/`Flat` shapes the
//! gateway's loggers actually use (see `zwip-logging`) without the
//! full rendering engine, since the gateway has far fewer log call sites
//! than a complete CC-aware driver.

use std::borrow::Cow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Loglevel {
    Error,
    Warn,
    Info,
    Verbose,
    Debug,
}

#[derive(Clone, Debug)]
pub enum LogPayload {
    /// A single pre-formatted line.
    Flat(Cow<'static, str>),
    /// A title line followed by `key: value` pairs, indented.
    Dict {
        title: Cow<'static, str>,
        fields: Vec<(Cow<'static, str>, Cow<'static, str>)>,
    },
}

pub trait ToLogPayload {
    fn to_log_payload(&self) -> LogPayload;
}

impl ToLogPayload for str {
    fn to_log_payload(&self) -> LogPayload {
        LogPayload::Flat(Cow::Owned(self.to_owned()))
    }
}

impl ToLogPayload for String {
    fn to_log_payload(&self) -> LogPayload {
        LogPayload::Flat(Cow::Owned(self.clone()))
    }
}

impl From<&'static str> for LogPayload {
    fn from(s: &'static str) -> Self {
        LogPayload::Flat(Cow::Borrowed(s))
    }
}

impl From<String> for LogPayload {
    fn from(s: String) -> Self {
        LogPayload::Flat(Cow::Owned(s))
    }
}
