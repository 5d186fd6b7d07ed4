use crate::{Channel, LogEntry};
use termcolor::{Color, ColorSpec};
use zwip_core::log::{LogPayload, Loglevel};

pub struct FormattedLine {
    pub text: String,
    pub color: ColorSpec,
}

fn channel_color(channel: Channel) -> Color {
    match channel {
        Channel::Serial => Color::Cyan,
        Channel::Security => Color::Magenta,
        Channel::ResourceDirectory => Color::Green,
        Channel::Netif => Color::Blue,
        Channel::Router => Color::Yellow,
    }
}

fn level_marker(level: Loglevel) -> &'static str {
    match level {
        Loglevel::Error => "ERR",
        Loglevel::Warn => "WRN",
        Loglevel::Info => "INF",
        Loglevel::Verbose => "VRB",
        Loglevel::Debug => "DBG",
    }
}

/// Renders a [`LogEntry`] into one or more colored lines, mirroring the
/// teacher's `LogFormatter::format_log` but for the smaller [`LogPayload`]
/// shape this crate carries (see `zwip_core::log`).
pub fn format_entry(entry: &LogEntry) -> Vec<FormattedLine> {
    let mut color = ColorSpec::new();
    color.set_fg(Some(channel_color(entry.channel)));

    let prefix = format!(
        "[{}] [{}] ",
        level_marker(entry.level),
        entry.channel.tag()
    );

    match &entry.payload {
        LogPayload::Flat(line) => vec![FormattedLine {
            text: format!("{prefix}{line}"),
            color,
        }],
        LogPayload::Dict { title, fields } => {
            let mut lines = vec![FormattedLine {
                text: format!("{prefix}{title}"),
                color: color.clone(),
            }];
            for (key, value) in fields {
                lines.push(FormattedLine {
                    text: format!("  {key}: {value}"),
                    color: color.clone(),
                });
            }
            lines
        }
    }
}
