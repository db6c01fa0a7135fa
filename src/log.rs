//! Diagnostic output on stderr.
//!
//! Lines are prefixed with the sd-daemon severity markers (`<2>`, `<3>`, ...)
//! so that journald files them at the right priority. Everything goes through
//! `tracing`; this module only installs the subscriber and the line format.

use std::fmt;

use tracing::{Event, Level, Subscriber};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// Target that upgrades an error-level event to critical severity.
pub const CRITICAL_TARGET: &str = "fluxel::critical";

const SD_CRIT: &str = "<2>";
const SD_ERR: &str = "<3>";
const SD_WARNING: &str = "<4>";
const SD_INFO: &str = "<6>";
const SD_DEBUG: &str = "<7>";

/// Emits an event with critical severity.
#[macro_export]
macro_rules! critical {
    ($($arg:tt)+) => {
        ::tracing::error!(target: $crate::log::CRITICAL_TARGET, $($arg)+)
    };
}

/// One line per event: severity prefix, then the formatted fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct SdDaemonFormat;

impl<S, N> FormatEvent<S, N> for SdDaemonFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(
            writer,
            "{}",
            severity_prefix(metadata.level(), metadata.target())
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

pub(crate) fn severity_prefix(level: &Level, target: &str) -> &'static str {
    if *level == Level::ERROR {
        if target == CRITICAL_TARGET {
            SD_CRIT
        } else {
            SD_ERR
        }
    } else if *level == Level::WARN {
        SD_WARNING
    } else if *level == Level::INFO {
        SD_INFO
    } else {
        SD_DEBUG
    }
}

/// Installs the stderr subscriber, filtered by `RUST_LOG` (default `info`).
///
/// Calling it again after a subscriber is installed has no effect.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .event_format(SdDaemonFormat)
        .try_init();
}
