use std::fmt;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::registry::LookupSpan;

/// Renders events as journald-native `KEY=value` field blocks
/// (`PRIORITY`, `TARGET`, `MESSAGE`) instead of a single formatted
/// line, so a process run under systemd surfaces structured fields in
/// `journalctl -o verbose` without a separate libsystemd binding.
pub struct JournaldFormat;

impl<S, N> FormatEvent<S, N> for JournaldFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(&self, ctx: &FmtContext<'_, S, N>, mut writer: Writer<'_>, event: &Event<'_>) -> fmt::Result {
        let meta = event.metadata();
        writeln!(writer, "PRIORITY={}", priority(meta.level()))?;
        writeln!(writer, "TARGET={}", meta.target())?;
        write!(writer, "MESSAGE=")?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)?;
        writeln!(writer)
    }
}

fn priority(level: &Level) -> u8 {
    match *level {
        Level::ERROR => 3,
        Level::WARN => 4,
        Level::INFO => 6,
        Level::DEBUG => 7,
        Level::TRACE => 7,
    }
}

/// Initializes the global tracing subscriber. `journald` switches the
/// event formatter to [`JournaldFormat`]; otherwise this matches the
/// teacher's plain `tracing_subscriber::fmt().init()`
/// (`crates/cli/src/main.rs`).
pub fn init_logging(journald: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if journald {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .event_format(JournaldFormat)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
