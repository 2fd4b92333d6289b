//! Console formatting and subscriber setup.
//!
//! Console output goes to stderr so `stt-bench run` can print its CSV on
//! stdout. The file layer is plain text (or JSON) without ANSI codes.

use anyhow::Result;
use owo_colors::OwoColorize;
use std::fmt;
use std::io::IsTerminal;
use std::str::FromStr;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{self, FormatEvent, FormatFields};
use tracing_subscriber::fmt::time::{ChronoLocal, FormatTime};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogStyle {
    /// Icon and message only.
    Compact,
    #[default]
    Pretty,
    /// Pretty plus span scope and file:line.
    Verbose,
}

impl FromStr for LogStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "compact" => Ok(LogStyle::Compact),
            "pretty" => Ok(LogStyle::Pretty),
            "verbose" => Ok(LogStyle::Verbose),
            _ => Err(format!("invalid log style '{s}', expected compact, pretty or verbose")),
        }
    }
}

fn badge(level: Level) -> (&'static str, &'static str) {
    match level {
        Level::TRACE => ("·", "TRACE"),
        Level::DEBUG => ("●", "DEBUG"),
        Level::INFO => ("✓", "INFO"),
        Level::WARN => ("⚠", "WARN"),
        Level::ERROR => ("✕", "ERROR"),
    }
}

pub struct ConsoleFormatter<T> {
    timer: T,
    use_ansi: bool,
    style: LogStyle,
}

impl<T> ConsoleFormatter<T> {
    pub fn new(timer: T, style: LogStyle) -> Self {
        Self {
            timer,
            use_ansi: std::io::stderr().is_terminal(),
            style,
        }
    }

    fn write_badge(&self, writer: &mut format::Writer<'_>, level: Level) -> fmt::Result {
        let (icon, label) = badge(level);
        let text = match self.style {
            LogStyle::Compact => icon.to_string(),
            _ => format!("{icon} {label:<5}"),
        };
        if !self.use_ansi {
            return write!(writer, "{text}");
        }
        match level {
            Level::TRACE => write!(writer, "{}", text.dimmed()),
            Level::DEBUG => write!(writer, "{}", text.blue()),
            Level::INFO => write!(writer, "{}", text.green()),
            Level::WARN => write!(writer, "{}", text.yellow()),
            Level::ERROR => write!(writer, "{}", text.red().bold()),
        }
    }
}

impl<S, N, T> FormatEvent<S, N> for ConsoleFormatter<T>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
    T: FormatTime,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();

        self.timer.format_time(&mut writer)?;
        write!(writer, " ")?;
        self.write_badge(&mut writer, *meta.level())?;

        if self.style != LogStyle::Compact {
            if self.use_ansi {
                write!(writer, " {}", meta.target().dimmed())?;
            } else {
                write!(writer, " {}", meta.target())?;
            }
        }

        if self.style == LogStyle::Verbose {
            if let Some(scope) = ctx.event_scope() {
                for span in scope.from_root() {
                    write!(writer, " {}:", span.name())?;
                }
            }
            if let (Some(file), Some(line)) = (meta.file(), meta.line()) {
                let short = file.rsplit('/').next().unwrap_or(file);
                write!(writer, " {short}:{line}")?;
            }
        }

        write!(writer, " ")?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

pub struct LogConfig {
    pub log_dir: String,
    pub instance_name: String,
    pub log_level: String,
    pub silent: bool,
    pub json: bool,
    pub style: LogStyle,
}

/// Installs the global subscriber. The returned guard must be held for as
/// long as file logging should keep flushing.
pub fn init(config: LogConfig) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::prelude::*;

    std::fs::create_dir_all(&config.log_dir)?;
    let file_appender =
        tracing_appender::rolling::daily(&config.log_dir, format!("log.{}", config.instance_name));
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let filter = tracing_subscriber::filter::LevelFilter::from_str(&config.log_level)?;
    let timer = ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string());

    let file_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_timer(timer.clone())
            .with_target(true)
            .with_writer(non_blocking_file)
            .with_filter(filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .event_format(
                tracing_subscriber::fmt::format()
                    .with_timer(timer.clone())
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true)
                    .with_ansi(false),
            )
            .with_writer(non_blocking_file)
            .with_filter(filter)
            .boxed()
    };

    let console_layer = match (config.silent, config.json) {
        (true, _) => None,
        (false, true) => Some(
            tracing_subscriber::fmt::layer()
                .json()
                .with_timer(timer)
                .with_writer(std::io::stderr)
                .with_filter(filter)
                .boxed(),
        ),
        (false, false) => Some(
            tracing_subscriber::fmt::layer()
                .event_format(ConsoleFormatter::new(timer, config.style))
                .with_writer(std::io::stderr)
                .with_filter(filter)
                .boxed(),
        ),
    };

    tracing_subscriber::registry().with(file_layer).with(console_layer).try_init()?;

    tracing::info!(
        log_dir = %config.log_dir,
        level = %config.log_level,
        json = config.json,
        "logging initialized"
    );
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_style_parses_case_insensitively() {
        assert_eq!(LogStyle::from_str("compact").unwrap(), LogStyle::Compact);
        assert_eq!(LogStyle::from_str("Pretty").unwrap(), LogStyle::Pretty);
        assert_eq!(LogStyle::from_str("VERBOSE").unwrap(), LogStyle::Verbose);
        assert!(LogStyle::from_str("loud").is_err());
    }

    #[test]
    fn badges_cover_every_level() {
        assert_eq!(badge(Level::INFO), ("✓", "INFO"));
        assert_eq!(badge(Level::WARN).0, "⚠");
        assert_eq!(badge(Level::ERROR).1, "ERROR");
    }
}
