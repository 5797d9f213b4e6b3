//! Logs to standard error.

use std::io::Write;

use log::LevelFilter;
use spin::Once;

pub struct Console {
    level: LevelFilter,
    /// Include the source location and target of every record.
    detailed: bool,
}

static DEFAULT: Once<Console> = Once::new();

impl Console {
    /// Installs the console as the global logger. `verbosity` counts `-v` flags.
    pub fn init(verbosity: u8) -> Result<&'static Self, log::SetLoggerError> {
        let level = match verbosity {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        let console = DEFAULT.call_once(|| Console {
            level,
            detailed: level >= LevelFilter::Debug,
        });
        console.install()?;
        Ok(console)
    }

    fn install(&'static self) -> Result<(), log::SetLoggerError> {
        log::set_logger(self)?;
        log::set_max_level(self.level);
        Ok(())
    }
}

impl log::Log for Console {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mut stderr = std::io::stderr().lock();
        let _ = write_log_entry_to(&mut stderr, record, self.detailed);
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

fn write_log_entry_to(
    writer: &mut impl Write,
    record: &log::Record,
    detailed: bool,
) -> std::io::Result<()> {
    if detailed {
        writeln!(
            writer,
            "[{} {}:{} {}] {}",
            record.level(),
            record.file().unwrap_or("unknown"),
            record.line().unwrap_or(0),
            record.target(),
            record.args()
        )
    } else {
        writeln!(writer, "[{:5}] {}", record.level(), record.args())
    }
}
