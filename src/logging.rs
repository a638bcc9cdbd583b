use simplelog::{CombinedLogger, Config, LevelFilter, WriteLogger};
use std::fs::{self, OpenOptions};
use std::io::{Error, ErrorKind};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;

static INIT: Once = Once::new();
static LOGGER_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Directory the file logger writes to: `$HOME/.local/share/stepsync/logs`
pub fn log_dir() -> Result<PathBuf, Error> {
    let home = std::env::var("HOME")
        .map_err(|_| Error::new(ErrorKind::NotFound, "HOME environment variable not set"))?;

    Ok(PathBuf::from(home)
        .join(".local")
        .join("share")
        .join("stepsync")
        .join("logs"))
}

/// Append log records to `app.log` under [`log_dir`].
///
/// Safe to call more than once; only the first call installs a logger.
pub fn init_logger(level: LevelFilter) -> Result<(), Error> {
    let log_dir = log_dir()?;
    fs::create_dir_all(&log_dir)?;

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("app.log"))?;

    INIT.call_once(|| {
        if let Ok(()) =
            CombinedLogger::init(vec![WriteLogger::new(level, Config::default(), log_file)])
        {
            LOGGER_INITIALIZED.store(true, Ordering::SeqCst);
        }
    });

    if LOGGER_INITIALIZED.load(Ordering::SeqCst) {
        Ok(())
    } else {
        Err(Error::new(ErrorKind::Other, "Logger initialization failed"))
    }
}

/// Log to stderr instead of a file. `RUST_LOG` overrides `level`.
pub fn init_stderr_logger(level: LevelFilter) -> Result<(), Error> {
    INIT.call_once(|| {
        if env_logger::Builder::new()
            .filter_level(level)
            .parse_default_env()
            .try_init()
            .is_ok()
        {
            LOGGER_INITIALIZED.store(true, Ordering::SeqCst);
        }
    });

    if LOGGER_INITIALIZED.load(Ordering::SeqCst) {
        Ok(())
    } else {
        Err(Error::new(ErrorKind::Other, "Logger initialization failed"))
    }
}
