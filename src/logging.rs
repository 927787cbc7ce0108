// src/logging.rs
//
// Timestamped stderr logging with an optional mirror file.
// Every component logs through `tlog!` with a `[component]` tag.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Global log file handle. When `Some`, `tlog!` writes to both stderr and this file.
pub(crate) static LOG_FILE: Mutex<Option<std::fs::File>> = Mutex::new(None);

/// Initialise file logging in the given directory.
/// Creates a timestamped log file and a `senselink.log` symlink (Unix only).
/// Returns the path of the new log file.
pub fn init_file_logging(log_dir: &Path) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(log_dir)?;

    let filename = chrono::Local::now()
        .format("%Y%m%d-%H%M%S-senselink.log")
        .to_string();
    let log_path = log_dir.join(&filename);

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // Symlinks on Windows require elevated privileges
    #[cfg(unix)]
    {
        let symlink_path = log_dir.join("senselink.log");
        let _ = std::fs::remove_file(&symlink_path);
        if let Err(e) = std::os::unix::fs::symlink(&filename, &symlink_path) {
            eprintln!(
                "{} [logging] Failed to create senselink.log symlink: {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                e
            );
        }
    }

    if let Ok(mut guard) = LOG_FILE.lock() {
        *guard = Some(file);
    }

    // tlog! would take the LOG_FILE lock again, write directly
    eprintln!(
        "{} [logging] File logging started: {}",
        chrono::Local::now().format("%H:%M:%S%.3f"),
        log_path.display()
    );

    Ok(log_path)
}

/// Stop file logging and close the log file.
pub fn stop_file_logging() {
    if let Ok(mut guard) = LOG_FILE.lock() {
        if guard.is_some() {
            *guard = None;
            eprintln!(
                "{} [logging] File logging stopped",
                chrono::Local::now().format("%H:%M:%S%.3f")
            );
        }
    }
}

/// Whether a mirror log file is currently open.
pub fn file_logging_active() -> bool {
    LOG_FILE.lock().map(|guard| guard.is_some()).unwrap_or(false)
}

/// Timestamped logging macro.
/// Prepends `HH:MM:SS.mmm` local time to every message written to stderr.
/// Also writes to the log file when file logging is enabled.
macro_rules! tlog {
    ($($arg:tt)*) => {{
        use std::io::Write as _;
        let msg = format!("{} {}", chrono::Local::now().format("%H:%M:%S%.3f"), format_args!($($arg)*));
        eprintln!("{}", msg);
        if let Ok(mut guard) = $crate::logging::LOG_FILE.lock() {
            if let Some(ref mut f) = *guard {
                let _ = writeln!(f, "{}", msg);
            }
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_logging_mirrors_messages() {
        let dir = tempfile::tempdir().unwrap();
        let path = init_file_logging(dir.path()).unwrap();
        assert!(file_logging_active());

        tlog!("[logging-test] hello {}", 42);
        stop_file_logging();
        assert!(!file_logging_active());

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[logging-test] hello 42"));
    }
}
