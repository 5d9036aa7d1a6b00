use anyhow::Result;
use log::{LevelFilter, Log, Metadata, Record};
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

const LOG_FILE_NAME: &str = "records.log";

/// Appends log lines to `records.log` and forwards them to an optional application logger
pub struct SdkLogger {
    app_logger: Option<Box<dyn Log>>,
    log_file: Mutex<Option<File>>,
}

impl SdkLogger {
    /// Opens (or creates) the log file under `log_dir`, creating the directory if needed
    pub fn new(log_dir: &str, app_logger: Option<Box<dyn Log>>) -> Result<Self> {
        let log_path = Path::new(log_dir);
        if !log_path.exists() {
            create_dir_all(log_path)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path.join(LOG_FILE_NAME))?;

        Ok(Self {
            app_logger,
            log_file: Mutex::new(Some(file)),
        })
    }

    /// Installs the logger globally
    ///
    /// Fails if a global logger is already set.
    pub fn init(log_dir: &str, app_logger: Option<Box<dyn Log>>) -> Result<()> {
        let logger = Self::new(log_dir, app_logger)?;
        log::set_boxed_logger(Box::new(logger))?;
        log::set_max_level(LevelFilter::Debug);
        Ok(())
    }

    fn format(record: &Record) -> String {
        format!(
            "{} [{}] {}: {}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            record.level(),
            record.target(),
            record.args()
        )
    }
}

impl Log for SdkLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let line = Self::format(record);
        if let Ok(mut file_guard) = self.log_file.lock() {
            if let Some(file) = file_guard.as_mut() {
                let _ = file.write_all(line.as_bytes());
                let _ = file.flush();
            }
        }

        if let Some(app_logger) = &self.app_logger {
            app_logger.log(record);
        }
    }

    fn flush(&self) {
        if let Ok(mut file_guard) = self.log_file.lock() {
            if let Some(file) = file_guard.as_mut() {
                let _ = file.flush();
            }
        }

        if let Some(app_logger) = &self.app_logger {
            app_logger.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;

    #[test]
    fn test_writes_to_records_log() {
        let dir = std::env::temp_dir().join(format!("records-log-{}", uuid::Uuid::new_v4()));
        let log_dir = dir.to_string_lossy().to_string();
        let logger = SdkLogger::new(&log_dir, None).unwrap();
        log::set_max_level(LevelFilter::Debug);

        logger.log(
            &Record::builder()
                .args(format_args!("Loaded 3 students"))
                .level(Level::Error)
                .target("student_records_sdk::cache")
                .build(),
        );
        logger.flush();

        let contents = std::fs::read_to_string(dir.join(LOG_FILE_NAME)).unwrap();
        assert!(contents.contains("[ERROR] student_records_sdk::cache: Loaded 3 students"));
        let _ = std::fs::remove_dir_all(dir);
    }
}
