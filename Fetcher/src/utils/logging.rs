// src/utils/logging.rs

//! Log output for the CLI: `env_logger` writing every line to stderr and,
//! when configured, appending it to a log file as well.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Writer that copies everything to stderr and an optional file.
///
/// A file write error disables the file side for the rest of the run;
/// stderr output continues.
pub struct TeeWriter {
    file: Option<File>,
}

impl TeeWriter {
    pub fn new(file: Option<File>) -> Self {
        Self { file }
    }
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        if let Some(file) = self.file.as_mut() {
            if file.write_all(buf).is_err() {
                self.file = None;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush();
        }
        io::stderr().flush()
    }
}

fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Install the global logger.
///
/// `RUST_LOG` wins over `level`; `verbose` lowers the default to debug.
pub fn init(level: &str, verbose: bool, log_file: Option<&Path>) {
    let level = if verbose { "debug" } else { level };

    let (file, open_error) = match log_file.map(open_log_file) {
        Some(Ok(file)) => (Some(file), None),
        Some(Err(e)) => (None, Some(e)),
        None => (None, None),
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .target(env_logger::Target::Pipe(Box::new(TeeWriter::new(file))))
        .init();

    if let (Some(path), Some(e)) = (log_file, open_error) {
        log::warn!("Cannot open log file {}: {}", path.display(), e);
    }
}
