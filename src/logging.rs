use std::any::Any;
use std::path::{Path, PathBuf};

use tracing_subscriber::prelude::*;
use tracing_subscriber::{registry, EnvFilter};

/// Directives used when `RUST_LOG` is unset. wgpu is chatty at `info`.
const DEFAULT_DIRECTIVES: &str = "info,wgpu_core=warn,wgpu_hal=warn,naga=warn";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// Sends all log records to the file at `file_path`, and records panics there as well.
///
/// Returns `false` when another subscriber is already installed. burn's learner only sets up its
/// own logger when none exists, so installing this first keeps the training logs in our file.
pub fn install_file_logger(file_path: impl AsRef<Path>) -> bool {
    let path = file_path.as_ref();
    let (Some(directory), Some(file_name)) = (path.parent(), path.file_name()) else {
        eprintln!("Not a log file path: {}", path.display());
        return false;
    };

    if let Err(err) = std::fs::create_dir_all(directory) {
        eprintln!("Could not create log directory {}: {err}", directory.display());
        return false;
    }

    let layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(tracing_appender::rolling::never(directory, file_name))
        .with_filter(env_filter());

    let installed = registry().with(layer).try_init().is_ok();
    if installed {
        log_panics(path.to_path_buf());
    }
    installed
}

/// Sends log records to stderr.
pub fn install_console_logger() -> bool {
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(env_filter());

    registry().with(layer).try_init().is_ok()
}

fn log_panics(log_file: PathBuf) {
    let previous = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|l| format!(" at {}:{}", l.file(), l.line()))
            .unwrap_or_default();
        log::error!("Panicked{location}: {}", panic_message(info.payload()));
        eprintln!("Run aborted, see {} for details", log_file.display());
        previous(info);
    }));
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_messages_are_extracted() {
        let literal: Box<dyn Any + Send> = Box::new("boom");
        let formatted: Box<dyn Any + Send> = Box::new(format!("index {}", 3));
        let other: Box<dyn Any + Send> = Box::new(42u8);

        assert_eq!(panic_message(literal.as_ref()), "boom");
        assert_eq!(panic_message(formatted.as_ref()), "index 3");
        assert_eq!(panic_message(other.as_ref()), "non-string payload");
    }

    #[test]
    fn default_directives_parse() {
        assert!(EnvFilter::try_new(DEFAULT_DIRECTIVES).is_ok());
    }

    #[test]
    fn rejects_paths_without_a_file_name() {
        assert!(!install_file_logger("/"));
    }
}
