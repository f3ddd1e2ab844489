//! Console progress output
//!
//! Prints rollout progress as `[service] message` lines, the prefix padded
//! to the longest service name so concurrent rollouts line up.

use colored::*;
use hoist_engine::{ProgressEvent, ProgressSink};
use std::io::{self, Write};
use std::sync::Mutex;

/// Progress sink writing one line per event
pub struct ConsoleProgress {
    width: usize,
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleProgress {
    /// Console sink on stdout, padded for `services`
    pub fn new(services: &[String]) -> Self {
        Self::with_writer(services, io::stdout())
    }

    pub fn with_writer(services: &[String], out: impl Write + Send + 'static) -> Self {
        Self {
            width: services.iter().map(String::len).max().unwrap_or(0),
            out: Mutex::new(Box::new(out)),
        }
    }

    fn line(&self, service: &str, message: &str) -> String {
        let prefix = format!("[{:<width$}]", service, width = self.width);
        let message = if message.starts_with("FAILED") {
            message.red().to_string()
        } else if message.starts_with("warning") {
            message.yellow().to_string()
        } else if message == "done" || message == "healthcheck passed" {
            message.green().to_string()
        } else {
            message.to_string()
        };
        format!("{} {}", prefix.cyan(), message)
    }
}

impl ProgressSink for ConsoleProgress {
    fn notify(&self, event: ProgressEvent) {
        let line = self.line(&event.service, &event.message);
        let mut out = self.out.lock().unwrap();
        // Nothing useful to do when stdout is gone
        let _ = writeln!(out, "{}", line);
        let _ = out.flush();
    }
}
