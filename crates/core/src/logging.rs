//! Tracing setup and the in-overlay console sink
//!
//! Two sinks hang off the `tracing` registry: a plain-text log file next to
//! the settings file, and a bounded in-memory ring buffer that the F1
//! console window renders from. The ring buffer keeps the newest
//! [`CONSOLE_CAPACITY`] lines; the file keeps everything for the session.

use std::collections::VecDeque;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub const CONSOLE_CAPACITY: usize = 500;

static CONSOLE: Mutex<VecDeque<String>> = Mutex::new(VecDeque::new());

/// Snapshot of the console ring buffer, oldest first.
pub fn console_lines() -> Vec<String> {
    CONSOLE.lock().iter().cloned().collect()
}

pub fn clear_console() {
    CONSOLE.lock().clear();
}

fn push_console(line: String) {
    let mut buf = CONSOLE.lock();
    if buf.len() >= CONSOLE_CAPACITY {
        buf.pop_front();
    }
    buf.push_back(line);
}

struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            if !self.message.is_empty() {
                self.message.push(' ');
            }
            self.message
                .push_str(&format!("{}={:?}", field.name(), value));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_owned();
        } else {
            if !self.message.is_empty() {
                self.message.push(' ');
            }
            self.message.push_str(&format!("{}={}", field.name(), value));
        }
    }
}

/// Mirrors formatted events into the console ring buffer.
struct ConsoleLayer;

impl<S: Subscriber> Layer<S> for ConsoleLayer {
    fn on_event(&self, event: &Event<'_>, _cx: Context<'_, S>) {
        let mut visitor = MessageVisitor {
            message: String::new(),
        };
        event.record(&mut visitor);
        push_console(format!(
            "[{}] {}",
            event.metadata().level(),
            visitor.message
        ));
    }
}

#[derive(Clone)]
struct SharedFile(Arc<Mutex<File>>);

impl Write for SharedFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.lock().flush()
    }
}

fn open_log_file() -> Option<SharedFile> {
    let base = std::env::var_os("APPDATA")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
    let dir = base.join("grimoire").join("logs");
    std::fs::create_dir_all(&dir).ok()?;
    let stamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .ok()?
        .as_secs();
    let file = File::create(dir.join(format!("session_{stamp}.log"))).ok()?;
    Some(SharedFile(Arc::new(Mutex::new(file))))
}

/// Install the global subscriber: env filter, session log file, console
/// ring buffer. Safe to call more than once; later calls are no-ops.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("grimoire=debug,info"));

    let file_layer = open_log_file().map(|file| {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_writer(move || file.clone())
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(ConsoleLayer)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    // The ring buffer is process-global; tests touching it take this lock.
    static TEST_GUARD: Mutex<()> = Mutex::new(());

    #[test]
    fn test_console_ring_is_bounded() {
        let _guard = TEST_GUARD.lock();
        clear_console();
        for i in 0..CONSOLE_CAPACITY + 10 {
            push_console(format!("line {i}"));
        }
        let lines = console_lines();
        assert_eq!(lines.len(), CONSOLE_CAPACITY);
        assert_eq!(lines[0], "line 10");
        assert_eq!(lines.last().unwrap(), &format!("line {}", CONSOLE_CAPACITY + 9));
        clear_console();
        assert!(console_lines().is_empty());
    }

    #[test]
    fn test_console_layer_captures_events() {
        let _guard = TEST_GUARD.lock();
        clear_console();
        let subscriber = tracing_subscriber::registry().with(ConsoleLayer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("hello from the overlay");
        });
        let lines = console_lines();
        assert!(lines.iter().any(|l| l.contains("hello from the overlay")));
        assert!(lines.iter().any(|l| l.starts_with("[INFO]")));
        clear_console();
    }
}
