use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::sync::{LazyLock, Mutex};
use tracing::warn;

pub const DEBUG_ENV: &str = "OPENCODE_ANTIGRAVITY_DEBUG";

/// Opt-in debug sink for dispatch decisions.
///
/// Any truthy `OPENCODE_ANTIGRAVITY_DEBUG` opens
/// `antigravity-debug-<timestamp>.log` in the working directory; the sink is
/// inert otherwise.
static SINK: LazyLock<Option<Mutex<File>>> = LazyLock::new(|| {
    if !env_enabled() {
        return None;
    }
    let name = format!("antigravity-debug-{}.log", Utc::now().format("%Y%m%dT%H%M%S"));
    match OpenOptions::new().create(true).append(true).open(&name) {
        Ok(file) => Some(Mutex::new(file)),
        Err(e) => {
            warn!(file = %name, error = %e, "failed to open debug log sink");
            None
        }
    }
});

fn env_enabled() -> bool {
    match std::env::var(DEBUG_ENV) {
        Ok(value) => {
            let value = value.trim();
            !value.is_empty() && !value.eq_ignore_ascii_case("false") && value != "0"
        }
        Err(_) => false,
    }
}

pub fn enabled() -> bool {
    SINK.is_some()
}

/// Append one timestamped line. Cheap no-op when the sink is disabled.
pub fn line(msg: impl AsRef<str>) {
    let Some(sink) = SINK.as_ref() else {
        return;
    };
    if let Ok(mut file) = sink.lock() {
        let _ = writeln!(file, "[{}] {}", Utc::now().to_rfc3339(), msg.as_ref());
    }
}
