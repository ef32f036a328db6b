//! Structured logging module using tracing
//!
//! Console (stderr) output plus an optional append-only log file, with the
//! level taken from the `-v` count on the command line.

use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Ellipse a string for display: first half + "..." + last half (no truncation of one end).
/// If `s` has ≤ `max_len` chars, returns `s` unchanged. Otherwise returns
/// `s[0..first_n] + "..." + s[last_n..]` where first_n + 3 + last_n ≤ max_len.
pub fn ellipse(s: &str, max_len: usize) -> String {
    const SEP: &str = "...";
    let sep_len = 3;
    let chars: Vec<char> = s.chars().collect();
    let n = chars.len();
    if n <= max_len {
        return s.to_string();
    }
    if max_len <= sep_len {
        return chars[..max_len].iter().collect();
    }
    let first_count = (max_len - sep_len) / 2;
    let last_count = (max_len - sep_len) - first_count;
    let first: String = chars[..first_count].iter().collect();
    let last: String = chars[n - last_count..].iter().collect();
    format!("{}{}{}", first, SEP, last)
}

/// First `max_chars` characters of `s`. Never splits a UTF-8 sequence.
pub fn preview(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s,
    }
}

/// Map the `-v` count to a level filter.
fn filter_level(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    }
}

/// Initialize tracing with console and (optionally) file output.
///
/// The command-line verbosity decides the level; `RUST_LOG` is ignored so the
/// `-v` flags are the only switch.
pub fn init_tracing(verbosity: u8, log_file_path: Option<PathBuf>) {
    let filter = EnvFilter::new(filter_level(verbosity));

    let registry = tracing_subscriber::registry().with(filter);

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let file = log_file_path.and_then(|log_path| {
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .ok()
    });

    if let Some(file) = file {
        let file_layer = fmt::layer()
            .with_writer(file)
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_ansi(false);

        registry.with(console_layer).with(file_layer).init();
    } else {
        // Console only when no path was given or the file can't be opened
        registry.with(console_layer).init();
    }
}
