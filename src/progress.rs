//! Terminal progress for long catalog passes.
//!
//! Bars and spinners are drawn with indicatif. With `--log-only` they are
//! hidden and the run prints occasional `[phase] n/total` lines instead, which
//! read better under `tail -f` or a service journal.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const TRACK_TEMPLATE: &str =
    "{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}, ETA: {eta})";
const SPINNER_TEMPLATE: &str = "{msg} {spinner} [{elapsed_precise}]";

/// Set once from the command line.
pub static LOG_ONLY: AtomicBool = AtomicBool::new(false);

pub fn set_log_only(value: bool) {
    LOG_ONLY.store(value, Ordering::Relaxed);
}

pub fn is_log_only() -> bool {
    LOG_ONLY.load(Ordering::Relaxed)
}

/// `1.5s`, `2.0m` or `1.2h`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    match secs {
        s if s < 60.0 => format!("{:.1}s", s),
        s if s < 3600.0 => format!("{:.1}m", s / 60.0),
        s => format!("{:.1}h", s / 3600.0),
    }
}

fn styled(pb: ProgressBar, template: &str) -> ProgressBar {
    if is_log_only() {
        pb.set_draw_target(ProgressDrawTarget::hidden());
        return pb;
    }
    let style = if pb.length().is_some() {
        ProgressStyle::default_bar()
    } else {
        ProgressStyle::default_spinner()
    };
    pb.set_style(style.template(template).unwrap().progress_chars("=> "));
    pb
}

/// Bar over catalog positions. The length is set once the first page
/// reports the catalog size; `position` is where a resumed run starts.
pub fn create_track_bar(position: u64, msg: &str) -> ProgressBar {
    let pb = styled(ProgressBar::new(0), TRACK_TEMPLATE);
    pb.set_position(position);
    pb.set_message(msg.to_string());
    pb
}

/// Spinner for calls of unknown duration, such as library discovery.
pub fn create_spinner(msg: &str) -> ProgressBar {
    let pb = styled(ProgressBar::new_spinner(), SPINNER_TEMPLATE);
    if !is_log_only() {
        pb.enable_steady_tick(Duration::from_millis(100));
    }
    pb.set_message(msg.to_string());
    pb
}

/// Prints a progress line every `interval` positions and at the end, in
/// log-only mode only.
pub fn log_progress(phase: &str, current: u64, total: u64, interval: u64) {
    if !is_log_only() || interval == 0 {
        return;
    }
    if current % interval == 0 || current == total {
        eprintln!("{}", progress_line(phase, current, total));
    }
}

fn progress_line(phase: &str, current: u64, total: u64) -> String {
    if total == 0 {
        return format!("[{}] {}", phase, current);
    }
    let pct = 100.0 * current as f64 / total as f64;
    format!("[{}] {}/{} ({:.1}%)", phase, current, total, pct)
}
