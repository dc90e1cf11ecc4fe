//! LRC sidecar formatting.
//!
//! Derived timing is a placeholder: every non-blank line of plain lyrics is
//! spaced a fixed interval apart from `00:00.00`. It does not follow the
//! vocals, which is why such output carries the `derived-timing` provenance.

/// Seconds between consecutive lines when timing is synthesized.
pub const DERIVED_LINE_INTERVAL_SECS: u64 = 4;

/// Formats whole seconds as an LRC time tag, e.g. `[01:04.00]`.
pub fn format_time_tag(total_secs: u64) -> String {
    let minutes = total_secs / 60;
    let seconds = total_secs % 60;
    format!("[{:02}:{:02}.00]", minutes, seconds)
}

/// Turns plain lyrics into timed LRC text.
///
/// Blank lines are dropped before indexing, so line `i` of the surviving
/// lines is stamped at `i * interval_secs`.
pub fn synthesize_timing(plain: &str, interval_secs: u64) -> String {
    let mut out = String::with_capacity(plain.len() + plain.len() / 4);
    let lines = plain
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty());
    for (i, line) in lines.enumerate() {
        out.push_str(&format_time_tag(i as u64 * interval_secs));
        out.push_str(line);
        out.push('\n');
    }
    out
}
