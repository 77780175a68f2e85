use chrono::{DateTime, TimeDelta, Utc};

const MAX_ADJUSTED_LENGTH: usize = 30;

/// Makes a string safe for use in file names, keeping its case.
/// `max_length` of 0 applies the default limit.
pub fn adjust_for_filename(s: &str, max_length: usize) -> String {
    let max_length = if max_length == 0 {
        MAX_ADJUSTED_LENGTH
    } else {
        max_length
    };

    let mut out = String::with_capacity(s.len());
    let mut pending_separator = false;
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_separator && !out.is_empty() {
                out.push('-');
            }
            pending_separator = false;
            out.push(c);
        } else {
            pending_separator = true;
        }
    }

    if out.len() > max_length {
        // Truncate at a word boundary when possible.
        let cut = out[..max_length].rfind('-').unwrap_or(max_length);
        return out[..cut].trim_end_matches('-').to_string();
    }
    out
}

/// Formats a timestamp for file names: `YYYYMMDDThhmmss±hh`.
pub fn format_time(t: DateTime<Utc>) -> String {
    format!("{}+00", t.format("%Y%m%dT%H%M%S"))
}

/// Renders a duration compactly, eliding zero tails: `1h2m3s`, `1h`, `45s`.
pub fn format_duration(d: TimeDelta) -> String {
    let total = d.num_seconds();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;

    let mut out = String::new();
    if days > 0 {
        out.push_str(&format!("{days}d"));
    }
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    if seconds > 0 || out.is_empty() {
        out.push_str(&format!("{seconds}s"));
    }
    out
}
