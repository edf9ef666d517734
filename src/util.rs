//! Shared utility functions used across the codebase.

use std::str::FromStr;

/// Parse an environment variable into `T`, returning `default` if unset.
///
/// Returns `Err((name, message))` when the variable is set but does not parse,
/// so configuration errors are surfaced instead of silently defaulted.
pub fn env_var_parse<T>(name: &str, default: T) -> Result<T, (String, String)>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|e: T::Err| (name.to_string(), e.to_string())),
        _ => Ok(default),
    }
}

/// Build a truncated context string from conversation history.
///
/// Walks `history` from most-recent to oldest, accumulating entries until
/// `max_chars` is reached. The most-recent entry is always included, with its
/// content clipped when it alone would exceed `max_chars`.
pub fn build_history_context(history: &[(String, String)], max_chars: usize) -> String {
    const CLIPPED: &str = " [...]";
    let mut result = String::new();
    let mut total_chars = 0;
    for (role, content) in history.iter().rev() {
        let label = role.to_uppercase();
        let mut entry = format!("{}: {}\n\n", label, content);
        if total_chars + entry.len() > max_chars {
            if !result.is_empty() {
                break;
            }
            let room = max_chars.saturating_sub(label.len() + ": \n\n".len() + CLIPPED.len());
            let end = safe_truncate_index(content, room);
            entry = format!("{}: {}{}\n\n", label, &content[..end], CLIPPED);
        }
        result = format!("{}{}", entry, result);
        total_chars += entry.len();
    }
    result
}

/// Largest index `<= max` that falls on a char boundary of `s`.
pub fn safe_truncate_index(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    let mut idx = max;
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Truncate a line for log output.
pub fn truncate_for_log(line: &str, max: usize) -> String {
    if line.len() > max {
        format!("{}...", &line[..safe_truncate_index(line, max)])
    } else {
        line.to_string()
    }
}
