use anyhow::Result;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix time in seconds.
pub fn now_epoch_secs() -> Result<i64> {
    let secs = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    Ok(i64::try_from(secs)?)
}

/// Truncate `input` to at most `max_chars` characters on one line, folding
/// whitespace runs and appending `…` when cut.
pub fn one_line_preview(input: &str, max_chars: usize) -> String {
    let clean = input.split_whitespace().collect::<Vec<_>>().join(" ");
    if clean.chars().count() > max_chars {
        let mut s: String = clean.chars().take(max_chars).collect();
        s.push('…');
        s
    } else {
        clean
    }
}
