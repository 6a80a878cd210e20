use std::env;

const DEFAULT_FILTER: &str = "info";

fn pick_filter(unddit_log: Option<String>, rust_log: Option<String>) -> String {
    [unddit_log, rust_log]
        .into_iter()
        .flatten()
        .map(|raw| raw.trim().to_string())
        .find(|raw| !raw.is_empty())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

/// Logs go to stderr so report output on stdout stays machine readable.
pub fn init() {
    let filter = pick_filter(env::var("UNDDIT_LOG").ok(), env::var("RUST_LOG").ok());
    let _ = env_logger::Builder::new()
        .parse_filters(&filter)
        .format_timestamp_secs()
        .target(env_logger::Target::Stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::pick_filter;

    #[test]
    fn unddit_log_wins_over_rust_log() {
        let got = pick_filter(Some("debug".to_string()), Some("warn".to_string()));
        assert_eq!(got, "debug");
    }

    #[test]
    fn blank_values_fall_through_to_default() {
        assert_eq!(pick_filter(Some("  ".to_string()), None), "info");
        assert_eq!(pick_filter(None, Some("unddit=trace".to_string())), "unddit=trace");
    }
}
