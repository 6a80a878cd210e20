fn sanitize_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_sep = false;
    for ch in value.chars() {
        if ch.is_ascii_whitespace() {
            if !out.is_empty() && !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else if ch.is_ascii_graphic() {
            out.push(ch);
            prev_sep = false;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "na".to_string()
    } else {
        trimmed.to_string()
    }
}

pub struct Warning<'a> {
    pub code: &'a str,
    pub stage: &'a str,
    pub thread: &'a str,
    pub target: &'a str,
    pub retry: &'a str,
    pub reason: &'a str,
    pub err: &'a str,
}

pub fn format_line(w: &Warning<'_>) -> String {
    format!(
        "UNDDIT_WARN code={} stage={} thread={} target={} retry={} reason={} err={}",
        sanitize_value(w.code),
        sanitize_value(w.stage),
        sanitize_value(w.thread),
        sanitize_value(w.target),
        sanitize_value(w.retry),
        sanitize_value(w.reason),
        sanitize_value(w.err),
    )
}

pub fn emit(w: Warning<'_>) {
    log::warn!("{}", format_line(&w));
}
