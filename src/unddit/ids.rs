use serde::{Deserialize, Serialize};

pub const COMMENT_PREFIX: &str = "t1_";
pub const POST_PREFIX: &str = "t3_";

const BASE36_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

pub fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(BASE36_DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// Drop a `tN_` type marker if present.
pub fn strip_kind_prefix(raw: &str) -> &str {
    let bytes = raw.as_bytes();
    if bytes.len() > 3 && bytes[0] == b't' && bytes[1].is_ascii_digit() && bytes[2] == b'_' {
        &raw[3..]
    } else {
        raw
    }
}

pub fn fullname(prefix: &str, id: &str) -> String {
    format!("{prefix}{}", strip_kind_prefix(id))
}

/// Parent/link reference as the archive sends it: either a fullname string
/// or the raw numeric id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdRef {
    Numeric(u64),
    Text(String),
}

impl IdRef {
    pub fn to_short_id(&self) -> Option<String> {
        match self {
            IdRef::Numeric(n) => Some(to_base36(*n)),
            IdRef::Text(text) => {
                let short = strip_kind_prefix(text.trim());
                if short.is_empty() {
                    None
                } else {
                    Some(short.to_string())
                }
            }
        }
    }
}

/// Resolve a reference to a short id; a missing reference points at the thread.
pub fn normalize_ref(raw: Option<&IdRef>, thread_id: &str) -> String {
    raw.and_then(IdRef::to_short_id)
        .unwrap_or_else(|| thread_id.to_string())
}
