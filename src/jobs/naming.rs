//! DNS-label job names
//!
//! Kubernetes object names must be lowercase `[a-z0-9-]`, start and end with an
//! alphanumeric and fit in 63 characters.

use chrono::Utc;

/// Maximum length of a DNS label
pub const MAX_NAME_LEN: usize = 63;

const NAME_PREFIX: &str = "sa";
const FALLBACK_NAME: &str = "job";

/// Reduce an arbitrary string to a DNS label
///
/// Disallowed characters become hyphens, runs of hyphens collapse to one,
/// and leading/trailing hyphens are dropped. Returns `"job"` when nothing
/// usable remains.
pub fn sanitize_job_name(raw: &str) -> String {
    let mut name = String::with_capacity(raw.len());
    for c in raw.chars().flat_map(char::to_lowercase) {
        let c = if c.is_ascii_lowercase() || c.is_ascii_digit() {
            c
        } else {
            '-'
        };
        if c == '-' && (name.is_empty() || name.ends_with('-')) {
            continue;
        }
        name.push(c);
    }

    name.truncate(MAX_NAME_LEN);
    let trimmed = name.trim_end_matches('-');

    if trimmed.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Build a unique job name for one step run
///
/// The readable `sa-<agent>-<request>` prefix is shortened as needed so the
/// salt always survives.
pub fn build_job_name(agent: &str, request_id: &str, salt: &str) -> String {
    let salt = sanitize_job_name(salt);
    let prefix = sanitize_job_name(&format!("{}-{}-{}", NAME_PREFIX, agent, request_id));

    let budget = MAX_NAME_LEN.saturating_sub(salt.len() + 1);
    let mut prefix = prefix;
    prefix.truncate(budget);
    let prefix = prefix.trim_end_matches('-');

    if prefix.is_empty() {
        salt
    } else {
        format!("{}-{}", prefix, salt)
    }
}

/// Time-based salt with a short random suffix, e.g. `lq2x9c1a-3f9c`
pub fn job_salt() -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", to_base36(millis), &random[..4])
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}
