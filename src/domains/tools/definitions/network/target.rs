//! Probe target parsing and allow-list matching.

use std::net::IpAddr;

use reqwest::Url;

use crate::domains::tools::error::ValidationError;

const MAX_HOSTNAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// Parse a bare host: an IP literal (IPv6 optionally bracketed) or a hostname.
///
/// Returns the host in canonical form (lowercase, brackets stripped).
pub fn parse_host(raw: &str) -> Result<String, ValidationError> {
    let host = raw.trim();
    let unbracketed = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    if let Ok(ip) = unbracketed.parse::<IpAddr>() {
        return Ok(ip.to_string());
    }

    if is_valid_hostname(host) {
        return Ok(host.trim_end_matches('.').to_ascii_lowercase());
    }

    Err(ValidationError::field(
        "target",
        format!("'{}' is not a valid hostname or IP address", raw),
    ))
}

/// Parse an HTTP(S) URL. A bare host gets `https://`.
pub fn parse_url(raw: &str) -> Result<Url, ValidationError> {
    let trimmed = raw.trim();
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    let url = Url::parse(&candidate)
        .map_err(|e| ValidationError::field("target", format!("invalid URL '{}': {}", raw, e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ValidationError::field(
            "target",
            format!("unsupported URL scheme '{}', expected http or https", url.scheme()),
        ));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(ValidationError::field("target", format!("URL '{}' has no host", raw)));
    }

    Ok(url)
}

/// Parse an IP address literal.
pub fn parse_ip(raw: &str) -> Result<IpAddr, ValidationError> {
    raw.trim()
        .parse()
        .map_err(|_| ValidationError::field("target", format!("'{}' is not an IP address", raw)))
}

/// Check `host` against the configured allow-list. An empty list allows all.
pub fn check_allowed(host: &str, patterns: &[String]) -> Result<(), ValidationError> {
    if patterns.is_empty() {
        return Ok(());
    }
    let host = host
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_ascii_lowercase();
    if patterns
        .iter()
        .any(|pattern| glob_match(&pattern.to_ascii_lowercase(), &host))
    {
        Ok(())
    } else {
        Err(ValidationError::field(
            "target",
            format!("target '{}' is not in the allowed target list", host),
        ))
    }
}

fn is_valid_hostname(host: &str) -> bool {
    let host = host.trim_end_matches('.');
    if host.is_empty() || host.len() > MAX_HOSTNAME_LEN {
        return false;
    }
    host.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= MAX_LABEL_LEN
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    })
}

/// `*` matches any run of characters (including dots); everything else is literal.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if pi < p.len() && p[pi] == t[ti] {
            pi += 1;
            ti += 1;
        } else if let Some((star_pi, star_ti)) = star {
            pi = star_pi + 1;
            ti = star_ti + 1;
            star = Some((star_pi, star_ti + 1));
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|&c| c == '*')
}
