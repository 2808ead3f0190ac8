//! Minimal client-side HTTP Digest authentication (RFC 7616 `qop=auth`),
//! needed because the origin contract allows either Basic or Digest and no
//! crate in the corpus implements it.

use std::sync::atomic::{AtomicU64, Ordering};

static NONCE_COUNTER: AtomicU64 = AtomicU64::new(1);

pub struct Challenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub qop: Option<String>,
}

/// Parses a `WWW-Authenticate: Digest ...` header value.
pub fn parse_challenge(header: &str) -> Option<Challenge> {
    let rest = header.strip_prefix("Digest ")?;
    let mut realm = None;
    let mut nonce = None;
    let mut opaque = None;
    let mut qop = None;

    for part in split_params(rest) {
        let (key, value) = part.split_once('=')?;
        let value = value.trim().trim_matches('"').to_string();
        match key.trim() {
            "realm" => realm = Some(value),
            "nonce" => nonce = Some(value),
            "opaque" => opaque = Some(value),
            "qop" => qop = Some(value),
            _ => {}
        }
    }

    Some(Challenge {
        realm: realm?,
        nonce: nonce?,
        opaque,
        qop,
    })
}

// naive comma-split that respects quoted commas, e.g. in `qop="auth,auth-int"`.
fn split_params(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(s[start..].trim());
    parts
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Builds the `Authorization: Digest ...` header value for one request.
pub fn build_authorization(
    challenge: &Challenge,
    username: &str,
    password: &str,
    method: &str,
    uri: &str,
) -> String {
    let nc = NONCE_COUNTER.fetch_add(1, Ordering::SeqCst);
    let nc_str = format!("{:08x}", nc);
    let cnonce = format!("{:016x}", nc.wrapping_mul(0x9E3779B97F4A7C15) ^ nc);

    let ha1 = md5_hex(&format!("{}:{}:{}", username, challenge.realm, password));
    let ha2 = md5_hex(&format!("{}:{}", method, uri));

    let (response, qop_field) = if challenge.qop.is_some() {
        let response = md5_hex(&format!(
            "{}:{}:{}:{}:{}:{}",
            ha1, challenge.nonce, nc_str, cnonce, "auth", ha2
        ));
        (response, Some("auth"))
    } else {
        let response = md5_hex(&format!("{}:{}:{}", ha1, challenge.nonce, ha2));
        (response, None)
    };

    let mut header = format!(
        "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\"",
        username, challenge.realm, challenge.nonce, uri, response
    );
    if let Some(qop) = qop_field {
        header.push_str(&format!(
            ", qop={}, nc={}, cnonce=\"{}\"",
            qop, nc_str, cnonce
        ));
    }
    if let Some(opaque) = &challenge.opaque {
        header.push_str(&format!(", opaque=\"{}\"", opaque));
    }
    header
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_typical_challenge() {
        let header = r#"Digest realm="origin", qop="auth", nonce="abc123", opaque="xyz""#;
        let challenge = parse_challenge(header).unwrap();
        assert_eq!(challenge.realm, "origin");
        assert_eq!(challenge.nonce, "abc123");
        assert_eq!(challenge.qop.as_deref(), Some("auth"));
        assert_eq!(challenge.opaque.as_deref(), Some("xyz"));
    }

    #[test]
    fn builds_a_well_formed_authorization_header() {
        let challenge = Challenge {
            realm: "origin".to_string(),
            nonce: "abc123".to_string(),
            opaque: None,
            qop: Some("auth".to_string()),
        };
        let header = build_authorization(&challenge, "alice", "hunter2", "GET", "/disk.img");
        assert!(header.starts_with("Digest username=\"alice\""));
        assert!(header.contains("nonce=\"abc123\""));
        assert!(header.contains("qop=auth"));
    }
}
