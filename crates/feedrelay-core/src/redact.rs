//! Secret redaction for URLs that leave the core (results, logs).

use url::Url;

pub const REDACTED: &str = "REDACTED";

const SECRET_PARAMS: [&str; 4] = ["api_key", "key", "token", "apikey"];

fn is_secret_param(name: &str) -> bool {
    SECRET_PARAMS
        .iter()
        .any(|secret| secret.eq_ignore_ascii_case(name))
}

/// Replaces the value of every secret query parameter with [`REDACTED`].
///
/// Relay URLs carry the upstream URL percent-encoded inside their own query
/// string, so nested URLs are redacted as well.
pub fn redact_url(raw: &str) -> String {
    let Ok(mut parsed) = Url::parse(raw) else {
        return redact_unparsed(raw);
    };

    if parsed.query().is_none() {
        return raw.to_owned();
    }

    let pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(name, value)| {
            let value = if is_secret_param(&name) {
                String::from(REDACTED)
            } else if value.starts_with("http://") || value.starts_with("https://") {
                redact_url(&value)
            } else {
                value.into_owned()
            };
            (name.into_owned(), value)
        })
        .collect();

    parsed.query_pairs_mut().clear().extend_pairs(pairs);
    parsed.to_string()
}

// Templates and partially-built URLs may not parse; scrub `name=value` pairs by hand.
fn redact_unparsed(raw: &str) -> String {
    let Some((base, query)) = raw.split_once('?') else {
        return raw.to_owned();
    };

    let scrubbed = query
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some((name, _)) if is_secret_param(name) => format!("{name}={REDACTED}"),
            _ => pair.to_owned(),
        })
        .collect::<Vec<_>>()
        .join("&");

    format!("{base}?{scrubbed}")
}
