// src/catalog/canonical.rs

//! URL canonicalisation for catalog admission.
//!
//! Canonical form: lowercase scheme and host, tracking and anti-bot
//! challenge query parameters stripped, fragment dropped, trailing slash
//! normalised. The operation is idempotent.

use url::Url;

use crate::error::{AppError, Result};

/// Tracking keys stripped outright.
const TRACKING_KEYS: &[&str] = &["fbclid", "gclid", "msclkid", "igshid"];

/// Cloudflare challenge tokens that leak into shared links.
const CHALLENGE_KEYS: &[&str] = &[
    "__cf_chl_rt_tk",
    "__cf_chl_f_tk",
    "__cf_chl_tk",
    "cf_chl_seq_tk",
];

/// Canonicalise a URL for storage and dedup.
pub fn canonicalise(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
        return Err(AppError::validation(format!(
            "URL must start with http:// or https://: {trimmed}"
        )));
    }

    let mut url = Url::parse(trimmed)?;
    if url.host_str().is_none() {
        return Err(AppError::validation(format!("URL has no host: {trimmed}")));
    }

    // Url::parse already lowercases scheme and host; normalise the rest.
    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_stripped_key(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        let query = kept
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{}={}", k, urlencode(v))
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        url.set_query(Some(&query));
    }

    let mut out = url.to_string();
    // Trailing slash: keep the root, strip elsewhere.
    if out.ends_with('/') && url.path() != "/" {
        out.pop();
    }
    Ok(out)
}

fn is_stripped_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    lower.starts_with("utm_")
        || TRACKING_KEYS.contains(&lower.as_str())
        || CHALLENGE_KEYS.contains(&lower.as_str())
}

fn urlencode(v: &str) -> String {
    // Minimal encoding for values round-tripped through query_pairs.
    v.replace('%', "%25")
        .replace('&', "%26")
        .replace('=', "%3D")
        .replace(' ', "%20")
        .replace('#', "%23")
}
