// src/catalog/vendor.rs

//! Vendor-tag inference from the URL host.

use std::collections::HashMap;

use crate::utils::url::host_of;

/// Suffix-matching host → tag table.
///
/// `shop.racknerd.com` matches a `racknerd.com` entry; longer suffixes win
/// when several apply.
#[derive(Debug, Clone, Default)]
pub struct VendorTable {
    entries: HashMap<String, String>,
}

impl VendorTable {
    pub fn new(entries: HashMap<String, String>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(host, tag)| (host.to_lowercase(), tag))
                .collect(),
        }
    }

    /// Infer the vendor tag for a URL, if its host matches the table.
    pub fn infer(&self, url: &str) -> Option<String> {
        let host = host_of(url)?;
        let mut best: Option<(&str, &str)> = None;
        for (suffix, tag) in &self.entries {
            if host == *suffix || host.ends_with(&format!(".{suffix}")) {
                match best {
                    Some((current, _)) if current.len() >= suffix.len() => {}
                    _ => best = Some((suffix, tag)),
                }
            }
        }
        best.map(|(_, tag)| tag.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> VendorTable {
        let mut entries = HashMap::new();
        entries.insert("racknerd.com".to_string(), "racknerd".to_string());
        entries.insert("eu.hetzner.com".to_string(), "hetzner-eu".to_string());
        entries.insert("hetzner.com".to_string(), "hetzner".to_string());
        VendorTable::new(entries)
    }

    #[test]
    fn test_exact_host() {
        assert_eq!(
            table().infer("https://racknerd.com/kvm"),
            Some("racknerd".to_string())
        );
    }

    #[test]
    fn test_subdomain_suffix() {
        assert_eq!(
            table().infer("https://shop.racknerd.com/cart"),
            Some("racknerd".to_string())
        );
    }

    #[test]
    fn test_longest_suffix_wins() {
        assert_eq!(
            table().infer("https://www.eu.hetzner.com/x"),
            Some("hetzner-eu".to_string())
        );
    }

    #[test]
    fn test_no_partial_label_match() {
        // "notracknerd.com" must not match "racknerd.com".
        assert_eq!(table().infer("https://notracknerd.com/x"), None);
    }

    #[test]
    fn test_unknown_host() {
        assert_eq!(table().infer("https://example.com/vps"), None);
    }
}
