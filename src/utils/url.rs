// src/utils/url.rs

//! URL helpers shared by the catalog and the fetch layer.

/// Extract the lowercased host from a URL.
///
/// # Examples
/// ```
/// use stockwatch::utils::url::host_of;
///
/// assert_eq!(host_of("https://Example.COM/vps"), Some("example.com".to_string()));
/// assert_eq!(host_of("not a url"), None);
/// ```
pub fn host_of(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}

/// Resolve a potentially relative href against a base URL.
///
/// Used by the API probe to complete endpoint paths scraped from a page.
pub fn resolve(base: &str, href: &str) -> Option<String> {
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    let base = url::Url::parse(base).ok()?;
    base.join(href).ok().map(|u| u.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_lowercased() {
        assert_eq!(host_of("https://RackNerd.com/x"), Some("racknerd.com".to_string()));
    }

    #[test]
    fn test_resolve_absolute() {
        assert_eq!(
            resolve("https://example.com/p/", "https://other.com/api"),
            Some("https://other.com/api".to_string())
        );
    }

    #[test]
    fn test_resolve_rooted_path() {
        assert_eq!(
            resolve("https://example.com/p/page.html", "/api/stock.json"),
            Some("https://example.com/api/stock.json".to_string())
        );
    }

    #[test]
    fn test_resolve_relative_path() {
        assert_eq!(
            resolve("https://example.com/p/", "stock.json"),
            Some("https://example.com/p/stock.json".to_string())
        );
    }
}
