// src/utils/text.rs

//! Text cleaning helpers for the keyword scan.

/// Strip HTML tags, script/style bodies and collapse whitespace.
///
/// Lossy by design: the keyword detector only needs the visible text,
/// lowercased, with markup noise removed.
pub fn strip_html(html: &str) -> String {
    let lower = html.to_lowercase();
    let bytes = lower.as_bytes();
    let mut out = String::with_capacity(lower.len() / 2);
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'<' {
            // Skip script/style blocks wholesale.
            if lower[i..].starts_with("<script") {
                i = match lower[i..].find("</script") {
                    Some(off) => skip_past_gt(&lower, i + off),
                    None => lower.len(),
                };
                continue;
            }
            if lower[i..].starts_with("<style") {
                i = match lower[i..].find("</style") {
                    Some(off) => skip_past_gt(&lower, i + off),
                    None => lower.len(),
                };
                continue;
            }
            i = skip_past_gt(&lower, i);
            out.push(' ');
            continue;
        }

        let c = lower[i..].chars().next().unwrap_or(' ');
        out.push(c);
        i += c.len_utf8();
    }

    collapse_whitespace(&out)
}

fn skip_past_gt(s: &str, from: usize) -> usize {
    match s[from..].find('>') {
        Some(gt) => from + gt + 1,
        None => s.len(),
    }
}

/// Collapse runs of whitespace to single spaces and trim.
pub fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_ws = true;
    for c in s.chars() {
        if c.is_whitespace() {
            if !in_ws {
                out.push(' ');
                in_ws = true;
            }
        } else {
            out.push(c);
            in_ws = false;
        }
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_basic_tags() {
        let text = strip_html("<div><p>Out of <b>stock</b></p></div>");
        assert_eq!(text, "out of stock");
    }

    #[test]
    fn test_strip_script_and_style() {
        let html = r#"<style>.a{color:red}</style><script>var sold="out";</script><p>Add to cart</p>"#;
        let text = strip_html(html);
        assert_eq!(text, "add to cart");
        assert!(!text.contains("color"));
    }

    #[test]
    fn test_multilingual_preserved() {
        let text = strip_html("<span>缺货</span> <span>售罄</span>");
        assert!(text.contains("缺货"));
        assert!(text.contains("售罄"));
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("a  b\n\tc "), "a b c");
        assert_eq!(collapse_whitespace("   "), "");
    }

    #[test]
    fn test_unclosed_tag() {
        assert_eq!(strip_html("text <div unclosed"), "text");
    }

    #[test]
    fn test_lowercases_output() {
        assert_eq!(strip_html("SOLD OUT"), "sold out");
    }
}
