//! `<!-- Source: URL -->` markers written at the top of fetched pages.

const COMMENT_OPEN: &str = "<!--";
const COMMENT_CLOSE: &str = "-->";
const SOURCE_PREFIX: &str = "Source:";

/// Byte span of the first source marker and the URL it carries.
fn find_marker(markdown: &str) -> Option<(usize, usize, &str)> {
    let mut offset = 0;
    while let Some(open) = markdown[offset..].find(COMMENT_OPEN) {
        let start = offset + open;
        let body_start = start + COMMENT_OPEN.len();
        let close = markdown[body_start..].find(COMMENT_CLOSE)?;
        let body_end = body_start + close;
        let end = body_end + COMMENT_CLOSE.len();

        let body = markdown[body_start..body_end].trim();
        if let Some(url) = body.strip_prefix(SOURCE_PREFIX) {
            let url = url.trim();
            if !url.is_empty() {
                return Some((start, end, url));
            }
        }
        offset = end;
    }
    None
}

/// URL from the first `<!-- Source: URL -->` marker, if any.
pub fn extract_source_url(markdown: &str) -> Option<String> {
    find_marker(markdown).map(|(_, _, url)| url.to_string())
}

/// Markdown with the first source marker (and the line break after it) removed.
pub fn strip_source_marker(markdown: &str) -> String {
    match find_marker(markdown) {
        Some((start, end, _)) => {
            let rest = &markdown[end..];
            let rest = rest
                .strip_prefix("\r\n")
                .or_else(|| rest.strip_prefix('\n'))
                .unwrap_or(rest);
            format!("{}{}", &markdown[..start], rest)
        }
        None => markdown.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_source_url() {
        let md = "<!-- Source: https://react.dev/learn -->\n# Quick Start\n";
        assert_eq!(
            extract_source_url(md).as_deref(),
            Some("https://react.dev/learn")
        );
    }

    #[test]
    fn test_extract_skips_other_comments() {
        let md = "<!-- generated -->\n<!--Source:https://a.dev/x-->\nbody";
        assert_eq!(extract_source_url(md).as_deref(), Some("https://a.dev/x"));
        assert_eq!(extract_source_url("# No marker"), None);
        assert_eq!(extract_source_url("<!-- Source: -->"), None);
    }

    #[test]
    fn test_strip_source_marker() {
        let md = "<!-- Source: https://react.dev/learn -->\n# Quick Start\n";
        assert_eq!(strip_source_marker(md), "# Quick Start\n");
        assert_eq!(strip_source_marker("# Plain\n"), "# Plain\n");
    }
}
