//! Minimal HTML-to-text extraction for fetched pages.

/// Block-level tags that start a new line in the extracted text.
const BLOCK_TAGS: &[&str] = &[
    "p", "/p", "br", "div", "/div", "h1", "h2", "h3", "h4", "h5", "h6", "/h", "li", "tr",
    "section", "article",
];

/// Strip tags, scripts and styles, decode common entities and collapse
/// blank lines.
pub fn extract_text(html: &str) -> String {
    let mut text = String::new();
    let mut in_tag = false;
    let mut building_tag = false;
    let mut skipping = false;
    let mut tag_name = String::new();

    for ch in html.chars() {
        match ch {
            '<' => {
                in_tag = true;
                building_tag = true;
                tag_name.clear();
            }
            '>' if in_tag => {
                in_tag = false;
                building_tag = false;
                let tag = tag_name.to_lowercase();
                match tag.as_str() {
                    "script" | "style" | "noscript" => skipping = true,
                    "/script" | "/style" | "/noscript" => skipping = false,
                    _ => {}
                }
                if BLOCK_TAGS.iter().any(|b| tag.starts_with(b)) {
                    text.push('\n');
                }
            }
            _ if in_tag => {
                if building_tag && (ch.is_alphanumeric() || ch == '/') {
                    tag_name.push(ch);
                } else {
                    building_tag = false;
                }
            }
            _ if skipping => {}
            _ => text.push(ch),
        }
    }

    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Cut `text` to at most `max_chars` characters, noting the truncation.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => format!(
            "{}...\n\n[Truncated at {} characters]",
            &text[..byte],
            max_chars
        ),
        None => text.to_string(),
    }
}
