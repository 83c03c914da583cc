//! crates/twin_data_core/src/html.rs
//!
//! Reduces an HTML report to plain text for embedding input.

/// Removes tags, decodes the common entities and collapses whitespace.
pub fn strip_html(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    let mut chars = html.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            // A tag opens only on `<` followed by a name, `/` or `!`; "a < b" is text.
            '<' if !in_tag && chars.peek().is_some_and(|n| n.is_ascii_alphabetic() || matches!(n, '/' | '!')) => {
                in_tag = true
            }
            '>' if in_tag => {
                in_tag = false;
                // Tags separate words.
                text.push(' ');
            }
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }

    let decoded = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}
