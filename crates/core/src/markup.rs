//! HTML escaping for untrusted chat content.

/// Escapes the five HTML-significant characters.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#039;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Reverses [`escape_html`]. `&amp;` is decoded last so an escaped entity
/// such as `&amp;lt;` comes back as the literal text `&lt;`.
pub fn unescape_html(html: &str) -> String {
    html.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#039;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Formats a plain chat body for display.
///
/// The text is escaped first, then newlines become `<br>` and every pair of
/// spaces becomes two non-breaking spaces so indented snippets keep their
/// shape.
pub fn format_chat_body(text: &str) -> String {
    escape_html(&text.replace("\r\n", "\n"))
        .replace('\n', "<br>")
        .replace("  ", "&nbsp;&nbsp;")
}
