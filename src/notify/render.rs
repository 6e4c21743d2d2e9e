//! Rendering of posts into message text.

use super::traits::MessageFormat;
use crate::forum::Post;

/// Characters that must be escaped in Telegram MarkdownV2 text.
const MARKDOWN_V2_SPECIAL: &[char] = &[
    '\\', '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
];

/// Render the text message for `post`: id, quoted block, body, then links.
#[must_use]
pub fn render_message(post: &Post, format: MessageFormat) -> String {
    let mut sections = vec![escape(&format!("ID: {}", post.id), format)];

    if !post.quoted_text.is_empty() {
        sections.push(render_quote(&post.quoted_text, format));
    }
    if !post.body.is_empty() {
        sections.push(escape(&post.body, format));
    }
    if !post.links.is_empty() {
        let links: Vec<String> = post.links.iter().map(|l| escape(l, format)).collect();
        sections.push(format!("Links:\n{}", links.join("\n\n")));
    }

    sections.join("\n\n")
}

/// Caption shared by every image of the post's media group.
#[must_use]
pub fn media_caption(post: &Post) -> String {
    format!("ID: {}", post.id)
}

fn render_quote(text: &str, format: MessageFormat) -> String {
    match format {
        MessageFormat::Plain => prefix_lines(text, "> "),
        MessageFormat::Markdown => prefix_lines(&escape_markdown_v2(text), ">"),
        MessageFormat::Html => format!("<blockquote>{}</blockquote>", escape_html(text)),
    }
}

fn prefix_lines(text: &str, prefix: &str) -> String {
    text.lines()
        .map(|line| format!("{prefix}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn escape(text: &str, format: MessageFormat) -> String {
    match format {
        MessageFormat::Plain => text.to_string(),
        MessageFormat::Markdown => escape_markdown_v2(text),
        MessageFormat::Html => escape_html(text),
    }
}

fn escape_markdown_v2(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if MARKDOWN_V2_SPECIAL.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
