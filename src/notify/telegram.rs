//! Telegram Bot API transport.
//!
//! Request URLs embed the bot token, so reqwest errors are stripped of their
//! URL before they reach logs.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::traits::{MessageFormat, MessageTransport, NotifyError};
use crate::constants::{MEDIA_GROUP_MAX_ITEMS, MESSAGE_MAX_CHARS};
use crate::fetch::DownloadedImage;

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    link_preview_options: Option<LinkPreviewOptions>,
}

#[derive(Debug, Serialize)]
struct LinkPreviewOptions {
    is_disabled: bool,
}

#[derive(Debug, Serialize)]
struct InputMediaPhoto {
    #[serde(rename = "type")]
    kind: &'static str,
    media: String,
    caption: String,
}

/// Sends messages through the Telegram Bot API.
#[derive(Clone)]
pub struct TelegramTransport {
    http: Client,
    api_url: String,
    token: String,
    disable_link_preview: bool,
}

impl TelegramTransport {
    #[must_use]
    pub fn new(http: Client, api_url: &str, token: &str) -> Self {
        Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            disable_link_preview: false,
        }
    }

    #[must_use]
    pub fn with_link_preview_disabled(mut self, disabled: bool) -> Self {
        self.disable_link_preview = disabled;
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, self.token, method)
    }

    async fn post_form(&self, method: &'static str, form: Form) -> Result<(), NotifyError> {
        let response = self
            .http
            .post(self.method_url(method))
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport(method, e))?;
        check_response(method, response).await
    }

    async fn send_message(
        &self,
        destination: &str,
        text: &str,
        format: MessageFormat,
    ) -> Result<(), NotifyError> {
        let payload = SendMessage {
            chat_id: destination,
            text,
            parse_mode: parse_mode(format),
            link_preview_options: self
                .disable_link_preview
                .then_some(LinkPreviewOptions { is_disabled: true }),
        };

        let response = self
            .http
            .post(self.method_url("sendMessage"))
            .json(&payload)
            .send()
            .await
            .map_err(|e| transport("sendMessage", e))?;
        check_response("sendMessage", response).await
    }

    async fn send_photo(
        &self,
        destination: &str,
        item: &DownloadedImage,
        caption: String,
    ) -> Result<(), NotifyError> {
        let form = Form::new()
            .text("chat_id", destination.to_string())
            .text("caption", caption)
            .part("photo", image_part(item));
        self.post_form("sendPhoto", form).await
    }

    async fn send_group_batch(
        &self,
        destination: &str,
        batch: &[(usize, &DownloadedImage)],
        caption: &str,
        total: usize,
    ) -> Result<(), NotifyError> {
        let media: Vec<InputMediaPhoto> = batch
            .iter()
            .map(|(ordinal, _)| InputMediaPhoto {
                kind: "photo",
                media: format!("attach://photo{ordinal}"),
                caption: ordinal_caption(caption, *ordinal, total),
            })
            .collect();
        let media = serde_json::to_string(&media).map_err(|source| NotifyError::Encode {
            method: "sendMediaGroup",
            source,
        })?;

        let mut form = Form::new()
            .text("chat_id", destination.to_string())
            .text("media", media);
        for (ordinal, item) in batch {
            form = form.part(format!("photo{ordinal}"), image_part(item));
        }
        self.post_form("sendMediaGroup", form).await
    }
}

#[async_trait]
impl MessageTransport for TelegramTransport {
    async fn send_text(
        &self,
        destination: &str,
        text: &str,
        format: MessageFormat,
    ) -> Result<(), NotifyError> {
        let parts = split_message(text, format, MESSAGE_MAX_CHARS);
        for part in &parts {
            self.send_message(destination, part, format).await?;
        }

        info!(
            chars = text.chars().count(),
            parts = parts.len(),
            "Message sent to Telegram"
        );
        Ok(())
    }

    async fn send_media_group(
        &self,
        destination: &str,
        items: &[DownloadedImage],
        caption: &str,
    ) -> Result<(), NotifyError> {
        let total = items.len();
        let numbered: Vec<(usize, &DownloadedImage)> =
            items.iter().enumerate().map(|(i, item)| (i + 1, item)).collect();

        for batch in numbered.chunks(MEDIA_GROUP_MAX_ITEMS) {
            if let [(ordinal, item)] = batch {
                self.send_photo(destination, item, ordinal_caption(caption, *ordinal, total))
                    .await?;
            } else {
                self.send_group_batch(destination, batch, caption, total)
                    .await?;
            }
            debug!(images = batch.len(), "Media batch sent to Telegram");
        }

        info!(images = total, "Media group sent to Telegram");
        Ok(())
    }
}

fn parse_mode(format: MessageFormat) -> Option<&'static str> {
    match format {
        MessageFormat::Plain => None,
        MessageFormat::Markdown => Some("MarkdownV2"),
        MessageFormat::Html => Some("HTML"),
    }
}

/// Split `text` into parts of at most `limit` characters.
///
/// Parts break between lines where possible. A line longer than a whole part
/// is cut, preferring whitespace, but never inside a MarkdownV2 escape or an
/// HTML entity or tag. An HTML blockquote open at a break is closed at the end
/// of that part and reopened at the start of the next.
fn split_message(text: &str, format: MessageFormat, limit: usize) -> Vec<String> {
    if text.chars().count() <= limit {
        return vec![text.to_string()];
    }

    let reserve = match format {
        MessageFormat::Html => BLOCKQUOTE_OPEN.len() + BLOCKQUOTE_CLOSE.len(),
        MessageFormat::Plain | MessageFormat::Markdown => 0,
    };
    let budget = limit.saturating_sub(reserve).max(1);

    let mut parts = Vec::new();
    let mut lines: Vec<String> = Vec::new();
    let mut len = 0;
    let mut opened_in_quote = false;
    let mut in_quote = false;

    for line in text.split('\n') {
        for piece in cut_line(line, format, budget) {
            let piece_len = piece.chars().count();
            let separator = usize::from(!lines.is_empty());
            if !lines.is_empty() && len + separator + piece_len > budget {
                push_part(&mut parts, &lines, opened_in_quote, in_quote);
                lines.clear();
                len = 0;
                opened_in_quote = in_quote;
            }

            len += usize::from(!lines.is_empty()) + piece_len;
            if format == MessageFormat::Html {
                in_quote = quote_open_after(&piece, in_quote);
            }
            lines.push(piece);
        }
    }
    push_part(&mut parts, &lines, opened_in_quote, in_quote);

    parts
}

const BLOCKQUOTE_OPEN: &str = "<blockquote>";
const BLOCKQUOTE_CLOSE: &str = "</blockquote>";

fn push_part(parts: &mut Vec<String>, lines: &[String], reopen: bool, close: bool) {
    let body = lines.join("\n");
    let body = body.trim_matches('\n');
    if body.is_empty() {
        return;
    }

    let mut part = String::with_capacity(
        body.len() + BLOCKQUOTE_OPEN.len() + BLOCKQUOTE_CLOSE.len(),
    );
    if reopen {
        part.push_str(BLOCKQUOTE_OPEN);
    }
    part.push_str(body);
    if close {
        part.push_str(BLOCKQUOTE_CLOSE);
    }
    parts.push(part);
}

/// Whether a blockquote is still open after `piece`, given its state before.
fn quote_open_after(piece: &str, open_before: bool) -> bool {
    match (piece.rfind(BLOCKQUOTE_OPEN), piece.rfind(BLOCKQUOTE_CLOSE)) {
        (Some(open), Some(close)) => open > close,
        (Some(_), None) => true,
        (None, Some(_)) => false,
        (None, None) => open_before,
    }
}

fn cut_line(line: &str, format: MessageFormat, limit: usize) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    let mut pieces = Vec::new();
    let mut start = 0;

    while chars.len() - start > limit {
        let end = start + safe_cut(&chars[start..], format, limit);
        pieces.push(chars[start..end].iter().collect());
        start = end;
    }
    pieces.push(chars[start..].iter().collect());
    pieces
}

/// Cut position within the first `limit` chars of `chars` (which is longer).
fn safe_cut(chars: &[char], format: MessageFormat, limit: usize) -> usize {
    let mut cut = match chars[..limit].iter().rposition(|c| c.is_whitespace()) {
        Some(space) if space >= limit / 2 => space + 1,
        _ => limit,
    };
    while cut > 1 && splits_escape(&chars[..cut], format) {
        cut -= 1;
    }
    cut
}

fn splits_escape(head: &[char], format: MessageFormat) -> bool {
    match format {
        MessageFormat::Plain => false,
        MessageFormat::Markdown => {
            head.iter().rev().take_while(|&&c| c == '\\').count() % 2 == 1
        }
        MessageFormat::Html => {
            let opened = head.iter().rposition(|&c| c == '&' || c == '<');
            let closed = head.iter().rposition(|&c| c == ';' || c == '>');
            match (opened, closed) {
                (Some(open), Some(close)) => open > close,
                (Some(_), None) => true,
                (None, _) => false,
            }
        }
    }
}

/// Shared caption followed by the image's position, e.g. `ID: 12 (2/3)`.
fn ordinal_caption(caption: &str, ordinal: usize, total: usize) -> String {
    format!("{caption} ({ordinal}/{total})")
}

fn image_part(item: &DownloadedImage) -> Part {
    let part = Part::bytes(item.bytes.clone()).file_name(item.file_name.clone());
    match item.content_type.as_deref() {
        Some(ct) => part.mime_str(ct).unwrap_or_else(|_| {
            Part::bytes(item.bytes.clone()).file_name(item.file_name.clone())
        }),
        None => part,
    }
}

fn transport(method: &'static str, source: reqwest::Error) -> NotifyError {
    NotifyError::Transport {
        method,
        source: source.without_url(),
    }
}

async fn check_response(
    method: &'static str,
    response: reqwest::Response,
) -> Result<(), NotifyError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| transport(method, e))?;
    let parsed: Option<ApiResponse> = serde_json::from_str(&body).ok();

    match parsed {
        Some(api) if status.is_success() && api.ok => Ok(()),
        Some(api) => Err(NotifyError::Rejected {
            method,
            status: status.as_u16(),
            description: api.description.unwrap_or_else(|| "no description".to_string()),
        }),
        None => Err(NotifyError::Rejected {
            method,
            status: status.as_u16(),
            description: body.chars().take(200).collect(),
        }),
    }
}
