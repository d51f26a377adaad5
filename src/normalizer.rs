//! Extracts an image reference from an upstream response of unknown shape.
//!
//! Different upstream configurations return images in different places:
//! Google-native `candidates` with inline base64, OpenRouter `message.images`
//! arrays, plain chat content carrying a URL or raw base64, or flatter
//! `data`/`images` envelopes. No single shape is authoritative, so matchers
//! run in a fixed priority order and the first hit wins. Missing or
//! malformed fields are always "no match", never an error.

use serde_json::Value;

/// Where an extracted image lives. Both variants resolve to a string the
/// browser can render directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageLocator {
    /// A plain http(s) URL.
    Remote(String),
    /// A `data:` URL with embedded base64 payload.
    Inline(String),
}

impl ImageLocator {
    pub fn as_str(&self) -> &str {
        match self {
            ImageLocator::Remote(url) | ImageLocator::Inline(url) => url,
        }
    }

    pub fn into_url(self) -> String {
        match self {
            ImageLocator::Remote(url) | ImageLocator::Inline(url) => url,
        }
    }

    fn from_url(url: &str) -> Self {
        if url.starts_with("data:") {
            ImageLocator::Inline(url.to_string())
        } else {
            ImageLocator::Remote(url.to_string())
        }
    }
}

const IMAGE_EXTENSIONS: [&str; 5] = [".jpg", ".jpeg", ".png", ".gif", ".webp"];

/// Raw base64 shorter than this is assumed to be ordinary text, not an image.
const MIN_RAW_BASE64_LEN: usize = 100;

pub fn extract_image(response: &Value) -> Option<ImageLocator> {
    const MATCHERS: [fn(&Value) -> Option<ImageLocator>; 4] = [
        match_candidate_inline_data,
        match_message_images,
        match_message_content,
        match_flat_fallbacks,
    ];

    MATCHERS.iter().find_map(|matcher| matcher(response))
}

/// Google-native shape:
/// `{candidates: [{content: {parts: [{inlineData: {data, mimeType}}]}}]}`.
fn match_candidate_inline_data(response: &Value) -> Option<ImageLocator> {
    let parts = response
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;

    for part in parts {
        let inline = match part.get("inlineData") {
            Some(inline) => inline,
            None => continue,
        };
        if let Some(data) = inline.get("data").and_then(Value::as_str) {
            if data.is_empty() {
                continue;
            }
            let mime = inline
                .get("mimeType")
                .and_then(Value::as_str)
                .unwrap_or("image/png");
            return Some(ImageLocator::Inline(format!("data:{mime};base64,{data}")));
        }
    }
    None
}

/// OpenRouter shape with a typed images array:
/// `{choices: [{message: {images: [{type: "image_url", image_url: {url}}]}}]}`.
fn match_message_images(response: &Value) -> Option<ImageLocator> {
    let images = response
        .get("choices")?
        .get(0)?
        .get("message")?
        .get("images")?
        .as_array()?;

    for image in images {
        if image.get("type").and_then(Value::as_str) != Some("image_url") {
            continue;
        }
        if let Some(url) = image
            .get("image_url")
            .and_then(|v| v.get("url"))
            .and_then(Value::as_str)
        {
            return Some(ImageLocator::from_url(url));
        }
    }
    None
}

/// Classic chat content: the assistant's text may carry a bare image URL,
/// an embedded data URL, or be nothing but raw base64.
fn match_message_content(response: &Value) -> Option<ImageLocator> {
    let content = response
        .get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()?;

    if let Some(url) = find_image_url(content) {
        return Some(ImageLocator::Remote(url));
    }

    if let Some(data_url) = find_data_url(content) {
        return Some(ImageLocator::Inline(data_url));
    }

    let trimmed = content.trim();
    if trimmed.len() >= MIN_RAW_BASE64_LEN && trimmed.bytes().all(is_base64_byte) {
        return Some(ImageLocator::Inline(format!(
            "data:image/png;base64,{trimmed}"
        )));
    }

    None
}

/// Flatter envelopes some configurations return, checked last.
fn match_flat_fallbacks(response: &Value) -> Option<ImageLocator> {
    if let Some(url) = response
        .get("data")
        .and_then(|d| d.get("images"))
        .and_then(|i| i.get(0))
        .and_then(|i| i.get("url"))
        .and_then(Value::as_str)
    {
        return Some(ImageLocator::from_url(url));
    }

    if let Some(url) = response
        .get("images")
        .and_then(|i| i.get(0))
        .and_then(|i| i.get("url"))
        .and_then(Value::as_str)
    {
        return Some(ImageLocator::from_url(url));
    }

    if let Some(data) = response.get("data").and_then(Value::as_str) {
        if data.len() > MIN_RAW_BASE64_LEN {
            return Some(ImageLocator::Inline(format!("data:image/png;base64,{data}")));
        }
    }

    None
}

/// Finds the first bare http(s) URL in `content` that ends in a known image
/// extension. Query strings and trailing prose are cut after the extension.
fn find_image_url(content: &str) -> Option<String> {
    let mut search_from = 0;
    while let Some(rel) = content[search_from..].find("http") {
        let start = search_from + rel;
        let rest = &content[start..];
        if !rest.starts_with("http://") && !rest.starts_with("https://") {
            search_from = start + 4;
            continue;
        }

        let token_end = rest
            .find(|c: char| c.is_whitespace() || c == ')')
            .unwrap_or(rest.len());
        let token = &rest[..token_end];

        if let Some(end) = last_extension_end(token) {
            return Some(token[..end].to_string());
        }
        search_from = start + token_end.max(4);
    }
    None
}

/// Byte offset just past the last image-extension occurrence in `token`,
/// case-insensitive, or None when no extension appears.
fn last_extension_end(token: &str) -> Option<usize> {
    let lower = token.to_ascii_lowercase();
    let mut best = None;
    for ext in IMAGE_EXTENSIONS {
        let mut from = 0;
        while let Some(rel) = lower[from..].find(ext) {
            let end = from + rel + ext.len();
            best = Some(best.map_or(end, |b: usize| b.max(end)));
            from = end;
        }
    }
    best
}

/// Finds an embedded `data:image/<subtype>;base64,<payload>` URL.
fn find_data_url(content: &str) -> Option<String> {
    let start = content.find("data:image/")?;
    let rest = &content[start..];

    let mime_end = rest.find(';')?;
    let after_mime = &rest[mime_end..];
    if !after_mime.starts_with(";base64,") {
        return None;
    }

    let payload_start = mime_end + ";base64,".len();
    let payload = &rest[payload_start..];
    let payload_len = payload
        .bytes()
        .take_while(|&b| is_base64_byte(b))
        .count();
    if payload_len == 0 {
        return None;
    }

    Some(rest[..payload_start + payload_len].to_string())
}

fn is_base64_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'='
}
