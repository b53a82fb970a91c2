//! Email body extraction
//!
//! Turns a Gmail payload tree into clean plain text for summarization:
//! pick the best part, decode it, strip markup and hyperlinks. Every
//! failure mode degrades to an empty string so one malformed message
//! never stops a digest run.

use aho_corasick::AhoCorasick;
use base64::Engine;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use std::sync::OnceLock;

use crate::gmail::MessagePayload;

/// Extract readable plain text from a message payload.
///
/// Part selection: a `text/plain` part wins outright and ends the scan;
/// otherwise the last `text/html` part is used. A single-part message is
/// taken as-is. Hyperlinks are stripped in both cases so tracking URLs
/// don't bloat the summary input.
pub fn extract_body(payload: &MessagePayload) -> String {
    let data = match payload.parts {
        Some(ref parts) => {
            let mut selected: Option<&str> = None;
            for part in parts {
                let Some(data) = part.body.as_ref().and_then(|b| b.data.as_deref()) else {
                    continue;
                };
                match part.mime_type.as_deref() {
                    Some("text/plain") => {
                        selected = Some(data);
                        break;
                    }
                    // last-seen HTML part wins as the fallback
                    Some("text/html") => selected = Some(data),
                    _ => {}
                }
            }
            selected
        }
        None => payload.body.as_ref().and_then(|b| b.data.as_deref()),
    };

    let Some(data) = data else {
        return String::new();
    };

    let Some(text) = decode_base64url(data) else {
        tracing::debug!("Undecodable body data, continuing with empty body");
        return String::new();
    };

    remove_hyperlinks(&strip_markup(&text))
}

/// Decode base64url body data; tolerates both padded and unpadded input.
/// Returns None on malformed base64 or non-UTF-8 bytes.
fn decode_base64url(data: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(data)
        .or_else(|_| URL_SAFE.decode(data))
        .ok()?;
    String::from_utf8(bytes).ok()
}

/// Convert HTML to readable plain text. Plain text without markup passes
/// through with only whitespace reflow.
fn strip_markup(text: &str) -> String {
    html2text::config::plain()
        .string_from_read(text.as_bytes(), 80)
        .unwrap_or_default()
}

static URL_MATCHER: OnceLock<Option<AhoCorasick>> = OnceLock::new();

/// Remove http(s) URLs: each scheme prefix and the non-whitespace run
/// following it is dropped.
fn remove_hyperlinks(text: &str) -> String {
    let matcher = URL_MATCHER.get_or_init(|| AhoCorasick::new(["https://", "http://"]).ok());
    let Some(ac) = matcher else {
        return text.to_string();
    };

    let mut result = String::with_capacity(text.len());
    let mut pos = 0;
    for m in ac.find_iter(text) {
        // Overlapping match inside a URL we already skipped
        if m.start() < pos {
            continue;
        }
        result.push_str(&text[pos..m.start()]);
        let rest = &text[m.start()..];
        let url_len = rest
            .find(char::is_whitespace)
            .unwrap_or(rest.len());
        pos = m.start() + url_len;
    }
    result.push_str(&text[pos..]);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmail::{MessagePart, PartBody};

    fn encode(text: &str) -> String {
        URL_SAFE_NO_PAD.encode(text)
    }

    fn part(mime_type: &str, text: &str) -> MessagePart {
        MessagePart {
            mime_type: Some(mime_type.to_string()),
            body: Some(PartBody {
                data: Some(encode(text)),
            }),
        }
    }

    fn multipart(parts: Vec<MessagePart>) -> MessagePayload {
        MessagePayload {
            mime_type: Some("multipart/alternative".to_string()),
            headers: vec![],
            body: None,
            parts: Some(parts),
        }
    }

    fn single(text: &str) -> MessagePayload {
        MessagePayload {
            mime_type: Some("text/plain".to_string()),
            headers: vec![],
            body: Some(PartBody {
                data: Some(encode(text)),
            }),
            parts: None,
        }
    }

    #[test]
    fn test_html_only_part_is_stripped() {
        let payload = multipart(vec![part("text/html", "<p>Hi <b>there</b></p>")]);
        let body = extract_body(&payload);
        assert!(body.contains("Hi"));
        assert!(body.contains("there"));
        assert!(!body.contains('<'));
        assert!(!body.contains('>'));
    }

    #[test]
    fn test_plain_text_wins_regardless_of_order() {
        let html_first = multipart(vec![
            part("text/html", "<p>html version</p>"),
            part("text/plain", "plain version"),
        ]);
        assert!(extract_body(&html_first).contains("plain version"));

        let plain_first = multipart(vec![
            part("text/plain", "plain version"),
            part("text/html", "<p>html version</p>"),
        ]);
        assert!(extract_body(&plain_first).contains("plain version"));
    }

    #[test]
    fn test_last_html_part_wins_without_plain() {
        let payload = multipart(vec![
            part("text/html", "<p>first</p>"),
            part("text/html", "<p>second</p>"),
        ]);
        let body = extract_body(&payload);
        assert!(body.contains("second"));
        assert!(!body.contains("first"));
    }

    #[test]
    fn test_urls_removed_from_both_branches() {
        let multi = multipart(vec![part(
            "text/plain",
            "Deal inside https://example.com/x?y=1 act now",
        )]);
        let body = extract_body(&multi);
        assert!(!body.contains("https://example.com/x?y=1"));
        assert!(body.contains("Deal inside"));
        assert!(body.contains("act now"));

        let single = single("See http://tracker.example/abc for details");
        let body = extract_body(&single);
        assert!(!body.contains("http://tracker.example/abc"));
        assert!(body.contains("for details"));
    }

    #[test]
    fn test_unknown_parts_yield_empty() {
        let payload = multipart(vec![MessagePart {
            mime_type: Some("image/png".to_string()),
            body: Some(PartBody {
                data: Some(encode("not text")),
            }),
        }]);
        assert_eq!(extract_body(&payload), "");
    }

    #[test]
    fn test_malformed_base64_yields_empty() {
        let payload = MessagePayload {
            mime_type: Some("text/plain".to_string()),
            headers: vec![],
            body: Some(PartBody {
                data: Some("!!not base64!!".to_string()),
            }),
            parts: None,
        };
        assert_eq!(extract_body(&payload), "");
    }

    #[test]
    fn test_absent_body_yields_empty() {
        let payload = MessagePayload::default();
        assert_eq!(extract_body(&payload), "");
    }

    #[test]
    fn test_padded_base64_accepted() {
        // Some producers pad their base64url data
        let payload = MessagePayload {
            mime_type: Some("text/plain".to_string()),
            headers: vec![],
            body: Some(PartBody {
                data: Some(URL_SAFE.encode("padded body")),
            }),
            parts: None,
        };
        assert!(extract_body(&payload).contains("padded body"));
    }

    #[test]
    fn test_remove_hyperlinks_plain() {
        assert_eq!(
            remove_hyperlinks("before https://a.example/x after"),
            "before  after"
        );
        assert_eq!(remove_hyperlinks("no links here"), "no links here");
        // URL at end of input
        assert_eq!(remove_hyperlinks("tail http://x.example/y"), "tail ");
    }
}
