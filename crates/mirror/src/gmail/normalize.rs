//! Gmail API response normalization
//!
//! Converts `messages.get` responses into mirror rows. Works with any
//! format: metadata responses carry only headers, full responses also
//! carry body parts (which is where attachments come from).

use url::Url;

use super::api::{GmailMessage, MessagePart, MessagePayload};
use crate::models::{Attachment, EmailAddress, EmailRecord};

/// Normalize a Gmail message into a mirror row
pub fn normalize_metadata(message: &GmailMessage, synced_at: i64) -> EmailRecord {
    let mut record = EmailRecord::new(&message.id);
    record.thread_id = message.thread_id.clone();
    record.snippet = message
        .snippet
        .as_deref()
        .map(decode_html_entities)
        .filter(|s| !s.is_empty());
    record.size_bytes = message.size_estimate.unwrap_or(0);
    record.internal_date = message
        .internal_date
        .as_deref()
        .and_then(|d| d.parse().ok())
        .unwrap_or(0);
    record.synced_at = synced_at;

    record.apply_labels(message.label_ids.clone().unwrap_or_default());

    if let Some(payload) = &message.payload {
        record.subject = extract_header(payload, "Subject");

        if let Some(from) = extract_header(payload, "From") {
            let address = EmailAddress::parse(&from);
            record.from_email = Some(address.email);
            record.from_name = address.name;
        }

        record.unsubscribe_link =
            extract_header(payload, "List-Unsubscribe").and_then(|v| parse_unsubscribe_link(&v));

        let attachments = collect_attachments(payload);
        record.has_attachments = attachments.len() as i64;
        record.attachments = if attachments.is_empty() {
            None
        } else {
            Some(attachments)
        };
    }

    record
}

/// Extract a header value by name, case-insensitively
fn extract_header(payload: &MessagePayload, name: &str) -> Option<String> {
    payload.headers.as_ref()?.iter().find_map(|h| {
        if h.name.eq_ignore_ascii_case(name) {
            Some(h.value.clone())
        } else {
            None
        }
    })
}

/// Pick one URL out of a List-Unsubscribe header value
///
/// The header carries a comma list of `<uri>` entries; an `https://` entry
/// wins over `mailto:`. Only the first header occurrence reaches this
/// function.
fn parse_unsubscribe_link(value: &str) -> Option<String> {
    let mut mailto = None;
    for entry in value.split(',') {
        let uri = entry.trim().trim_start_matches('<').trim_end_matches('>');
        if uri.is_empty() || Url::parse(uri).is_err() {
            continue;
        }
        if uri.starts_with("https://") || uri.starts_with("http://") {
            return Some(uri.to_string());
        }
        if uri.starts_with("mailto:") && mailto.is_none() {
            mailto = Some(uri.to_string());
        }
    }
    mailto
}

/// Walk the part tree collecting attachment descriptors
fn collect_attachments(payload: &MessagePayload) -> Vec<Attachment> {
    let mut attachments = Vec::new();
    if let Some(parts) = &payload.parts {
        collect_from_parts(parts, &mut attachments);
    }
    attachments
}

fn collect_from_parts(parts: &[MessagePart], out: &mut Vec<Attachment>) {
    for part in parts {
        if let Some(filename) = &part.filename
            && !filename.is_empty()
        {
            out.push(Attachment {
                filename: filename.clone(),
                mime: part.mime_type.clone().unwrap_or_default(),
                size: part.body.as_ref().and_then(|b| b.size).unwrap_or(0),
            });
        }
        if let Some(nested) = &part.parts {
            collect_from_parts(nested, out);
        }
    }
}

/// Decode the HTML entities Gmail leaves in snippets
fn decode_html_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmail::api::{Header, MessageBody};

    fn payload_with_headers(headers: Vec<(&str, &str)>) -> MessagePayload {
        MessagePayload {
            headers: Some(
                headers
                    .into_iter()
                    .map(|(n, v)| Header {
                        name: n.to_string(),
                        value: v.to_string(),
                    })
                    .collect(),
            ),
            mime_type: Some("text/plain".to_string()),
            filename: None,
            body: None,
            parts: None,
        }
    }

    fn message(headers: Vec<(&str, &str)>, labels: &[&str]) -> GmailMessage {
        GmailMessage {
            id: "m1".to_string(),
            thread_id: Some("t1".to_string()),
            label_ids: Some(labels.iter().map(|s| s.to_string()).collect()),
            snippet: Some("You&#39;re in &amp; ready".to_string()),
            internal_date: Some("1700000000000".to_string()),
            size_estimate: Some(2048),
            payload: Some(payload_with_headers(headers)),
        }
    }

    #[test]
    fn test_normalize_basic_fields() {
        let msg = message(
            vec![
                ("From", "Jane Doe <jane@example.com>"),
                ("Subject", "Hello"),
            ],
            &["INBOX", "UNREAD", "CATEGORY_PROMOTIONS"],
        );
        let record = normalize_metadata(&msg, 123);

        assert_eq!(record.message_id, "m1");
        assert_eq!(record.thread_id.as_deref(), Some("t1"));
        assert_eq!(record.subject.as_deref(), Some("Hello"));
        assert_eq!(record.snippet.as_deref(), Some("You're in & ready"));
        assert_eq!(record.from_email.as_deref(), Some("jane@example.com"));
        assert_eq!(record.from_name.as_deref(), Some("Jane Doe"));
        assert_eq!(record.size_bytes, 2048);
        assert_eq!(record.internal_date, 1_700_000_000_000);
        assert_eq!(record.synced_at, 123);
        assert!(record.is_unread);
        assert_eq!(record.category.as_deref(), Some("CATEGORY_PROMOTIONS"));
    }

    #[test]
    fn test_unsubscribe_prefers_https_over_mailto() {
        let msg = message(
            vec![(
                "List-Unsubscribe",
                "<mailto:unsub@example.com>, <https://example.com/unsub?u=1>",
            )],
            &["INBOX"],
        );
        let record = normalize_metadata(&msg, 0);
        assert_eq!(
            record.unsubscribe_link.as_deref(),
            Some("https://example.com/unsub?u=1")
        );
    }

    #[test]
    fn test_unsubscribe_falls_back_to_mailto() {
        let msg = message(
            vec![("List-Unsubscribe", "<mailto:unsub@example.com>")],
            &["INBOX"],
        );
        let record = normalize_metadata(&msg, 0);
        assert_eq!(
            record.unsubscribe_link.as_deref(),
            Some("mailto:unsub@example.com")
        );
    }

    #[test]
    fn test_unsubscribe_ignores_garbage() {
        let msg = message(vec![("List-Unsubscribe", "<not a url>")], &["INBOX"]);
        let record = normalize_metadata(&msg, 0);
        assert_eq!(record.unsubscribe_link, None);
    }

    #[test]
    fn test_attachments_from_part_tree() {
        let mut msg = message(vec![("From", "a@b.c")], &["INBOX"]);
        let payload = msg.payload.as_mut().unwrap();
        payload.parts = Some(vec![
            MessagePart {
                part_id: None,
                mime_type: Some("text/plain".to_string()),
                filename: Some(String::new()),
                headers: None,
                body: None,
                parts: None,
            },
            MessagePart {
                part_id: None,
                mime_type: Some("multipart/mixed".to_string()),
                filename: None,
                headers: None,
                body: None,
                parts: Some(vec![MessagePart {
                    part_id: None,
                    mime_type: Some("application/pdf".to_string()),
                    filename: Some("invoice.pdf".to_string()),
                    headers: None,
                    body: Some(MessageBody {
                        size: Some(51_200),
                        data: None,
                        attachment_id: Some("att1".to_string()),
                    }),
                    parts: None,
                }]),
            },
        ]);

        let record = normalize_metadata(&msg, 0);
        assert_eq!(record.has_attachments, 1);
        let attachments = record.attachments.unwrap();
        assert_eq!(attachments[0].filename, "invoice.pdf");
        assert_eq!(attachments[0].mime, "application/pdf");
        assert_eq!(attachments[0].size, 51_200);
    }

    #[test]
    fn test_metadata_without_payload_still_normalizes() {
        let mut msg = message(vec![], &["SENT"]);
        msg.payload = None;
        let record = normalize_metadata(&msg, 0);
        assert_eq!(record.subject, None);
        assert_eq!(record.category.as_deref(), Some("SENT"));
        assert_eq!(record.has_attachments, 0);
    }
}
