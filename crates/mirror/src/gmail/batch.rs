//! Multipart batch codec for the Gmail batch endpoint
//!
//! Requests go to `POST https://gmail.googleapis.com/batch/gmail/v1` as
//! `multipart/mixed`; each part is an `application/http` envelope holding
//! one `messages.get`. Responses come back the same way. Parts are
//! associated with the requested ids by position — the Content-ID echo is
//! advisory only, some frontends rewrite it.

use rand::Rng;

use super::api::{ErrorEnvelope, GmailMessage};
use super::{BatchItem, GmailError, ItemError, MessageFormat};

/// Generate a fresh multipart boundary
pub fn new_boundary() -> String {
    let mut rng = rand::rng();
    format!("batch_{:016x}", rng.random::<u64>())
}

/// Encode a metadata batch request body
///
/// The caller guarantees `ids.len() <= 100`; the framing is CRLF
/// throughout, with a closing `--boundary--` terminator.
pub fn encode_batch_request(boundary: &str, ids: &[String], format: MessageFormat) -> String {
    let mut body = String::new();
    for id in ids {
        body.push_str(&format!("--{}\r\n", boundary));
        body.push_str("Content-Type: application/http\r\n");
        body.push_str(&format!("Content-ID: <{}>\r\n\r\n", id));
        body.push_str(&format!(
            "GET /gmail/v1/users/me/messages/{}?format={} HTTP/1.1\r\n\r\n",
            id,
            format.as_str()
        ));
    }
    body.push_str(&format!("--{}--\r\n", boundary));
    body
}

/// Parse a multipart batch response into per-id items
///
/// The boundary comes from the response Content-Type; when absent, the
/// first `--…` line of the body is used. Items line up with `ids` by
/// position; missing trailing parts are reported as malformed items rather
/// than failing the whole batch.
pub fn parse_batch_response(
    content_type: Option<&str>,
    body: &str,
    ids: &[String],
) -> Result<Vec<BatchItem>, GmailError> {
    let boundary = boundary_from_content_type(content_type)
        .or_else(|| boundary_from_body(body))
        .ok_or_else(|| GmailError::BadResponse("no multipart boundary".to_string()))?;

    let marker = format!("--{}", boundary);
    let parts: Vec<&str> = body
        .split(marker.as_str())
        .map(|p| p.trim_start_matches("\r\n").trim_start_matches('\n'))
        .filter(|p| {
            let trimmed = p.trim();
            !trimmed.is_empty() && trimmed != "--"
        })
        .collect();

    let mut items = Vec::with_capacity(ids.len());
    for (i, id) in ids.iter().enumerate() {
        let item = match parts.get(i) {
            Some(part) => parse_part(id, part),
            None => BatchItem {
                id: id.clone(),
                result: Err(ItemError {
                    code: 0,
                    message: "missing batch part".to_string(),
                    status: "MALFORMED".to_string(),
                }),
            },
        };
        items.push(item);
    }
    Ok(items)
}

fn boundary_from_content_type(content_type: Option<&str>) -> Option<String> {
    content_type?.split(';').find_map(|part| {
        let part = part.trim();
        part.strip_prefix("boundary=")
            .map(|v| v.trim_matches('"').to_string())
    })
}

fn boundary_from_body(body: &str) -> Option<String> {
    body.lines()
        .find(|line| line.starts_with("--"))
        .map(|line| line.trim_end_matches('-').trim_start_matches('-').to_string())
        .filter(|b| !b.is_empty())
}

/// Parse one `application/http` part: status line first, then the JSON
/// body after the first blank line. Only bodies starting with `{` are
/// decoded.
fn parse_part(id: &str, part: &str) -> BatchItem {
    let status_code = part
        .lines()
        .find(|line| line.starts_with("HTTP/"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse::<u16>().ok())
        .unwrap_or(0);

    let json = part.find('{').and_then(|start| {
        let tail = &part[start..];
        tail.rfind('}').map(|end| &tail[..=end])
    });

    if (200..300).contains(&status_code) {
        if let Some(json) = json
            && let Ok(message) = serde_json::from_str::<GmailMessage>(json)
        {
            return BatchItem {
                id: id.to_string(),
                result: Ok(message),
            };
        }
        return BatchItem {
            id: id.to_string(),
            result: Err(ItemError {
                code: status_code,
                message: "unparseable part body".to_string(),
                status: "MALFORMED".to_string(),
            }),
        };
    }

    // Error part: prefer Gmail's embedded error envelope
    let (message, status) = json
        .and_then(|j| serde_json::from_str::<ErrorEnvelope>(j).ok())
        .map(|e| {
            (
                e.error.message.unwrap_or_default(),
                e.error.status.unwrap_or_default(),
            )
        })
        .unwrap_or_else(|| (format!("HTTP {}", status_code), String::new()));

    BatchItem {
        id: id.to_string(),
        result: Err(ItemError {
            code: status_code,
            message,
            status,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn message_part(boundary: &str, id: &str) -> String {
        format!(
            "--{b}\r\nContent-Type: application/http\r\nContent-ID: <response-{id}>\r\n\r\n\
             HTTP/1.1 200 OK\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n\
             {{\"id\":\"{id}\",\"threadId\":\"t-{id}\",\"labelIds\":[\"INBOX\"],\
             \"snippet\":\"hello\",\"internalDate\":\"1700000000000\",\"sizeEstimate\":1024}}\r\n",
            b = boundary,
            id = id
        )
    }

    #[test]
    fn test_encode_request_shape() {
        let body = encode_batch_request("batch_x", &ids(&["m1", "m2"]), MessageFormat::Metadata);
        assert!(body.starts_with("--batch_x\r\nContent-Type: application/http\r\n"));
        assert!(body.contains("Content-ID: <m1>\r\n\r\nGET /gmail/v1/users/me/messages/m1?format=metadata HTTP/1.1\r\n\r\n"));
        assert!(body.contains("GET /gmail/v1/users/me/messages/m2?format=metadata HTTP/1.1"));
        assert!(body.ends_with("--batch_x--\r\n"));
    }

    #[test]
    fn test_encode_then_extract_preserves_id_order() {
        let requested = ids(&["m3", "m1", "m2"]);
        let body = encode_batch_request("batch_x", &requested, MessageFormat::Metadata);

        let extracted: Vec<String> = body
            .lines()
            .filter_map(|line| line.strip_prefix("GET /gmail/v1/users/me/messages/"))
            .filter_map(|rest| rest.split('?').next())
            .map(|id| id.to_string())
            .collect();
        assert_eq!(extracted, requested);
    }

    #[test]
    fn test_parse_single_part() {
        let boundary = "batch_abc";
        let body = format!("{}--{}--\r\n", message_part(boundary, "m1"), boundary);
        let content_type = format!("multipart/mixed; boundary={}", boundary);

        let items = parse_batch_response(Some(&content_type), &body, &ids(&["m1"])).unwrap();
        assert_eq!(items.len(), 1);
        let message = items[0].result.as_ref().unwrap();
        assert_eq!(message.id, "m1");
        assert_eq!(message.thread_id.as_deref(), Some("t-m1"));
        assert_eq!(message.size_estimate, Some(1024));
    }

    #[test]
    fn test_parse_associates_by_position_not_content_id() {
        // The Content-ID echoes are rewritten; position wins
        let boundary = "batch_abc";
        let body = format!(
            "{}{}--{}--\r\n",
            message_part(boundary, "m1"),
            message_part(boundary, "m2"),
            boundary
        );
        let content_type = format!("multipart/mixed; boundary={}", boundary);

        let items =
            parse_batch_response(Some(&content_type), &body, &ids(&["m1", "m2"])).unwrap();
        assert_eq!(items[0].id, "m1");
        assert_eq!(items[1].id, "m2");
        assert_eq!(items[1].result.as_ref().unwrap().id, "m2");
    }

    #[test]
    fn test_parse_boundary_fallback_from_body() {
        let boundary = "batch_fallback";
        let body = format!("{}--{}--\r\n", message_part(boundary, "m1"), boundary);

        let items = parse_batch_response(None, &body, &ids(&["m1"])).unwrap();
        assert!(items[0].result.is_ok());

        let items = parse_batch_response(Some("multipart/mixed"), &body, &ids(&["m1"])).unwrap();
        assert!(items[0].result.is_ok());
    }

    #[test]
    fn test_parse_error_part() {
        let boundary = "batch_abc";
        let body = format!(
            "--{b}\r\nContent-Type: application/http\r\n\r\n\
             HTTP/1.1 404 Not Found\r\nContent-Type: application/json\r\n\r\n\
             {{\"error\":{{\"code\":404,\"message\":\"Requested entity was not found.\",\
             \"status\":\"NOT_FOUND\"}}}}\r\n--{b}--\r\n",
            b = boundary
        );
        let content_type = format!("multipart/mixed; boundary={}", boundary);

        let items = parse_batch_response(Some(&content_type), &body, &ids(&["gone"])).unwrap();
        let err = items[0].result.as_ref().unwrap_err();
        assert_eq!(err.code, 404);
        assert_eq!(err.status, "NOT_FOUND");
        assert_eq!(err.message, "Requested entity was not found.");
    }

    #[test]
    fn test_parse_mixed_success_and_rate_limited() {
        let boundary = "batch_abc";
        let body = format!(
            "{}--{b}\r\nContent-Type: application/http\r\n\r\n\
             HTTP/1.1 429 Too Many Requests\r\n\r\n\
             {{\"error\":{{\"code\":429,\"message\":\"Rate limit exceeded\",\
             \"status\":\"RESOURCE_EXHAUSTED\"}}}}\r\n--{b}--\r\n",
            message_part(boundary, "m1"),
            b = boundary
        );
        let content_type = format!("multipart/mixed; boundary={}", boundary);

        let items =
            parse_batch_response(Some(&content_type), &body, &ids(&["m1", "m2"])).unwrap();
        assert!(items[0].result.is_ok());
        let err = items[1].result.as_ref().unwrap_err();
        assert_eq!(err.code, 429);
    }

    #[test]
    fn test_parse_short_response_flags_missing_parts() {
        let boundary = "batch_abc";
        let body = format!("{}--{}--\r\n", message_part(boundary, "m1"), boundary);
        let content_type = format!("multipart/mixed; boundary={}", boundary);

        let items =
            parse_batch_response(Some(&content_type), &body, &ids(&["m1", "m2"])).unwrap();
        assert!(items[0].result.is_ok());
        let err = items[1].result.as_ref().unwrap_err();
        assert_eq!(err.status, "MALFORMED");
    }

    #[test]
    fn test_parse_rejects_body_without_boundary() {
        let result = parse_batch_response(None, "plain text", &ids(&["m1"]));
        assert!(matches!(result, Err(GmailError::BadResponse(_))));
    }

    #[test]
    fn test_new_boundary_is_unique() {
        assert_ne!(new_boundary(), new_boundary());
        assert!(new_boundary().starts_with("batch_"));
    }
}
