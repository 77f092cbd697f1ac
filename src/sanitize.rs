//! Sentinel removal for buffered (non-streaming) upstream bodies.

use bytes::Bytes;
use memchr::memmem;
use serde_json::Value;

use crate::config::FallbackSentinelPolicy;
use crate::error::RelayError;

const CONTENT_POINTER: &str = "/choices/0/message/content";

/// Strip the sentinel from a complete response body.
///
/// JSON bodies get the sentinel removed only as a trailing suffix of
/// `choices[0].message.content`; other bodies fall back to `policy`. A body that
/// needs no change is returned as-is, byte for byte.
///
/// # Errors
///
/// [`RelayError::EmptyResponse`] for an empty or whitespace-only body and
/// [`RelayError::EmptyContentAfterFilter`] when the extracted content is blank
/// after stripping.
pub fn sanitize_buffered(
    body: Bytes,
    sentinel: &str,
    policy: FallbackSentinelPolicy,
) -> Result<Bytes, RelayError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(RelayError::EmptyResponse);
    }
    let Ok(text) = std::str::from_utf8(&body) else {
        // binary or still-compressed payload
        return Ok(body);
    };

    match serde_json::from_str::<Value>(text) {
        Ok(mut document) => sanitize_document(&mut document, sentinel)
            .map(|rewritten| rewritten.unwrap_or(body)),
        Err(_) => Ok(apply_fallback(text, sentinel, policy).map_or(body, Bytes::from)),
    }
}

/// Remove `sentinel` once if `content` ends with it.
#[must_use]
pub fn strip_trailing_sentinel<'a>(content: &'a str, sentinel: &str) -> &'a str {
    content.strip_suffix(sentinel).unwrap_or(content)
}

/// Returns `Ok(Some(bytes))` when the document was rewritten.
fn sanitize_document(document: &mut Value, sentinel: &str) -> Result<Option<Bytes>, RelayError> {
    let Some(Value::String(content)) = document.pointer_mut(CONTENT_POINTER) else {
        return Ok(None);
    };

    let stripped = strip_trailing_sentinel(content, sentinel);
    if stripped.trim().is_empty() {
        return Err(RelayError::EmptyContentAfterFilter);
    }
    if stripped.len() == content.len() {
        return Ok(None);
    }

    let new_len = stripped.len();
    content.truncate(new_len);
    serde_json::to_vec(document)
        .map(|encoded| Some(Bytes::from(encoded)))
        .map_err(|err| RelayError::Internal(format!("re-serialising sanitized body: {err}")))
}

fn apply_fallback(text: &str, sentinel: &str, policy: FallbackSentinelPolicy) -> Option<String> {
    let first = memmem::find(text.as_bytes(), sentinel.as_bytes())?;
    Some(match policy {
        FallbackSentinelPolicy::StripAll => text.replace(sentinel, ""),
        FallbackSentinelPolicy::TruncateAtFirst => text[..first].to_string(),
    })
}
