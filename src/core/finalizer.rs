//! Shapes the upstream response into the one the client receives.
//!
//! Decompression itself rides on the teacher's existing `reqwest` feature
//! set (`gzip`, `brotli`, `deflate` — see `Cargo.toml`), which decodes the
//! body transparently regardless of the `Accept-Encoding` we send; this
//! component's job is everything the spec asks for on top of that: hop-by-hop
//! stripping, SSE passthrough, and the HTML `<base>` rewrite.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, HttpResponseBuilder};
use futures_util::StreamExt;
use log::warn;

const HOP_BY_HOP_RESPONSE_HEADERS: &[&str] =
    &["server", "date", "transfer-encoding", "content-length", "content-encoding"];

fn content_type(response: &reqwest::Response) -> String {
    response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase()
}

fn copy_headers(builder: &mut HttpResponseBuilder, response: &reqwest::Response) {
    for (name, value) in response.headers().iter() {
        let lower = name.as_str().to_ascii_lowercase();
        if HOP_BY_HOP_RESPONSE_HEADERS.contains(&lower.as_str()) {
            continue;
        }
        if let (Ok(header_name), Ok(header_value)) = (
            actix_web::http::header::HeaderName::from_bytes(lower.as_bytes()),
            actix_web::http::header::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            builder.insert_header((header_name, header_value));
        }
    }
}

/// Inserts `<base href="{original_host}/">` immediately after the first
/// `<head...>` occurrence (case-insensitive). Identity if no `<head>` tag
/// is present.
fn inject_base_href(body: &str, original_host: &str) -> String {
    let lower = body.to_ascii_lowercase();
    let Some(head_start) = lower.find("<head") else {
        return body.to_string();
    };
    let Some(tag_close_offset) = lower[head_start..].find('>') else {
        return body.to_string();
    };
    let insert_at = head_start + tag_close_offset + 1;
    let mut out = String::with_capacity(body.len() + 64);
    out.push_str(&body[..insert_at]);
    out.push_str(&format!("<base href=\"{}/\">", original_host.trim_end_matches('/')));
    out.push_str(&body[insert_at..]);
    out
}

/// Turns a successful upstream response into the response the client sees.
/// Callers only invoke this on `Ok` executor outcomes; an executor failure
/// is mapped to its own status by `GatewayError`'s `ResponseError` impl.
pub async fn finalize(response: reqwest::Response, original_host: &str) -> HttpResponse {
    let status = StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let ctype = content_type(&response);

    if ctype.starts_with("text/event-stream") {
        let mut builder = HttpResponse::build(status);
        copy_headers(&mut builder, &response);
        builder.insert_header(("Cache-Control", "no-cache"));
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(actix_web::error::ErrorBadGateway));
        return builder.streaming(stream);
    }

    let mut builder = HttpResponse::build(status);
    copy_headers(&mut builder, &response);

    // Collected chunk-by-chunk rather than via `response.bytes()` so that a
    // decode error partway through (a malformed compressed body, say) still
    // leaves whatever was already read passed through unchanged instead of
    // being replaced with a synthetic error response.
    let mut collected: Vec<u8> = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => collected.extend_from_slice(&bytes),
            Err(error) => {
                warn!(
                    "finalizer: upstream body stream errored after {} bytes, passing through what was received: {}",
                    collected.len(),
                    error
                );
                break;
            }
        }
    }
    let body = actix_web::web::Bytes::from(collected);

    if ctype.starts_with("text/html") {
        match std::str::from_utf8(&body) {
            Ok(text) => {
                let rewritten = inject_base_href(text, original_host);
                return builder.body(rewritten);
            }
            Err(_) => return builder.body(body),
        }
    }

    builder.body(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injects_base_href_after_first_head_tag() {
        let body = "<html><head><title>x</title></head></html>";
        let out = inject_base_href(body, "https://proxy.example");
        assert_eq!(
            out,
            "<html><head><base href=\"https://proxy.example/\"><title>x</title></head></html>"
        );
    }

    #[test]
    fn handles_head_tag_with_attributes() {
        let body = "<html><head lang=\"en\"><title>x</title>";
        let out = inject_base_href(body, "https://proxy.example/");
        assert!(out.starts_with("<html><head lang=\"en\"><base href=\"https://proxy.example/\">"));
    }

    #[test]
    fn identity_when_no_head_tag() {
        let body = "plain text body";
        assert_eq!(inject_base_href(body, "https://proxy.example"), body);
    }
}
