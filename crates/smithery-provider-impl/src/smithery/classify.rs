use bytes::Bytes;

use smithery_provider_core::{Headers, ProxyError, content_type_is, header_get};

const CHALLENGE_MARKERS: &[&str] = &[
    "Just a moment",
    "cf-chl",
    "challenge-platform",
    "cf_chl_opt",
    "Attention Required! | Cloudflare",
];

const MAX_ERROR_BODY_CHARS: usize = 512;

/// Whether the headers alone identify an anti-bot interstitial.
pub fn is_challenge_headers(headers: &Headers) -> bool {
    header_get(headers, "cf-mitigated").is_some_and(|v| v.eq_ignore_ascii_case("challenge"))
        || content_type_is(headers, "text/html")
}

pub fn is_challenge(headers: &Headers, body: &[u8]) -> bool {
    if is_challenge_headers(headers) {
        return true;
    }
    let text = String::from_utf8_lossy(body);
    CHALLENGE_MARKERS.iter().any(|marker| text.contains(marker))
}

/// Maps a buffered non-2xx response onto the error taxonomy.
pub fn classify_failure(
    status: u16,
    headers: &Headers,
    body: &Bytes,
    credential_index: usize,
    credential_name: &str,
) -> ProxyError {
    if is_challenge(headers, body) {
        return ProxyError::UpstreamChallenge {
            index: credential_index,
            status,
        };
    }
    if status == 401 || status == 403 {
        return ProxyError::AuthRejected {
            index: credential_index,
            name: credential_name.to_string(),
            status,
        };
    }
    unexpected_status(status, body)
}

/// Maps a buffered 2xx response that is not an event stream. A challenge
/// page or an error document served with a success status must not reach
/// the relay, which would read it as an empty completion.
pub fn classify_non_stream_success(
    status: u16,
    headers: &Headers,
    body: &Bytes,
    credential_index: usize,
) -> ProxyError {
    if is_challenge(headers, body) {
        return ProxyError::UpstreamChallenge {
            index: credential_index,
            status,
        };
    }
    unexpected_status(status, body)
}

fn unexpected_status(status: u16, body: &Bytes) -> ProxyError {
    let text = String::from_utf8_lossy(body);
    ProxyError::UpstreamStatus {
        status,
        body: text.chars().take(MAX_ERROR_BODY_CHARS).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn html_or_mitigation_header_is_a_challenge() {
        let html = headers(&[("Content-Type", "text/html; charset=UTF-8")]);
        assert!(matches!(
            classify_failure(403, &html, &Bytes::new(), 0, "a"),
            ProxyError::UpstreamChallenge { index: 0, status: 403 }
        ));

        let mitigated = headers(&[("cf-mitigated", "challenge")]);
        assert!(is_challenge_headers(&mitigated));
    }

    #[test]
    fn body_markers_are_a_challenge() {
        let plain = headers(&[("content-type", "text/plain")]);
        let body = Bytes::from_static(b"<title>Just a moment...</title>");
        assert!(matches!(
            classify_failure(503, &plain, &body, 1, "b"),
            ProxyError::UpstreamChallenge { index: 1, .. }
        ));
    }

    #[test]
    fn plain_auth_failures_name_the_credential() {
        let json = headers(&[("content-type", "application/json")]);
        let body = Bytes::from_static(br#"{"error":"unauthorized"}"#);
        match classify_failure(401, &json, &body, 2, "token-3") {
            ProxyError::AuthRejected { index, name, status } => {
                assert_eq!((index, name.as_str(), status), (2, "token-3", 401));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn success_bodies_with_markers_are_a_challenge() {
        let plain = headers(&[("content-type", "text/plain")]);
        let body = Bytes::from_static(b"<!DOCTYPE html><title>Just a moment...</title>");
        assert!(matches!(
            classify_non_stream_success(200, &plain, &body, 3),
            ProxyError::UpstreamChallenge { index: 3, status: 200 }
        ));

        let json = headers(&[("content-type", "application/json")]);
        let body = Bytes::from_static(br#"{"error":"model overloaded"}"#);
        match classify_non_stream_success(200, &json, &body, 0) {
            ProxyError::UpstreamStatus { status, body } => {
                assert_eq!(status, 200);
                assert!(body.contains("model overloaded"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn other_statuses_keep_a_truncated_body() {
        let body = Bytes::from(vec![b'x'; 2048]);
        match classify_failure(500, &Headers::new(), &body, 0, "a") {
            ProxyError::UpstreamStatus { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body.len(), MAX_ERROR_BODY_CHARS);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
