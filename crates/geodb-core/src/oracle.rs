use std::sync::Arc;

use futures_util::StreamExt;
use log::debug;

use crate::error::UpdateError;
use crate::inspect::HashAlgorithm;
use crate::transport::{ByteStream, Transport};

const SNIPPET_CHARS: usize = 64;
/// Room for whitespace or a trailing file name next to the token.
const BODY_SLACK: usize = 64;

/// Reads the checksum a server publishes next to its artifact.
#[derive(Clone)]
pub struct VersionOracle {
    transport: Arc<dyn Transport>,
    algorithm: HashAlgorithm,
}

impl VersionOracle {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, algorithm: HashAlgorithm) -> Self {
        Self {
            transport,
            algorithm,
        }
    }

    /// Fetch and validate the remote version token.
    ///
    /// A valid token is exactly [`HashAlgorithm::token_len`] hex characters
    /// once surrounding whitespace is trimmed. Anything else, such as an HTML
    /// error page served with a 200 status, is rejected.
    ///
    /// Reading stops as soon as the body is clearly too long to be a token.
    ///
    /// # Errors
    /// Transport failures, `EmptyResponse` for an empty body and
    /// `MalformedToken` for a body of the wrong shape.
    pub async fn fetch_remote_token(&self, url: &str) -> Result<String, UpdateError> {
        let expected = self.algorithm.token_len();
        let stream = self.transport.fetch(url).await?;
        let body = read_capped(url, stream, expected).await?;
        let text = String::from_utf8_lossy(&body);
        let token = parse_token(url, &text, expected)?;
        debug!("Remote token from {url}: {token}");
        Ok(token)
    }
}

async fn read_capped(
    url: &str,
    mut stream: ByteStream,
    expected: usize,
) -> Result<Vec<u8>, UpdateError> {
    let limit = expected + BODY_SLACK;
    let mut body = Vec::new();
    while let Some(chunk) = stream.next().await {
        body.extend_from_slice(&chunk?);
        if body.len() > limit {
            debug!("Token body from {url} exceeds {limit} bytes, giving up");
            return Err(malformed(url, expected, &String::from_utf8_lossy(&body)));
        }
    }
    Ok(body)
}

fn malformed(url: &str, expected: usize, body: &str) -> UpdateError {
    UpdateError::MalformedToken {
        url: url.to_string(),
        expected,
        actual: body.trim().chars().take(SNIPPET_CHARS).collect(),
    }
}

fn parse_token(url: &str, body: &str, expected: usize) -> Result<String, UpdateError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(UpdateError::EmptyResponse {
            url: url.to_string(),
        });
    }

    if trimmed.len() != expected || !trimmed.chars().all(|ch| ch.is_ascii_hexdigit()) {
        return Err(malformed(url, expected, trimmed));
    }

    Ok(trimmed.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use bytes::Bytes;
    use futures_util::StreamExt;

    use super::{VersionOracle, parse_token};
    use crate::error::{TransportError, UpdateError};
    use crate::inspect::HashAlgorithm;
    use crate::transport::{ByteStream, Transport};

    const URL: &str = "https://example.test/GeoLite2-Country.md5";

    struct StreamingTransport(fn() -> ByteStream);

    #[async_trait]
    impl Transport for StreamingTransport {
        async fn fetch(&self, _url: &str) -> Result<ByteStream, TransportError> {
            Ok((self.0)())
        }
    }

    fn oracle(make_stream: fn() -> ByteStream) -> VersionOracle {
        VersionOracle::new(
            Arc::new(StreamingTransport(make_stream)),
            HashAlgorithm::Md5,
        )
    }

    #[tokio::test]
    async fn token_split_across_chunks_is_joined() {
        let token = oracle(|| {
            futures_util::stream::iter([
                Ok(Bytes::from_static(b"5eb63bbbe01eeed0")),
                Ok(Bytes::from_static(b"93cb22bb8f5acdc3\n")),
            ])
            .boxed()
        })
        .fetch_remote_token(URL)
        .await
        .expect("token should parse");

        assert_eq!(token, "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[tokio::test]
    async fn stream_error_aborts_token_read() {
        let result = oracle(|| {
            futures_util::stream::iter([
                Ok(Bytes::from_static(b"5eb63bbb")),
                Err(TransportError::network(URL, "reset by peer")),
            ])
            .boxed()
        })
        .fetch_remote_token(URL)
        .await;

        assert!(matches!(
            result,
            Err(UpdateError::NetworkFailure { ref details, .. }) if details == "reset by peer"
        ));
    }

    #[tokio::test]
    async fn endless_body_is_rejected_without_reading_it_all() {
        let result = oracle(|| {
            futures_util::stream::repeat_with(|| Ok(Bytes::from_static(b"<html>padding")))
                .boxed()
        })
        .fetch_remote_token(URL)
        .await;

        assert!(matches!(
            result,
            Err(UpdateError::MalformedToken { expected: 32, ref actual, .. })
                if actual.starts_with("<html>") && actual.len() == 64
        ));
    }

    #[test]
    fn accepts_exact_length_hex_and_trims_newline() {
        let token = parse_token(URL, "5EB63BBBE01EEED093CB22BB8F5ACDC3\n", 32)
            .expect("token should parse");
        assert_eq!(token, "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[test]
    fn empty_and_blank_bodies_are_empty_response() {
        assert!(matches!(
            parse_token(URL, "", 32),
            Err(UpdateError::EmptyResponse { .. })
        ));
        assert!(matches!(
            parse_token(URL, " \r\n", 32),
            Err(UpdateError::EmptyResponse { .. })
        ));
    }

    #[test]
    fn short_and_long_bodies_are_rejected_alike() {
        for body in ["0123456789".to_string(), "a".repeat(33), "a".repeat(64)] {
            assert!(
                matches!(
                    parse_token(URL, &body, 32),
                    Err(UpdateError::MalformedToken { expected: 32, .. })
                ),
                "{body:?} should be malformed"
            );
        }
    }

    #[test]
    fn html_error_page_is_malformed_and_truncated() {
        let page = format!("<html><body>{}</body></html>", "x".repeat(500));

        let error = parse_token(URL, &page, 32).expect_err("html must be rejected");

        assert!(
            matches!(error, UpdateError::MalformedToken { ref actual, .. } if actual.len() == 64 && actual.starts_with("<html>"))
        );
    }

    #[test]
    fn non_hex_token_of_right_length_is_malformed() {
        assert!(matches!(
            parse_token(URL, &"z".repeat(32), 32),
            Err(UpdateError::MalformedToken { .. })
        ));
    }

    #[test]
    fn sha256_tokens_use_their_own_length() {
        let token = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
        assert_eq!(parse_token(URL, token, 64).expect("token should parse"), token);
        assert!(parse_token(URL, token, 32).is_err());
    }
}
