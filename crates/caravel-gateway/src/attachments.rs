// SPDX-FileCopyrightText: 2026 Caravel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Attachment transfer between instances.
//!
//! Attachments are transient: bytes are downloaded from the source, uploaded
//! to the target for an opaque token, and the token is consumed exactly once
//! when the owning comment is committed.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use caravel_core::{CaravelError, Result};

use crate::client::InstanceClient;

/// Downloaded attachment bytes plus the metadata needed to re-upload them.
#[derive(Debug)]
pub struct AttachmentPayload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

fn disposition_filename_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"filename="([^"]+)""#).unwrap())
}

/// Extract the filename from a `content-disposition` header value.
pub(crate) fn filename_from_disposition(disposition: &str) -> Option<String> {
    disposition_filename_pattern()
        .captures(disposition)
        .map(|captures| captures[1].to_string())
}

impl InstanceClient {
    /// Download attachment bytes from an absolute URL on this instance.
    ///
    /// Any failure is an [`CaravelError::Attachment`]: callers drop the one
    /// attachment and keep going.
    pub async fn download_attachment(&self, url: &str) -> Result<AttachmentPayload> {
        let response = self
            .authed_get(url)
            .send()
            .await
            .map_err(|e| CaravelError::Attachment {
                url: url.to_string(),
                message: format!("download failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CaravelError::Attachment {
                url: url.to_string(),
                message: format!("download failed with status {}", status.as_u16()),
            });
        }

        let file_name = response
            .headers()
            .get("content-disposition")
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_disposition)
            .unwrap_or_else(|| "attachment".to_string());
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CaravelError::Attachment {
                url: url.to_string(),
                message: format!("reading body failed: {e}"),
            })?
            .to_vec();

        debug!(url, file_name, size = bytes.len(), "attachment downloaded");
        Ok(AttachmentPayload {
            file_name,
            content_type,
            bytes,
        })
    }

    /// Upload attachment bytes to this instance, returning the upload token.
    pub async fn upload_attachment(&self, payload: AttachmentPayload) -> Result<String> {
        let url = format!("{}/api/v2/uploads.json", self.base_url());
        let mut request = self
            .authed_post(&url)
            .query(&[("filename", payload.file_name.as_str())])
            .body(payload.bytes);
        if let Some(content_type) = &payload.content_type {
            request = request.header("content-type", content_type);
        }

        let response = request.send().await.map_err(|e| CaravelError::Attachment {
            url: url.clone(),
            message: format!("upload failed: {e}"),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CaravelError::Attachment {
                url,
                message: format!("upload failed with status {}", status.as_u16()),
            });
        }

        let value: Value = response.json().await.map_err(|e| CaravelError::Attachment {
            url: url.clone(),
            message: format!("parsing upload response failed: {e}"),
        })?;

        value
            .pointer("/upload/token")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| CaravelError::Attachment {
                url,
                message: "upload response carried no token".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(server: &MockServer) -> InstanceClient {
        InstanceClient::new(
            "target",
            server.uri(),
            "agent@example.com",
            SecretString::from("hunter2".to_string()),
        )
        .unwrap()
    }

    #[test]
    fn filename_parses_from_inline_disposition() {
        assert_eq!(
            filename_from_disposition(r#"inline; filename="screenshot.png""#),
            Some("screenshot.png".to_string())
        );
        assert_eq!(filename_from_disposition("inline"), None);
    }

    #[tokio::test]
    async fn download_carries_filename_and_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/attachments/token/abc/image.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-disposition", r#"inline; filename="image.png""#)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(vec![0x89, 0x50, 0x4e, 0x47]),
            )
            .mount(&server)
            .await;

        let url = format!("{}/attachments/token/abc/image.png", server.uri());
        let payload = test_client(&server).download_attachment(&url).await.unwrap();
        assert_eq!(payload.file_name, "image.png");
        assert_eq!(payload.content_type.as_deref(), Some("image/png"));
        assert_eq!(payload.bytes.len(), 4);
    }

    #[tokio::test]
    async fn download_failure_is_an_attachment_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/attachments/gone.png"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let url = format!("{}/attachments/gone.png", server.uri());
        let result = test_client(&server).download_attachment(&url).await;
        match result {
            Err(CaravelError::Attachment { message, .. }) => {
                assert!(message.contains("403"), "got: {message}");
            }
            other => panic!("expected attachment error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn upload_returns_the_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/uploads.json"))
            .and(query_param("filename", "image.png"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "upload": {"token": "tok_6bk3gkphf"}
            })))
            .mount(&server)
            .await;

        let token = test_client(&server)
            .upload_attachment(AttachmentPayload {
                file_name: "image.png".into(),
                content_type: Some("image/png".into()),
                bytes: vec![1, 2, 3],
            })
            .await
            .unwrap();
        assert_eq!(token, "tok_6bk3gkphf");
    }
}
