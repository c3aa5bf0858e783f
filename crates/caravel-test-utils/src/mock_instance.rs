// SPDX-FileCopyrightText: 2026 Caravel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A wiremock-backed stand-in for one remote instance.

use secrecy::SecretString;
use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use caravel_gateway::InstanceClient;

/// One mock instance. Construct two of these to simulate a source/target
/// pair.
pub struct MockInstance {
    pub server: MockServer,
}

impl MockInstance {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// An [`InstanceClient`] pointed at this mock, with fixed credentials.
    pub fn client(&self, name: &str) -> InstanceClient {
        InstanceClient::new(
            name,
            self.server.uri(),
            "agent@example.com",
            SecretString::from("hunter2".to_string()),
        )
        .expect("mock client must construct")
    }

    /// Mount a single-record GET endpoint, `{key: record}` envelope.
    pub async fn mount_record(&self, request_path: &str, key: &str, record: Value) {
        Mock::given(method("GET"))
            .and(path(request_path))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ key: record })))
            .mount(&self.server)
            .await;
    }

    /// Mount a GET endpoint answering 404.
    pub async fn mount_missing(&self, request_path: &str) {
        Mock::given(method("GET"))
            .and(path(request_path))
            .respond_with(ResponseTemplate::new(404))
            .mount(&self.server)
            .await;
    }

    /// Mount an unpaginated collection GET endpoint.
    pub async fn mount_collection(&self, request_path: &str, key: &str, records: Vec<Value>) {
        Mock::given(method("GET"))
            .and(path(request_path))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                key: records,
                "next_page": null
            })))
            .mount(&self.server)
            .await;
    }

    /// Mount the search endpoint for one exact query string.
    pub async fn mount_search(&self, query: &str, results: Vec<Value>) {
        Mock::given(method("GET"))
            .and(path("/api/v2/search.json"))
            .and(query_param("query", query))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": results,
                "next_page": null
            })))
            .mount(&self.server)
            .await;
    }

    /// Mount the search endpoint for any query.
    pub async fn mount_any_search(&self, results: Vec<Value>) {
        Mock::given(method("GET"))
            .and(path("/api/v2/search.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": results,
                "next_page": null
            })))
            .mount(&self.server)
            .await;
    }

    /// Mount a create (POST) endpoint answering 201 with `{key: record}`.
    pub async fn mount_created(&self, request_path: &str, key: &str, record: Value) {
        Mock::given(method("POST"))
            .and(path(request_path))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ key: record })))
            .mount(&self.server)
            .await;
    }

    /// Mount an update (PUT) endpoint answering 200 with `{key: record}`.
    pub async fn mount_updated(&self, request_path: &str, key: &str, record: Value) {
        Mock::given(method("PUT"))
            .and(path(request_path))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ key: record })))
            .mount(&self.server)
            .await;
    }

    /// Mount the upload endpoint, answering with a fixed token.
    pub async fn mount_upload(&self, token: &str) {
        Mock::given(method("POST"))
            .and(path("/api/v2/uploads.json"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "upload": {"token": token}
            })))
            .mount(&self.server)
            .await;
    }

    /// Mount a downloadable attachment.
    pub async fn mount_attachment(&self, request_path: &str, file_name: &str, bytes: Vec<u8>) {
        Mock::given(method("GET"))
            .and(path(request_path))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(
                        "content-disposition",
                        format!(r#"inline; filename="{file_name}""#).as_str(),
                    )
                    .insert_header("content-type", "application/octet-stream")
                    .set_body_bytes(bytes),
            )
            .mount(&self.server)
            .await;
    }

    /// Mount the target's ticket-field listing with an `Original Id` marker
    /// field of the given id, plus any extra fields.
    pub async fn mount_marker_field(&self, field_id: u64, extra: Vec<Value>) {
        let mut fields = vec![json!({"id": field_id, "title": "Original Id"})];
        fields.extend(extra);
        self.mount_collection("/api/v2/ticket_fields.json", "ticket_fields", fields)
            .await;
    }

    /// Mount the ticket import endpoint, echoing back a created ticket id.
    pub async fn mount_import(&self, created_id: u64) {
        Mock::given(method("POST"))
            .and(path("/api/v2/imports/tickets.json"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "ticket": {"id": created_id, "status": "open"}
            })))
            .mount(&self.server)
            .await;
    }
}
