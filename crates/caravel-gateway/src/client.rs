// SPDX-FileCopyrightText: 2026 Caravel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for one instance of the remote record-management API.
//!
//! Provides [`InstanceClient`], which handles request construction, basic
//! authentication, envelope unwrapping, and transparent pagination. The
//! client never retries: callers own retry policy (the ticket pipeline
//! retries its import commit exactly once, nothing else does).

use std::time::Duration;

use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use caravel_core::records::Ticket;
use caravel_core::{CaravelError, Result};

/// An incremental-export feed reports a full page with exactly this many
/// records; a smaller page means the feed is exhausted.
const EXPORT_FULL_PAGE: u64 = 1000;

/// One page of the incremental ticket export feed.
#[derive(Debug)]
pub struct TicketPage {
    pub tickets: Vec<Ticket>,
    /// URL of the next page, present only while the feed reports full pages.
    pub next_page: Option<String>,
    /// Feed position after this page, useful for resuming a later run.
    pub end_time: Option<i64>,
}

/// HTTP client for a single instance (source or target).
///
/// Two long-lived values exist for the process lifetime, immutable after
/// construction.
#[derive(Debug)]
pub struct InstanceClient {
    name: String,
    base_url: String,
    email: String,
    password: SecretString,
    http: reqwest::Client,
}

impl InstanceClient {
    /// Creates a client for the instance at `base_url` (no trailing slash).
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        email: impl Into<String>,
        password: SecretString,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| CaravelError::Transport {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            email: email.into(),
            password,
            http,
        })
    }

    /// Instance label used in logs ("source" / "target").
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.basic_auth(&self.email, Some(self.password.expose_secret()))
    }

    pub(crate) fn authed_get(&self, url: &str) -> reqwest::RequestBuilder {
        self.authed(self.http.get(url))
    }

    pub(crate) fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.authed(self.http.post(url))
    }

    async fn read_json(&self, response: reqwest::Response, path: &str) -> Result<Value> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CaravelError::Gateway {
                status: status.as_u16(),
                path: path.to_string(),
                body,
            });
        }
        response
            .json()
            .await
            .map_err(|e| CaravelError::Transport {
                message: format!("failed to parse response from {path}: {e}"),
                source: Some(Box::new(e)),
            })
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        let response = self
            .authed(self.http.get(url))
            .send()
            .await
            .map_err(|e| CaravelError::Transport {
                message: format!("GET {url} failed: {e}"),
                source: Some(Box::new(e)),
            })?;
        self.read_json(response, url).await
    }

    /// Fetch every record behind `path`, following `next_page` links until
    /// the server reports no further page.
    ///
    /// `key` names the array inside each page envelope (e.g. `"groups"`).
    pub async fn list<T: DeserializeOwned>(&self, path: &str, key: &str) -> Result<Vec<T>> {
        let mut records = Vec::new();
        let mut next = Some(self.url(path));

        while let Some(url) = next {
            let page = self.get_json(&url).await?;
            let Some(items) = page.get(key).and_then(Value::as_array) else {
                break;
            };
            if items.is_empty() {
                break;
            }
            debug!(instance = %self.name, key, count = items.len(), "page retrieved");
            for item in items {
                records.push(decode(item.clone(), key, &url)?);
            }
            next = page
                .get("next_page")
                .and_then(Value::as_str)
                .map(str::to_owned);
        }

        Ok(records)
    }

    /// Fetch one record; an absent record (404) is `Ok(None)`, any other
    /// non-2xx answer is a gateway error.
    pub async fn fetch<T: DeserializeOwned>(&self, path: &str, key: &str) -> Result<Option<T>> {
        let url = self.url(path);
        let response = self
            .authed(self.http.get(&url))
            .send()
            .await
            .map_err(|e| CaravelError::Transport {
                message: format!("GET {url} failed: {e}"),
                source: Some(Box::new(e)),
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(instance = %self.name, path, "record not found");
            return Ok(None);
        }

        let value = self.read_json(response, &url).await?;
        match value.get(key) {
            Some(record) if !record.is_null() => Ok(Some(decode(record.clone(), key, &url)?)),
            _ => Ok(None),
        }
    }

    /// Create a record behind `path`, wrapping `body` in a `{key: ...}`
    /// envelope, and return the created record.
    pub async fn create<B, R>(&self, path: &str, key: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.send_enveloped(reqwest::Method::POST, path, key, body)
            .await
    }

    /// Update a record behind `path`; same envelope convention as `create`.
    pub async fn update<B, R>(&self, path: &str, key: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.send_enveloped(reqwest::Method::PUT, path, key, body)
            .await
    }

    async fn send_enveloped<B, R>(
        &self,
        method: reqwest::Method,
        path: &str,
        key: &str,
        body: &B,
    ) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = self.url(path);
        let envelope = envelope(key, body)?;
        let response = self
            .authed(self.http.request(method.clone(), &url))
            .json(&envelope)
            .send()
            .await
            .map_err(|e| CaravelError::Transport {
                message: format!("{method} {url} failed: {e}"),
                source: Some(Box::new(e)),
            })?;

        let value = self.read_json(response, &url).await?;
        match value.get(key) {
            Some(record) if !record.is_null() => decode(record.clone(), key, &url),
            _ => Err(CaravelError::Transport {
                message: format!("response from {url} is missing the {key:?} envelope"),
                source: None,
            }),
        }
    }

    /// Best-effort delete: a non-success answer is logged, never raised.
    pub async fn delete(&self, path: &str) {
        let url = self.url(path);
        match self.authed(self.http.delete(&url)).send().await {
            Ok(response) if !response.status().is_success() => {
                warn!(
                    instance = %self.name,
                    path,
                    status = response.status().as_u16(),
                    "delete failed"
                );
            }
            Ok(_) => debug!(instance = %self.name, path, "deleted"),
            Err(e) => warn!(instance = %self.name, path, error = %e, "delete failed"),
        }
    }

    /// Keyword search. The server matches fuzzily, so callers must
    /// post-filter results for exact field equality.
    pub async fn search(&self, query: &str) -> Result<Vec<Value>> {
        let mut results = Vec::new();
        let first = self.url("/api/v2/search.json");
        let mut request = self.http.get(&first).query(&[("query", query)]);

        loop {
            let response =
                self.authed(request)
                    .send()
                    .await
                    .map_err(|e| CaravelError::Transport {
                        message: format!("search {query:?} failed: {e}"),
                        source: Some(Box::new(e)),
                    })?;
            let page = self.read_json(response, &first).await?;

            let Some(items) = page.get("results").and_then(Value::as_array) else {
                break;
            };
            if items.is_empty() {
                break;
            }
            results.extend(items.iter().cloned());

            match page.get("next_page").and_then(Value::as_str) {
                Some(next) => request = self.http.get(next),
                None => break,
            }
        }

        debug!(instance = %self.name, query, count = results.len(), "search complete");
        Ok(results)
    }

    /// First page URL of the incremental ticket export feed.
    pub fn incremental_export_url(&self, start_time: i64) -> String {
        format!(
            "{}/api/v2/incremental/tickets.json?start_time={start_time}",
            self.base_url
        )
    }

    /// One page of the incremental ticket export feed. The feed is exhausted
    /// when a page arrives with fewer than the full-page record count.
    pub async fn ticket_export_page(&self, url: &str) -> Result<TicketPage> {
        let page = self.get_json(url).await?;

        let mut tickets = Vec::new();
        if let Some(items) = page.get("tickets").and_then(Value::as_array) {
            for item in items {
                tickets.push(decode(item.clone(), "tickets", url)?);
            }
        }

        let count = page
            .get("count")
            .and_then(Value::as_u64)
            .unwrap_or(tickets.len() as u64);
        let next_page = if count == EXPORT_FULL_PAGE {
            page.get("next_page")
                .and_then(Value::as_str)
                .map(str::to_owned)
        } else {
            None
        };

        Ok(TicketPage {
            tickets,
            next_page,
            end_time: page.get("end_time").and_then(Value::as_i64),
        })
    }
}

fn envelope<B: Serialize + ?Sized>(key: &str, body: &B) -> Result<Value> {
    let mut map = serde_json::Map::new();
    map.insert(
        key.to_string(),
        serde_json::to_value(body).map_err(|e| CaravelError::Internal(format!(
            "failed to serialize {key} payload: {e}"
        )))?,
    );
    Ok(Value::Object(map))
}

fn decode<T: DeserializeOwned>(value: Value, key: &str, url: &str) -> Result<T> {
    serde_json::from_value(value).map_err(|e| CaravelError::Internal(format!(
        "failed to decode {key} record from {url}: {e}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use caravel_core::records::Group;
    use serde_json::json;
    use wiremock::matchers::{header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(server: &MockServer) -> InstanceClient {
        InstanceClient::new(
            "source",
            server.uri(),
            "agent@example.com",
            SecretString::from("hunter2".to_string()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn list_follows_next_page_until_exhaustion() {
        let server = MockServer::start().await;
        let page_two = format!("{}/api/v2/groups.json?page=2", server.uri());

        Mock::given(method("GET"))
            .and(path("/api/v2/groups.json"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "groups": [{"id": 3, "name": "Escalations"}],
                "next_page": null
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/v2/groups.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "groups": [
                    {"id": 1, "name": "Support"},
                    {"id": 2, "name": "Billing"}
                ],
                "next_page": page_two
            })))
            .mount(&server)
            .await;

        let groups: Vec<Group> = test_client(&server)
            .list("/api/v2/groups.json", "groups")
            .await
            .unwrap();

        assert_eq!(groups.len(), 3);
        assert_eq!(groups[2].name, "Escalations");
    }

    #[tokio::test]
    async fn list_stops_on_empty_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/groups.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "groups": [],
                "next_page": "https://should.not/be-followed"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let groups: Vec<Group> = test_client(&server)
            .list("/api/v2/groups.json", "groups")
            .await
            .unwrap();
        assert!(groups.is_empty());
    }

    #[tokio::test]
    async fn fetch_maps_missing_record_to_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/users/99.json"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let user: Option<caravel_core::records::User> = test_client(&server)
            .fetch("/api/v2/users/99.json", "user")
            .await
            .unwrap();
        assert!(user.is_none());
    }

    #[tokio::test]
    async fn fetch_surfaces_other_statuses_as_gateway_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/users/99.json"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let result: Result<Option<caravel_core::records::User>> =
            test_client(&server).fetch("/api/v2/users/99.json", "user").await;
        match result {
            Err(CaravelError::Gateway { status, .. }) => assert_eq!(status, 500),
            other => panic!("expected gateway error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_wraps_body_in_envelope_and_unwraps_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/groups.json"))
            .and(header_exists("authorization"))
            .and(wiremock::matchers::body_json(json!({
                "group": {"name": "Escalations"}
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "group": {"id": 42, "name": "Escalations"}
            })))
            .mount(&server)
            .await;

        let created: Group = test_client(&server)
            .create(
                "/api/v2/groups.json",
                "group",
                &Group {
                    id: None,
                    name: "Escalations".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(created.id, Some(42));
    }

    #[tokio::test]
    async fn delete_never_errors() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/v2/sessions/7.json"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        // Compiles to () -- the point is it neither panics nor returns Err.
        test_client(&server).delete("/api/v2/sessions/7.json").await;
    }

    #[tokio::test]
    async fn search_sends_query_and_follows_pages() {
        let server = MockServer::start().await;
        let page_two = format!("{}/api/v2/search.json?page=2", server.uri());

        Mock::given(method("GET"))
            .and(path("/api/v2/search.json"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"id": 2, "name": "Acme Retail"}],
                "next_page": null
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/v2/search.json"))
            .and(query_param("query", "type:organization name:Acme"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"id": 1, "name": "Acme"}],
                "next_page": page_two
            })))
            .mount(&server)
            .await;

        let results = test_client(&server)
            .search("type:organization name:Acme")
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn export_page_reports_next_only_when_full() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v2/incremental/tickets.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "tickets": [{"id": 10, "status": "open"}],
                "count": 1,
                "end_time": 1_400_000_000,
                "next_page": "https://should.not/be-followed"
            })))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let url = client.incremental_export_url(1_262_304_000);
        assert!(url.contains("start_time=1262304000"));

        let page = client.ticket_export_page(&url).await.unwrap();
        assert_eq!(page.tickets.len(), 1);
        assert_eq!(page.end_time, Some(1_400_000_000));
        assert!(page.next_page.is_none(), "partial page must end the feed");
    }
}
