use std::thread::sleep;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::config::StackSection;
use crate::document::Document;

/// Resolved folder metadata: the folder id and the ids of its direct children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderStat {
    pub id: String,
    pub children: Vec<String>,
}

/// Operations the admin tool needs from the remote document store.
pub trait DocumentStore {
    fn fetch_all(&mut self, doctype: &str) -> Result<Vec<Document>>;
    fn delete_all(&mut self, doctype: &str, documents: &[Document]) -> Result<()>;
    fn stat_by_path(&mut self, path: &str) -> Result<FolderStat>;
    fn create_document(&mut self, doctype: &str, document: &Value) -> Result<Document>;
    fn create_directory(&mut self, parent_id: &str, name: &str) -> Result<String>;
    fn upload_file(
        &mut self,
        parent_id: &str,
        name: &str,
        content: Vec<u8>,
        content_type: &str,
    ) -> Result<String>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct StackClientConfig {
    pub url: String,
    pub token: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    pub page_size: usize,
}

impl StackClientConfig {
    pub fn new(url: &str, token: &str, stack: &StackSection) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            user_agent: stack.user_agent(),
            timeout_ms: stack.timeout_ms(),
            max_retries: stack.retries(),
            retry_delay_ms: stack.retry_delay_ms(),
            page_size: stack.page_size(),
        }
    }
}

/// Blocking HTTP client for a stack instance, authenticated with a bearer token.
pub struct StackClient {
    client: Client,
    config: StackClientConfig,
    request_count: usize,
}

impl StackClient {
    pub fn new(config: StackClientConfig) -> Result<Self> {
        if config.token.trim().is_empty() {
            bail!("a stack token is required (set ACH_TOKEN or pass --token)");
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build stack HTTP client")?;
        Ok(Self {
            client,
            config,
            request_count: 0,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.config.url
    }

    fn endpoint(&self, route: &str) -> Result<Url> {
        Url::parse(&format!("{}{route}", self.config.url))
            .with_context(|| format!("invalid stack URL: {}{route}", self.config.url))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.config.token)
            .header("User-Agent", self.config.user_agent.clone())
            .header("Accept", "application/json")
    }

    /// Sends a request, retrying transport errors and retryable statuses when
    /// `retry` is set. The builder closure is re-invoked for every attempt.
    fn send_json(
        &mut self,
        retry: bool,
        build: impl Fn(&Client) -> RequestBuilder,
    ) -> Result<Value> {
        let max_retries = if retry { self.config.max_retries } else { 0 };
        for attempt in 0..=max_retries {
            self.request_count += 1;
            let response = self.authorize(build(&self.client)).send();
            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt);
                            continue;
                        }
                        let body = response.text().unwrap_or_default();
                        bail!("stack request failed with HTTP {status}: {}", body.trim());
                    }
                    return response
                        .json::<Value>()
                        .context("failed to decode stack JSON response");
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(error).context("failed to call stack API");
                }
            }
        }

        bail!("stack request exhausted retry budget")
    }

    fn wait_before_retry(&self, attempt: usize) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        sleep(Duration::from_millis(base.saturating_add(jitter)));
    }
}

impl DocumentStore for StackClient {
    fn fetch_all(&mut self, doctype: &str) -> Result<Vec<Document>> {
        let url = self.endpoint(&format!("/data/{doctype}/_all_docs"))?;
        let page_size = self.config.page_size.max(1);
        let mut documents = Vec::new();
        let mut skip = 0usize;

        loop {
            let query = [
                ("include_docs", "true".to_string()),
                ("limit", page_size.to_string()),
                ("skip", skip.to_string()),
            ];
            let response = match self
                .send_json(true, |client| client.get(url.clone()).query(&query))
            {
                Ok(response) => response,
                // A doctype that was never written has no database yet.
                Err(error) if skip == 0 && error.to_string().contains("HTTP 404") => {
                    return Ok(Vec::new());
                }
                Err(error) => return Err(error),
            };
            let page: AllDocsResponse = serde_json::from_value(response)
                .with_context(|| format!("failed to decode _all_docs response for {doctype}"))?;

            let row_count = page.rows.len();
            for row in page.rows {
                if row.id.starts_with("_design/") {
                    continue;
                }
                if let Some(document) = row.doc {
                    documents.push(document);
                }
            }

            skip += row_count;
            if row_count < page_size {
                break;
            }
        }

        Ok(documents)
    }

    fn delete_all(&mut self, doctype: &str, documents: &[Document]) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }
        let mut entries = Vec::with_capacity(documents.len());
        for document in documents {
            let id = document
                .id()
                .ok_or_else(|| anyhow::anyhow!("cannot delete a {doctype} document without _id"))?;
            let rev = document
                .rev()
                .ok_or_else(|| anyhow::anyhow!("cannot delete {doctype}/{id} without _rev"))?;
            entries.push(json!({ "_id": id, "_rev": rev, "_deleted": true }));
        }

        let url = self.endpoint(&format!("/data/{doctype}/_bulk_docs"))?;
        let body = json!({ "docs": entries });
        let response = self.send_json(false, |client| client.post(url.clone()).json(&body))?;
        let results: Vec<BulkDocResult> = serde_json::from_value(response)
            .with_context(|| format!("failed to decode _bulk_docs response for {doctype}"))?;

        let failed = results
            .iter()
            .filter(|result| result.error.is_some())
            .map(|result| {
                format!(
                    "{} ({})",
                    result.id.as_deref().unwrap_or("<unknown>"),
                    result.error.as_deref().unwrap_or_default()
                )
            })
            .collect::<Vec<_>>();
        if !failed.is_empty() {
            bail!(
                "{} of {} deletions failed for {doctype}: {}",
                failed.len(),
                documents.len(),
                failed.join(", ")
            );
        }
        Ok(())
    }

    fn stat_by_path(&mut self, path: &str) -> Result<FolderStat> {
        let url = self.endpoint("/files/metadata")?;
        let query = [("Path", path.to_string())];
        let response = self
            .send_json(true, |client| client.get(url.clone()).query(&query))
            .with_context(|| format!("failed to stat {path}"))?;
        let parsed: JsonApiResponse = serde_json::from_value(response)
            .with_context(|| format!("failed to decode file metadata for {path}"))?;
        Ok(FolderStat {
            id: parsed.data.id,
            children: parsed
                .data
                .relationships
                .contents
                .data
                .into_iter()
                .map(|item| item.id)
                .collect(),
        })
    }

    fn create_document(&mut self, doctype: &str, document: &Value) -> Result<Document> {
        let url = self.endpoint(&format!("/data/{doctype}/"))?;
        let response = self.send_json(false, |client| client.post(url.clone()).json(document))?;
        let created: CreatedDocResponse = serde_json::from_value(response)
            .with_context(|| format!("failed to decode created {doctype} document"))?;
        created
            .data
            .ok_or_else(|| anyhow::anyhow!("stack did not return the created {doctype} document"))
    }

    fn create_directory(&mut self, parent_id: &str, name: &str) -> Result<String> {
        let url = self.endpoint(&format!("/files/{parent_id}"))?;
        let query = [("Type", "directory".to_string()), ("Name", name.to_string())];
        let response = self
            .send_json(false, |client| client.post(url.clone()).query(&query))
            .with_context(|| format!("failed to create directory {name}"))?;
        let parsed: JsonApiResponse = serde_json::from_value(response)
            .with_context(|| format!("failed to decode directory {name}"))?;
        Ok(parsed.data.id)
    }

    fn upload_file(
        &mut self,
        parent_id: &str,
        name: &str,
        content: Vec<u8>,
        content_type: &str,
    ) -> Result<String> {
        let url = self.endpoint(&format!("/files/{parent_id}"))?;
        let query = [("Type", "file".to_string()), ("Name", name.to_string())];
        let response = self
            .send_json(false, |client| {
                client
                    .post(url.clone())
                    .query(&query)
                    .header("Content-Type", content_type.to_string())
                    .body(content.clone())
            })
            .with_context(|| format!("failed to upload {name}"))?;
        let parsed: JsonApiResponse = serde_json::from_value(response)
            .with_context(|| format!("failed to decode uploaded file {name}"))?;
        Ok(parsed.data.id)
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

/// Instance domain (host and explicit port) of a stack URL, as expected by
/// the admin endpoints.
pub fn instance_domain(url: &str) -> Result<String> {
    let parsed = Url::parse(url.trim()).with_context(|| format!("invalid stack URL: {url}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("stack URL has no host: {url}"))?;
    Ok(match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[derive(Debug, Deserialize, Default)]
struct AllDocsResponse {
    #[serde(default)]
    rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
struct AllDocsRow {
    id: String,
    doc: Option<Document>,
}

#[derive(Debug, Deserialize)]
struct BulkDocResult {
    id: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedDocResponse {
    data: Option<Document>,
}

#[derive(Debug, Deserialize)]
struct JsonApiResponse {
    data: JsonApiResource,
}

#[derive(Debug, Deserialize)]
struct JsonApiResource {
    id: String,
    #[serde(default)]
    relationships: JsonApiRelationships,
}

#[derive(Debug, Deserialize, Default)]
struct JsonApiRelationships {
    #[serde(default)]
    contents: JsonApiRelationship,
}

#[derive(Debug, Deserialize, Default)]
struct JsonApiRelationship {
    #[serde(default)]
    data: Vec<JsonApiReference>,
}

#[derive(Debug, Deserialize)]
struct JsonApiReference {
    id: String,
}
