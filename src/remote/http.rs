use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Method, RequestBuilder, Response};
use serde_json::Value;

use super::{RemoteError, RemoteStore, WriteOutcome};
use crate::models::Row;

/// REST client for a PostgREST-style table API
///
/// Tables live under `<base>/rest/v1/<table>`. Every request carries the
/// service key both as `apikey` and as a bearer token. Pages are ordered by
/// the identifier column so offsets stay stable between requests.
#[derive(Clone)]
pub struct HttpRemoteStore {
    client: Client,
    base_url: String,
    api_key: String,
    id_column: String,
}

impl HttpRemoteStore {
    pub fn new(base_url: &str, api_key: &str, id_column: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let client = Client::builder().timeout(timeout).build()?;
        tracing::info!("Remote store client configured for {}", base_url);
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            id_column: id_column.to_string(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.client
            .request(method, self.table_url(table))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    /// Turn a finished write request into a classified outcome
    async fn write_outcome(result: Result<Response, reqwest::Error>) -> WriteOutcome {
        let response = match result {
            Ok(response) => response,
            Err(e) => return WriteOutcome::Other(e.to_string()),
        };
        if response.status().is_success() {
            return WriteOutcome::Ok;
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let (code, message) = parse_error_body(&body);
        let message = message.unwrap_or_else(|| format!("status {}: {}", status, body));
        WriteOutcome::classify(code.as_deref(), &message)
    }
}

/// Extract `code` and a readable message from a PostgREST error body
fn parse_error_body(body: &str) -> (Option<String>, Option<String>) {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return (None, None);
    };
    let code = value.get("code").and_then(Value::as_str).map(str::to_string);
    let message = value.get("message").and_then(Value::as_str).map(|message| {
        match value.get("details").and_then(Value::as_str) {
            Some(details) => format!("{} ({})", message, details),
            None => message.to_string(),
        }
    });
    (code, message)
}

/// Total from a `Content-Range` header such as `0-0/42` or `*/0`
fn parse_content_range_total(range: &str) -> Option<u64> {
    range.rsplit('/').next()?.trim().parse().ok()
}

/// Filter operand for an identifier value (`eq.<value>`)
fn eq_filter(id: &Value) -> String {
    match id {
        Value::String(s) => format!("eq.{}", s),
        other => format!("eq.{}", other),
    }
}

async fn ensure_success(response: Response) -> Result<Response, RemoteError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(RemoteError::Status { status, body })
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn fetch_page(
        &self,
        table: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Row>, RemoteError> {
        let response = self
            .request(Method::GET, table)
            .query(&[
                ("select", "*".to_string()),
                ("order", format!("{}.asc", self.id_column)),
                ("offset", offset.to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await?;
        let bytes = ensure_success(response).await?.bytes().await?;

        serde_json::from_slice(&bytes).map_err(|e| {
            RemoteError::InvalidResponse(format!("rows of {} are not a JSON object list: {}", table, e))
        })
    }

    async fn upsert_batch(&self, table: &str, rows: &[Row]) -> WriteOutcome {
        let result = self
            .request(Method::POST, table)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(rows)
            .send()
            .await;
        Self::write_outcome(result).await
    }

    async fn update_row(&self, table: &str, id_column: &str, id: &Value, row: &Row) -> WriteOutcome {
        let result = self
            .request(Method::PATCH, table)
            .query(&[(id_column, eq_filter(id))])
            .header("Prefer", "return=minimal")
            .json(row)
            .send()
            .await;
        Self::write_outcome(result).await
    }

    async fn count_rows(&self, table: &str) -> Result<u64, RemoteError> {
        let response = self
            .request(Method::GET, table)
            .query(&[("select", "*"), ("limit", "1")])
            .header("Prefer", "count=exact")
            .send()
            .await?;
        let response = ensure_success(response).await?;

        let range = response
            .headers()
            .get(header::CONTENT_RANGE)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| RemoteError::InvalidResponse("missing Content-Range header".to_string()))?;
        parse_content_range_total(range)
            .ok_or_else(|| RemoteError::InvalidResponse(format!("unparseable Content-Range: {}", range)))
    }
}
