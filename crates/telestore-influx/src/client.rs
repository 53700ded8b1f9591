//! InfluxDB v2 HTTP API client
//!
//! Covers the four endpoints the store needs: line-protocol writes, Flux
//! queries returning annotated CSV, predicate deletes and health.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use telestore_core::{Result, StoreError};

use crate::config::InfluxConfig;

#[derive(Debug, Error)]
pub enum InfluxError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Query error: {0}")]
    Query(String),
}

impl InfluxError {
    /// The server rejected the request content itself
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Api { status, .. } if *status == 400 || *status == 422)
    }
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    query: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    dialect: QueryDialect,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryDialect {
    header: bool,
    annotations: [&'static str; 3],
    date_time_format: &'static str,
}

#[derive(Serialize)]
struct DeleteRequest<'a> {
    start: &'a str,
    stop: &'a str,
    predicate: &'a str,
}

/// Thin client bound to one org and bucket
#[derive(Clone)]
pub struct InfluxClient {
    client: Client,
    base_url: String,
    org: String,
    bucket: String,
    token: String,
}

impl InfluxClient {
    pub fn new(config: &InfluxConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StoreError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            org: config.org.clone(),
            bucket: config.bucket.clone(),
            token: config.token.clone(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Write newline separated line-protocol points with nanosecond precision
    pub async fn write(&self, lines: String) -> std::result::Result<(), InfluxError> {
        let url = format!("{}/api/v2/write", self.base_url);
        debug!(bytes = lines.len(), "Writing line protocol");

        let response = self
            .client
            .post(&url)
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "ns"),
            ])
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(lines)
            .send()
            .await?;

        check(response).await.map(|_| ())
    }

    /// Run a Flux query and return the annotated CSV body
    pub async fn query(&self, flux: &str) -> std::result::Result<String, InfluxError> {
        let url = format!("{}/api/v2/query", self.base_url);
        debug!(flux, "Running Flux query");

        let request = QueryRequest {
            query: flux,
            kind: "flux",
            dialect: QueryDialect {
                header: true,
                annotations: ["datatype", "group", "default"],
                date_time_format: "RFC3339Nano",
            },
        };
        let response = self
            .client
            .post(&url)
            .query(&[("org", self.org.as_str())])
            .header("Authorization", format!("Token {}", self.token))
            .header("Accept", "application/csv")
            .json(&request)
            .send()
            .await?;

        Ok(check(response).await?.text().await?)
    }

    /// Delete points between `start` and `stop` (RFC 3339) matching `predicate`
    pub async fn delete(&self, start: &str, stop: &str, predicate: &str) -> std::result::Result<(), InfluxError> {
        let url = format!("{}/api/v2/delete", self.base_url);
        debug!(start, stop, predicate, "Deleting points");

        let response = self
            .client
            .post(&url)
            .query(&[("org", self.org.as_str()), ("bucket", self.bucket.as_str())])
            .header("Authorization", format!("Token {}", self.token))
            .json(&DeleteRequest {
                start,
                stop,
                predicate,
            })
            .send()
            .await?;

        check(response).await.map(|_| ())
    }

    /// Check server health
    pub async fn is_healthy(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status() == StatusCode::OK,
            Err(_) => false,
        }
    }
}

async fn check(response: Response) -> std::result::Result<Response, InfluxError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(InfluxError::Api {
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_statuses() {
        let bad = InfluxError::Api {
            status: 400,
            body: "unable to parse".into(),
        };
        assert!(bad.is_rejected());

        let unavailable = InfluxError::Api {
            status: 503,
            body: String::new(),
        };
        assert!(!unavailable.is_rejected());
        assert_eq!(unavailable.to_string(), "API error 503: ");
    }

    #[test]
    fn test_query_request_shape() {
        let request = QueryRequest {
            query: "from(bucket: \"b\")",
            kind: "flux",
            dialect: QueryDialect {
                header: true,
                annotations: ["datatype", "group", "default"],
                date_time_format: "RFC3339Nano",
            },
        };
        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(encoded["type"], "flux");
        assert_eq!(encoded["dialect"]["dateTimeFormat"], "RFC3339Nano");
        assert_eq!(encoded["dialect"]["annotations"][0], "datatype");
    }

    #[test]
    fn test_client_trims_base_url() {
        let config = InfluxConfig {
            url: "http://influx:8086/".into(),
            ..InfluxConfig::default()
        };
        let client = InfluxClient::new(&config).unwrap();
        assert_eq!(client.base_url, "http://influx:8086");
        assert_eq!(client.bucket(), "messages");
    }
}
