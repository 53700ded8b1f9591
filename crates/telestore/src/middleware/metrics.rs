//! Metrics middleware
//!
//! Counts calls and failures per method, records call latency and tracks
//! the number of calls in flight.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;

use telestore_core::{Consumer, Message, MessageBatch, MessageRepository, MessagesPage, PageQuery, Result};
use telestore_telemetry::{Counter, Gauge, Histogram};

const METHODS: [&str; 5] = ["consume", "list", "backup", "restore", "remove"];

#[derive(Clone)]
struct MethodMetrics {
    calls: Counter,
    errors: Counter,
    latency_ms: Histogram,
}

impl MethodMetrics {
    fn new(method: &str) -> Self {
        Self {
            calls: Counter::new(&format!("telestore_{}_calls_total", method)),
            errors: Counter::new(&format!("telestore_{}_errors_total", method)),
            latency_ms: Histogram::new(&format!("telestore_{}_latency_ms", method)),
        }
    }
}

/// Shared metric registry for one store
#[derive(Clone)]
pub struct Metrics {
    methods: Arc<BTreeMap<&'static str, MethodMetrics>>,
    in_flight: Gauge,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let methods = METHODS
            .iter()
            .map(|method| (*method, MethodMetrics::new(method)))
            .collect();
        Self {
            methods: Arc::new(methods),
            in_flight: Gauge::new("telestore_calls_in_flight"),
        }
    }

    async fn observe<T>(&self, method: &'static str, call: impl Future<Output = Result<T>>) -> Result<T> {
        let metrics = self.methods.get(method);
        self.in_flight.inc();
        let start = Instant::now();

        let result = call.await;

        self.in_flight.dec();
        if let Some(metrics) = metrics {
            metrics.calls.inc();
            metrics.latency_ms.record(start.elapsed().as_secs_f64() * 1000.0);
            if result.is_err() {
                metrics.errors.inc();
            }
        }
        result
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let methods = self
            .methods
            .iter()
            .map(|(method, m)| {
                (
                    method.to_string(),
                    MethodSnapshot {
                        calls: m.calls.get(),
                        errors: m.errors.get(),
                        mean_latency_ms: m.latency_ms.mean(),
                        p99_latency_ms: m.latency_ms.percentile(99.0),
                    },
                )
            })
            .collect();
        MetricsSnapshot {
            methods,
            in_flight: self.in_flight.get(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MethodSnapshot {
    pub calls: u64,
    pub errors: u64,
    pub mean_latency_ms: f64,
    pub p99_latency_ms: f64,
}

/// Point-in-time view of every store metric
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub methods: BTreeMap<String, MethodSnapshot>,
    pub in_flight: u64,
}

impl MetricsSnapshot {
    pub fn calls(&self, method: &str) -> u64 {
        self.methods.get(method).map(|m| m.calls).unwrap_or(0)
    }

    pub fn errors(&self, method: &str) -> u64 {
        self.methods.get(method).map(|m| m.errors).unwrap_or(0)
    }
}

pub struct MeteredConsumer {
    inner: Arc<dyn Consumer>,
    metrics: Metrics,
}

impl MeteredConsumer {
    pub fn new(inner: Arc<dyn Consumer>, metrics: Metrics) -> Self {
        Self { inner, metrics }
    }
}

#[async_trait]
impl Consumer for MeteredConsumer {
    async fn consume(&self, batch: MessageBatch) -> Result<()> {
        self.metrics.observe("consume", self.inner.consume(batch)).await
    }
}

pub struct MeteredRepository<P: PageQuery> {
    inner: Arc<dyn MessageRepository<Page = P>>,
    metrics: Metrics,
}

impl<P: PageQuery> MeteredRepository<P> {
    pub fn new(inner: Arc<dyn MessageRepository<Page = P>>, metrics: Metrics) -> Self {
        Self { inner, metrics }
    }
}

#[async_trait]
impl<P: PageQuery> MessageRepository for MeteredRepository<P> {
    type Page = P;

    async fn list(&self, page: &P) -> Result<MessagesPage> {
        self.metrics.observe("list", self.inner.list(page)).await
    }

    async fn backup(&self, page: &P) -> Result<MessagesPage> {
        self.metrics.observe("backup", self.inner.backup(page)).await
    }

    async fn restore(&self, messages: Vec<Message>) -> Result<()> {
        self.metrics.observe("restore", self.inner.restore(messages)).await
    }

    async fn remove(&self, page: &P) -> Result<()> {
        self.metrics.observe("remove", self.inner.remove(page)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telestore_core::StoreError;

    #[tokio::test]
    async fn test_observe_counts_calls_and_errors() {
        let metrics = Metrics::new();

        metrics.observe("list", async { Ok(()) }).await.unwrap();
        let failed: Result<()> = metrics
            .observe("list", async { Err(StoreError::InvalidQuery("bad".into())) })
            .await;
        assert!(failed.is_err());

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.calls("list"), 2);
        assert_eq!(snapshot.errors("list"), 1);
        assert_eq!(snapshot.calls("remove"), 0);
        assert_eq!(snapshot.in_flight, 0);
        assert_eq!(snapshot.methods.len(), METHODS.len());
    }
}
