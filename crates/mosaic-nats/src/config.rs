//! Configuration for the NATS progress relay.

use std::time::Duration;

/// Configuration for the NATS progress relay.
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// Server URLs; more than one for a cluster.
    pub urls: Vec<String>,
    /// JetStream stream holding progress events.
    pub stream_name: String,
    pub connection_timeout: Duration,
    /// Timeout for JetStream requests, publish acks included.
    pub request_timeout: Duration,
    /// How long progress history is kept for replay.
    pub max_age: Duration,
    /// Upper bound on stored messages per build subject.
    pub max_messages_per_subject: i64,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            urls: vec!["nats://localhost:4222".to_string()],
            stream_name: "MOSAIC_PROGRESS".to_string(),
            connection_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
            max_age: Duration::from_secs(86400), // 1 day
            max_messages_per_subject: 10_000,
        }
    }
}

impl NatsConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            ..Default::default()
        }
    }

    pub fn with_urls(mut self, urls: Vec<String>) -> Self {
        self.urls = urls;
        self
    }

    pub fn with_stream_name(mut self, name: impl Into<String>) -> Self {
        self.stream_name = name.into();
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Comma-joined URL list as accepted by the client.
    pub fn server_list(&self) -> String {
        self.urls.join(",")
    }
}
