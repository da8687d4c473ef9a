//! JetStream-backed progress event bus.

use async_nats::jetstream::{
    self,
    consumer::{DeliverPolicy, pull::Config as ConsumerConfig},
    stream::Config as StreamConfig,
};
use async_trait::async_trait;
use futures::StreamExt;
use mosaic_core::events::{ProgressEvent, SUBJECT_PREFIX, subject_for};
use mosaic_core::ids::BuildId;
use mosaic_core::ports::{EventBus, EventStream};
use mosaic_core::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

use crate::config::NatsConfig;
use crate::health::HealthCheck;
use crate::metrics::NatsMetrics;

/// Progress event bus on NATS JetStream.
#[derive(Clone)]
pub struct NatsEventBus {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    config: NatsConfig,
    metrics: Arc<NatsMetrics>,
    shutdown: Arc<AtomicBool>,
}

impl NatsEventBus {
    /// Connect to a single server with default settings.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_config(NatsConfig::new(url)).await
    }

    pub async fn connect_with_config(config: NatsConfig) -> Result<Self> {
        let urls = config.server_list();
        info!(urls = %urls, "Connecting to NATS");

        let client = async_nats::ConnectOptions::new()
            .connection_timeout(config.connection_timeout)
            .request_timeout(Some(config.request_timeout))
            .retry_on_initial_connect()
            .connect(&urls)
            .await
            .map_err(|e| Error::EventBus(format!("Failed to connect to NATS: {}", e)))?;

        let jetstream = jetstream::new(client.clone());

        let stream_config = StreamConfig {
            name: config.stream_name.clone(),
            subjects: vec![format!("{}.>", SUBJECT_PREFIX)],
            retention: jetstream::stream::RetentionPolicy::Limits,
            max_age: config.max_age,
            max_messages_per_subject: config.max_messages_per_subject,
            storage: jetstream::stream::StorageType::File,
            ..Default::default()
        };

        jetstream
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| Error::EventBus(format!("Failed to create stream: {}", e)))?;

        info!(stream = %config.stream_name, "Connected to NATS and initialized JetStream");

        let metrics = NatsMetrics::new();
        metrics.set_connected(true);

        Ok(Self {
            client,
            jetstream,
            config,
            metrics,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn metrics(&self) -> &Arc<NatsMetrics> {
        &self.metrics
    }

    pub fn is_connected(&self) -> bool {
        self.client.connection_state() == async_nats::connection::State::Connected
    }

    pub fn health_check(&self) -> HealthCheck {
        HealthCheck::evaluate(self.metrics.snapshot(), self.is_connected())
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Every stored event of `build_id`, from the first one on, followed by
    /// live events.
    pub async fn replay(&self, build_id: &BuildId) -> Result<EventStream> {
        self.consume(build_id, DeliverPolicy::All).await
    }

    /// Drain the connection. Publishing afterwards is an error.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Draining NATS connection");
        self.shutdown.store(true, Ordering::SeqCst);

        if let Err(e) = self.client.drain().await {
            error!(error = %e, "Error draining NATS connection");
        }
        self.metrics.set_connected(false);
        Ok(())
    }

    pub async fn stream_info(&self) -> Result<StreamInfo> {
        let mut stream = self
            .jetstream
            .get_stream(&self.config.stream_name)
            .await
            .map_err(|e| Error::EventBus(format!("Failed to get stream: {}", e)))?;

        let info = stream
            .info()
            .await
            .map_err(|e| Error::EventBus(format!("Failed to get stream info: {}", e)))?;

        Ok(StreamInfo {
            name: info.config.name.clone(),
            messages: info.state.messages,
            bytes: info.state.bytes,
            consumer_count: info.state.consumer_count,
            last_sequence: info.state.last_sequence,
        })
    }

    async fn consume(&self, build_id: &BuildId, deliver_policy: DeliverPolicy) -> Result<EventStream> {
        let subject = subject_for(build_id);
        debug!(subject = %subject, "Creating progress consumer");

        let consumer = self
            .jetstream
            .create_consumer_on_stream(
                ConsumerConfig {
                    filter_subject: subject,
                    deliver_policy,
                    ..Default::default()
                },
                &self.config.stream_name,
            )
            .await
            .map_err(|e| Error::EventBus(format!("Failed to create consumer: {}", e)))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| Error::EventBus(format!("Failed to get messages: {}", e)))?;

        let metrics = self.metrics.clone();
        let shutdown = self.shutdown.clone();

        let events = messages
            .take_while(move |_| std::future::ready(!shutdown.load(Ordering::SeqCst)))
            .then(move |message| {
                let metrics = metrics.clone();
                async move {
                    let message =
                        message.map_err(|e| Error::EventBus(format!("Message error: {}", e)))?;
                    if let Err(e) = message.ack().await {
                        warn!(error = %e, "Failed to ack progress message");
                    }
                    match serde_json::from_slice::<ProgressEvent>(&message.payload) {
                        Ok(event) => {
                            metrics.record_receive();
                            Ok(event)
                        }
                        Err(e) => {
                            metrics.record_decode_failure();
                            Err(Error::Serialization(e.to_string()))
                        }
                    }
                }
            });

        Ok(Box::pin(events))
    }
}

/// Summary of the progress stream.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub name: String,
    pub messages: u64,
    pub bytes: u64,
    pub consumer_count: usize,
    /// Sequence of the newest stored event; 0 when the stream is empty.
    pub last_sequence: u64,
}

#[async_trait]
impl EventBus for NatsEventBus {
    async fn publish(&self, event: ProgressEvent) -> Result<()> {
        if self.is_shutdown() {
            return Err(Error::EventBus(
                "Cannot publish: shutdown in progress".to_string(),
            ));
        }

        let subject = event.subject();
        let payload = serde_json::to_vec(&event)?;
        let payload_len = payload.len() as u64;

        let ack = match self.jetstream.publish(subject.clone(), payload.into()).await {
            Ok(ack) => ack,
            Err(e) => {
                self.metrics.record_publish_failure();
                return Err(Error::EventBus(format!(
                    "Failed to publish to {}: {}",
                    subject, e
                )));
            }
        };

        if let Err(e) = ack.await {
            self.metrics.record_publish_failure();
            return Err(Error::EventBus(format!("Failed to confirm publish: {}", e)));
        }

        self.metrics.record_publish(payload_len);
        debug!(subject = %subject, step = %event.step, "Published progress event");
        Ok(())
    }

    /// Live events of `build_id` published from now on.
    async fn subscribe(&self, build_id: &BuildId) -> Result<EventStream> {
        self.consume(build_id, DeliverPolicy::New).await
    }
}
