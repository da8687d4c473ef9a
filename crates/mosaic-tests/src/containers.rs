//! Testcontainer configurations for integration tests.

use mosaic_nats::NatsEventBus;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::nats::Nats;

/// NATS container with JetStream enabled, for relay tests.
pub struct NatsContainer {
    #[allow(dead_code)] // Kept to maintain container lifetime
    container: ContainerAsync<Nats>,
    url: String,
}

impl NatsContainer {
    pub async fn start() -> anyhow::Result<Self> {
        let container = Nats::default()
            .with_tag("2.10-alpine")
            .with_cmd(["-js"])
            .start()
            .await?;

        let host = container.get_host().await?;
        let port = container.get_host_port_ipv4(4222).await?;

        let url = format!("nats://{}:{}", host, port);

        Ok(Self { container, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// A progress bus connected to this container.
    pub async fn event_bus(&self) -> anyhow::Result<NatsEventBus> {
        Ok(NatsEventBus::connect(&self.url).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_container_serves_progress_stream() {
        let nats = NatsContainer::start().await.unwrap();
        let bus = nats.event_bus().await.unwrap();
        assert_eq!(bus.stream_info().await.unwrap().messages, 0);
    }
}
