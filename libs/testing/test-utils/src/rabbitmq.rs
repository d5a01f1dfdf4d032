//! RabbitMQ container for broker tests.

use lapin::{Connection, ConnectionProperties};
use testcontainers::ContainerAsync;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::rabbitmq::RabbitMq;

/// RabbitMQ container (default `guest` user and `/` vhost), removed when dropped.
pub struct TestRabbitMq {
    #[allow(dead_code)]
    container: ContainerAsync<RabbitMq>,
    pub host: String,
    pub port: u16,
}

impl TestRabbitMq {
    pub async fn new() -> Self {
        let container = RabbitMq::default()
            .start()
            .await
            .expect("Failed to start RabbitMQ container");

        let port = container
            .get_host_port_ipv4(5672)
            .await
            .expect("Failed to get RabbitMQ port");

        tracing::info!(port, "Test RabbitMQ ready");

        Self {
            container,
            host: "127.0.0.1".to_string(),
            port,
        }
    }

    pub fn uri(&self) -> String {
        format!("amqp://guest:guest@{}:{}/%2F", self.host, self.port)
    }

    /// A fresh connection, for asserting on queues from the outside.
    pub async fn connection(&self) -> Connection {
        Connection::connect(&self.uri(), ConnectionProperties::default())
            .await
            .expect("Failed to connect to RabbitMQ")
    }
}
