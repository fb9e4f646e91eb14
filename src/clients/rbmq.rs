use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicGetOptions, BasicPublishOptions,
        BasicQosOptions, BasicRejectOptions, ConfirmSelectOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable, LongString, ShortString},
};
use tokio::{sync::Mutex, time::timeout};
use tracing::{debug, info, warn};

use crate::{
    error::{Error, Result},
    models::task::{DeadLetter, Task},
    queue::{Broker, Lease, LeaseToken},
};

const PERSISTENT: u8 = 2;

#[derive(Debug, Clone)]
pub struct RabbitMqSettings {
    pub url: String,
    pub queue_name: String,
    pub failed_queue_name: String,
    pub prefetch_count: u16,
    /// How long a single `lease` call waits for a delivery.
    pub receive_timeout: Duration,
}

/// AMQP broker.
///
/// Work goes through a durable queue. Retries are parked on `{queue}.retry`
/// with a per-message TTL and dead-lettered by the server back onto the work
/// queue when it expires. Lease expiry is the server's job: unacked
/// deliveries are redelivered when the channel goes away, so `maintain` has
/// nothing to do.
pub struct RabbitMqBroker {
    connection: Connection,
    channel: Channel,
    consumer: Mutex<Option<Consumer>>,
    queue_name: String,
    retry_queue_name: String,
    failed_queue_name: String,
    receive_timeout: Duration,
}

impl RabbitMqBroker {
    pub async fn connect(settings: &RabbitMqSettings) -> Result<Self> {
        info!(queue = %settings.queue_name, "Connecting to RabbitMQ");

        let connection = Connection::connect(&settings.url, ConnectionProperties::default()).await?;
        info!("RabbitMQ connection established");

        let channel = connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        channel
            .basic_qos(settings.prefetch_count, BasicQosOptions::default())
            .await?;

        let durable = QueueDeclareOptions {
            durable: true,
            ..Default::default()
        };
        let retry_queue_name = format!("{}.retry", settings.queue_name);

        channel
            .queue_declare(&settings.queue_name, durable, FieldTable::default())
            .await?;

        let mut retry_args = FieldTable::default();
        retry_args.insert(
            ShortString::from("x-dead-letter-exchange"),
            AMQPValue::LongString(LongString::from("")),
        );
        retry_args.insert(
            ShortString::from("x-dead-letter-routing-key"),
            AMQPValue::LongString(LongString::from(settings.queue_name.as_str())),
        );
        channel
            .queue_declare(&retry_queue_name, durable, retry_args)
            .await?;

        channel
            .queue_declare(&settings.failed_queue_name, durable, FieldTable::default())
            .await?;

        info!(
            queue = %settings.queue_name,
            retry_queue = %retry_queue_name,
            failed_queue = %settings.failed_queue_name,
            prefetch = settings.prefetch_count,
            "RabbitMQ queues declared"
        );

        Ok(Self {
            connection,
            channel,
            consumer: Mutex::new(None),
            queue_name: settings.queue_name.clone(),
            retry_queue_name,
            failed_queue_name: settings.failed_queue_name.clone(),
            receive_timeout: settings.receive_timeout,
        })
    }

    async fn create_consumer(&self) -> Result<Consumer> {
        let consumer = self
            .channel
            .basic_consume(
                &self.queue_name,
                "blog_notifier_worker",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        debug!(queue = %self.queue_name, "Consumer created");
        Ok(consumer)
    }

    async fn publish(&self, queue: &str, payload: &[u8], properties: BasicProperties) -> Result<()> {
        self.channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                properties.with_delivery_mode(PERSISTENT),
            )
            .await?
            .await?;
        Ok(())
    }

    fn delivery_tag(lease: &Lease) -> Result<u64> {
        match lease.token {
            LeaseToken::DeliveryTag(tag) => Ok(tag),
            LeaseToken::Raw(_) => Err(Error::internal(
                "rabbitmq broker cannot settle a raw lease",
            )),
        }
    }

    async fn acknowledge(&self, delivery_tag: u64) -> Result<()> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Broker for RabbitMqBroker {
    fn name(&self) -> &'static str {
        "rabbitmq"
    }

    async fn enqueue(&self, task: &Task) -> Result<()> {
        let payload = task.to_bytes()?;
        self.publish(&self.queue_name, &payload, BasicProperties::default())
            .await
    }

    async fn lease(&self, _lease_timeout: Duration) -> Result<Option<Lease>> {
        let mut consumer = self.consumer.lock().await;
        if consumer.is_none() {
            *consumer = Some(self.create_consumer().await?);
        }
        let Some(stream) = consumer.as_mut() else {
            return Ok(None);
        };

        let delivery = match timeout(self.receive_timeout, stream.next()).await {
            Err(_) => return Ok(None),
            Ok(None) => {
                // Consumer was cancelled server-side; start a fresh one next time.
                *consumer = None;
                return Ok(None);
            }
            Ok(Some(delivery)) => delivery?,
        };

        let task = serde_json::from_slice(&delivery.data).unwrap_or_else(|e| {
            warn!(error = %e, "Received an unreadable task");
            Task::unreadable(&delivery.data)
        });

        Ok(Some(Lease {
            task,
            token: LeaseToken::DeliveryTag(delivery.delivery_tag),
        }))
    }

    async fn ack(&self, lease: &Lease) -> Result<()> {
        self.acknowledge(Self::delivery_tag(lease)?).await
    }

    async fn retry(&self, lease: &Lease, next: &Task, delay: Duration) -> Result<()> {
        let tag = Self::delivery_tag(lease)?;
        let payload = next.to_bytes()?;

        if delay.is_zero() {
            self.publish(&self.queue_name, &payload, BasicProperties::default())
                .await?;
        } else {
            let expiration = ShortString::from(delay.as_millis().to_string());
            self.publish(
                &self.retry_queue_name,
                &payload,
                BasicProperties::default().with_expiration(expiration),
            )
            .await?;
        }

        self.acknowledge(tag).await
    }

    async fn dead_letter(&self, lease: &Lease, letter: &DeadLetter) -> Result<()> {
        let tag = Self::delivery_tag(lease)?;
        let payload = serde_json::to_vec(letter)?;

        self.publish(&self.failed_queue_name, &payload, BasicProperties::default())
            .await?;
        self.acknowledge(tag).await
    }

    /// Peeks the failed queue: messages are fetched, then returned to it
    /// unacknowledged.
    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        let mut letters = Vec::new();
        let mut tags = Vec::new();

        while letters.len() < limit {
            let Some(message) = self
                .channel
                .basic_get(&self.failed_queue_name, BasicGetOptions::default())
                .await?
            else {
                break;
            };

            tags.push(message.delivery.delivery_tag);
            match serde_json::from_slice::<DeadLetter>(&message.delivery.data) {
                Ok(letter) => letters.push(letter),
                Err(e) => warn!(error = %e, "Skipping unreadable dead letter"),
            }
        }

        for tag in tags {
            self.channel
                .basic_reject(tag, BasicRejectOptions { requeue: true })
                .await?;
        }

        letters.reverse();
        Ok(letters)
    }

    async fn ping(&self) -> Result<()> {
        if self.connection.status().connected() {
            Ok(())
        } else {
            Err(Error::internal("rabbitmq connection is not open"))
        }
    }

    async fn close(&self) -> Result<()> {
        self.consumer.lock().await.take();
        if self.connection.status().connected() {
            self.connection.close(200, "shutting down").await?;
        }
        info!("RabbitMQ connection closed");
        Ok(())
    }
}
