//! Durable broker adapter (spec §4.2). One `lapin::Connection` and one
//! publish `lapin::Channel`, owned exclusively by `BrokerAdapter` behind a
//! `tokio::sync::RwLock`, the same shape the host service uses to wrap
//! optional integrations (`Arc<RwLock<Option<TelegramService>>>`).
//! No other component is allowed to hold a channel handle directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::config::BrokerConfig;
use crate::error::{AppError, AppResult};

pub const MAIN_EXCHANGE: &str = "MAIN";
pub const DELAYED_EXCHANGE: &str = "DELAYED";

pub const QUEUE_ARCHIVE_POSITIONS: &str = "archive.positions";
pub const QUEUE_ARCHIVE_COMMANDS: &str = "archive.commands";
pub const QUEUE_ARCHIVE_STATUS: &str = "archive.status";
pub const QUEUE_CLEANUP_EXPIRED: &str = "cleanup.expired";
pub const QUEUE_RESULT_SUCCESS: &str = "result.success";
pub const QUEUE_RESULT_FAILED: &str = "result.failed";
pub const QUEUE_RESULT_PARTIAL: &str = "result.partial";

const ALL_QUEUES: &[&str] = &[
    QUEUE_ARCHIVE_POSITIONS,
    QUEUE_ARCHIVE_COMMANDS,
    QUEUE_ARCHIVE_STATUS,
    QUEUE_CLEANUP_EXPIRED,
    QUEUE_RESULT_SUCCESS,
    QUEUE_RESULT_FAILED,
    QUEUE_RESULT_PARTIAL,
];

const MAX_QUEUE_PRIORITY: i16 = 10;

#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub priority: u8,
    pub persistent: bool,
    pub expiration_ms: Option<u64>,
    pub delay_ms: Option<u64>,
    pub message_id: String,
    pub message_type: String,
    pub retry_count: u32,
    pub max_retries: u32,
}

struct Connected {
    connection: Connection,
    publish_channel: Channel,
}

/// Maintains a live AMQP connection, declares topology idempotently, and
/// exposes publish/consume with the reconnect semantics from spec §4.2.
pub struct BrokerAdapter {
    config: BrokerConfig,
    inner: RwLock<Option<Connected>>,
    connected: Arc<AtomicBool>,
}

impl BrokerAdapter {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(None),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Connect and declare topology. Declaring twice is a no-op: `lapin`
    /// re-declares with identical durability/arguments and the broker
    /// treats it as idempotent (spec §8 round-trip law).
    pub async fn connect(&self) -> AppResult<()> {
        let connection = Connection::connect(&self.config.url, ConnectionProperties::default())
            .await
            .map_err(AppError::Broker)?;

        let connected_flag = self.connected.clone();
        connection.on_error(move |e| {
            tracing::warn!("Broker connection closed: {:?}", e);
            connected_flag.store(false, Ordering::Relaxed);
        });

        let publish_channel = connection.create_channel().await.map_err(AppError::Broker)?;
        publish_channel
            .basic_qos(self.config.prefetch_count, Default::default())
            .await
            .map_err(AppError::Broker)?;

        self.declare_topology(&publish_channel).await?;

        *self.inner.write().await = Some(Connected {
            connection,
            publish_channel,
        });
        self.connected.store(true, Ordering::Relaxed);
        tracing::info!("Broker connected and topology declared");
        Ok(())
    }

    async fn declare_topology(&self, channel: &Channel) -> AppResult<()> {
        channel
            .exchange_declare(
                MAIN_EXCHANGE,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(AppError::Broker)?;

        let mut delayed_args = FieldTable::default();
        delayed_args.insert(
            "x-delayed-type".into(),
            AMQPValue::LongString("direct".into()),
        );
        channel
            .exchange_declare(
                DELAYED_EXCHANGE,
                ExchangeKind::Custom("x-delayed-message".to_string()),
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                delayed_args,
            )
            .await
            .map_err(AppError::Broker)?;

        for queue_name in ALL_QUEUES {
            let mut args = FieldTable::default();
            args.insert(
                "x-max-priority".into(),
                AMQPValue::ShortShort(MAX_QUEUE_PRIORITY as i8),
            );

            channel
                .queue_declare(
                    queue_name,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    args,
                )
                .await
                .map_err(AppError::Broker)?;

            channel
                .queue_bind(
                    queue_name,
                    MAIN_EXCHANGE,
                    queue_name,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(AppError::Broker)?;

            channel
                .queue_bind(
                    queue_name,
                    DELAYED_EXCHANGE,
                    queue_name,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(AppError::Broker)?;
        }

        Ok(())
    }

    /// Publish a JSON-serializable payload. Returns `true` on successful
    /// channel-write; a `false` return indicates back-pressure and must be
    /// logged by the caller (spec §4.2: "no retry here; the caller decides").
    /// Fails fast with `AppError::NotConnected` if currently disconnected.
    pub async fn publish<T: Serialize>(
        &self,
        routing_key: &str,
        payload: &T,
        options: PublishOptions,
    ) -> AppResult<bool> {
        if !self.is_connected() {
            return Err(AppError::NotConnected);
        }
        let guard = self.inner.read().await;
        let connected = guard.as_ref().ok_or(AppError::NotConnected)?;

        let body = serde_json::to_vec(payload)
            .map_err(|e| AppError::Protocol(format!("failed to serialize message: {e}")))?;

        let mut headers = FieldTable::default();
        headers.insert(
            "retryCount".into(),
            AMQPValue::LongUInt(options.retry_count),
        );
        headers.insert(
            "maxRetries".into(),
            AMQPValue::LongUInt(options.max_retries),
        );

        let mut props = BasicProperties::default()
            .with_timestamp(chrono::Utc::now().timestamp() as u64)
            .with_message_id(options.message_id.into())
            .with_kind(options.message_type.into())
            .with_priority(options.priority)
            .with_headers(headers);

        if options.persistent {
            props = props.with_delivery_mode(2);
        }
        if let Some(exp) = options.expiration_ms {
            props = props.with_expiration(exp.to_string().into());
        }

        let exchange = if let Some(delay_ms) = options.delay_ms.filter(|d| *d > 0) {
            let mut delay_headers = FieldTable::default();
            delay_headers.insert(
                "retryCount".into(),
                AMQPValue::LongUInt(options.retry_count),
            );
            delay_headers.insert(
                "maxRetries".into(),
                AMQPValue::LongUInt(options.max_retries),
            );
            delay_headers.insert("x-delay".into(), AMQPValue::LongInt(delay_ms as i32));
            props = props.with_headers(delay_headers);
            DELAYED_EXCHANGE
        } else {
            MAIN_EXCHANGE
        };

        let confirm = connected
            .publish_channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &body,
                props,
            )
            .await
            .map_err(AppError::Broker)?
            .await
            .map_err(AppError::Broker)?;

        Ok(confirm.is_ack())
    }

    /// Begin consuming `queue_name`. The caller drives the returned
    /// `Consumer` stream and is responsible for ack/nack; the adapter does
    /// not enforce double-ack safety (spec §4.2).
    pub async fn consume(&self, queue_name: &str, consumer_tag: &str) -> AppResult<Consumer> {
        if !self.is_connected() {
            return Err(AppError::NotConnected);
        }
        let guard = self.inner.read().await;
        let connected = guard.as_ref().ok_or(AppError::NotConnected)?;

        let channel = connected
            .connection
            .create_channel()
            .await
            .map_err(AppError::Broker)?;
        channel
            .basic_qos(self.config.prefetch_count, Default::default())
            .await
            .map_err(AppError::Broker)?;

        channel
            .basic_consume(
                queue_name,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(AppError::Broker)
    }

    /// Passive queue declare, returning the broker's reported message count.
    /// Used by the monitoring collector's queue-size threshold (spec §4.9).
    pub async fn queue_message_count(&self, queue_name: &str) -> AppResult<u32> {
        if !self.is_connected() {
            return Err(AppError::NotConnected);
        }
        let guard = self.inner.read().await;
        let connected = guard.as_ref().ok_or(AppError::NotConnected)?;

        let queue = connected
            .publish_channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    passive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(AppError::Broker)?;

        Ok(queue.message_count())
    }

    /// Reconnect loop with bounded linear backoff, re-declaring topology on
    /// every successful reconnect (spec §4.2 reconnect semantics). Exits
    /// when `shutdown` fires. Intended to be spawned by the coordinator
    /// alongside its other long-lived loops.
    pub async fn run_reconnect_loop(&self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        loop {
            if !self.is_connected() {
                let mut backoff = self.config.reconnect_initial_backoff_seconds;
                loop {
                    match self.connect().await {
                        Ok(()) => break,
                        Err(e) => {
                            tracing::warn!("Broker reconnect attempt failed: {:?}", e);
                            tokio::select! {
                                _ = shutdown.recv() => return,
                                _ = tokio::time::sleep(Duration::from_secs(backoff)) => {}
                            }
                            backoff =
                                (backoff * 2).min(self.config.reconnect_max_backoff_seconds);
                        }
                    }
                }
            }

            tokio::select! {
                _ = shutdown.recv() => return,
                _ = tokio::time::sleep(Duration::from_secs(5)) => {}
            }
        }
    }
}
