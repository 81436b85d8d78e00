//! RabbitMQ backend: publishes each payload to a queue over AMQP 0-9-1.
//!
//! Publishes are `mandatory` and confirmed, so a push only succeeds once the
//! broker has routed the message to the queue. A missing queue comes back as
//! a returned message and fails the push.
//!
//! lapin is asynchronous; the indexer owns a small current-thread runtime and
//! blocks on it, so it must not be driven from inside another tokio runtime.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use lapin::options::{BasicPublishOptions, ConfirmSelectOptions};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio::runtime::Runtime;
use tracing::debug;

use crate::error::{Result, ShipError};
use crate::indexer::Indexer;
use crate::payload::LogPayload;
use crate::types::{IndexerKind, MessageQueueConfig, NetworkSettings};

const KIND: IndexerKind = IndexerKind::MessageQueue;

/// An open connection with a channel in publisher-confirm mode.
struct Session {
    _connection: Connection,
    channel: Channel,
}

impl Session {
    async fn open(uri: &str, limit: Duration) -> Result<Self> {
        let connection = bounded(
            limit,
            "connect",
            Connection::connect(uri, ConnectionProperties::default()),
        )
        .await?;
        let channel = bounded(limit, "open channel", connection.create_channel()).await?;
        bounded(
            limit,
            "enable publisher confirms",
            channel.confirm_select(ConfirmSelectOptions::default()),
        )
        .await?;

        Ok(Self {
            _connection: connection,
            channel,
        })
    }

    async fn publish(&self, queue: &str, body: &[u8], limit: Duration) -> Result<()> {
        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2);
        let options = BasicPublishOptions {
            mandatory: true,
            ..BasicPublishOptions::default()
        };
        let confirm = bounded(
            limit,
            "publish",
            self.channel.basic_publish("", queue, options, body, properties),
        )
        .await?;
        let confirmation = bounded(limit, "await confirm", confirm).await?;

        let nacked = confirmation.is_nack();
        let returned = confirmation.take_message().is_some();
        check_confirmation(queue, nacked, returned)
    }
}

/// Maps a publisher confirm to the push result.
fn check_confirmation(queue: &str, nacked: bool, returned: bool) -> Result<()> {
    if nacked {
        return Err(ShipError::protocol(
            KIND,
            format!("broker rejected message for queue '{queue}'"),
        ));
    }
    if returned {
        return Err(ShipError::protocol(
            KIND,
            format!("broker could not route message to queue '{queue}'"),
        ));
    }
    Ok(())
}

async fn bounded<T>(
    limit: Duration,
    step: &str,
    fut: impl Future<Output = lapin::Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(ShipError::transport(KIND, format!("{step}: {e}"))),
        Err(_) => Err(ShipError::timeout(
            KIND,
            format!("{step} timed out after {}s", limit.as_secs()),
        )),
    }
}

/// Publishes payloads to a RabbitMQ queue through the default exchange.
pub struct MessageQueueIndexer {
    host: String,
    port: u16,
    queue: String,
    amqp_uri: String,
    timeout: Duration,
    runtime: Option<Runtime>,
    session: Option<Session>,
}

impl MessageQueueIndexer {
    /// Validates `config`. The broker is contacted on first push.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the host or queue name is blank, the
    /// port is zero, or the broker address cannot form an AMQP URI.
    pub fn new(config: &MessageQueueConfig, network: &NetworkSettings) -> Result<Self> {
        let amqp_uri = config.amqp_uri()?;

        Ok(Self {
            host: config.host.trim().to_string(),
            port: config.port,
            queue: config.queue_name.clone(),
            amqp_uri,
            timeout: network.timeout(),
            runtime: None,
            session: None,
        })
    }

    /// Returns the queue payloads are published to.
    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Returns true while a broker connection is open.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.session.is_some()
    }
}

fn ensure_runtime(slot: &mut Option<Runtime>) -> Result<&Runtime> {
    if slot.is_none() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ShipError::transport(KIND, format!("cannot start AMQP runtime: {e}")))?;
        *slot = Some(runtime);
    }
    slot.as_ref()
        .ok_or_else(|| ShipError::transport(KIND, "AMQP runtime unavailable"))
}

async fn publish_with(
    session: &mut Option<Session>,
    uri: &str,
    queue: &str,
    body: &[u8],
    limit: Duration,
) -> Result<()> {
    if session.is_none() {
        *session = Some(Session::open(uri, limit).await?);
    }
    let active = session
        .as_ref()
        .ok_or_else(|| ShipError::transport(KIND, "no AMQP session"))?;
    active.publish(queue, body, limit).await
}

impl Indexer for MessageQueueIndexer {
    fn kind(&self) -> IndexerKind {
        KIND
    }

    fn description(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn push(&mut self, payload: &LogPayload) -> Result<()> {
        let body = payload.to_json()?;
        let Self {
            amqp_uri,
            queue,
            timeout,
            runtime,
            session,
            ..
        } = self;

        let runtime = ensure_runtime(runtime)?;
        let result = runtime.block_on(publish_with(
            session,
            amqp_uri,
            queue,
            body.as_bytes(),
            *timeout,
        ));
        if result.is_err() {
            debug!(queue = %queue, "dropping AMQP session after failure");
            *session = None;
        }
        result
    }
}

impl fmt::Debug for MessageQueueIndexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageQueueIndexer")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("queue", &self.queue)
            .field("connected", &self.session.is_some())
            .finish_non_exhaustive()
    }
}
