//! The assembled client: one gateway session, its cache and a REST client.

use std::collections::HashSet;
use std::sync::Arc;

use contempt_proto::{Entity, Guild, Message, PrivateChannel, Snowflake, User};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::EntityCache;
use crate::config::ClientConfig;
use crate::dispatch::PacketDispatcher;
use crate::error::Result;
use crate::gateway::{Connector, ConnectionState, GatewayConnection, WsConnector, CLIENT_CLOSE_CODE};
use crate::http::{HttpClient, MessageHistory};
use crate::log_store::LogStore;
use crate::observe::Subscription;

/// A private channel with its participants resolved from the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryEntry {
    /// The channel.
    pub channel: PrivateChannel,
    /// Participants found in the cache.
    pub recipients: Vec<User>,
    /// Display name.
    pub name: String,
    /// Whether every participant was found.
    pub complete: bool,
}

/// One account session.
///
/// Gateway packets flow through a single [`PacketDispatcher`] into the
/// [`EntityCache`]; REST requests go through a shared [`HttpClient`] and are
/// independent of the gateway's lifetime.
pub struct Client<C: Connector = WsConnector> {
    config: ClientConfig,
    gateway: GatewayConnection<C>,
    cache: Arc<EntityCache>,
    dispatcher: Arc<PacketDispatcher>,
    http: Arc<HttpClient>,
    log: Arc<LogStore>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl Client<WsConnector> {
    /// Client over real WebSockets.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the REST client
    /// cannot be built.
    pub fn new(config: ClientConfig, log: Arc<LogStore>) -> Result<Self> {
        Self::with_connector(config, log, WsConnector)
    }
}

impl<C: Connector> Client<C> {
    /// Client over a custom gateway transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the REST client
    /// cannot be built.
    pub fn with_connector(config: ClientConfig, log: Arc<LogStore>, connector: C) -> Result<Self> {
        config.validate()?;

        let gateway = GatewayConnection::with_connector(config.gateway_config(), connector)
            .with_log_store(Arc::clone(&log));
        let http = HttpClient::new(config.http_config())?.with_log_store(Arc::clone(&log));
        let cache = Arc::new(EntityCache::new());
        let dispatcher = Arc::new(PacketDispatcher::new(Arc::clone(&cache)));

        Ok(Self {
            config,
            gateway,
            cache,
            dispatcher,
            http: Arc::new(http),
            log,
            consumer: Mutex::new(None),
        })
    }

    /// Connect to the gateway and start applying its packets to the cache.
    ///
    /// # Errors
    ///
    /// Returns the gateway's connect error.
    pub async fn connect(&self) -> Result<()> {
        let mut consumer = self.consumer.lock().await;
        self.gateway
            .connect(&self.config.gateway_url, &self.config.origin())
            .await?;

        if let Some(packets) = self.gateway.take_ordered_packets() {
            *consumer = Some(Arc::clone(&self.dispatcher).spawn(packets));
        }
        info!("client connected");
        Ok(())
    }

    /// Close the gateway and wait for the packet consumer to finish.
    ///
    /// In-flight REST requests are unaffected.
    pub async fn disconnect(&self) {
        self.gateway.disconnect(CLIENT_CLOSE_CODE).await;
        if let Some(task) = self.consumer.lock().await.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "packet consumer ended abnormally");
            }
        }
    }

    /// Client configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The gateway connection.
    #[must_use]
    pub fn gateway(&self) -> &GatewayConnection<C> {
        &self.gateway
    }

    /// The entity cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<EntityCache> {
        &self.cache
    }

    /// The packet dispatcher, for observing packets after they are applied.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<PacketDispatcher> {
        &self.dispatcher
    }

    /// The REST client.
    #[must_use]
    pub fn http(&self) -> &Arc<HttpClient> {
        &self.http
    }

    /// The traffic log.
    #[must_use]
    pub fn log_store(&self) -> &Arc<LogStore> {
        &self.log
    }

    /// Current gateway state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.gateway.state()
    }

    /// Watch gateway state transitions.
    #[must_use]
    pub fn subscribe_state(&self) -> Subscription<ConnectionState> {
        self.gateway.subscribe_state()
    }

    /// Guilds in the user's display order.
    pub async fn sorted_guilds(&self) -> Vec<Guild> {
        self.cache.sorted_guilds().await
    }

    /// Every private channel with its participants.
    ///
    /// Participants missing from the cache are left out and the entry is
    /// marked incomplete.
    pub async fn private_channel_directory(&self) -> Vec<DirectoryEntry> {
        let channels = self.cache.private_channels().await;
        let mut directory = Vec::with_capacity(channels.len());

        for channel in channels {
            let wanted: HashSet<_> = channel.recipients().into_iter().collect();
            let recipients = self.cache.batch_resolve(channel.recipients()).await;
            let complete = recipients.len() == wanted.len();
            if !complete {
                warn!(
                    channel = %channel.id(),
                    wanted = wanted.len(),
                    resolved = recipients.len(),
                    "private channel participants partially resolved"
                );
            }
            let name = channel.name(&recipients);
            directory.push(DirectoryEntry {
                channel,
                recipients,
                name,
                complete,
            });
        }
        directory
    }

    /// Message history of a channel, to be paged with
    /// [`MessageHistory::load_older`].
    #[must_use]
    pub fn history(&self, channel: Snowflake) -> MessageHistory {
        MessageHistory::new(Arc::clone(&self.http), channel)
    }

    /// Post a message to a channel.
    pub async fn send_message(&self, channel: Snowflake, content: &str) -> Result<Message> {
        self.http.send_message(channel, content).await
    }
}

impl<C: Connector> std::fmt::Debug for Client<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("gateway", &self.gateway)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
