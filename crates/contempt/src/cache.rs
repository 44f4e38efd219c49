//! Concurrent store of every entity the session has seen.
//!
//! The cache is written only by the [`PacketDispatcher`](crate::PacketDispatcher),
//! one dispatch event at a time under a single write guard, so readers always
//! observe the result of some prefix of the event stream.

use std::collections::{HashMap, HashSet};

use contempt_proto::{
    ChannelPayload, CurrentUser, DispatchEvent, Entity, Guild, GuildChannel, Message,
    PrivateChannel, ProtoError, Ready, Ref, Snowflake, User, UserSettings,
};
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::observe::{Observable, Subscription};

const NOTIFY_CAPACITY: usize = 64;
const MESSAGE_CAPACITY: usize = 256;

/// Cache contents. Only reachable through [`Cached`].
#[derive(Debug, Default)]
pub struct CacheState {
    current_user: Option<CurrentUser>,
    guilds: HashMap<Snowflake, Guild>,
    guild_order: Vec<Snowflake>,
    private_channels: HashMap<Snowflake, PrivateChannel>,
    private_order: Vec<Snowflake>,
    users: HashMap<Snowflake, User>,
}

/// An entity kind [`EntityCache::lookup`] can resolve.
pub trait Cached: Entity + Clone + Sized {
    /// Find the entity with `id`.
    fn find(state: &CacheState, id: Snowflake) -> Option<Self>;
}

impl Cached for User {
    fn find(state: &CacheState, id: Snowflake) -> Option<Self> {
        state.users.get(&id).cloned()
    }
}

impl Cached for Guild {
    fn find(state: &CacheState, id: Snowflake) -> Option<Self> {
        state.guilds.get(&id).cloned()
    }
}

impl Cached for GuildChannel {
    fn find(state: &CacheState, id: Snowflake) -> Option<Self> {
        state.guild_channel(id).map(|(_, channel)| channel.clone())
    }
}

impl Cached for PrivateChannel {
    fn find(state: &CacheState, id: Snowflake) -> Option<Self> {
        state.private_channels.get(&id).cloned()
    }
}

/// Which collections an event touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Changes {
    pub(crate) guilds: bool,
    pub(crate) private_channels: bool,
}

impl CacheState {
    fn guild_channel(&self, id: Snowflake) -> Option<(&Guild, &GuildChannel)> {
        self.guilds
            .values()
            .find_map(|guild| guild.channel(id).map(|channel| (guild, channel)))
    }

    fn guilds_in_order(&self) -> Vec<Guild> {
        self.guild_order
            .iter()
            .filter_map(|id| self.guilds.get(id))
            .cloned()
            .collect()
    }

    fn cache_users(&mut self, users: impl IntoIterator<Item = User>) {
        for user in users {
            self.users.insert(user.id, user);
        }
    }

    fn cache_members(&mut self, guild: &Guild) {
        let members = guild.members.iter().filter_map(|m| m.user.clone());
        self.cache_users(members);
    }

    fn load_ready(&mut self, ready: Ready) -> Changes {
        let old_guilds = self.guilds_in_order();
        let old_private: Vec<PrivateChannel> = self.private_in_order();

        *self = Self::default();
        self.cache_users(ready.users);
        self.users.insert(ready.user.id(), ready.user.user.clone());
        self.current_user = Some(ready.user);
        for guild in ready.guilds {
            self.cache_members(&guild);
            self.insert_guild(guild);
        }
        for channel in ready.private_channels {
            self.upsert_private(channel);
        }

        Changes {
            guilds: old_guilds != self.guilds_in_order(),
            private_channels: old_private != self.private_in_order(),
        }
    }

    fn private_in_order(&self) -> Vec<PrivateChannel> {
        self.private_order
            .iter()
            .filter_map(|id| self.private_channels.get(id))
            .cloned()
            .collect()
    }

    /// Insert or replace a guild. Returns whether anything changed.
    fn insert_guild(&mut self, guild: Guild) -> bool {
        match self.guilds.get(&guild.id) {
            Some(existing) if *existing == guild => false,
            Some(_) => {
                self.guilds.insert(guild.id, guild);
                true
            }
            None => {
                self.guild_order.push(guild.id);
                self.guilds.insert(guild.id, guild);
                true
            }
        }
    }

    /// Partial guild updates omit channels and members; keep ours.
    fn update_guild(&mut self, mut guild: Guild) -> bool {
        if let Some(existing) = self.guilds.get(&guild.id) {
            if guild.channels.is_empty() {
                guild.channels.clone_from(&existing.channels);
            }
            if guild.members.is_empty() {
                guild.members.clone_from(&existing.members);
            }
        }
        self.insert_guild(guild)
    }

    fn remove_guild(&mut self, id: Snowflake, outage: bool) -> bool {
        if outage {
            return match self.guilds.get_mut(&id) {
                Some(guild) if !guild.unavailable => {
                    guild.unavailable = true;
                    true
                }
                _ => false,
            };
        }
        self.guild_order.retain(|g| *g != id);
        self.guilds.remove(&id).is_some()
    }

    fn upsert_private(&mut self, channel: PrivateChannel) -> bool {
        let id = channel.id();
        match self.private_channels.get(&id) {
            Some(existing) if *existing == channel => false,
            Some(_) => {
                self.private_channels.insert(id, channel);
                true
            }
            None => {
                self.private_order.push(id);
                self.private_channels.insert(id, channel);
                true
            }
        }
    }

    fn remove_private(&mut self, id: Snowflake) -> bool {
        self.private_order.retain(|c| *c != id);
        self.private_channels.remove(&id).is_some()
    }

    fn upsert_guild_channel(&mut self, channel: GuildChannel) -> bool {
        let Some(guild) = channel.guild_id.and_then(|id| self.guilds.get_mut(&id)) else {
            debug!(channel = %channel.id, "channel event for an unknown guild");
            return false;
        };
        guild.upsert_channel(channel)
    }

    fn remove_guild_channel(&mut self, channel: &GuildChannel) -> bool {
        match channel.guild_id.and_then(|id| self.guilds.get_mut(&id)) {
            Some(guild) => guild.remove_channel(channel.id),
            None => false,
        }
    }

    fn apply_channel(&mut self, payload: ChannelPayload, delete: bool) -> Changes {
        match payload {
            ChannelPayload::Guild(channel) => Changes {
                guilds: if delete {
                    self.remove_guild_channel(&channel)
                } else {
                    self.upsert_guild_channel(channel)
                },
                private_channels: false,
            },
            ChannelPayload::Private { channel, users } => {
                self.cache_users(users);
                Changes {
                    guilds: false,
                    private_channels: if delete {
                        self.remove_private(channel.id())
                    } else {
                        self.upsert_private(channel)
                    },
                }
            }
        }
    }

    fn record_message(&mut self, message: &Message) -> Changes {
        self.users.insert(message.author.id, message.author.clone());

        if let Some(channel) = self.private_channels.get_mut(&message.channel_id) {
            let changed = channel.last_message_id() != Some(message.id);
            channel.set_last_message_id(message.id);
            return Changes {
                guilds: false,
                private_channels: changed,
            };
        }

        let guild = match message.guild_id {
            Some(id) => self.guilds.get_mut(&id),
            None => self
                .guilds
                .values_mut()
                .find(|g| g.channel(message.channel_id).is_some()),
        };
        let changed = guild
            .and_then(|g| g.channels.iter_mut().find(|c| c.id == message.channel_id))
            .is_some_and(|channel| {
                let changed = channel.last_message_id != Some(message.id);
                channel.last_message_id = Some(message.id);
                changed
            });
        Changes {
            guilds: changed,
            private_channels: false,
        }
    }
}

/// The authoritative, concurrency-safe view of remote state.
pub struct EntityCache {
    state: RwLock<CacheState>,
    user_settings: Observable<UserSettings>,
    guilds_changed: broadcast::Sender<()>,
    private_channels_changed: broadcast::Sender<()>,
    messages: broadcast::Sender<Message>,
}

impl Default for EntityCache {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityCache {
    /// An empty cache.
    #[must_use]
    pub fn new() -> Self {
        let (guilds_changed, _) = broadcast::channel(NOTIFY_CAPACITY);
        let (private_channels_changed, _) = broadcast::channel(NOTIFY_CAPACITY);
        let (messages, _) = broadcast::channel(MESSAGE_CAPACITY);
        Self {
            state: RwLock::new(CacheState::default()),
            user_settings: Observable::default(),
            guilds_changed,
            private_channels_changed,
            messages,
        }
    }

    /// Resolve a reference. `None` if the entity is not cached.
    pub async fn lookup<T: Cached>(&self, reference: Ref<T>) -> Option<T> {
        T::find(&*self.state.read().await, reference.id())
    }

    /// Every cached user among `refs`, each at most once.
    ///
    /// Misses are skipped, not fetched: a shorter result means partial
    /// resolution.
    pub async fn batch_resolve(&self, refs: impl IntoIterator<Item = Ref<User>>) -> Vec<User> {
        let state = self.state.read().await;
        let mut seen = HashSet::new();
        refs.into_iter()
            .filter(|r| seen.insert(*r))
            .filter_map(|r| state.users.get(&r.id()).cloned())
            .collect()
    }

    /// Guilds in the order they were received.
    pub async fn guilds(&self) -> Vec<Guild> {
        self.state.read().await.guilds_in_order()
    }

    /// Guilds in the user's display order.
    pub async fn sorted_guilds(&self) -> Vec<Guild> {
        let guilds = self.guilds().await;
        let settings = self.user_settings.get();
        settings.sort_guilds(&guilds).into_iter().cloned().collect()
    }

    /// Private channels in snapshot order, later ones appended.
    pub async fn private_channels(&self) -> Vec<PrivateChannel> {
        self.state.read().await.private_in_order()
    }

    /// A guild channel and the guild owning it.
    pub async fn channel(&self, reference: Ref<GuildChannel>) -> Option<(Ref<Guild>, GuildChannel)> {
        let state = self.state.read().await;
        state
            .guild_channel(reference.id())
            .map(|(guild, channel)| (guild.to_ref(), channel.clone()))
    }

    /// The logged-in account, once READY arrived.
    pub async fn current_user(&self) -> Option<CurrentUser> {
        self.state.read().await.current_user.clone()
    }

    /// Number of cached users.
    pub async fn user_count(&self) -> usize {
        self.state.read().await.users.len()
    }

    /// Current settings.
    #[must_use]
    pub fn user_settings(&self) -> UserSettings {
        self.user_settings.get()
    }

    /// Watch settings, starting with the current value.
    #[must_use]
    pub fn subscribe_user_settings(&self) -> Subscription<UserSettings> {
        self.user_settings.subscribe()
    }

    /// Fires after every change to the guild collection.
    #[must_use]
    pub fn guilds_changed(&self) -> broadcast::Receiver<()> {
        self.guilds_changed.subscribe()
    }

    /// Fires after every change to the private channel collection.
    #[must_use]
    pub fn private_channels_changed(&self) -> broadcast::Receiver<()> {
        self.private_channels_changed.subscribe()
    }

    /// Messages as they are created.
    #[must_use]
    pub fn messages(&self) -> broadcast::Receiver<Message> {
        self.messages.subscribe()
    }

    /// Apply one dispatch event, then notify.
    pub(crate) async fn apply(&self, event: DispatchEvent) -> Result<Changes, ProtoError> {
        let mut created = None;
        let changes = {
            let mut state = self.state.write().await;
            match event {
                DispatchEvent::Ready(ready) => {
                    let ready = *ready;
                    self.user_settings
                        .set_if_changed(ready.user_settings.clone().unwrap_or_default());
                    state.load_ready(ready)
                }
                DispatchEvent::Resumed => Changes::default(),
                DispatchEvent::GuildCreate(guild) => {
                    state.cache_members(&guild);
                    Changes {
                        guilds: state.insert_guild(*guild),
                        private_channels: false,
                    }
                }
                DispatchEvent::GuildUpdate(guild) => Changes {
                    guilds: state.update_guild(*guild),
                    private_channels: false,
                },
                DispatchEvent::GuildDelete(deleted) => Changes {
                    guilds: state.remove_guild(deleted.id, deleted.unavailable),
                    private_channels: false,
                },
                DispatchEvent::ChannelCreate(payload) | DispatchEvent::ChannelUpdate(payload) => {
                    state.apply_channel(payload, false)
                }
                DispatchEvent::ChannelDelete(payload) => state.apply_channel(payload, true),
                DispatchEvent::MessageCreate(message) => {
                    let changes = state.record_message(&message);
                    created = Some(*message);
                    changes
                }
                DispatchEvent::UserUpdate(user) => {
                    state.users.insert(user.id(), user.user.clone());
                    state.current_user = Some(*user);
                    Changes::default()
                }
                DispatchEvent::UserSettingsUpdate(patch) => {
                    let mut settings = self.user_settings.get();
                    settings.merge(patch)?;
                    self.user_settings.set_if_changed(settings);
                    Changes::default()
                }
            }
        };

        if changes.guilds {
            let _ = self.guilds_changed.send(());
        }
        if changes.private_channels {
            let _ = self.private_channels_changed.send(());
        }
        if let Some(message) = created {
            let _ = self.messages.send(message);
        }
        Ok(changes)
    }
}

impl std::fmt::Debug for EntityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityCache").finish_non_exhaustive()
    }
}
