//! Registry of live instance links.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use marionette_core::InstanceId;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{AddressResolver, LinkConfig};
use crate::link::{InstanceLink, LinkOptions, MessageCallback};

/// Maps instance ids to at most one live [`InstanceLink`] each.
///
/// All registry mutations go through the map's per-key entry locks, so a
/// concurrent insert, replace and remove on one id are atomic with respect
/// to each other.
pub struct InstanceManager {
    links: Arc<DashMap<InstanceId, Arc<InstanceLink>>>,
    resolver: AddressResolver,
    options: LinkOptions,
    connect_timeout: Duration,
    shutdown: CancellationToken,
    on_message: Option<MessageCallback>,
}

impl InstanceManager {
    pub fn new(config: &LinkConfig) -> Self {
        Self {
            links: Arc::new(DashMap::new()),
            resolver: config.resolver(),
            options: LinkOptions {
                max_line_length: config.max_line_length,
                history_size: config.history_size,
            },
            connect_timeout: config.connect_timeout,
            shutdown: CancellationToken::new(),
            on_message: None,
        }
    }

    /// Register a callback invoked for every line any link receives.
    pub fn with_message_callback(mut self, callback: MessageCallback) -> Self {
        self.on_message = Some(callback);
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn resolver(&self) -> &AddressResolver {
        &self.resolver
    }

    /// Return the connected link for `instance_id`, connecting if needed.
    ///
    /// `None` when the id is unresolvable (no network attempt is made), when
    /// the connect fails or times out, or after [`InstanceManager::stop`].
    /// When two connects race, the first link to connect is kept and the
    /// later one is disposed.
    pub async fn get_or_connect(
        &self,
        instance_id: &InstanceId,
        timeout: Duration,
    ) -> Option<Arc<InstanceLink>> {
        let key = instance_id.normalized();
        let instance_id = &key;
        if let Some(link) = self.get(instance_id) {
            return Some(link);
        }
        if self.shutdown.is_cancelled() {
            return None;
        }

        let Some(addr) = self.resolver.resolve(instance_id) else {
            debug!(instance_id = %instance_id, "unresolvable instance id");
            return None;
        };

        let link = InstanceLink::new(
            instance_id.clone(),
            addr,
            self.options,
            &self.shutdown,
            self.on_message.clone(),
        );

        if !link.connect(timeout).await {
            link.close();
            if let Some((_, stale)) = self
                .links
                .remove_if(instance_id, |_, current| !current.is_connected())
            {
                stale.close();
            }
            return None;
        }

        Some(self.install(instance_id, link))
    }

    /// Register a freshly connected link.
    ///
    /// A stale entry is replaced and disposed. If another caller installed a
    /// connected link first, that one is kept and `link` is disposed.
    fn install(&self, instance_id: &InstanceId, link: Arc<InstanceLink>) -> Arc<InstanceLink> {
        let displaced = match self.links.entry(instance_id.clone()) {
            Entry::Occupied(entry) if entry.get().is_connected() => {
                let existing = Arc::clone(entry.get());
                drop(entry);
                debug!(instance_id = %instance_id, "lost connect race, disposing duplicate link");
                link.close();
                return existing;
            }
            Entry::Occupied(mut entry) => Some(entry.insert(Arc::clone(&link))),
            Entry::Vacant(entry) => {
                let _ = entry.insert(Arc::clone(&link));
                None
            }
        };

        if let Some(stale) = displaced {
            debug!(instance_id = %instance_id, "replacing stale link");
            stale.close();
        }

        self.watch(instance_id.clone(), &link);
        link
    }

    /// Prune the registry entry when `link` closes on its own.
    fn watch(&self, instance_id: InstanceId, link: &Arc<InstanceLink>) {
        let links = Arc::clone(&self.links);
        let signal = link.closed_signal();
        let watched = Arc::downgrade(link);
        let _ = tokio::spawn(async move {
            signal.cancelled().await;
            let removed = links.remove_if(&instance_id, |_, current| {
                std::ptr::eq(Arc::as_ptr(current), watched.as_ptr())
            });
            if removed.is_some() {
                info!(instance_id = %instance_id, "pruned disconnected instance link");
            }
        });
    }

    /// Connected link for `instance_id`, if any. Never connects.
    pub fn get(&self, instance_id: &InstanceId) -> Option<Arc<InstanceLink>> {
        self.links
            .get(&instance_id.normalized())
            .map(|entry| Arc::clone(entry.value()))
            .filter(|link| link.is_connected())
    }

    /// Send over an existing link. Returns `false` if none is connected.
    pub async fn send(&self, instance_id: &InstanceId, message: &str) -> bool {
        match self.get(instance_id) {
            Some(link) => link.send(message).await,
            None => false,
        }
    }

    /// Remove and dispose the link for `instance_id`. Returns whether one existed.
    pub fn disconnect(&self, instance_id: &InstanceId) -> bool {
        match self.links.remove(&instance_id.normalized()) {
            Some((_, link)) => {
                link.close();
                info!(instance_id = %instance_id, "instance link disconnected");
                true
            }
            None => false,
        }
    }

    /// Dispose every link and clear the registry.
    pub fn dispose_all(&self) -> usize {
        let ids: Vec<InstanceId> = self.links.iter().map(|e| e.key().clone()).collect();
        let mut disposed = 0;
        for id in ids {
            if let Some((_, link)) = self.links.remove(&id) {
                link.close();
                disposed += 1;
            }
        }
        if disposed > 0 {
            info!(disposed, "disposed all instance links");
        }
        disposed
    }

    /// Dispose all links and refuse further connects.
    pub fn stop(&self) {
        self.shutdown.cancel();
        let _ = self.dispose_all();
    }

    pub fn count(&self) -> usize {
        self.links.len()
    }

    pub fn instance_ids(&self) -> Vec<InstanceId> {
        let mut ids: Vec<InstanceId> = self.links.iter().map(|e| e.key().clone()).collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids
    }
}

impl Drop for InstanceManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
