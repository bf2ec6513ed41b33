//! Region registry.
//!
//! A [`DataPool`] is constructed by the application for one session. It hands
//! out regions keyed by `(plugin id, descriptor)`, shares one persistence
//! backend and one live-update animator between them, and closes regions the
//! session no longer allows.

use crate::animator::{LiveUpdateAnimator, LiveUpdateTarget};
use crate::config::RegionConfig;
use crate::region::{Region, RegionPlugin};
use crate::task::{lock, spawn_detached};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, info, warn};
use vatomsync_storage::LocalPersistence;

/// Who the pool is serving.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub user_id: Option<String>,
    /// App-specific session attributes plugins may inspect.
    #[serde(default)]
    pub extra: Value,
}

impl SessionInfo {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            extra: Value::Null,
        }
    }
}

/// Type-erased view of a registered region.
trait PooledRegion: Send + Sync {
    fn matches(&self, plugin_id: &str, descriptor: &Value) -> bool;
    fn accepts_session(&self, info: &SessionInfo) -> bool;
    fn close(&self);
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<P: RegionPlugin> PooledRegion for Region<P> {
    fn matches(&self, plugin_id: &str, descriptor: &Value) -> bool {
        self.plugin().matches(plugin_id, descriptor)
    }

    fn accepts_session(&self, info: &SessionInfo) -> bool {
        self.plugin().accepts_session(info)
    }

    fn close(&self) {
        Region::close(self);
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

struct RegistryEntry {
    id: u64,
    region: Arc<dyn PooledRegion>,
}

struct PoolShared {
    regions: Mutex<Vec<RegistryEntry>>,
    session: Mutex<Option<SessionInfo>>,
    persistence: Arc<dyn LocalPersistence>,
    animator: LiveUpdateAnimator,
    config: RegionConfig,
    next_id: AtomicU64,
}

impl PoolShared {
    fn remove_region(&self, id: u64) -> bool {
        let mut regions = lock(&self.regions);
        let before = regions.len();
        regions.retain(|entry| entry.id != id);
        before != regions.len()
    }

    fn live_regions(&self) -> Vec<Arc<dyn PooledRegion>> {
        lock(&self.regions)
            .iter()
            .map(|entry| entry.region.clone())
            .collect()
    }
}

/// Registry of open regions for one session.
#[derive(Clone)]
pub struct DataPool {
    shared: Arc<PoolShared>,
}

impl DataPool {
    pub fn new(
        persistence: Arc<dyn LocalPersistence>,
        animator: LiveUpdateAnimator,
        config: RegionConfig,
    ) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                regions: Mutex::new(Vec::new()),
                session: Mutex::new(None),
                persistence,
                animator,
                config,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Returns the open region serving `plugin`'s `(id, descriptor)`, or opens one.
    ///
    /// A new region is returned immediately, before it is synchronized; its
    /// cache load and first synchronization run in the background and only
    /// log failures.
    pub fn region<P: RegionPlugin>(&self, plugin: P) -> Arc<Region<P>> {
        let descriptor = plugin.descriptor();
        let mut regions = lock(&self.shared.regions);
        for entry in regions.iter() {
            if !entry.region.matches(plugin.plugin_id(), &descriptor) {
                continue;
            }
            if let Ok(region) = entry.region.clone().as_any().downcast::<Region<P>>() {
                debug!("Reusing region {}", region.state_key());
                return region;
            }
        }

        let region = Region::new(plugin, self.shared.persistence.clone(), &self.shared.config);
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        regions.push(RegistryEntry {
            id,
            region: region.clone(),
        });
        drop(regions);
        info!("Opened region {} ({})", region.state_key(), id);

        let weak: Weak<Region<P>> = Arc::downgrade(&region);
        let target: Weak<dyn LiveUpdateTarget> = weak;
        let subscription = self.shared.animator.subscribe(target);

        let animator = self.shared.animator.clone();
        let pool = Arc::downgrade(&self.shared);
        region.on_close(move || {
            animator.unsubscribe(subscription);
            if let Some(pool) = pool.upgrade() {
                pool.remove_region(id);
            }
        });

        let bootstrap = region.clone();
        spawn_detached("region bootstrap", async move {
            bootstrap.load_from_cache().await;
            if let Err(e) = bootstrap.synchronize().await {
                warn!(
                    "Initial synchronization of {} failed: {}",
                    bootstrap.state_key(),
                    e
                );
            }
        });
        region
    }

    /// Updates the session and closes every region whose plugin rejects it.
    /// Returns the number of regions closed.
    pub fn set_session_info(&self, info: SessionInfo) -> usize {
        *lock(&self.shared.session) = Some(info.clone());
        let mut closed = 0;
        for region in self.shared.live_regions() {
            if !region.accepts_session(&info) {
                region.close();
                closed += 1;
            }
        }
        if closed > 0 {
            info!("Session change closed {} regions", closed);
        }
        closed
    }

    /// Closes every region and forgets the session. Returns the number closed.
    pub fn end_session(&self) -> usize {
        lock(&self.shared.session).take();
        let regions = self.shared.live_regions();
        let count = regions.len();
        for region in regions {
            region.close();
        }
        self.shared.animator.clear();
        info!("Session ended; closed {} regions", count);
        count
    }

    pub fn session_info(&self) -> Option<SessionInfo> {
        lock(&self.shared.session).clone()
    }

    /// Number of open regions.
    pub fn region_count(&self) -> usize {
        lock(&self.shared.regions).len()
    }

    pub fn animator(&self) -> &LiveUpdateAnimator {
        &self.shared.animator
    }

    pub fn persistence(&self) -> Arc<dyn LocalPersistence> {
        self.shared.persistence.clone()
    }
}
