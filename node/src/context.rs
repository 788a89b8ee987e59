//! Process-wide registry of sync managers.

use crate::config::NodeConfig;
use crate::error::Result;
use crate::manager::SyncManager;
use dashmap::DashMap;
use loopsync_engine::{Domain, ObjectStore};
use std::sync::Arc;

/// Holds the single [`SyncManager`] of each domain in this process.
///
/// Owned by the host's composition root and shared via `Arc`.
#[derive(Debug)]
pub struct SyncContext {
    config: NodeConfig,
    managers: DashMap<Domain, Arc<SyncManager>>,
}

impl SyncContext {
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            managers: DashMap::new(),
        }
    }

    pub fn new_shared(config: NodeConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// The manager for `domain`, created over `store` on first use.
    ///
    /// Later calls return the existing manager and ignore `store`.
    pub fn manager(&self, domain: Domain, store: Arc<dyn ObjectStore>) -> Arc<SyncManager> {
        let manager = self.managers.entry(domain).or_insert_with(|| {
            tracing::debug!(domain = %domain, "creating manager");
            Arc::new(SyncManager::for_domain(self.config.clone(), domain, store))
        });
        Arc::clone(manager.value())
    }

    pub fn get(&self, domain: Domain) -> Option<Arc<SyncManager>> {
        self.managers.get(&domain).map(|m| Arc::clone(m.value()))
    }

    /// Domains with a manager, in catalogue order.
    pub fn domains(&self) -> Vec<Domain> {
        let mut domains: Vec<Domain> = self.managers.iter().map(|e| *e.key()).collect();
        domains.sort();
        domains
    }

    fn managers(&self) -> Vec<(Domain, Arc<SyncManager>)> {
        let mut managers: Vec<_> = self
            .managers
            .iter()
            .map(|e| (*e.key(), Arc::clone(e.value())))
            .collect();
        managers.sort_by_key(|(domain, _)| *domain);
        managers
    }

    /// Start every manager. A domain that cannot listen does not stop the
    /// others; its error is returned alongside it.
    pub async fn start_all(&self) -> Vec<(Domain, Result<()>)> {
        let mut results = Vec::new();
        for (domain, manager) in self.managers() {
            let result = manager.start().await;
            if let Err(e) = &result {
                tracing::warn!(domain = %domain, error = %e, "domain runs local-only");
            }
            results.push((domain, result));
        }
        results
    }

    pub async fn stop_all(&self) {
        let stops = self
            .managers()
            .into_iter()
            .map(|(_, manager)| async move { manager.stop().await });
        futures::future::join_all(stops).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::SyncStatus;
    use loopsync_engine::MemoryStore;

    fn context() -> SyncContext {
        SyncContext::new(
            NodeConfig::new("com.example.ctx", "Ctx", "1.0").with_discovery_interval(None),
        )
    }

    #[test]
    fn one_manager_per_domain() {
        let ctx = context();
        let a = ctx.manager(Domain::Theme, Arc::new(MemoryStore::new()));
        let b = ctx.manager(Domain::Theme, Arc::new(MemoryStore::new()));
        assert!(Arc::ptr_eq(&a, &b));

        ctx.manager(Domain::Bookmark, Arc::new(MemoryStore::new()));
        assert_eq!(ctx.domains(), vec![Domain::Theme, Domain::Bookmark]);
        assert!(ctx.get(Domain::Language).is_none());
    }

    #[tokio::test]
    async fn start_and_stop_all() {
        let ctx = context();
        ctx.manager(Domain::Language, Arc::new(MemoryStore::new()));
        ctx.manager(Domain::TorrentSharing, Arc::new(MemoryStore::new()));

        let results = ctx.start_all().await;
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        for domain in ctx.domains() {
            assert!(ctx.get(domain).unwrap().is_running());
        }

        ctx.stop_all().await;
        for domain in ctx.domains() {
            assert_eq!(ctx.get(domain).unwrap().status(), SyncStatus::Stopped);
        }
    }
}
