//! Service routing and lifecycle.
//!
//! The router owns the `hostname → ServiceInstance` map and is the only
//! component that creates or destroys instances. Lookups prefer exact
//! hostnames, then the wildcard pattern with the longest suffix.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::clock::Clock;
use crate::config::schema::ServiceConfig;
use crate::config::store::ConfigStore;
use crate::config::validation::validate_service_config;
use crate::observability::notify::NotificationSink;
use crate::proxy::HttpClient;
use crate::routing::hostname::{normalize_host, pattern_matches, wildcard_specificity};
use crate::service::instance::{ApplyError, ServiceInstance};

/// Hostname-keyed service registry and probe scheduler.
pub struct Router {
    services: DashMap<String, Arc<ServiceInstance>>,
    client: HttpClient,
    clock: Arc<dyn Clock>,
    store: Arc<dyn ConfigStore>,
    notifier: Arc<dyn NotificationSink>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("services", &self.services.len())
            .finish_non_exhaustive()
    }
}

impl Router {
    pub fn new(
        client: HttpClient,
        clock: Arc<dyn Clock>,
        store: Arc<dyn ConfigStore>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            services: DashMap::new(),
            client,
            clock,
            store,
            notifier,
        })
    }

    /// Load every persisted blob into a live instance.
    pub async fn rehydrate(&self) {
        let keys = match self.store.list_keys().await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::error!(error = %e, "failed to list persisted services");
                return;
            }
        };
        for key in keys {
            match self.store.get(&key).await {
                Ok(Some(blob)) => match serde_json::from_str::<ServiceConfig>(&blob) {
                    Ok(mut config) => {
                        config.normalize();
                        if let Err(errors) = validate_service_config(&config) {
                            tracing::error!(hostname = %key, ?errors, "persisted config invalid, skipping");
                            continue;
                        }
                        self.insert_instance(config);
                        tracing::info!(hostname = %key, "service rehydrated");
                    }
                    Err(e) => {
                        tracing::error!(hostname = %key, error = %e, "persisted blob unparsable, skipping");
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(hostname = %key, error = %e, "failed to read persisted blob");
                }
            }
        }
    }

    /// Upsert bootstrap services (`DEFAULT_BACKENDS`, boot file, reloads).
    /// Hostnames already rehydrated from the store keep their stored config.
    pub async fn seed(&self, services: Vec<ServiceConfig>, overwrite: bool) {
        for mut config in services {
            config.normalize();
            let exists = self.services.contains_key(&config.hostname);
            if exists && !overwrite {
                continue;
            }
            if let Err(e) = self.upsert(config).await {
                tracing::error!(error = %e, "failed to seed service");
            }
        }
    }

    fn insert_instance(&self, config: ServiceConfig) -> Arc<ServiceInstance> {
        let instance = ServiceInstance::new(
            config,
            self.client.clone(),
            Arc::clone(&self.clock),
            Arc::clone(&self.store),
            Arc::clone(&self.notifier),
        );
        self.services
            .insert(instance.hostname().to_string(), Arc::clone(&instance));
        instance
    }

    /// Create or replace a service config.
    pub async fn upsert(&self, mut config: ServiceConfig) -> Result<Arc<ServiceInstance>, ApplyError> {
        config.normalize();
        if let Some(existing) = self
            .services
            .get(&config.hostname)
            .map(|e| Arc::clone(e.value()))
        {
            existing.apply_config(config).await?;
            return Ok(existing);
        }

        validate_service_config(&config).map_err(ApplyError::Validation)?;
        let blob = serde_json::to_string(&config).ok();
        let instance = self.insert_instance(config);
        if let Some(blob) = blob {
            if let Err(e) = self.store.put(instance.hostname(), &blob).await {
                tracing::warn!(hostname = %instance.hostname(), error = %e, "failed to persist new service");
            }
        }
        tracing::info!(hostname = %instance.hostname(), "service created");
        Ok(instance)
    }

    /// Destroy a service; its probe deadline dies with it.
    pub async fn remove(&self, hostname: &str) -> Option<Arc<ServiceInstance>> {
        let hostname = normalize_host(hostname);
        let (_, instance) = self.services.remove(&hostname)?;
        if let Err(e) = self.store.delete(&hostname).await {
            tracing::warn!(hostname = %hostname, error = %e, "failed to delete persisted blob");
        }
        tracing::info!(hostname = %hostname, "service deleted");
        Some(instance)
    }

    /// Admin lookup by configured hostname (exact key, no wildcard walk).
    pub fn get(&self, hostname: &str) -> Option<Arc<ServiceInstance>> {
        self.services
            .get(&normalize_host(hostname))
            .map(|e| Arc::clone(e.value()))
    }

    pub fn list(&self) -> Vec<Arc<ServiceInstance>> {
        self.services.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Data-plane lookup: exact match, else longest-suffix wildcard.
    /// Returns the instance and the label captured by a wildcard match.
    pub fn resolve(&self, host: &str) -> Option<(Arc<ServiceInstance>, Option<String>)> {
        let host = normalize_host(host);
        if let Some(instance) = self.services.get(&host) {
            return Some((Arc::clone(instance.value()), None));
        }

        let mut best: Option<(usize, Arc<ServiceInstance>, String)> = None;
        for entry in self.services.iter() {
            let pattern = entry.key();
            if !pattern.starts_with("*.") {
                continue;
            }
            if let Some(Some(label)) = pattern_matches(pattern, &host) {
                let specificity = wildcard_specificity(pattern);
                if best.as_ref().map(|(s, _, _)| specificity > *s).unwrap_or(true) {
                    best = Some((specificity, Arc::clone(entry.value()), label));
                }
            }
        }
        best.map(|(_, instance, label)| (instance, Some(label)))
    }

    /// One scheduler tick: sweep affinity tables, launch due probe batches.
    pub fn tick(&self) {
        let now = self.clock.now();
        for entry in self.services.iter() {
            let instance = Arc::clone(entry.value());
            instance.sweep_affinity();
            if instance.probe_due(now) {
                tokio::spawn(async move {
                    instance.run_active_probes(false).await;
                });
            }
        }
    }

    /// Tick period: half the smallest active-probe interval, min 1s.
    fn tick_period(&self) -> Duration {
        let min_interval = self
            .services
            .iter()
            .filter(|e| e.value().snapshot().config.active_hc.enabled)
            .map(|e| e.value().snapshot().config.active_hc.interval_secs)
            .min();
        match min_interval {
            Some(secs) => Duration::from_secs((secs / 2).max(1)),
            None => Duration::from_secs(1),
        }
    }

    /// Run the probe scheduler until shutdown.
    pub async fn run_scheduler(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        loop {
            let period = self.tick_period();
            tokio::select! {
                _ = tokio::time::sleep(period) => self.tick(),
                _ = shutdown.recv() => {
                    tracing::info!("probe scheduler stopping");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::schema::BackendConfig;
    use crate::config::store::MemoryStore;
    use crate::observability::notify::NoopSink;
    use crate::proxy::build_http_client;

    fn backend(id: &str) -> BackendConfig {
        BackendConfig {
            id: id.to_string(),
            url: format!("http://{id}.origin:8080").parse().unwrap(),
            weight: 1,
            priority: 0,
            enabled: true,
            region: None,
        }
    }

    fn router() -> Arc<Router> {
        Router::new(
            build_http_client(),
            Arc::new(ManualClock::new()),
            Arc::new(MemoryStore::new()),
            Arc::new(NoopSink),
        )
    }

    fn config(hostname: &str) -> ServiceConfig {
        ServiceConfig::single_pool(hostname, vec![backend("a")])
    }

    #[tokio::test]
    async fn exact_match_beats_wildcard() {
        let router = router();
        router.upsert(config("*.example.com")).await.unwrap();
        router.upsert(config("app.example.com")).await.unwrap();

        let (instance, label) = router.resolve("app.example.com").unwrap();
        assert_eq!(instance.hostname(), "app.example.com");
        assert_eq!(label, None);

        let (instance, label) = router.resolve("api.example.com").unwrap();
        assert_eq!(instance.hostname(), "*.example.com");
        assert_eq!(label, Some("api".to_string()));
    }

    #[tokio::test]
    async fn longest_wildcard_suffix_wins() {
        let router = router();
        router.upsert(config("*.example.com")).await.unwrap();
        router.upsert(config("*.api.example.com")).await.unwrap();

        let (instance, label) = router.resolve("v1.api.example.com").unwrap();
        assert_eq!(instance.hostname(), "*.api.example.com");
        assert_eq!(label, Some("v1".to_string()));
    }

    #[tokio::test]
    async fn unknown_host_resolves_to_none() {
        let router = router();
        router.upsert(config("app.example.com")).await.unwrap();
        assert!(router.resolve("other.test").is_none());
    }

    #[tokio::test]
    async fn host_header_port_is_ignored() {
        let router = router();
        router.upsert(config("app.example.com")).await.unwrap();
        assert!(router.resolve("App.Example.com:8443").is_some());
    }

    #[tokio::test]
    async fn remove_deletes_blob_and_stops_resolution() {
        let store = Arc::new(MemoryStore::new());
        let router = Router::new(
            build_http_client(),
            Arc::new(ManualClock::new()),
            Arc::clone(&store) as Arc<dyn ConfigStore>,
            Arc::new(NoopSink),
        );
        router.upsert(config("app.example.com")).await.unwrap();
        assert!(store.get("app.example.com").await.unwrap().is_some());

        router.remove("app.example.com").await.unwrap();
        assert!(router.resolve("app.example.com").is_none());
        assert!(store.get("app.example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rehydrate_restores_persisted_services() {
        let store = Arc::new(MemoryStore::new());
        {
            let router = Router::new(
                build_http_client(),
                Arc::new(ManualClock::new()),
                Arc::clone(&store) as Arc<dyn ConfigStore>,
                Arc::new(NoopSink),
            );
            router.upsert(config("app.example.com")).await.unwrap();
        }

        let router = Router::new(
            build_http_client(),
            Arc::new(ManualClock::new()),
            Arc::clone(&store) as Arc<dyn ConfigStore>,
            Arc::new(NoopSink),
        );
        router.rehydrate().await;
        assert!(router.resolve("app.example.com").is_some());
    }

    #[tokio::test]
    async fn seed_does_not_overwrite_rehydrated_config() {
        let router = router();
        let mut existing = config("app.example.com");
        existing.pools[0].backends.push(backend("b"));
        router.upsert(existing).await.unwrap();

        router.seed(vec![config("app.example.com")], false).await;
        let (instance, _) = router.resolve("app.example.com").unwrap();
        assert_eq!(instance.snapshot().pools[0].backends.len(), 2);

        router.seed(vec![config("app.example.com")], true).await;
        let (instance, _) = router.resolve("app.example.com").unwrap();
        assert_eq!(instance.snapshot().pools[0].backends.len(), 1);
    }
}
