use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tracing::{info, warn};

use super::set::{CapabilitySet, ProviderFailure};
use super::{Capability, CapabilityProvider, ProviderKind};

/// What a caller wants from [`CapabilityRegistry::resolve`].
#[derive(Debug, Clone)]
pub struct CapabilityRequest {
    /// Include auxiliary providers. Search providers are always attempted.
    pub auxiliary: bool,
    /// Override the registry's acquisition deadline.
    pub deadline: Option<Duration>,
}

impl Default for CapabilityRequest {
    fn default() -> Self {
        Self {
            auxiliary: true,
            deadline: None,
        }
    }
}

/// Holds the configured providers and resolves them into a [`CapabilitySet`].
///
/// Resolution never fails: providers that error, time out, or fail their
/// healthcheck are logged and recorded on the returned set, which is then
/// marked degraded. A registry with no providers resolves to an empty,
/// degraded set.
pub struct CapabilityRegistry {
    providers: Vec<Arc<dyn CapabilityProvider>>,
    deadline: Duration,
}

struct Acquired {
    provider: String,
    capabilities: Vec<Arc<dyn Capability>>,
    failures: Vec<ProviderFailure>,
}

impl CapabilityRegistry {
    pub fn new(deadline: Duration) -> Self {
        Self {
            providers: Vec::new(),
            deadline,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn CapabilityProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn register(&mut self, provider: Arc<dyn CapabilityProvider>) {
        self.providers.push(provider);
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Acquire every requested provider in parallel under the deadline.
    pub async fn resolve(&self, request: &CapabilityRequest) -> CapabilitySet {
        let deadline = request.deadline.unwrap_or(self.deadline);
        let started = Instant::now();

        let (search, auxiliary): (Vec<_>, Vec<_>) = self
            .providers
            .iter()
            .partition(|p| p.kind() == ProviderKind::Search);
        let auxiliary = if request.auxiliary {
            auxiliary
        } else {
            Vec::new()
        };

        // Search is its own join so an auxiliary stall cannot starve it.
        let (search_results, auxiliary_results) = tokio::join!(
            join_all(search.into_iter().map(|p| acquire_one(p, deadline))),
            join_all(auxiliary.into_iter().map(|p| acquire_one(p, deadline))),
        );

        let mut tools = Vec::new();
        let mut failures = Vec::new();
        for acquired in search_results.into_iter().chain(auxiliary_results) {
            info!(
                provider = %acquired.provider,
                capabilities = acquired.capabilities.len(),
                failures = acquired.failures.len(),
                "Provider resolved"
            );
            tools.extend(acquired.capabilities);
            failures.extend(acquired.failures);
        }

        let set = CapabilitySet::from_parts(tools, failures);
        info!(
            tools = ?set.names(),
            degraded = set.is_degraded(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Capabilities resolved"
        );
        set
    }
}

async fn acquire_one(provider: &Arc<dyn CapabilityProvider>, deadline: Duration) -> Acquired {
    let name = provider.name().to_string();
    let attempt = async {
        let capabilities = provider.acquire().await?;
        let checks = join_all(capabilities.into_iter().map(|cap| async move {
            let result = cap.healthcheck().await;
            (cap, result)
        }))
        .await;
        Ok::<_, crate::error::ToolError>(checks)
    };

    let mut acquired = Acquired {
        provider: name.clone(),
        capabilities: Vec::new(),
        failures: Vec::new(),
    };
    match tokio::time::timeout(deadline, attempt).await {
        Ok(Ok(checks)) => {
            for (cap, health) in checks {
                match health {
                    Ok(()) => acquired.capabilities.push(cap),
                    Err(e) => {
                        warn!(provider = %name, tool = cap.name(), error = %e, "Capability failed healthcheck");
                        acquired.failures.push(ProviderFailure {
                            provider: name.clone(),
                            reason: format!("{}: {e}", cap.name()),
                        });
                    }
                }
            }
        }
        Ok(Err(e)) => {
            warn!(provider = %name, error = %e, "Capability provider failed");
            acquired.failures.push(ProviderFailure {
                provider: name.clone(),
                reason: e.to_string(),
            });
        }
        Err(_) => {
            warn!(provider = %name, deadline_ms = deadline.as_millis() as u64, "Capability provider timed out");
            acquired.failures.push(ProviderFailure {
                provider: name.clone(),
                reason: format!("timed out after {}ms", deadline.as_millis()),
            });
        }
    }
    acquired
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::mock::{MockCapability, MockProvider};

    #[tokio::test]
    async fn test_resolve_with_no_providers_is_degraded() {
        let registry = CapabilityRegistry::new(Duration::from_secs(1));
        let set = registry.resolve(&CapabilityRequest::default()).await;
        assert!(set.is_empty());
        assert!(set.is_degraded());
        assert!(set.failures().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_orders_search_first() {
        let thinking = MockProvider::new("sequential-thinking", ProviderKind::Auxiliary)
            .with_capability(Arc::new(MockCapability::new("sequentialthinking", "ok")));
        let registry = CapabilityRegistry::new(Duration::from_secs(1))
            .with_provider(Arc::new(thinking))
            .with_provider(Arc::new(MockProvider::search("hits")));
        let set = registry.resolve(&CapabilityRequest::default()).await;
        assert_eq!(set.names(), vec!["web_search", "sequentialthinking"]);
        assert!(!set.is_degraded());
    }

    #[tokio::test]
    async fn test_failing_auxiliary_keeps_search() {
        let registry = CapabilityRegistry::new(Duration::from_secs(1))
            .with_provider(Arc::new(
                MockProvider::new("filesystem", ProviderKind::Auxiliary).failing("npx not found"),
            ))
            .with_provider(Arc::new(MockProvider::search("hits")));
        let set = registry.resolve(&CapabilityRequest::default()).await;
        assert_eq!(set.names(), vec!["web_search"]);
        assert!(set.is_degraded());
        assert_eq!(set.failures()[0].provider, "filesystem");
    }

    #[tokio::test]
    async fn test_slow_provider_bounded_by_deadline() {
        let slow = MockProvider::new("slow-aux", ProviderKind::Auxiliary)
            .with_delay(Duration::from_secs(30))
            .with_capability(Arc::new(MockCapability::new("never", "x")));
        let registry = CapabilityRegistry::new(Duration::from_millis(100))
            .with_provider(Arc::new(slow))
            .with_provider(Arc::new(MockProvider::search("hits")));

        let started = Instant::now();
        let set = registry.resolve(&CapabilityRequest::default()).await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(set.is_degraded());
        assert!(set.contains("web_search"));
        assert!(!set.contains("never"));
    }

    #[tokio::test]
    async fn test_unhealthy_capability_is_dropped() {
        let provider = MockProvider::new("mixed", ProviderKind::Auxiliary)
            .with_capability(Arc::new(MockCapability::new("good", "x")))
            .with_capability(Arc::new(MockCapability::new("bad", "x").unhealthy()));
        let registry =
            CapabilityRegistry::new(Duration::from_secs(1)).with_provider(Arc::new(provider));
        let set = registry.resolve(&CapabilityRequest::default()).await;
        assert_eq!(set.names(), vec!["good"]);
        assert!(set.is_degraded());
    }

    #[tokio::test]
    async fn test_request_can_skip_auxiliary() {
        let aux = Arc::new(
            MockProvider::new("aux", ProviderKind::Auxiliary)
                .with_capability(Arc::new(MockCapability::new("aux_tool", "x"))),
        );
        let registry = CapabilityRegistry::new(Duration::from_secs(1))
            .with_provider(aux.clone())
            .with_provider(Arc::new(MockProvider::search("hits")));
        let set = registry
            .resolve(&CapabilityRequest {
                auxiliary: false,
                deadline: None,
            })
            .await;
        assert_eq!(set.names(), vec!["web_search"]);
        assert_eq!(aux.acquisition_count(), 0);
    }
}
