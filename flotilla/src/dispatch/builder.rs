use std::sync::Arc;

use crate::config::DispatchConfig;
use crate::session::ClusterConfigProvider;

use super::supervisor::DispatchSupervisor;

/// Builder for constructing a `DispatchSupervisor` with explicit
/// dependencies.
///
/// The builder validates that the required cluster configuration provider
/// is present before constructing the supervisor.
///
/// # Example
///
/// ```ignore
/// use flotilla::dispatch::DispatchSupervisorBuilder;
///
/// let supervisor = DispatchSupervisorBuilder::new(config)
///     .with_provider(provider)
///     .build()?;
/// ```
pub struct DispatchSupervisorBuilder {
    config: DispatchConfig,
    provider: Option<Arc<dyn ClusterConfigProvider>>,
}

impl std::fmt::Debug for DispatchSupervisorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchSupervisorBuilder")
            .field("config", &self.config)
            .field("provider_set", &self.provider.is_some())
            .finish()
    }
}

impl DispatchSupervisorBuilder {
    /// Create a new builder with the given dispatch configuration.
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            config,
            provider: None,
        }
    }

    /// Set the cluster configuration provider.
    pub fn with_provider(mut self, provider: Arc<dyn ClusterConfigProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Build the supervisor with all configured dependencies.
    pub fn build(self) -> anyhow::Result<DispatchSupervisor> {
        let provider = self
            .provider
            .ok_or_else(|| anyhow::anyhow!("cluster configuration provider is required"))?;
        Ok(DispatchSupervisor::new(self.config, provider))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_without_provider_fails() {
        let result = DispatchSupervisorBuilder::new(DispatchConfig::default()).build();
        assert!(result.is_err());
    }
}
