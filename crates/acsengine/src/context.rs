//! Per-invocation provider context.

use std::sync::Arc;
use std::time::Duration;

use acs_cloud::{ArmClient, TokenProvider};

use crate::error::Error;
use crate::kubeconfig::CertificateKubeConfig;
use crate::lifecycle::ClusterLifecycle;
use crate::subscription::Subscription;
use crate::upgrade::{KubeRollout, UpgradeOrchestrator};

/// Default bound on a single node replacement.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Default interval between readiness and operation polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Tunables of a provider invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    /// Upper bound for upgrading one node.
    pub step_timeout: Duration,
    /// Polling interval for ARM operations and node readiness.
    pub poll_interval: Duration,
    /// Resource Manager endpoint override (sovereign clouds, tests).
    pub endpoint: Option<String>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            step_timeout: DEFAULT_STEP_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            endpoint: None,
        }
    }
}

/// Everything a provider operation needs, built once and passed explicitly.
#[derive(Debug, Clone)]
pub struct ProviderContext {
    pub subscription: Subscription,
    pub arm: Arc<ArmClient>,
    pub settings: ProviderSettings,
}

impl ProviderContext {
    pub fn new(
        subscription: Subscription,
        tokens: Arc<dyn TokenProvider>,
        settings: ProviderSettings,
    ) -> Result<Self, Error> {
        let mut arm = ArmClient::new(subscription.id.clone(), tokens)
            .map_err(|e| Error::Infrastructure(format!("cannot create ARM client: {e}")))?
            .with_poll_interval(settings.poll_interval);
        if let Some(endpoint) = &settings.endpoint {
            arm = arm
                .with_endpoint(endpoint)
                .map_err(|e| Error::Infrastructure(e.to_string()))?;
        }

        Ok(Self {
            subscription,
            arm: Arc::new(arm),
            settings,
        })
    }

    /// Orchestrator wired to ARM and the Kubernetes-based node rollout.
    #[must_use]
    pub fn orchestrator(&self) -> UpgradeOrchestrator {
        let rollout = KubeRollout::new(self.arm.clone(), self.arm.clone())
            .with_poll_interval(self.settings.poll_interval);
        UpgradeOrchestrator::new(
            self.arm.clone(),
            Arc::new(CertificateKubeConfig::new()),
            Arc::new(rollout),
            self.settings.step_timeout,
        )
    }

    /// Resource operations backed by ARM.
    #[must_use]
    pub fn lifecycle(&self) -> ClusterLifecycle {
        ClusterLifecycle::new(
            self.subscription.id.clone(),
            self.arm.clone(),
            self.arm.clone(),
            self.arm.clone(),
            self.arm.clone(),
            self.orchestrator(),
        )
    }
}
