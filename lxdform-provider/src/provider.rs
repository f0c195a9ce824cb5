//! Provider glue: configuration and the CRUD surface the host calls.

use std::collections::BTreeMap;
use std::sync::Arc;

use lxdform_client::{Connector, DaemonConnector};
use serde::Serialize;
use serde_json::Value as Json;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::certs;
use crate::config::{self, Env, LxcConfig, ProviderConfig, provider_schema};
use crate::error::{Diagnostics, ProviderError};
use crate::plan::{PlanResult, plan_resource};
use crate::registry::Registry;
use crate::resources::{Outcome, ResourceContext, ResourceKind};
use crate::schema::Schema;

/// Schemas of the provider block and of every resource type.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderSchema {
    pub provider: Schema,
    pub resources: BTreeMap<&'static str, Schema>,
}

pub fn schema() -> ProviderSchema {
    ProviderSchema {
        provider: provider_schema(),
        resources: ResourceKind::ALL
            .iter()
            .map(|kind| (kind.type_name(), kind.schema()))
            .collect(),
    }
}

pub struct Provider {
    connector: Arc<dyn Connector>,
    env: Arc<Env>,
    registry: RwLock<Option<Arc<Registry>>>,
    cancel: CancellationToken,
}

impl Default for Provider {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("connector", &self.connector)
            .finish_non_exhaustive()
    }
}

impl Provider {
    /// Provider talking to real daemons and reading the process environment.
    pub fn new() -> Self {
        Self {
            connector: Arc::new(DaemonConnector),
            env: Arc::new(config::process_env),
            registry: RwLock::new(None),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_env(
        mut self,
        env: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.env = Arc::new(env);
        self
    }

    /// Cancelled when the host goes away. Daemon operation waits observe it.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The configured registry, if configure succeeded.
    pub async fn registry(&self) -> Option<Arc<Registry>> {
        self.registry.read().await.clone()
    }

    /// Configures the provider from the provider block. Warnings come back in
    /// the diagnostics of a successful call.
    pub async fn configure(&self, raw: Json) -> Diagnostics {
        let mut diags = provider_schema().validate(&raw);
        if diags.has_error() {
            return diags;
        }

        let config: ProviderConfig = match serde_json::from_value(raw) {
            Ok(config) => config,
            Err(e) => return Diagnostics::from(ProviderError::Config(e.to_string())),
        };

        let config_dir = match config::resolve_config_dir(&config) {
            Ok(dir) => dir,
            Err(e) => return Diagnostics::from(e),
        };
        let lxc = match LxcConfig::load(&config_dir).await {
            Ok(lxc) => lxc,
            Err(e) => return Diagnostics::from(e),
        };
        let resolved = match config::resolve(&config, self.env.as_ref(), &lxc, config_dir) {
            Ok(resolved) => resolved,
            Err(errors) => return errors,
        };

        if resolved.generate_client_certificates
            && let Err(e) = certs::ensure_client_certificate(&resolved.config_dir).await
        {
            if resolved.has_https_remote() {
                diags.add_error("Failed to generate client certificate", e.to_string());
                return diags;
            }
            warn!(
                error = %e,
                "Client certificate generation failed, continuing with unix remotes only"
            );
            diags.add_warning("Failed to generate client certificate", e.to_string());
        }

        let registry = Registry::new(resolved.config_dir.clone(), self.connector.clone())
            .accept_remote_certificate(resolved.accept_remote_certificate);
        for remote in resolved.remotes {
            registry.add_remote(remote).await;
        }
        registry.set_default_remote(&resolved.default_remote).await;

        info!(
            default_remote = %resolved.default_remote,
            config_dir = %resolved.config_dir.display(),
            "Provider configured"
        );
        *self.registry.write().await = Some(Arc::new(registry));
        diags
    }

    async fn context(&self) -> Result<ResourceContext, Diagnostics> {
        match self.registry().await {
            Some(registry) => Ok(ResourceContext::new(registry, self.cancel.clone())),
            None => Err(ProviderError::ProviderData("unconfigured provider".to_string()).into()),
        }
    }

    fn kind(type_name: &str) -> Result<ResourceKind, Diagnostics> {
        ResourceKind::from_type_name(type_name).ok_or_else(|| {
            Diagnostics::error(
                "Unknown resource type",
                format!("The provider does not manage resources of type {:?}.", type_name),
            )
        })
    }

    pub async fn plan(
        &self,
        type_name: &str,
        prior: Option<Json>,
        config: Option<Json>,
    ) -> Result<PlanResult, Diagnostics> {
        plan_resource(Self::kind(type_name)?, prior, config).await
    }

    pub async fn create(&self, type_name: &str, planned: Json) -> Outcome<Json> {
        let kind = Self::kind(type_name)?;
        kind.create(&self.context().await?, planned).await
    }

    pub async fn read(&self, type_name: &str, state: Json) -> Outcome<Json> {
        let kind = Self::kind(type_name)?;
        kind.read(&self.context().await?, state).await
    }

    pub async fn update(&self, type_name: &str, planned: Json, state: Json) -> Outcome<Json> {
        let kind = Self::kind(type_name)?;
        kind.update(&self.context().await?, planned, state).await
    }

    pub async fn delete(&self, type_name: &str, state: Json) -> Result<(), Diagnostics> {
        let kind = Self::kind(type_name)?;
        kind.delete(&self.context().await?, state).await
    }

    /// Identity of an imported resource. The host reads it afterwards.
    pub async fn import(&self, type_name: &str, id: &str) -> Result<Json, Diagnostics> {
        let kind = Self::kind(type_name)?;
        kind.import(&self.context().await?, id).await
    }
}
