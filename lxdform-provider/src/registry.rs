//! Remote registry and daemon client factory.
//!
//! Remotes are declared once at configure time. A client is materialised on
//! first use: the address is derived, the server certificate pinned, the
//! client authenticated and the daemon version checked. Bootstrap runs at
//! most once per remote; concurrent callers wait for the same attempt.

use std::collections::HashMap;
use std::net::Ipv6Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use lxdform_client::api::{CertificatesPost, Server};
use lxdform_client::{
    Connector, DEFAULT_OPERATION_TIMEOUT, Endpoint, InstanceServer, SimpleStreamsServer, TlsConfig,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::certs;
use crate::error::{ProviderError, Result};

/// Minimum supported daemon version.
pub const MIN_SERVER_VERSION: &str = ">=4.0.0";

/// First daemon version without password authentication.
const PASSWORD_REMOVED_VERSION: &str = ">=6.0.0";

const DEFAULT_LXD_PORT: u16 = 8443;
const DEFAULT_SIMPLESTREAMS_PORT: u16 = 443;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Lxd,
    Simplestreams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Unix,
    Https,
}

/// A declared remote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteConfig {
    pub name: String,
    pub address: String,
    pub port: String,
    pub protocol: Protocol,
    pub scheme: Scheme,
    pub password: Option<String>,
    pub token: Option<String>,
    pub default: bool,
}

impl RemoteConfig {
    /// The local daemon over its default unix socket.
    pub fn local(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

/// Derives where a remote's daemon listens.
pub fn derive_endpoint(remote: &RemoteConfig) -> Result<Endpoint> {
    let invalid = |msg: &str| {
        ProviderError::Config(format!(
            "remote {:?} has invalid address {:?}: {}",
            remote.name, remote.address, msg
        ))
    };

    let address = remote.address.trim();
    if address.starts_with("http://") {
        return Err(invalid("plain http is not supported"));
    }

    match remote.scheme {
        Scheme::Unix => {
            if remote.protocol == Protocol::Simplestreams {
                return Err(invalid("simplestreams remotes must use https"));
            }
            let path = address.trim_start_matches("unix://");
            if path.is_empty() {
                Ok(Endpoint::Unix(None))
            } else {
                Ok(Endpoint::Unix(Some(PathBuf::from(path))))
            }
        }
        Scheme::Https => {
            let rest = address.trim_start_matches("https://");
            if rest.is_empty() {
                return Err(invalid("an address is required for https remotes"));
            }

            let (host, path) = match rest.find('/') {
                Some(idx) => rest.split_at(idx),
                None => (rest, ""),
            };
            // A bare IPv6 address cannot be parsed as a URL authority.
            let authority = match host.parse::<Ipv6Addr>() {
                Ok(ip) => format!("[{}]", ip),
                Err(_) => host.to_string(),
            };
            let mut url = Url::parse(&format!("https://{}{}", authority, path))
                .map_err(|e| invalid(&e.to_string()))?;

            // Url drops an explicit port that equals the scheme default.
            let explicit_default = authority.ends_with(":443");
            if url.port().is_none() && !explicit_default {
                let port = default_port(remote).map_err(|e| invalid(&e))?;
                url.set_port(Some(port)).map_err(|_| invalid("the address cannot carry a port"))?;
            }

            Ok(Endpoint::Https(url.as_str().trim_end_matches('/').to_string()))
        }
    }
}

/// Port used when the address names none: the declared port, else the
/// protocol's default.
fn default_port(remote: &RemoteConfig) -> std::result::Result<u16, String> {
    if !remote.port.is_empty() {
        return remote
            .port
            .parse()
            .map_err(|_| format!("invalid port {:?}", remote.port));
    }
    Ok(match remote.protocol {
        Protocol::Lxd => DEFAULT_LXD_PORT,
        Protocol::Simplestreams => DEFAULT_SIMPLESTREAMS_PORT,
    })
}

/// Parses a daemon version leniently: `5.21` reads as `5.21.0`, suffixes are ignored.
pub fn parse_version(version: &str) -> Option<semver::Version> {
    let mut parts = version
        .trim()
        .split('.')
        .map(|p| p.chars().take_while(|c| c.is_ascii_digit()).collect::<String>())
        .take(3)
        .collect::<Vec<_>>();
    if parts.first().is_none_or(|p| p.is_empty()) {
        return None;
    }
    while parts.len() < 3 {
        parts.push("0".to_string());
    }
    let parts: Vec<String> = parts
        .into_iter()
        .map(|p| if p.is_empty() { "0".to_string() } else { p })
        .collect();
    semver::Version::parse(&parts.join(".")).ok()
}

fn version_matches(version: &str, requirement: &str) -> bool {
    match (parse_version(version), semver::VersionReq::parse(requirement)) {
        (Some(v), Ok(req)) => req.matches(&v),
        _ => false,
    }
}

/// Image source behind a remote.
#[derive(Debug, Clone)]
pub enum ImageServer {
    Lxd(InstanceServer),
    Simplestreams(SimpleStreamsServer),
}

impl ImageServer {
    /// Fingerprint of the image an alias points at.
    pub async fn resolve_alias(&self, alias: &str) -> Result<String> {
        let (alias, _) = match self {
            ImageServer::Lxd(server) => server.get_image_alias(alias).await?,
            ImageServer::Simplestreams(server) => server.get_image_alias(alias).await?,
        };
        Ok(alias.target)
    }
}

#[derive(Debug, Default)]
struct Inner {
    remotes: HashMap<String, RemoteConfig>,
    servers: HashMap<String, Arc<OnceCell<InstanceServer>>>,
    default_remote: String,
}

/// Process-wide registry of remotes and their clients.
#[derive(Debug)]
pub struct Registry {
    inner: RwLock<Inner>,
    connector: Arc<dyn Connector>,
    config_dir: PathBuf,
    accept_remote_certificate: bool,
    operation_timeout: Duration,
}

impl Registry {
    pub fn new(config_dir: impl Into<PathBuf>, connector: Arc<dyn Connector>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            connector,
            config_dir: config_dir.into(),
            accept_remote_certificate: false,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    /// Fetch and pin unknown server certificates instead of failing.
    pub fn accept_remote_certificate(mut self, accept: bool) -> Self {
        self.accept_remote_certificate = accept;
        self
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Bound for long-running daemon operations.
    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }

    pub async fn add_remote(&self, remote: RemoteConfig) {
        let mut inner = self.inner.write().await;
        if remote.default {
            inner.default_remote = remote.name.clone();
        }
        inner.servers.remove(&remote.name);
        inner.remotes.insert(remote.name.clone(), remote);
    }

    pub async fn set_default_remote(&self, name: &str) {
        self.inner.write().await.default_remote = name.to_string();
    }

    pub async fn default_remote(&self) -> String {
        self.inner.read().await.default_remote.clone()
    }

    pub async fn remote(&self, name: &str) -> Option<RemoteConfig> {
        self.inner.read().await.remotes.get(name).cloned()
    }

    pub async fn remote_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().await.remotes.keys().cloned().collect();
        names.sort();
        names
    }

    /// `name` if it is a known remote, the default remote otherwise.
    pub async fn select_remote(&self, name: &str) -> String {
        let inner = self.inner.read().await;
        if !name.is_empty() && inner.remotes.contains_key(name) {
            name.to_string()
        } else {
            inner.default_remote.clone()
        }
    }

    /// Client for `remote` scoped to `project` and `target`. Empty values mean
    /// the default remote and an unscoped client.
    pub async fn instance_server(
        &self,
        remote: &str,
        project: &str,
        target: &str,
    ) -> Result<InstanceServer> {
        let name = if remote.is_empty() {
            self.default_remote().await
        } else {
            remote.to_string()
        };

        let config = self
            .remote(&name)
            .await
            .ok_or_else(|| ProviderError::RemoteNotFound(name.clone()))?;
        if config.protocol == Protocol::Simplestreams {
            return Err(ProviderError::Config(format!(
                "remote {:?} is a simplestreams image server and cannot manage resources",
                name
            )));
        }

        let cell = self.server_cell(&name).await;
        let server = cell.get_or_try_init(|| self.bootstrap(&config)).await?;

        let mut scoped = server.clone();
        if !project.is_empty() {
            scoped = scoped.use_project(project);
        }
        if !target.is_empty() {
            scoped = scoped.use_target(target);
        }
        Ok(scoped)
    }

    /// Image source for `remote`. Simplestreams remotes are accepted.
    pub async fn image_server(&self, remote: &str) -> Result<ImageServer> {
        let name = self.select_remote(remote).await;
        let config = self
            .remote(&name)
            .await
            .ok_or_else(|| ProviderError::RemoteNotFound(name.clone()))?;

        match config.protocol {
            Protocol::Simplestreams => match derive_endpoint(&config)? {
                Endpoint::Https(base) => {
                    Ok(ImageServer::Simplestreams(SimpleStreamsServer::new(base)?))
                }
                Endpoint::Unix(_) => Err(ProviderError::Config(format!(
                    "simplestreams remote {:?} must use https",
                    name
                ))),
            },
            Protocol::Lxd => Ok(ImageServer::Lxd(self.instance_server(&name, "", "").await?)),
        }
    }

    async fn server_cell(&self, name: &str) -> Arc<OnceCell<InstanceServer>> {
        if let Some(cell) = self.inner.read().await.servers.get(name) {
            return cell.clone();
        }
        self.inner
            .write()
            .await
            .servers
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    fn server_cert_path(&self, name: &str) -> PathBuf {
        self.config_dir.join("servercerts").join(format!("{}.crt", name))
    }

    async fn bootstrap(&self, remote: &RemoteConfig) -> Result<InstanceServer> {
        let endpoint = derive_endpoint(remote)?;
        info!(remote = %remote.name, endpoint = %endpoint, "Connecting to remote");

        if let Endpoint::Unix(_) = endpoint {
            let transport = self.connector.connect(&endpoint, &TlsConfig::default()).await?;
            return Ok(InstanceServer::new(transport));
        }

        let mut tls = certs::load_client_tls(&self.config_dir).await?;

        let cert_path = self.server_cert_path(&remote.name);
        if !tokio::fs::try_exists(&cert_path).await? {
            let transport = self.connector.connect(&endpoint, &tls).await?;
            if let Err(e) = InstanceServer::new(transport).get_server().await {
                if !self.accept_remote_certificate {
                    return Err(ProviderError::Certificate(format!(
                        "unable to verify the certificate of remote {:?} ({}); \
                         set accept_remote_certificate to trust it",
                        remote.name, e
                    )));
                }
                debug!(remote = %remote.name, error = %e, "Fetching server certificate");
                let pem = self.connector.fetch_server_certificate(&endpoint).await?;
                certs::write_server_certificate(&cert_path, &pem).await?;
                info!(
                    remote = %remote.name,
                    path = %cert_path.display(),
                    "Pinned server certificate"
                );
            }
        }

        if tokio::fs::try_exists(&cert_path).await? {
            tls.server_cert = Some(tokio::fs::read_to_string(&cert_path).await?);
        }

        let server = InstanceServer::new(self.connector.connect(&endpoint, &tls).await?);
        let (mut info, _) = server.get_server().await?;

        if !info.is_trusted() {
            self.authenticate(remote, &server, &info).await?;
            info = server.get_server().await?.0;
        }

        check_version(remote, &info)?;
        Ok(server)
    }

    async fn authenticate(
        &self,
        remote: &RemoteConfig,
        server: &InstanceServer,
        info: &Server,
    ) -> Result<()> {
        let mut req = CertificatesPost {
            kind: "client".to_string(),
            ..Default::default()
        };

        if let Some(token) = remote.token.as_deref().filter(|t| !t.is_empty()) {
            if info.has_extension("explicit_trust_token") {
                req.trust_token = token.to_string();
            } else {
                req.password = token.to_string();
            }
        } else if let Some(password) = remote.password.as_deref().filter(|p| !p.is_empty()) {
            let version = &info.environment.server_version;
            if !version.is_empty() && version_matches(version, PASSWORD_REMOVED_VERSION) {
                return Err(ProviderError::AuthFailed {
                    remote: remote.name.clone(),
                    message: format!(
                        "password authentication is not supported by version {}, use a trust token",
                        version
                    ),
                });
            }
            req.password = password.to_string();
        } else {
            warn!(
                remote = %remote.name,
                "Client certificate is not trusted and no token or password is configured"
            );
            return Ok(());
        }

        server
            .add_client_certificate(&req)
            .await
            .map_err(|e| ProviderError::AuthFailed {
                remote: remote.name.clone(),
                message: e.to_string(),
            })?;
        info!(remote = %remote.name, "Client certificate added to the trust store");
        Ok(())
    }
}

/// Version gate. An empty version means authentication did not succeed and
/// the daemon withheld it; the check is skipped.
fn check_version(remote: &RemoteConfig, info: &Server) -> Result<()> {
    let version = &info.environment.server_version;
    if version.is_empty() {
        return Ok(());
    }
    if !version_matches(version, MIN_SERVER_VERSION) {
        return Err(ProviderError::VersionMismatch {
            remote: remote.name.clone(),
            version: version.clone(),
            required: MIN_SERVER_VERSION.to_string(),
        });
    }
    Ok(())
}
