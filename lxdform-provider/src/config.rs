//! Provider configuration.
//!
//! Three sources feed the remote list, highest priority first: `remote`
//! blocks of the provider configuration, `LXD_*` environment variables, and
//! the lxc client's `config.yml`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::{Diagnostics, ProviderError, Result};
use crate::registry::{Protocol, RemoteConfig, Scheme};
use crate::schema::{Attribute, AttributeType, Schema};
use crate::value::Value;

pub const ENV_REMOTE: &str = "LXD_REMOTE";
pub const ENV_ADDR: &str = "LXD_ADDR";
pub const ENV_PORT: &str = "LXD_PORT";
pub const ENV_SCHEME: &str = "LXD_SCHEME";
pub const ENV_PASSWORD: &str = "LXD_PASSWORD";
pub const ENV_TOKEN: &str = "LXD_TOKEN";
pub const ENV_ACCEPT_SERVER_CERTIFICATE: &str = "LXD_ACCEPT_SERVER_CERTIFICATE";
pub const ENV_GENERATE_CLIENT_CERTS: &str = "LXD_GENERATE_CLIENT_CERTS";

/// Name of the remote built from environment variables when `LXD_REMOTE` is unset.
pub const ENV_REMOTE_DEFAULT_NAME: &str = "default";

/// Remote every configuration has unless it declares one of the same name.
pub const LOCAL_REMOTE: &str = "local";

/// Environment lookup, injectable for tests.
pub type Env = dyn Fn(&str) -> Option<String> + Send + Sync;

/// Reads the process environment.
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// A `remote` block.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RemoteBlock {
    pub name: Value<String>,
    pub address: Value<String>,
    pub port: Value<String>,
    pub protocol: Value<String>,
    pub scheme: Value<String>,
    pub password: Value<String>,
    pub token: Value<String>,
    pub default: Value<bool>,
}

/// The provider block as the host sends it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub remote: Value<Vec<RemoteBlock>>,
    pub config_dir: Value<String>,
    pub generate_client_certificates: Value<bool>,
    pub accept_remote_certificate: Value<bool>,
}

pub fn provider_schema() -> Schema {
    Schema::new(
        "Manages resources on LXD and Incus daemons.",
        vec![
            Attribute::optional("remote", AttributeType::ObjectList)
                .describe("LXD remotes the provider can manage resources on.")
                .nested(vec![
                    Attribute::required("name", AttributeType::String)
                        .describe("Name of the remote.")
                        .min_length(1),
                    Attribute::optional("address", AttributeType::String)
                        .describe("Host name, IP address, socket path or URL of the remote."),
                    Attribute::optional("port", AttributeType::String)
                        .describe("Remote port, 8443 (lxd) or 443 (simplestreams) by default."),
                    Attribute::optional("protocol", AttributeType::String)
                        .describe("Protocol of the remote.")
                        .one_of(&["lxd", "simplestreams"]),
                    Attribute::optional("scheme", AttributeType::String)
                        .describe("Scheme of the remote.")
                        .one_of(&["unix", "https"]),
                    Attribute::optional("password", AttributeType::String)
                        .describe("Trust password of the remote.")
                        .sensitive(),
                    Attribute::optional("token", AttributeType::String)
                        .describe("Trust token of the remote.")
                        .sensitive(),
                    Attribute::optional("default", AttributeType::Bool)
                        .describe("Use this remote when a resource does not name one."),
                ]),
            Attribute::optional("config_dir", AttributeType::String)
                .describe(
                    "Directory holding config.yml, the client certificate and pinned server \
                     certificates.",
                ),
            Attribute::optional("generate_client_certificates", AttributeType::Bool)
                .describe("Generate the client certificate if it does not exist."),
            Attribute::optional("accept_remote_certificate", AttributeType::Bool)
                .describe("Accept and pin the certificate of a remote the first time it is seen."),
        ],
    )
}

// =============================================================================
// config.yml
// =============================================================================

/// Remote entry of the lxc client configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LxcRemote {
    pub addr: String,
    pub protocol: String,
    pub public: bool,
}

/// The lxc client configuration, `<config_dir>/config.yml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LxcConfig {
    #[serde(rename = "default-remote")]
    pub default_remote: String,
    pub remotes: BTreeMap<String, LxcRemote>,
}

impl LxcConfig {
    /// Loads `config.yml` from `dir`. A missing file yields an empty config.
    pub async fn load(dir: &Path) -> Result<Self> {
        let path = dir.join("config.yml");
        if !tokio::fs::try_exists(&path).await? {
            return Ok(Self::default());
        }
        let raw = tokio::fs::read_to_string(&path).await?;
        Self::parse(&raw).map_err(|e| ProviderError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(raw: &str) -> std::result::Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }

    fn remote_configs(&self) -> Vec<RemoteConfig> {
        self.remotes
            .iter()
            .map(|(name, r)| {
                let (scheme, address) = match r.addr.strip_prefix("unix://") {
                    Some(path) => (Scheme::Unix, path.to_string()),
                    None => (Scheme::Https, r.addr.clone()),
                };
                let protocol = match r.protocol.as_str() {
                    "simplestreams" => Protocol::Simplestreams,
                    _ => Protocol::Lxd,
                };
                RemoteConfig {
                    name: name.clone(),
                    address,
                    protocol,
                    scheme,
                    ..Default::default()
                }
            })
            .collect()
    }
}

/// Configuration directory used when none is given.
pub fn default_config_dir(home: &Path, snap_installed: bool) -> PathBuf {
    if snap_installed {
        home.join("snap").join("lxd").join("common").join("config")
    } else {
        home.join(".config").join("lxc")
    }
}

fn detect_config_dir(home: Option<PathBuf>) -> Result<PathBuf> {
    let home = home.ok_or_else(|| {
        ProviderError::Config(
            "cannot determine the home directory; set config_dir in the provider block"
                .to_string(),
        )
    })?;
    Ok(default_config_dir(&home, Path::new("/var/snap/lxd").exists()))
}

// =============================================================================
// Resolution
// =============================================================================

/// Everything configure needs, after merging all sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub config_dir: PathBuf,
    pub remotes: Vec<RemoteConfig>,
    pub default_remote: String,
    pub accept_remote_certificate: bool,
    pub generate_client_certificates: bool,
}

impl ResolvedConfig {
    pub fn has_https_remote(&self) -> bool {
        self.remotes.iter().any(|r| r.scheme == Scheme::Https)
    }
}

/// Resolves the configuration directory before anything else is read.
pub fn resolve_config_dir(config: &ProviderConfig) -> Result<PathBuf> {
    resolve_config_dir_from(config, dirs::home_dir())
}

fn resolve_config_dir_from(config: &ProviderConfig, home: Option<PathBuf>) -> Result<PathBuf> {
    match config.config_dir.as_known().filter(|d| !d.is_empty()) {
        Some(dir) => Ok(PathBuf::from(dir)),
        None => detect_config_dir(home),
    }
}

/// Whether the client certificate should be generated: the attribute when
/// set, the environment otherwise.
pub fn generate_client_certificates(config: &ProviderConfig, env: &Env) -> bool {
    match config.generate_client_certificates.as_known() {
        Some(explicit) => *explicit,
        None => env(ENV_GENERATE_CLIENT_CERTS).is_some_and(|v| is_truthy(&v)),
    }
}

fn parse_protocol(value: &str) -> Protocol {
    match value {
        "simplestreams" => Protocol::Simplestreams,
        _ => Protocol::Lxd,
    }
}

fn parse_scheme(value: &str, address: &str) -> Scheme {
    match value {
        "unix" => Scheme::Unix,
        "https" => Scheme::Https,
        _ if address.is_empty() || address.starts_with('/') || address.starts_with("unix://") => {
            Scheme::Unix
        }
        _ => Scheme::Https,
    }
}

fn non_empty(value: &Value<String>) -> Option<String> {
    value.as_known().filter(|v| !v.is_empty()).cloned()
}

/// Merges the provider block, the environment and `config.yml`.
pub fn resolve(
    config: &ProviderConfig,
    env: &Env,
    lxc: &LxcConfig,
    config_dir: PathBuf,
) -> std::result::Result<ResolvedConfig, Diagnostics> {
    let mut diags = Diagnostics::new();
    let mut remotes: Vec<RemoteConfig> = Vec::new();

    for (i, block) in config.remote.value_or_default().iter().enumerate() {
        let name = block.name.as_str().to_string();
        let attr = |field: &str| format!("remote[{}].{}", i, field);

        if remotes.iter().any(|r| r.name == name) {
            diags.add_attribute_error(
                attr("name"),
                "Duplicate remote",
                format!("Remote {:?} is declared more than once.", name),
            );
            continue;
        }
        if non_empty(&block.password).is_some() && non_empty(&block.token).is_some() {
            diags.add_attribute_error(
                attr("token"),
                "Invalid Attribute Combination",
                "Attributes \"password\" and \"token\" are mutually exclusive.",
            );
        }

        let address = block.address.as_str().to_string();
        let remote = RemoteConfig {
            name,
            scheme: parse_scheme(block.scheme.as_str(), &address),
            protocol: parse_protocol(block.protocol.as_str()),
            address,
            port: block.port.as_str().to_string(),
            password: non_empty(&block.password),
            token: non_empty(&block.token),
            default: block.default.as_known().copied().unwrap_or(false),
        };
        if remote.default && remote.protocol == Protocol::Simplestreams {
            diags.add_attribute_error(
                attr("default"),
                "Invalid default remote",
                format!("Remote {:?} uses simplestreams and cannot be the default.", remote.name),
            );
        }
        remotes.push(remote);
    }

    let defaults: Vec<&str> = remotes
        .iter()
        .filter(|r| r.default)
        .map(|r| r.name.as_str())
        .collect();
    if defaults.len() > 1 {
        diags.add_attribute_error(
            "remote",
            "Multiple default remotes",
            format!("Only one remote can be the default, found: {}.", defaults.join(", ")),
        );
    }
    let schema_default = defaults.first().map(|d| d.to_string());
    let first_declared = remotes.first().map(|r| r.name.clone());

    let env_remote = env(ENV_REMOTE).filter(|v| !v.is_empty());
    if let Some(addr) = env(ENV_ADDR).filter(|v| !v.is_empty()) {
        let name = env_remote
            .clone()
            .unwrap_or_else(|| ENV_REMOTE_DEFAULT_NAME.to_string());
        if !remotes.iter().any(|r| r.name == name) {
            debug!(remote = %name, "Adding remote from environment");
            let scheme = env(ENV_SCHEME).unwrap_or_default();
            remotes.push(RemoteConfig {
                name,
                scheme: parse_scheme(&scheme, &addr),
                address: addr,
                port: env(ENV_PORT).unwrap_or_default(),
                password: env(ENV_PASSWORD).filter(|v| !v.is_empty()),
                token: env(ENV_TOKEN).filter(|v| !v.is_empty()),
                ..Default::default()
            });
        }
    }

    for remote in lxc.remote_configs() {
        if !remotes.iter().any(|r| r.name == remote.name) {
            remotes.push(remote);
        }
    }
    if !remotes.iter().any(|r| r.name == LOCAL_REMOTE) {
        remotes.push(RemoteConfig::local(LOCAL_REMOTE));
    }

    let default_remote = schema_default
        .or_else(|| env_remote.clone())
        .or_else(|| Some(lxc.default_remote.clone()).filter(|d| !d.is_empty()))
        .or(first_declared)
        .unwrap_or_else(|| LOCAL_REMOTE.to_string());

    match remotes.iter().find(|r| r.name == default_remote) {
        None => diags.add_error(
            "Invalid default remote",
            format!("Default remote {:?} is not configured.", default_remote),
        ),
        Some(r) if r.protocol == Protocol::Simplestreams => diags.add_error(
            "Invalid default remote",
            format!("Remote {:?} uses simplestreams and cannot be the default.", r.name),
        ),
        Some(_) => {}
    }

    for remote in &mut remotes {
        remote.default = remote.name == default_remote;
    }

    let accept_remote_certificate = match config.accept_remote_certificate.as_known() {
        Some(accept) => *accept,
        None => env(ENV_ACCEPT_SERVER_CERTIFICATE).is_some_and(|v| is_truthy(&v)),
    };

    diags.into_result(ResolvedConfig {
        config_dir,
        remotes,
        default_remote,
        accept_remote_certificate,
        generate_client_certificates: generate_client_certificates(config, env),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env_from(
        pairs: &'static [(&'static str, &'static str)],
    ) -> impl Fn(&str) -> Option<String> + Send + Sync {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    fn config(value: serde_json::Value) -> ProviderConfig {
        serde_json::from_value(value).unwrap()
    }

    fn resolve_with(
        value: serde_json::Value,
        env: &'static [(&'static str, &'static str)],
        lxc: &LxcConfig,
    ) -> std::result::Result<ResolvedConfig, Diagnostics> {
        resolve(&config(value), &env_from(env), lxc, PathBuf::from("/tmp/lxc"))
    }

    #[test]
    fn test_schema_default_wins() {
        let resolved = resolve_with(
            json!({"remote": [
                {"name": "a", "address": "a.example", "scheme": "https"},
                {"name": "b", "address": "b.example", "scheme": "https", "default": true}
            ]}),
            &[(ENV_REMOTE, "a")],
            &LxcConfig::default(),
        )
        .unwrap();

        assert_eq!(resolved.default_remote, "b");
        assert!(resolved.has_https_remote());
        assert!(resolved.remotes.iter().any(|r| r.name == LOCAL_REMOTE));
    }

    #[test]
    fn test_env_remote_becomes_default() {
        let resolved = resolve_with(
            json!({}),
            &[
                (ENV_REMOTE, "prod"),
                (ENV_ADDR, "10.0.0.5"),
                (ENV_PORT, "9443"),
                (ENV_TOKEN, "tok"),
            ],
            &LxcConfig::default(),
        )
        .unwrap();

        assert_eq!(resolved.default_remote, "prod");
        let prod = resolved.remotes.iter().find(|r| r.name == "prod").unwrap();
        assert_eq!(prod.scheme, Scheme::Https);
        assert_eq!(prod.port, "9443");
        assert_eq!(prod.token.as_deref(), Some("tok"));
        assert!(prod.default);
    }

    #[test]
    fn test_env_remote_without_name() {
        let resolved =
            resolve_with(json!({}), &[(ENV_ADDR, "10.0.0.5")], &LxcConfig::default()).unwrap();
        assert!(resolved.remotes.iter().any(|r| r.name == ENV_REMOTE_DEFAULT_NAME));
        assert_eq!(resolved.default_remote, LOCAL_REMOTE);
    }

    #[test]
    fn test_lxc_config_remotes_and_default() {
        let lxc = LxcConfig::parse(
            "default-remote: office
remotes:
  office:
    addr: https://10.1.1.1:8443
    protocol: lxd
  images:
    addr: https://images.example
    protocol: simplestreams
    public: true
  local:
    addr: unix://
",
        )
        .unwrap();

        let resolved = resolve_with(json!({}), &[], &lxc).unwrap();
        assert_eq!(resolved.default_remote, "office");
        let images = resolved.remotes.iter().find(|r| r.name == "images").unwrap();
        assert_eq!(images.protocol, Protocol::Simplestreams);
        let local = resolved.remotes.iter().find(|r| r.name == "local").unwrap();
        assert_eq!(local.scheme, Scheme::Unix);
    }

    #[test]
    fn test_validation_errors() {
        let err = resolve_with(
            json!({"remote": [
                {"name": "a", "default": true, "password": "p", "token": "t"},
                {"name": "a"},
                {"name": "s", "protocol": "simplestreams", "address": "images", "default": true}
            ]}),
            &[],
            &LxcConfig::default(),
        )
        .unwrap_err();

        let summaries: Vec<&str> = err.iter().map(|d| d.summary.as_str()).collect();
        assert!(summaries.contains(&"Duplicate remote"));
        assert!(summaries.contains(&"Invalid Attribute Combination"));
        assert!(summaries.contains(&"Invalid default remote"));
        assert!(summaries.contains(&"Multiple default remotes"));
    }

    #[test]
    fn test_generate_client_certificates_precedence() {
        let env = env_from(&[(ENV_GENERATE_CLIENT_CERTS, "yes")]);
        assert!(generate_client_certificates(&config(json!({})), &env));
        assert!(!generate_client_certificates(
            &config(json!({"generate_client_certificates": false})),
            &env
        ));

        let unset = env_from(&[]);
        assert!(!generate_client_certificates(&config(json!({})), &unset));
        assert!(generate_client_certificates(
            &config(json!({"generate_client_certificates": true})),
            &unset
        ));
    }

    #[test]
    fn test_default_config_dir() {
        let home = Path::new("/home/u");
        assert_eq!(
            default_config_dir(home, true),
            PathBuf::from("/home/u/snap/lxd/common/config")
        );
        assert_eq!(default_config_dir(home, false), PathBuf::from("/home/u/.config/lxc"));
    }

    #[test]
    fn test_config_dir_without_home_requires_attribute() {
        let err = resolve_config_dir_from(&config(json!({})), None).unwrap_err();
        assert!(matches!(err, ProviderError::Config(ref msg) if msg.contains("config_dir")));

        let explicit = config(json!({"config_dir": "/etc/lxdform"}));
        assert_eq!(
            resolve_config_dir_from(&explicit, None).unwrap(),
            PathBuf::from("/etc/lxdform")
        );

        let home = resolve_config_dir_from(&config(json!({})), Some(PathBuf::from("/home/u")))
            .unwrap();
        assert!(home.starts_with("/home/u"));
    }
}
