//! Read-only image server speaking the simplestreams protocol.
//!
//! Only the product index (`streams/v1/images.json`) is used: aliases are
//! resolved to the fingerprint of the newest product version.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::api::ImageAlias;
use crate::error::{ClientError, Result};

const INDEX_PATH: &str = "streams/v1/images.json";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProductIndex {
    products: BTreeMap<String, Product>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Product {
    /// Comma separated alias list.
    aliases: String,
    arch: String,
    versions: BTreeMap<String, ProductVersion>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProductVersion {
    items: BTreeMap<String, ProductItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProductItem {
    ftype: String,
    sha256: String,
    combined_sha256: String,
    combined_squashfs_sha256: String,
    combined_rootxz_sha256: String,
    combined_disk_kvm_img_sha256: String,
}

impl ProductVersion {
    /// Fingerprint of the container image in this version, if any.
    fn fingerprint(&self) -> Option<String> {
        let meta = self.items.values().find(|i| i.ftype == "lxd.tar.xz");
        if let Some(meta) = meta {
            for candidate in [
                &meta.combined_squashfs_sha256,
                &meta.combined_sha256,
                &meta.combined_rootxz_sha256,
                &meta.combined_disk_kvm_img_sha256,
            ] {
                if !candidate.is_empty() {
                    return Some(candidate.clone());
                }
            }
        }
        self.items
            .values()
            .find(|i| i.ftype == "lxd_combined.tar.gz" && !i.sha256.is_empty())
            .map(|i| i.sha256.clone())
    }
}

/// Image server reachable over plain HTTPS without authentication.
#[derive(Debug, Clone)]
pub struct SimpleStreamsServer {
    base: String,
    http: reqwest::Client,
    arch: String,
}

impl SimpleStreamsServer {
    pub fn new(base: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ClientError::Tls(e.to_string()))?;
        Ok(Self {
            base: base.into().trim_end_matches('/').to_string(),
            http,
            arch: host_architecture().to_string(),
        })
    }

    /// Resolves aliases for `arch` instead of the host architecture.
    pub fn with_architecture(mut self, arch: &str) -> Self {
        self.arch = arch.to_string();
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.base
    }

    async fn index(&self) -> Result<ProductIndex> {
        let url = format!("{}/{}", self.base, INDEX_PATH);
        debug!(url = %url, "Fetching simplestreams index");

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let status = resp.status().as_u16();
        if status >= 400 {
            return Err(ClientError::Status {
                code: status,
                message: format!("HTTP {} for {}", status, url),
            });
        }
        let body = resp
            .bytes()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Looks up an alias. The returned ETag is always empty.
    pub async fn get_image_alias(&self, name: &str) -> Result<(ImageAlias, String)> {
        let index = self.index().await?;

        let latest = index
            .products
            .values()
            .filter(|p| p.arch.is_empty() || p.arch == self.arch)
            .filter(|p| p.aliases.split(',').any(|a| a.trim() == name))
            .filter_map(|p| p.versions.iter().next_back())
            .max_by(|a, b| a.0.cmp(b.0))
            .and_then(|(_, version)| version.fingerprint());

        match latest {
            Some(target) => Ok((
                ImageAlias {
                    name: name.to_string(),
                    target,
                    kind: "container".to_string(),
                    ..Default::default()
                },
                String::new(),
            )),
            None => Err(ClientError::NotFound(format!("Alias {:?} not found", name))),
        }
    }
}

/// Architecture name as used in image indexes.
fn host_architecture() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "powerpc64" => "ppc64el",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_version_fingerprint_preference() {
        let version: ProductVersion = serde_json::from_value(json!({
            "items": {
                "lxd.tar.xz": {
                    "ftype": "lxd.tar.xz",
                    "combined_sha256": "aaa",
                    "combined_squashfs_sha256": "bbb"
                },
                "root.squashfs": {"ftype": "squashfs", "sha256": "ccc"}
            }
        }))
        .unwrap();
        assert_eq!(version.fingerprint().as_deref(), Some("bbb"));

        let legacy: ProductVersion = serde_json::from_value(json!({
            "items": {"x": {"ftype": "lxd_combined.tar.gz", "sha256": "ddd"}}
        }))
        .unwrap();
        assert_eq!(legacy.fingerprint().as_deref(), Some("ddd"));

        assert!(ProductVersion::default().fingerprint().is_none());
    }

    #[tokio::test]
    async fn test_alias_resolves_to_newest_version() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let mock = MockServer::start().await;
        let item = |sha: &str| {
            json!({"items": {"lxd.tar.xz": {
                "ftype": "lxd.tar.xz",
                "combined_squashfs_sha256": sha
            }}})
        };
        Mock::given(method("GET"))
            .and(path("/streams/v1/images.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "products": {
                    "debian:bookworm:amd64:default": {
                        "aliases": "debian/12, debian/bookworm",
                        "arch": "amd64",
                        "versions": {"20240101_05:24": item("old"), "20240301_05:24": item("new")}
                    },
                    "debian:bookworm:arm64:default": {
                        "aliases": "debian/12",
                        "arch": "arm64",
                        "versions": {"20240401_05:24": item("arm")}
                    }
                }
            })))
            .mount(&mock)
            .await;

        let server = SimpleStreamsServer::new(mock.uri()).unwrap().with_architecture("amd64");
        let (alias, etag) = server.get_image_alias("debian/bookworm").await.unwrap();
        assert_eq!(alias.target, "new");
        assert!(etag.is_empty());

        let err = server.get_image_alias("alpine/3.19").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
