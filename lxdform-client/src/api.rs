//! Daemon API objects.
//!
//! Field names follow the JSON the daemon speaks. Writable subsets (`*Put`)
//! and creation bodies (`*Post`) are separate types because the daemon
//! rejects read-only fields on write.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// String to string configuration map.
pub type ConfigMap = BTreeMap<String, String>;

/// Device map: device name to its properties (including `type`).
pub type DeviceMap = BTreeMap<String, ConfigMap>;

// =============================================================================
// Server
// =============================================================================

/// Response of `GET /1.0`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Server {
    pub api_extensions: Vec<String>,
    pub api_status: String,
    pub api_version: String,
    /// `trusted` or `untrusted`.
    pub auth: String,
    pub auth_methods: Vec<String>,
    pub public: bool,
    pub environment: ServerEnvironment,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEnvironment {
    pub addresses: Vec<String>,
    pub certificate: String,
    pub certificate_fingerprint: String,
    pub project: String,
    pub server: String,
    pub server_clustered: bool,
    pub server_name: String,
    pub server_version: String,
}

impl Server {
    pub fn is_trusted(&self) -> bool {
        self.auth == "trusted"
    }

    pub fn has_extension(&self, name: &str) -> bool {
        self.api_extensions.iter().any(|e| e == name)
    }

    pub fn is_clustered(&self) -> bool {
        self.environment.server_clustered
    }
}

/// Body of `POST /1.0/certificates` when a client asks to be trusted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificatesPost {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub restricted: bool,
    pub projects: Vec<String>,
    /// Base64 encoded DER certificate. Empty means "the TLS client certificate".
    #[serde(skip_serializing_if = "String::is_empty")]
    pub certificate: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub trust_token: String,
    /// Ask the daemon for a trust token instead of adding a certificate.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub token: bool,
}

// =============================================================================
// Certificates
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Certificate {
    pub fingerprint: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub restricted: bool,
    pub projects: Vec<String>,
    /// PEM encoded certificate.
    pub certificate: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificatePut {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub restricted: bool,
    pub projects: Vec<String>,
    pub certificate: String,
    pub description: String,
}

impl Certificate {
    pub fn writable(&self) -> CertificatePut {
        CertificatePut {
            name: self.name.clone(),
            kind: self.kind.clone(),
            restricted: self.restricted,
            projects: self.projects.clone(),
            certificate: self.certificate.clone(),
            description: self.description.clone(),
        }
    }
}

// =============================================================================
// Networks
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Network {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub managed: bool,
    pub status: String,
    pub config: ConfigMap,
    pub locations: Vec<String>,
    pub used_by: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworksPost {
    pub name: String,
    pub description: String,
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub kind: String,
    pub config: ConfigMap,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkPut {
    pub description: String,
    pub config: ConfigMap,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkAclRule {
    pub action: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub destination: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub protocol: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub source_port: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub destination_port: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub icmp_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub icmp_code: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub state: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkAcl {
    pub name: String,
    pub description: String,
    pub egress: Vec<NetworkAclRule>,
    pub ingress: Vec<NetworkAclRule>,
    pub config: ConfigMap,
    pub used_by: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkAclPut {
    pub description: String,
    pub egress: Vec<NetworkAclRule>,
    pub ingress: Vec<NetworkAclRule>,
    pub config: ConfigMap,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkForwardPort {
    pub description: String,
    pub protocol: String,
    pub listen_port: String,
    pub target_port: String,
    pub target_address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkForward {
    pub listen_address: String,
    pub description: String,
    pub config: ConfigMap,
    pub ports: Vec<NetworkForwardPort>,
    pub location: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkForwardPut {
    pub description: String,
    pub config: ConfigMap,
    pub ports: Vec<NetworkForwardPort>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkLoadBalancerBackend {
    pub name: String,
    pub description: String,
    pub target_port: String,
    pub target_address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkLoadBalancerPort {
    pub description: String,
    pub protocol: String,
    pub listen_port: String,
    pub target_backend: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkLoadBalancer {
    pub listen_address: String,
    pub description: String,
    pub config: ConfigMap,
    pub backends: Vec<NetworkLoadBalancerBackend>,
    pub ports: Vec<NetworkLoadBalancerPort>,
    pub location: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkLoadBalancerPut {
    pub description: String,
    pub config: ConfigMap,
    pub backends: Vec<NetworkLoadBalancerBackend>,
    pub ports: Vec<NetworkLoadBalancerPort>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkPeer {
    pub name: String,
    pub description: String,
    pub config: ConfigMap,
    pub target_project: String,
    pub target_network: String,
    /// `Pending` until both sides of the peering exist, then `Created`.
    pub status: String,
    pub used_by: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkPeersPost {
    pub name: String,
    pub description: String,
    pub config: ConfigMap,
    pub target_project: String,
    pub target_network: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkPeerPut {
    pub description: String,
    pub config: ConfigMap,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkZone {
    pub name: String,
    pub description: String,
    pub config: ConfigMap,
    pub used_by: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkZonePut {
    pub description: String,
    pub config: ConfigMap,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkZoneRecordEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub ttl: u64,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkZoneRecord {
    pub name: String,
    pub description: String,
    pub entries: Vec<NetworkZoneRecordEntry>,
    pub config: ConfigMap,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkZoneRecordPut {
    pub description: String,
    pub entries: Vec<NetworkZoneRecordEntry>,
    pub config: ConfigMap,
}

// =============================================================================
// Profiles and projects
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub name: String,
    pub description: String,
    pub config: ConfigMap,
    pub devices: DeviceMap,
    pub used_by: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilePut {
    pub description: String,
    pub config: ConfigMap,
    pub devices: DeviceMap,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Project {
    pub name: String,
    pub description: String,
    pub config: ConfigMap,
    pub used_by: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectPut {
    pub description: String,
    pub config: ConfigMap,
}

// =============================================================================
// Storage
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoragePool {
    pub name: String,
    pub driver: String,
    pub description: String,
    pub config: ConfigMap,
    pub status: String,
    pub locations: Vec<String>,
    pub used_by: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoragePoolsPost {
    pub name: String,
    pub driver: String,
    pub description: String,
    pub config: ConfigMap,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoragePoolPut {
    pub description: String,
    pub config: ConfigMap,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageVolume {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub config: ConfigMap,
    pub content_type: String,
    pub location: String,
    pub used_by: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageVolumesPost {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub content_type: String,
    pub description: String,
    pub config: ConfigMap,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageVolumePut {
    pub description: String,
    pub config: ConfigMap,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageBucket {
    pub name: String,
    pub description: String,
    pub config: ConfigMap,
    pub s3_url: String,
    pub location: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageBucketsPost {
    pub name: String,
    pub description: String,
    pub config: ConfigMap,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageBucketPut {
    pub description: String,
    pub config: ConfigMap,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageBucketKey {
    pub name: String,
    pub description: String,
    pub role: String,
    pub access_key: String,
    pub secret_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageBucketKeysPost {
    pub name: String,
    pub description: String,
    pub role: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub access_key: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub secret_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageBucketKeyPut {
    pub description: String,
    pub role: String,
    pub access_key: String,
    pub secret_key: String,
}

// =============================================================================
// Cluster
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterGroup {
    pub name: String,
    pub description: String,
    pub members: Vec<String>,
    pub config: ConfigMap,
    pub used_by: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterGroupsPost {
    pub name: String,
    pub description: String,
    pub members: Vec<String>,
    pub config: ConfigMap,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterGroupPut {
    pub description: String,
    pub members: Vec<String>,
    pub config: ConfigMap,
}

impl ClusterGroup {
    pub fn writable(&self) -> ClusterGroupPut {
        ClusterGroupPut {
            description: self.description.clone(),
            members: self.members.clone(),
            config: self.config.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterMember {
    pub server_name: String,
    pub url: String,
    pub database: bool,
    pub status: String,
    pub message: String,
    pub roles: Vec<String>,
    pub groups: Vec<String>,
    pub description: String,
}

// =============================================================================
// Images
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageAlias {
    pub name: String,
    pub description: String,
    /// Fingerprint of the image the alias points at.
    pub target: String,
    #[serde(rename = "type")]
    pub kind: String,
}

// =============================================================================
// Operations
// =============================================================================

/// Status code of an operation that is still in flight.
pub const OPERATION_RUNNING: u16 = 103;
/// Status code of an operation that completed successfully.
pub const OPERATION_SUCCESS: u16 = 200;
/// Status code of an operation that failed.
pub const OPERATION_FAILURE: u16 = 400;
/// Status code of an operation that was cancelled.
pub const OPERATION_CANCELLED: u16 = 401;

/// A background daemon operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Operation {
    pub id: String,
    /// `task`, `websocket` or `token`.
    pub class: String,
    pub description: String,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
    pub status: String,
    pub status_code: u16,
    pub resources: BTreeMap<String, Vec<String>>,
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    pub may_cancel: bool,
    pub err: String,
    pub location: String,
}

impl Operation {
    pub fn is_running(&self) -> bool {
        self.status_code == OPERATION_RUNNING
    }

    pub fn is_done(&self) -> bool {
        self.status_code >= OPERATION_SUCCESS
    }

    /// String metadata value, if present.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.as_ref()?.get(key)?.as_str()
    }
}

/// Trust token handed to a client that wants to add itself to the trust store.
///
/// Encoded as base64 of its JSON form, which is what `lxc remote add` accepts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificateAddToken {
    pub client_name: String,
    pub fingerprint: String,
    pub addresses: Vec<String>,
    pub secret: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl CertificateAddToken {
    /// Builds the token out of a running `token` class operation.
    pub fn from_operation(op: &Operation) -> Option<Self> {
        let meta = op.metadata.as_ref()?;
        let secret = meta.get("secret")?.as_str()?.to_string();
        let fingerprint = meta
            .get("fingerprint")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let addresses = meta
            .get("addresses")
            .and_then(|v| v.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let client_name = meta
            .get("request")
            .and_then(|r| r.get("name"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let expires_at = meta
            .get("expiresAt")
            .and_then(|v| v.as_str())
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&chrono::Utc));

        Some(Self {
            client_name,
            fingerprint,
            addresses,
            secret,
            expires_at,
        })
    }

    pub fn encode(&self) -> String {
        use base64::Engine;
        let json = serde_json::to_vec(self).unwrap_or_default();
        base64::engine::general_purpose::STANDARD.encode(json)
    }

    pub fn decode(token: &str) -> Option<Self> {
        use base64::Engine;
        let raw = base64::engine::general_purpose::STANDARD
            .decode(token.trim())
            .ok()?;
        serde_json::from_slice(&raw).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_server_extension_and_auth() {
        let server: Server = serde_json::from_value(json!({
            "api_extensions": ["network_peer", "explicit_trust_token"],
            "auth": "untrusted",
            "environment": {"server_version": "5.21.1", "server_clustered": true}
        }))
        .unwrap();

        assert!(server.has_extension("explicit_trust_token"));
        assert!(!server.has_extension("storage_buckets"));
        assert!(!server.is_trusted());
        assert!(server.is_clustered());
        assert_eq!(server.environment.server_version, "5.21.1");
    }

    #[test]
    fn test_operation_decode_and_token() {
        let op: Operation = serde_json::from_value(json!({
            "id": "op1",
            "class": "token",
            "status": "Running",
            "status_code": 103,
            "metadata": {
                "addresses": ["10.0.0.1:8443"],
                "fingerprint": "abcd",
                "secret": "s3cr3t",
                "expiresAt": "2030-01-01T00:00:00Z",
                "request": {"name": "ci", "type": "client"}
            }
        }))
        .unwrap();

        assert!(op.is_running());
        let token = CertificateAddToken::from_operation(&op).unwrap();
        assert_eq!(token.client_name, "ci");
        assert_eq!(token.secret, "s3cr3t");
        assert_eq!(token.addresses, vec!["10.0.0.1:8443".to_string()]);
        assert!(token.expires_at.is_some());

        let decoded = CertificateAddToken::decode(&token.encode()).unwrap();
        assert_eq!(decoded, token);
    }

    #[test]
    fn test_operation_without_secret_has_no_token() {
        let op = Operation {
            id: "op2".to_string(),
            class: "token".to_string(),
            status_code: OPERATION_RUNNING,
            ..Default::default()
        };
        assert!(CertificateAddToken::from_operation(&op).is_none());
    }

    #[test]
    fn test_acl_rule_skips_empty_fields() {
        let rule = NetworkAclRule {
            action: "allow".to_string(),
            state: "enabled".to_string(),
            destination_port: "22".to_string(),
            protocol: "tcp".to_string(),
            ..Default::default()
        };
        let value = serde_json::to_value(&rule).unwrap();
        assert_eq!(
            value,
            json!({
                "action": "allow",
                "state": "enabled",
                "destination_port": "22",
                "protocol": "tcp"
            })
        );
    }
}
