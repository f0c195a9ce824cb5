//! Typed daemon calls.
//!
//! [`InstanceServer`] is a cheap handle over a shared [`Transport`]. Scoping
//! to a project or cluster member returns a new handle; the transport (and
//! whatever TLS session it holds) is shared.

use std::sync::Arc;
use std::time::Duration;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::*;
use crate::error::{ClientError, Result};
use crate::transport::{Method, RawResponse, Request, Transport};

/// Operation wait bound when the caller does not supply one.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Standard response envelope.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    pub status_code: u16,
    pub operation: String,
    pub error_code: u16,
    pub error: String,
    pub metadata: serde_json::Value,
}

/// Decoded daemon response.
#[derive(Debug, Clone)]
pub struct Response {
    pub envelope: Envelope,
    pub etag: String,
}

impl Response {
    pub fn is_async(&self) -> bool {
        self.envelope.kind == "async"
    }

    /// Operation id of an async response.
    pub fn operation_id(&self) -> Option<String> {
        if !self.is_async() {
            return None;
        }
        if let Some(id) = self.envelope.metadata.get("id").and_then(|v| v.as_str()) {
            return Some(id.to_string());
        }
        self.envelope
            .operation
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .map(|s| s.split('?').next().unwrap_or(s).to_string())
    }

    pub fn metadata<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.envelope.metadata.clone())?)
    }
}

/// Turns a raw reply into a [`Response`] or the matching [`ClientError`].
pub fn decode(path: &str, raw: RawResponse) -> Result<Response> {
    let envelope: Envelope = if raw.body.is_empty() {
        Envelope::default()
    } else {
        serde_json::from_slice(&raw.body).map_err(|e| {
            ClientError::Decode(format!("{} (HTTP {}): {}", path, raw.status, e))
        })?
    };

    let code = if envelope.kind == "error" && envelope.error_code != 0 {
        envelope.error_code
    } else {
        raw.status
    };

    if envelope.kind == "error" || code >= 400 {
        let message = if envelope.error.is_empty() {
            format!("HTTP {} for {}", code, path)
        } else {
            envelope.error.clone()
        };
        return Err(match code {
            404 => ClientError::NotFound(message),
            412 => ClientError::EtagMismatch(message),
            _ => ClientError::Status { code, message },
        });
    }

    Ok(Response {
        envelope,
        etag: raw.etag.unwrap_or_default(),
    })
}

/// Bytes escaped in a path segment or query value: everything except RFC 3986
/// unreserved characters and `:`, which keeps IPv6 listen addresses readable.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b':');

/// Escapes a single path segment.
pub fn escape(segment: &str) -> String {
    utf8_percent_encode(segment, SEGMENT).to_string()
}

/// Client for instance-capable daemons, scoped to an optional project and
/// cluster member.
#[derive(Debug, Clone)]
pub struct InstanceServer {
    transport: Arc<dyn Transport>,
    project: String,
    target: String,
    cancel: CancellationToken,
    operation_timeout: Duration,
}

impl InstanceServer {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            project: String::new(),
            target: String::new(),
            cancel: CancellationToken::new(),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    /// Same server, scoped to `project`. Empty means the daemon default.
    pub fn use_project(&self, project: &str) -> Self {
        let mut scoped = self.clone();
        scoped.project = project.to_string();
        scoped
    }

    /// Same server, scoped to cluster member `target`. Empty means unscoped.
    pub fn use_target(&self, target: &str) -> Self {
        let mut scoped = self.clone();
        scoped.target = target.to_string();
        scoped
    }

    /// Same server, with operation waits bound to `cancel` and `timeout`.
    pub fn with_context(&self, cancel: CancellationToken, timeout: Duration) -> Self {
        let mut scoped = self.clone();
        scoped.cancel = cancel;
        scoped.operation_timeout = timeout;
        scoped
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn endpoint(&self) -> String {
        self.transport.endpoint()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    fn query(&self, path: &str, recursion: bool) -> String {
        let mut params = Vec::new();
        if recursion {
            params.push("recursion=1".to_string());
        }
        self.query_with(path, params)
    }

    fn query_with(&self, path: &str, mut params: Vec<String>) -> String {
        if !self.project.is_empty() {
            params.push(format!("project={}", escape(&self.project)));
        }
        if !self.target.is_empty() {
            params.push(format!("target={}", escape(&self.target)));
        }
        if params.is_empty() {
            path.to_string()
        } else {
            format!("{}?{}", path, params.join("&"))
        }
    }

    // =========================================================================
    // Raw calls
    // =========================================================================

    /// Sends a request and decodes the envelope. Errors come back typed.
    pub async fn raw(&self, request: Request) -> Result<Response> {
        let path = request.path.clone();
        let raw = self.transport.send(request).await?;
        decode(&path, raw)
    }

    async fn get_object<T: DeserializeOwned>(&self, path: &str) -> Result<(T, String)> {
        let resp = self
            .raw(Request::new(Method::Get, self.query(path, false)))
            .await?;
        let etag = resp.etag.clone();
        Ok((resp.metadata()?, etag))
    }

    async fn create_object<B: Serialize>(&self, path: &str, body: &B) -> Result<Response> {
        let request = Request::new(Method::Post, self.query(path, false))
            .with_body(serde_json::to_value(body)?);
        let resp = self.raw(request).await?;
        self.complete(resp).await
    }

    async fn update_object<B: Serialize>(&self, path: &str, body: &B, etag: &str) -> Result<()> {
        let resp = self
            .raw(
                Request::new(Method::Put, self.query(path, false))
                    .with_body(serde_json::to_value(body)?)
                    .with_etag(etag),
            )
            .await?;
        self.complete(resp).await.map(|_| ())
    }

    async fn delete_object(&self, path: &str) -> Result<()> {
        let resp = self
            .raw(Request::new(Method::Delete, self.query(path, false)))
            .await?;
        self.complete(resp).await.map(|_| ())
    }

    /// Waits for the operation behind an async response.
    async fn complete(&self, resp: Response) -> Result<Response> {
        match resp.operation_id() {
            Some(id) => {
                self.wait_operation(&id).await?;
                Ok(resp)
            }
            None => Ok(resp),
        }
    }

    // =========================================================================
    // Server
    // =========================================================================

    pub async fn get_server(&self) -> Result<(Server, String)> {
        self.get_object("/1.0").await
    }

    /// Presents a trust token or password so the daemon adds our client certificate.
    pub async fn add_client_certificate(&self, req: &CertificatesPost) -> Result<()> {
        self.create_object("/1.0/certificates", req).await.map(|_| ())
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// All operations the daemon currently knows about, flattened.
    pub async fn get_operations(&self) -> Result<Vec<Operation>> {
        let resp = self
            .raw(Request::new(Method::Get, self.query("/1.0/operations", true)))
            .await?;
        let grouped: std::collections::BTreeMap<String, Vec<Operation>> = resp.metadata()?;
        Ok(grouped.into_values().flatten().collect())
    }

    pub async fn get_operation(&self, id: &str) -> Result<Operation> {
        let (op, _) = self
            .get_object(&format!("/1.0/operations/{}", escape(id)))
            .await?;
        Ok(op)
    }

    /// Cancels a running operation.
    pub async fn delete_operation(&self, id: &str) -> Result<()> {
        self.raw(Request::new(
            Method::Delete,
            self.query(&format!("/1.0/operations/{}", escape(id)), false),
        ))
        .await
        .map(|_| ())
    }

    /// Waits until an operation finishes, the caller cancels, or the wait times out.
    pub async fn wait_operation(&self, id: &str) -> Result<Operation> {
        let secs = self.operation_timeout.as_secs().max(1);
        let path = self.query_with(
            &format!("/1.0/operations/{}/wait", escape(id)),
            vec![format!("timeout={}", secs)],
        );

        debug!(operation = %id, "Waiting for operation");

        let wait = self.raw(Request::new(Method::Get, path));
        let resp = tokio::select! {
            _ = self.cancel.cancelled() => {
                return Err(ClientError::Cancelled(id.to_string()));
            }
            res = tokio::time::timeout(self.operation_timeout, wait) => {
                res.map_err(|_| ClientError::Timeout(id.to_string()))??
            }
        };

        let op: Operation = resp.metadata()?;
        if op.status_code == OPERATION_FAILURE || op.status_code == OPERATION_CANCELLED {
            return Err(ClientError::OperationFailed {
                id: id.to_string(),
                message: op.err.clone(),
            });
        }
        if !op.is_done() {
            return Err(ClientError::Timeout(id.to_string()));
        }
        Ok(op)
    }

    // =========================================================================
    // Certificates
    // =========================================================================

    pub async fn get_certificate(&self, fingerprint: &str) -> Result<(Certificate, String)> {
        self.get_object(&format!("/1.0/certificates/{}", escape(fingerprint)))
            .await
    }

    pub async fn create_certificate(&self, req: &CertificatesPost) -> Result<()> {
        self.create_object("/1.0/certificates", req).await.map(|_| ())
    }

    pub async fn update_certificate(
        &self,
        fingerprint: &str,
        req: &CertificatePut,
        etag: &str,
    ) -> Result<()> {
        self.update_object(
            &format!("/1.0/certificates/{}", escape(fingerprint)),
            req,
            etag,
        )
        .await
    }

    pub async fn delete_certificate(&self, fingerprint: &str) -> Result<()> {
        self.delete_object(&format!("/1.0/certificates/{}", escape(fingerprint)))
            .await
    }

    /// Issues a trust token. The token lives in the returned running operation.
    pub async fn create_certificate_token(&self, req: &CertificatesPost) -> Result<Operation> {
        let mut req = req.clone();
        req.token = true;
        let resp = self
            .raw(
                Request::new(Method::Post, self.query("/1.0/certificates", false))
                    .with_body(serde_json::to_value(&req)?),
            )
            .await?;
        if !resp.is_async() {
            return Err(ClientError::Decode(
                "daemon did not return an operation for the token request".to_string(),
            ));
        }
        resp.metadata()
    }

    // =========================================================================
    // Cluster
    // =========================================================================

    pub async fn get_cluster_members(&self) -> Result<Vec<ClusterMember>> {
        let resp = self
            .raw(Request::new(Method::Get, self.query("/1.0/cluster/members", true)))
            .await?;
        resp.metadata()
    }

    pub async fn get_cluster_member_names(&self) -> Result<Vec<String>> {
        Ok(self
            .get_cluster_members()
            .await?
            .into_iter()
            .map(|m| m.server_name)
            .collect())
    }

    pub async fn get_cluster_group(&self, name: &str) -> Result<(ClusterGroup, String)> {
        self.get_object(&format!("/1.0/cluster/groups/{}", escape(name)))
            .await
    }

    pub async fn create_cluster_group(&self, req: &ClusterGroupsPost) -> Result<()> {
        self.create_object("/1.0/cluster/groups", req).await.map(|_| ())
    }

    pub async fn update_cluster_group(
        &self,
        name: &str,
        req: &ClusterGroupPut,
        etag: &str,
    ) -> Result<()> {
        self.update_object(&format!("/1.0/cluster/groups/{}", escape(name)), req, etag)
            .await
    }

    pub async fn delete_cluster_group(&self, name: &str) -> Result<()> {
        self.delete_object(&format!("/1.0/cluster/groups/{}", escape(name)))
            .await
    }

    // =========================================================================
    // Networks
    // =========================================================================

    pub async fn get_network(&self, name: &str) -> Result<(Network, String)> {
        self.get_object(&format!("/1.0/networks/{}", escape(name))).await
    }

    pub async fn create_network(&self, req: &NetworksPost) -> Result<()> {
        self.create_object("/1.0/networks", req).await.map(|_| ())
    }

    pub async fn update_network(&self, name: &str, req: &NetworkPut, etag: &str) -> Result<()> {
        self.update_object(&format!("/1.0/networks/{}", escape(name)), req, etag)
            .await
    }

    pub async fn delete_network(&self, name: &str) -> Result<()> {
        self.delete_object(&format!("/1.0/networks/{}", escape(name))).await
    }

    pub async fn get_network_acl(&self, name: &str) -> Result<(NetworkAcl, String)> {
        self.get_object(&format!("/1.0/network-acls/{}", escape(name)))
            .await
    }

    pub async fn create_network_acl(&self, req: &NetworkAcl) -> Result<()> {
        self.create_object("/1.0/network-acls", req).await.map(|_| ())
    }

    pub async fn update_network_acl(
        &self,
        name: &str,
        req: &NetworkAclPut,
        etag: &str,
    ) -> Result<()> {
        self.update_object(&format!("/1.0/network-acls/{}", escape(name)), req, etag)
            .await
    }

    pub async fn delete_network_acl(&self, name: &str) -> Result<()> {
        self.delete_object(&format!("/1.0/network-acls/{}", escape(name)))
            .await
    }

    fn forward_path(network: &str, listen_address: &str) -> String {
        format!(
            "/1.0/networks/{}/forwards/{}",
            escape(network),
            escape(listen_address)
        )
    }

    pub async fn get_network_forward(
        &self,
        network: &str,
        listen_address: &str,
    ) -> Result<(NetworkForward, String)> {
        self.get_object(&Self::forward_path(network, listen_address))
            .await
    }

    pub async fn create_network_forward(&self, network: &str, req: &NetworkForward) -> Result<()> {
        self.create_object(&format!("/1.0/networks/{}/forwards", escape(network)), req)
            .await
            .map(|_| ())
    }

    pub async fn update_network_forward(
        &self,
        network: &str,
        listen_address: &str,
        req: &NetworkForwardPut,
        etag: &str,
    ) -> Result<()> {
        self.update_object(&Self::forward_path(network, listen_address), req, etag)
            .await
    }

    pub async fn delete_network_forward(&self, network: &str, listen_address: &str) -> Result<()> {
        self.delete_object(&Self::forward_path(network, listen_address))
            .await
    }

    fn load_balancer_path(network: &str, listen_address: &str) -> String {
        format!(
            "/1.0/networks/{}/load-balancers/{}",
            escape(network),
            escape(listen_address)
        )
    }

    pub async fn get_network_load_balancer(
        &self,
        network: &str,
        listen_address: &str,
    ) -> Result<(NetworkLoadBalancer, String)> {
        self.get_object(&Self::load_balancer_path(network, listen_address))
            .await
    }

    pub async fn create_network_load_balancer(
        &self,
        network: &str,
        req: &NetworkLoadBalancer,
    ) -> Result<()> {
        self.create_object(
            &format!("/1.0/networks/{}/load-balancers", escape(network)),
            req,
        )
        .await
        .map(|_| ())
    }

    pub async fn update_network_load_balancer(
        &self,
        network: &str,
        listen_address: &str,
        req: &NetworkLoadBalancerPut,
        etag: &str,
    ) -> Result<()> {
        self.update_object(&Self::load_balancer_path(network, listen_address), req, etag)
            .await
    }

    pub async fn delete_network_load_balancer(
        &self,
        network: &str,
        listen_address: &str,
    ) -> Result<()> {
        self.delete_object(&Self::load_balancer_path(network, listen_address))
            .await
    }

    fn peer_path(network: &str, name: &str) -> String {
        format!("/1.0/networks/{}/peers/{}", escape(network), escape(name))
    }

    pub async fn get_network_peer(
        &self,
        network: &str,
        name: &str,
    ) -> Result<(NetworkPeer, String)> {
        self.get_object(&Self::peer_path(network, name)).await
    }

    pub async fn create_network_peer(&self, network: &str, req: &NetworkPeersPost) -> Result<()> {
        self.create_object(&format!("/1.0/networks/{}/peers", escape(network)), req)
            .await
            .map(|_| ())
    }

    pub async fn update_network_peer(
        &self,
        network: &str,
        name: &str,
        req: &NetworkPeerPut,
        etag: &str,
    ) -> Result<()> {
        self.update_object(&Self::peer_path(network, name), req, etag)
            .await
    }

    pub async fn delete_network_peer(&self, network: &str, name: &str) -> Result<()> {
        self.delete_object(&Self::peer_path(network, name)).await
    }

    pub async fn get_network_zone(&self, name: &str) -> Result<(NetworkZone, String)> {
        self.get_object(&format!("/1.0/network-zones/{}", escape(name)))
            .await
    }

    pub async fn create_network_zone(&self, req: &NetworkZone) -> Result<()> {
        self.create_object("/1.0/network-zones", req).await.map(|_| ())
    }

    pub async fn update_network_zone(
        &self,
        name: &str,
        req: &NetworkZonePut,
        etag: &str,
    ) -> Result<()> {
        self.update_object(&format!("/1.0/network-zones/{}", escape(name)), req, etag)
            .await
    }

    pub async fn delete_network_zone(&self, name: &str) -> Result<()> {
        self.delete_object(&format!("/1.0/network-zones/{}", escape(name)))
            .await
    }

    fn zone_record_path(zone: &str, name: &str) -> String {
        format!(
            "/1.0/network-zones/{}/records/{}",
            escape(zone),
            escape(name)
        )
    }

    pub async fn get_network_zone_record(
        &self,
        zone: &str,
        name: &str,
    ) -> Result<(NetworkZoneRecord, String)> {
        self.get_object(&Self::zone_record_path(zone, name)).await
    }

    pub async fn create_network_zone_record(
        &self,
        zone: &str,
        req: &NetworkZoneRecord,
    ) -> Result<()> {
        self.create_object(&format!("/1.0/network-zones/{}/records", escape(zone)), req)
            .await
            .map(|_| ())
    }

    pub async fn update_network_zone_record(
        &self,
        zone: &str,
        name: &str,
        req: &NetworkZoneRecordPut,
        etag: &str,
    ) -> Result<()> {
        self.update_object(&Self::zone_record_path(zone, name), req, etag)
            .await
    }

    pub async fn delete_network_zone_record(&self, zone: &str, name: &str) -> Result<()> {
        self.delete_object(&Self::zone_record_path(zone, name)).await
    }

    // =========================================================================
    // Profiles and projects
    // =========================================================================

    pub async fn get_profile(&self, name: &str) -> Result<(Profile, String)> {
        self.get_object(&format!("/1.0/profiles/{}", escape(name))).await
    }

    pub async fn create_profile(&self, req: &Profile) -> Result<()> {
        self.create_object("/1.0/profiles", req).await.map(|_| ())
    }

    pub async fn update_profile(&self, name: &str, req: &ProfilePut, etag: &str) -> Result<()> {
        self.update_object(&format!("/1.0/profiles/{}", escape(name)), req, etag)
            .await
    }

    pub async fn delete_profile(&self, name: &str) -> Result<()> {
        self.delete_object(&format!("/1.0/profiles/{}", escape(name))).await
    }

    pub async fn get_project(&self, name: &str) -> Result<(Project, String)> {
        self.get_object(&format!("/1.0/projects/{}", escape(name))).await
    }

    pub async fn create_project(&self, req: &Project) -> Result<()> {
        self.create_object("/1.0/projects", req).await.map(|_| ())
    }

    pub async fn update_project(&self, name: &str, req: &ProjectPut, etag: &str) -> Result<()> {
        self.update_object(&format!("/1.0/projects/{}", escape(name)), req, etag)
            .await
    }

    pub async fn delete_project(&self, name: &str) -> Result<()> {
        self.delete_object(&format!("/1.0/projects/{}", escape(name))).await
    }

    // =========================================================================
    // Storage
    // =========================================================================

    pub async fn get_storage_pool(&self, name: &str) -> Result<(StoragePool, String)> {
        self.get_object(&format!("/1.0/storage-pools/{}", escape(name)))
            .await
    }

    pub async fn create_storage_pool(&self, req: &StoragePoolsPost) -> Result<()> {
        self.create_object("/1.0/storage-pools", req).await.map(|_| ())
    }

    pub async fn update_storage_pool(
        &self,
        name: &str,
        req: &StoragePoolPut,
        etag: &str,
    ) -> Result<()> {
        self.update_object(&format!("/1.0/storage-pools/{}", escape(name)), req, etag)
            .await
    }

    pub async fn delete_storage_pool(&self, name: &str) -> Result<()> {
        self.delete_object(&format!("/1.0/storage-pools/{}", escape(name)))
            .await
    }

    fn volume_path(pool: &str, kind: &str, name: &str) -> String {
        format!(
            "/1.0/storage-pools/{}/volumes/{}/{}",
            escape(pool),
            escape(kind),
            escape(name)
        )
    }

    pub async fn get_storage_volume(
        &self,
        pool: &str,
        kind: &str,
        name: &str,
    ) -> Result<(StorageVolume, String)> {
        self.get_object(&Self::volume_path(pool, kind, name)).await
    }

    pub async fn create_storage_volume(&self, pool: &str, req: &StorageVolumesPost) -> Result<()> {
        self.create_object(
            &format!("/1.0/storage-pools/{}/volumes/{}", escape(pool), escape(&req.kind)),
            req,
        )
        .await
        .map(|_| ())
    }

    pub async fn update_storage_volume(
        &self,
        pool: &str,
        kind: &str,
        name: &str,
        req: &StorageVolumePut,
        etag: &str,
    ) -> Result<()> {
        self.update_object(&Self::volume_path(pool, kind, name), req, etag)
            .await
    }

    pub async fn delete_storage_volume(&self, pool: &str, kind: &str, name: &str) -> Result<()> {
        self.delete_object(&Self::volume_path(pool, kind, name)).await
    }

    fn bucket_path(pool: &str, name: &str) -> String {
        format!(
            "/1.0/storage-pools/{}/buckets/{}",
            escape(pool),
            escape(name)
        )
    }

    pub async fn get_storage_bucket(
        &self,
        pool: &str,
        name: &str,
    ) -> Result<(StorageBucket, String)> {
        self.get_object(&Self::bucket_path(pool, name)).await
    }

    pub async fn create_storage_bucket(&self, pool: &str, req: &StorageBucketsPost) -> Result<()> {
        self.create_object(&format!("/1.0/storage-pools/{}/buckets", escape(pool)), req)
            .await
            .map(|_| ())
    }

    pub async fn update_storage_bucket(
        &self,
        pool: &str,
        name: &str,
        req: &StorageBucketPut,
        etag: &str,
    ) -> Result<()> {
        self.update_object(&Self::bucket_path(pool, name), req, etag)
            .await
    }

    pub async fn delete_storage_bucket(&self, pool: &str, name: &str) -> Result<()> {
        self.delete_object(&Self::bucket_path(pool, name)).await
    }

    fn bucket_key_path(pool: &str, bucket: &str, name: &str) -> String {
        format!(
            "{}/keys/{}",
            Self::bucket_path(pool, bucket),
            escape(name)
        )
    }

    pub async fn get_storage_bucket_key(
        &self,
        pool: &str,
        bucket: &str,
        name: &str,
    ) -> Result<(StorageBucketKey, String)> {
        self.get_object(&Self::bucket_key_path(pool, bucket, name))
            .await
    }

    /// Creates a bucket key. The daemon answers with the generated credentials.
    pub async fn create_storage_bucket_key(
        &self,
        pool: &str,
        bucket: &str,
        req: &StorageBucketKeysPost,
    ) -> Result<StorageBucketKey> {
        let resp = self
            .create_object(&format!("{}/keys", Self::bucket_path(pool, bucket)), req)
            .await?;
        if resp.envelope.metadata.is_null() {
            return Ok(StorageBucketKey::default());
        }
        resp.metadata()
    }

    pub async fn update_storage_bucket_key(
        &self,
        pool: &str,
        bucket: &str,
        name: &str,
        req: &StorageBucketKeyPut,
        etag: &str,
    ) -> Result<()> {
        self.update_object(&Self::bucket_key_path(pool, bucket, name), req, etag)
            .await
    }

    pub async fn delete_storage_bucket_key(
        &self,
        pool: &str,
        bucket: &str,
        name: &str,
    ) -> Result<()> {
        self.delete_object(&Self::bucket_key_path(pool, bucket, name))
            .await
    }

    // =========================================================================
    // Images
    // =========================================================================

    pub async fn get_image_alias(&self, name: &str) -> Result<(ImageAlias, String)> {
        self.get_object(&format!("/1.0/images/aliases/{}", escape(name)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::body::Bytes;

    fn raw(status: u16, body: &str, etag: Option<&str>) -> RawResponse {
        RawResponse {
            status,
            etag: etag.map(str::to_string),
            body: Bytes::from(body.to_string()),
        }
    }

    #[test]
    fn test_decode_sync_with_etag() {
        let resp = decode(
            "/1.0/networks/br0",
            raw(
                200,
                r#"{"type":"sync","status":"Success","status_code":200,"metadata":{"name":"br0"}}"#,
                Some("\"abc\""),
            ),
        )
        .unwrap();
        assert_eq!(resp.etag, "\"abc\"");
        assert!(!resp.is_async());
        let net: Network = resp.metadata().unwrap();
        assert_eq!(net.name, "br0");
    }

    #[test]
    fn test_decode_errors() {
        let err = decode(
            "/1.0/networks/x",
            raw(404, r#"{"type":"error","error":"Network not found","error_code":404}"#, None),
        )
        .unwrap_err();
        assert!(err.is_not_found());

        let err = decode(
            "/1.0/networks/x",
            raw(412, r#"{"type":"error","error":"ETag doesn't match","error_code":412}"#, None),
        )
        .unwrap_err();
        assert!(matches!(err, ClientError::EtagMismatch(_)));

        let err = decode("/1.0/networks/x", raw(500, "", None)).unwrap_err();
        assert_eq!(err.status_code(), Some(500));
    }

    #[test]
    fn test_operation_id_from_async_response() {
        let resp = decode(
            "/1.0/storage-pools",
            raw(
                202,
                concat!(
                    r#"{"type":"async","status_code":100,"#,
                    r#""operation":"/1.0/operations/1234-abcd","metadata":{}}"#,
                ),
                None,
            ),
        )
        .unwrap();
        assert_eq!(resp.operation_id().as_deref(), Some("1234-abcd"));
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("br0"), "br0");
        assert_eq!(escape("a/b c"), "a%2Fb%20c");
        assert_eq!(escape("fd42::1"), "fd42::1");
        assert_eq!(escape("web-1.lab_x~"), "web-1.lab_x~");
        assert_eq!(escape("a\"b"), "a%22b");
        assert_eq!(escape("a&b=c+d"), "a%26b%3Dc%2Bd");
        assert_eq!(escape("zoné"), "zon%C3%A9");
    }
}
