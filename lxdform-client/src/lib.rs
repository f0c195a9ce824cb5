//! lxdform-client: REST client for LXD/Incus daemons.
//!
//! - [`api`]: objects exchanged with the daemon
//! - [`transport`]: unix socket and HTTPS transports, and the [`Connector`] opening them
//! - [`server`]: typed calls returning objects together with their ETag
//! - [`simplestreams`]: read-only image servers
//! - [`cert`]: PEM handling and certificate fingerprints
//! - [`tls`]: rustls configuration with fingerprint pinning

pub mod api;
pub mod cert;
pub mod error;
pub mod server;
pub mod simplestreams;
pub mod tls;
pub mod transport;

#[cfg(feature = "test-util")]
pub mod test_util;

pub use error::{ClientError, Result};
pub use server::{DEFAULT_OPERATION_TIMEOUT, InstanceServer};
pub use simplestreams::SimpleStreamsServer;
pub use transport::{
    Connector, DaemonConnector, Endpoint, HttpsTransport, Method, Request, TlsConfig, Transport,
    UnixTransport,
};
