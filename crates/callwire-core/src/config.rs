//! Centralized configuration for the call pipeline.
//!
//! Constants shared by the client transport, the protocol handler and the
//! HTTP server binary.

use std::time::Duration;

/// Protocol-level configuration.
pub struct RpcConfig;

impl RpcConfig {
    pub const JSONRPC_VERSION: &'static str = "2.0";
    /// Remote method every call is funnelled through.
    pub const EXECUTE_METHOD: &'static str = "execute";
    /// Batch queue used by calls that do not name a group.
    pub const DEFAULT_GROUP: &'static str = "default";
    /// How long a queue collects calls before it is flushed.
    pub const DEFAULT_BATCH_WINDOW: Duration = Duration::from_millis(2);
}

/// Network-related configuration for the client transport.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
    pub const USER_AGENT: &'static str = "callwire/0.3";
    pub const CONTENT_TYPE: &'static str = "application/json";
}

/// HTTP server configuration.
pub struct ServerConfig;

impl ServerConfig {
    pub const DEFAULT_HOST: &'static str = "127.0.0.1";
    pub const RPC_PATH: &'static str = "/rpc";
    pub const HEALTH_PATH: &'static str = "/health";
    pub const MAX_BODY_BYTES: usize = 4 * 1024 * 1024; // 4MB
    pub const MAX_CONCURRENT_REQUESTS: usize = 256;
}
