//! Batching JSON-RPC transport.
//!
//! Calls issued close together are coalesced into one JSON-RPC batch per
//! group and sent over a pluggable [`HttpTransport`]. Each call gets a fresh
//! correlation id; the reply array is demultiplexed back to the waiting callers
//! by that id.
//!
//! # Batch boundary
//!
//! The first call entering an empty group queue starts a timer of
//! `batch_window`. When it fires, the queue is drained in one step and sent.
//! A queue reaching `max_batch_size` is drained immediately, and
//! [`BatchTransport::flush`] drains every queue on demand. Calls enqueued after
//! a drain always wait for the next one, and a drained group is forgotten until
//! its next call.
//!
//! # Failure semantics
//!
//! - A connectivity failure or an unreadable body rejects every call of the
//!   batch with the same error, which carries no JSON-RPC code.
//! - An error object for an id rejects only that call, with the remote code.
//! - An id absent from the reply rejects only that call with
//!   [`CallError::MissingId`].

use crate::client::{Request, RequestHandler, Response};
use crate::config::{NetworkConfig, RpcConfig};
use crate::error::{CallError, ConfigError};
use crate::protocol::{codes, RpcRequest};
use crate::value::SerializableValue;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

/// Sends one request body and returns the raw reply text.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn post(
        &self,
        url: &str,
        body: String,
        headers: &[(String, String)],
    ) -> Result<String, CallError>;
}

/// [`HttpTransport`] backed by reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with the default request timeout.
    pub fn new() -> Result<Self, ConfigError> {
        Self::with_timeout(NetworkConfig::REQUEST_TIMEOUT)
    }

    /// Create a transport with a custom request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| ConfigError::InvalidOption {
                option: "http_client".to_string(),
                message: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post(
        &self,
        url: &str,
        body: String,
        headers: &[(String, String)],
    ) -> Result<String, CallError> {
        let mut request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, NetworkConfig::CONTENT_TYPE)
            .body(body);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request.send().await?;
        Ok(response.text().await?)
    }
}

/// Produces correlation ids.
pub type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Runtime options for a [`BatchTransport`].
#[derive(Clone)]
pub struct TransferOptions {
    /// Endpoint every batch is posted to.
    pub url: String,
    /// Remote method name used by [`TransportMiddleware`].
    pub method: String,
    pub batch_window: Duration,
    /// Dispatch a queue as soon as it holds this many calls.
    pub max_batch_size: Option<usize>,
    /// Extra headers sent with every batch.
    pub headers: Vec<(String, String)>,
    pub id_generator: IdGenerator,
}

impl TransferOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: RpcConfig::EXECUTE_METHOD.to_string(),
            batch_window: RpcConfig::DEFAULT_BATCH_WINDOW,
            max_batch_size: None,
            headers: Vec::new(),
            id_generator: Arc::new(|| uuid::Uuid::new_v4().to_string()),
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_batch_window(mut self, window: Duration) -> Self {
        self.batch_window = window;
        self
    }

    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = Some(size);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_id_generator(mut self, generator: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.id_generator = Arc::new(generator);
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.url).map_err(|e| ConfigError::InvalidUrl {
            url: self.url.clone(),
            message: e.to_string(),
        })?;
        if self.max_batch_size == Some(0) {
            return Err(ConfigError::InvalidOption {
                option: "max_batch_size".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.method.is_empty() {
            return Err(ConfigError::InvalidOption {
                option: "method".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for TransferOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferOptions")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("batch_window", &self.batch_window)
            .field("max_batch_size", &self.max_batch_size)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// A call waiting in a group queue.
struct PendingCall {
    id: String,
    proc_name: String,
    params: SerializableValue,
    reply: oneshot::Sender<Result<SerializableValue, CallError>>,
}

impl PendingCall {
    fn to_rpc(&self) -> RpcRequest {
        RpcRequest::new(self.proc_name.clone(), self.params.clone(), self.id.clone())
    }
}

/// One generation of calls for a group.
struct Queue {
    calls: Vec<PendingCall>,
    /// Unique per generation, so a stale timer never drains a newer one.
    epoch: u64,
}

/// Pending group queues. A group is present only while it has calls.
#[derive(Default)]
struct Queues {
    groups: HashMap<String, Queue>,
    next_epoch: u64,
}

impl Queues {
    fn queue(&mut self, group: &str) -> &mut Queue {
        let next_epoch = &mut self.next_epoch;
        self.groups.entry(group.to_string()).or_insert_with(|| {
            *next_epoch += 1;
            Queue {
                calls: Vec::new(),
                epoch: *next_epoch,
            }
        })
    }

    /// Remove a group's queue, returning its calls.
    fn drain(&mut self, group: &str) -> Vec<PendingCall> {
        self.groups
            .remove(group)
            .map(|queue| queue.calls)
            .unwrap_or_default()
    }

    /// Drain the group only if it is still at `epoch`.
    fn drain_epoch(&mut self, group: &str, epoch: u64) -> Option<Vec<PendingCall>> {
        let current = self
            .groups
            .get(group)
            .is_some_and(|queue| queue.epoch == epoch);
        current.then(|| self.drain(group))
    }

    fn drain_all(&mut self) -> Vec<(String, Vec<PendingCall>)> {
        std::mem::take(&mut self.groups)
            .into_iter()
            .map(|(group, queue)| (group, queue.calls))
            .filter(|(_, calls)| !calls.is_empty())
            .collect()
    }
}

struct Inner {
    options: TransferOptions,
    http: Arc<dyn HttpTransport>,
    queues: Mutex<Queues>,
}

/// Coalesces concurrent calls into JSON-RPC batches, one queue per group.
#[derive(Clone)]
pub struct BatchTransport {
    inner: Arc<Inner>,
}

impl BatchTransport {
    /// Transport posting to `url` over reqwest with default options.
    pub fn new(url: impl Into<String>) -> Result<Self, ConfigError> {
        Self::with_options(TransferOptions::new(url))
    }

    /// Transport with custom options over reqwest.
    pub fn with_options(options: TransferOptions) -> Result<Self, ConfigError> {
        let http = ReqwestTransport::new()?;
        Self::with_http(options, Arc::new(http))
    }

    /// Transport with custom options over a caller-supplied [`HttpTransport`].
    pub fn with_http(
        options: TransferOptions,
        http: Arc<dyn HttpTransport>,
    ) -> Result<Self, ConfigError> {
        options.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                options,
                http,
                queues: Mutex::new(Queues::default()),
            }),
        })
    }

    pub fn options(&self) -> &TransferOptions {
        &self.inner.options
    }

    /// Issue one call and wait for its outcome.
    ///
    /// `group` selects the batch queue; `None` uses the default group.
    pub async fn request(
        &self,
        proc_name: &str,
        params: SerializableValue,
        group: Option<&str>,
    ) -> Result<SerializableValue, CallError> {
        let group = group.unwrap_or(RpcConfig::DEFAULT_GROUP).to_string();
        let id = (self.inner.options.id_generator)();
        let (reply, outcome) = oneshot::channel();

        let full_batch = {
            let mut queues = self.inner.queues.lock().await;
            let queue = queues.queue(&group);
            if queue.calls.iter().any(|call| call.id == id) {
                return Err(CallError::DuplicateId { id, group });
            }

            let starts_generation = queue.calls.is_empty();
            queue.calls.push(PendingCall {
                id,
                proc_name: proc_name.to_string(),
                params,
                reply,
            });

            let limit_reached = self
                .inner
                .options
                .max_batch_size
                .is_some_and(|max| queue.calls.len() >= max);
            let epoch = queue.epoch;
            if limit_reached {
                Some(queues.drain(&group))
            } else {
                if starts_generation {
                    self.schedule_flush(group.clone(), epoch);
                }
                None
            }
        };

        if let Some(calls) = full_batch {
            let inner = Arc::clone(&self.inner);
            let group = group.clone();
            tokio::spawn(async move { inner.dispatch(&group, calls).await });
        }

        outcome.await.map_err(|_| {
            CallError::transport(format!(
                "batch for group {} was dropped before a reply arrived",
                group
            ))
        })?
    }

    /// Drain and send every queue now, waiting until all replies are delivered.
    pub async fn flush(&self) {
        let batches: Vec<(String, Vec<PendingCall>)> = {
            let mut queues = self.inner.queues.lock().await;
            queues.drain_all()
        };

        let dispatches = batches
            .into_iter()
            .map(|(group, calls)| {
                let inner = Arc::clone(&self.inner);
                async move { inner.dispatch(&group, calls).await }
            });
        futures::future::join_all(dispatches).await;
    }

    /// Number of calls waiting for the next drain, across all groups.
    pub async fn pending_count(&self) -> usize {
        let queues = self.inner.queues.lock().await;
        queues.groups.values().map(|queue| queue.calls.len()).sum()
    }

    fn schedule_flush(&self, group: String, epoch: u64) {
        let inner = Arc::clone(&self.inner);
        let window = inner.options.batch_window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let calls = {
                let mut queues = inner.queues.lock().await;
                match queues.drain_epoch(&group, epoch) {
                    Some(calls) => calls,
                    None => return,
                }
            };
            inner.dispatch(&group, calls).await;
        });
    }
}

impl Inner {
    /// Send one drained queue and settle every call in it.
    async fn dispatch(&self, group: &str, calls: Vec<PendingCall>) {
        debug!("Dispatching {} call(s) for group {}", calls.len(), group);

        let encoded = if let [single] = calls.as_slice() {
            serde_json::to_string(&single.to_rpc())
        } else {
            serde_json::to_string(&calls.iter().map(PendingCall::to_rpc).collect::<Vec<_>>())
        };

        let outcome = match encoded {
            Ok(body) => match self
                .http
                .post(&self.options.url, body, &self.options.headers)
                .await
            {
                Ok(text) => Replies::parse(&text),
                Err(e) => Err(e),
            },
            Err(e) => Err(CallError::transport(format!("failed to encode batch: {}", e))),
        };

        match outcome {
            Ok(mut replies) => {
                for call in calls {
                    let result = replies.take(&call.id);
                    let _ = call.reply.send(result);
                }
                replies.report_unmatched(group);
            }
            Err(error) => {
                warn!("Batch for group {} failed: {}", group, error);
                for call in calls {
                    let _ = call.reply.send(Err(error.clone()));
                }
            }
        }
    }
}

/// Reply entries indexed by correlation id.
#[derive(Debug, Default)]
struct Replies {
    results: HashMap<String, SerializableValue>,
    errors: HashMap<String, CallError>,
}

impl Replies {
    /// Parse a reply body: one response object or an array of them.
    fn parse(text: &str) -> Result<Self, CallError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| CallError::InvalidResponse {
                message: format!("reply is not JSON: {}", e),
            })?;

        let entries = match value {
            Value::Array(entries) => entries,
            entry @ Value::Object(_) => vec![entry],
            other => {
                return Err(CallError::InvalidResponse {
                    message: format!("expected a response object or array, got {}", other),
                });
            }
        };

        let mut replies = Self::default();
        for entry in entries {
            let Value::Object(mut entry) = entry else {
                warn!("Ignoring non-object reply entry: {}", entry);
                continue;
            };
            let id = match entry.get("id") {
                Some(Value::String(id)) => id.clone(),
                Some(Value::Number(id)) => id.to_string(),
                _ => {
                    let entry = Value::Object(entry);
                    warn!("Reply entry without a usable id: {}", entry);
                    continue;
                }
            };

            if let Some(error) = entry.remove("error").filter(|error| !error.is_null()) {
                replies.errors.insert(id, rpc_error(error));
            } else if let Some(result) = entry.remove("result") {
                replies.results.insert(id, result);
            } else {
                warn!("Reply entry {} has neither result nor error", id);
            }
        }
        Ok(replies)
    }

    /// Outcome for one id; an error entry wins over a result entry.
    fn take(&mut self, id: &str) -> Result<SerializableValue, CallError> {
        if let Some(error) = self.errors.remove(id) {
            return Err(error);
        }
        self.results
            .remove(id)
            .ok_or_else(|| CallError::MissingId { id: id.to_string() })
    }

    fn report_unmatched(&self, group: &str) {
        for id in self.results.keys().chain(self.errors.keys()) {
            warn!("Reply for group {} carries unknown id {}", group, id);
        }
    }
}

/// Error objects without a numeric code report an internal error.
fn rpc_error(error: Value) -> CallError {
    let code = error
        .get("code")
        .and_then(Value::as_i64)
        .unwrap_or(codes::INTERNAL_ERROR);
    let message = match error.get("message").and_then(Value::as_str) {
        Some(message) => message.to_string(),
        None => error.to_string(),
    };
    CallError::Rpc {
        code,
        message,
        data: error.get("data").cloned(),
    }
}

/// Client middleware that performs the remote call through a [`BatchTransport`].
#[derive(Clone)]
pub struct TransportMiddleware {
    transport: BatchTransport,
}

impl TransportMiddleware {
    pub fn new(transport: BatchTransport) -> Self {
        Self { transport }
    }

    fn params(request: &Request) -> SerializableValue {
        let mut params = Map::new();
        params.insert("name".to_string(), Value::String(request.name.clone()));
        params.insert(
            "parameters".to_string(),
            Value::Array(request.parameters.clone()),
        );
        if let Some(constructor_parameters) = &request.constructor_parameters {
            params.insert(
                "constructorParameters".to_string(),
                Value::Array(constructor_parameters.clone()),
            );
        }
        Value::Object(params)
    }
}

#[async_trait]
impl RequestHandler for TransportMiddleware {
    async fn handle(&self, request: &Request, response: &mut Response) -> Result<(), CallError> {
        response.result = self
            .transport
            .request(
                &self.transport.options().method,
                Self::params(request),
                request.group.as_deref(),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;

    type Responder = Box<dyn Fn(&Value) -> Result<String, CallError> + Send + Sync>;

    /// Records every outbound body and answers with `responder`.
    struct MockHttp {
        bodies: StdMutex<Vec<Value>>,
        responder: Responder,
    }

    impl MockHttp {
        fn new(responder: impl Fn(&Value) -> Result<String, CallError> + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                bodies: StdMutex::new(Vec::new()),
                responder: Box::new(responder),
            })
        }

        fn bodies(&self) -> Vec<Value> {
            self.bodies.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpTransport for MockHttp {
        async fn post(
            &self,
            _url: &str,
            body: String,
            _headers: &[(String, String)],
        ) -> Result<String, CallError> {
            let body: Value = serde_json::from_str(&body).unwrap();
            self.bodies.lock().unwrap().push(body.clone());
            (self.responder)(&body)
        }
    }

    /// Evaluates `add`/`mul` members and replies in reverse order.
    fn calculator(body: &Value) -> Result<String, CallError> {
        let members = match body {
            Value::Array(members) => members.clone(),
            single => vec![single.clone()],
        };
        let mut replies: Vec<Value> = members
            .iter()
            .map(|member| {
                let args = member["params"]["parameters"].as_array().cloned().unwrap_or_default();
                let a = args.first().and_then(Value::as_i64).unwrap_or(0);
                let b = args.get(1).and_then(Value::as_i64).unwrap_or(0);
                let result = match member["params"]["name"].as_str() {
                    Some("add") => a + b,
                    Some("mul") => a * b,
                    _ => {
                        return json!({"jsonrpc": "2.0", "id": member["id"],
                            "error": {"code": -32603, "message": "unknown"}})
                    }
                };
                json!({"jsonrpc": "2.0", "id": member["id"], "result": result})
            })
            .collect();
        replies.reverse();
        Ok(Value::Array(replies).to_string())
    }

    fn counting_ids() -> impl Fn() -> String + Send + Sync + 'static {
        let next = AtomicU64::new(1);
        move || next.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn transport(http: Arc<MockHttp>) -> BatchTransport {
        let options = TransferOptions::new("http://127.0.0.1:1/rpc")
            .with_batch_window(Duration::from_millis(10))
            .with_id_generator(counting_ids());
        BatchTransport::with_http(options, http).unwrap()
    }

    fn call(name: &str, a: i64, b: i64) -> Value {
        json!({"name": name, "parameters": [a, b]})
    }

    #[tokio::test]
    async fn test_single_call_is_sent_as_plain_request() {
        let http = MockHttp::new(|_| Ok(json!([{"jsonrpc": "2.0", "result": "1", "id": "1"}]).to_string()));
        let transport = transport(http.clone());

        let result = transport.request("a", json!({"name": "b"}), None).await;
        assert_eq!(result, Ok(json!("1")));

        let bodies = http.bodies();
        assert_eq!(bodies.len(), 1);
        assert_eq!(
            bodies[0],
            json!({"jsonrpc": "2.0", "method": "a", "params": {"name": "b"}, "id": "1"})
        );
    }

    #[tokio::test]
    async fn test_single_object_reply_is_accepted() {
        let http = MockHttp::new(|_| Ok(json!({"jsonrpc": "2.0", "result": 10, "id": "1"}).to_string()));
        let transport = transport(http);
        assert_eq!(transport.request("a", json!({}), None).await, Ok(json!(10)));
    }

    #[tokio::test]
    async fn test_concurrent_calls_share_one_batch() {
        let http = MockHttp::new(calculator);
        let transport = transport(http.clone());

        let (r1, r2) = tokio::join!(
            transport.request("execute", call("add", 1, 2), None),
            transport.request("execute", call("mul", 5, 2), None),
        );
        assert_eq!(r1, Ok(json!(3)));
        assert_eq!(r2, Ok(json!(10)));

        let bodies = http.bodies();
        assert_eq!(bodies.len(), 1);
        let members = bodies[0].as_array().unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0]["id"], json!("1"));
        assert_eq!(members[1]["id"], json!("2"));
    }

    #[tokio::test]
    async fn test_groups_are_sent_separately() {
        let http = MockHttp::new(calculator);
        let transport = transport(http.clone());

        let (r1, r2) = tokio::join!(
            transport.request("execute", call("add", 1, 2), None),
            transport.request("execute", call("add", 5, 5), Some("post")),
        );
        assert_eq!(r1, Ok(json!(3)));
        assert_eq!(r2, Ok(json!(10)));
        assert_eq!(http.bodies().len(), 2);
        assert!(transport.inner.queues.lock().await.groups.is_empty());
    }

    #[tokio::test]
    async fn test_drained_groups_are_forgotten() {
        let http = MockHttp::new(calculator);
        let transport = transport(http);

        for group in ["a", "b", "c"] {
            let result = transport
                .request("execute", call("add", 1, 1), Some(group))
                .await;
            assert_eq!(result, Ok(json!(2)));
        }
        assert!(transport.inner.queues.lock().await.groups.is_empty());
    }

    #[tokio::test]
    async fn test_function_error_carries_code() {
        let http = MockHttp::new(|_| {
            Ok(json!([{"jsonrpc": "2.0", "error": {"code": 409, "message": "Conflict"}, "id": "1"}])
                .to_string())
        });
        let transport = transport(http);
        let err = transport.request("a", json!({}), None).await.unwrap_err();
        assert_eq!(err.to_string(), "Conflict");
        assert_eq!(err.code(), Some(409));
    }

    #[tokio::test]
    async fn test_transport_error_rejects_every_call() {
        let http = MockHttp::new(|_| Err(CallError::transport("Transport error")));
        let transport = transport(http);
        let (r1, r2) = tokio::join!(
            transport.request("a", json!({}), None),
            transport.request("b", json!({}), None),
        );
        for result in [r1, r2] {
            let err = result.unwrap_err();
            assert!(err.is_transport());
            assert_eq!(err.code(), None);
            assert!(err.to_string().contains("Transport"));
        }
    }

    #[tokio::test]
    async fn test_invalid_body_rejects() {
        let http = MockHttp::new(|_| Ok("x".to_string()));
        let transport = transport(http);
        let err = transport.request("a", json!({}), None).await.unwrap_err();
        assert!(matches!(err, CallError::InvalidResponse { .. }));
        assert_eq!(err.code(), None);
    }

    #[tokio::test]
    async fn test_missing_id_rejects_only_that_call() {
        let http = MockHttp::new(|_| {
            Ok(json!([
                {"jsonrpc": "2.0", "id": null},
                {"jsonrpc": "2.0", "result": 7, "id": "2"},
            ])
            .to_string())
        });
        let transport = transport(http);
        let (r1, r2) = tokio::join!(
            transport.request("a", json!({}), None),
            transport.request("b", json!({}), None),
        );
        assert_eq!(r1, Err(CallError::MissingId { id: "1".to_string() }));
        assert_eq!(r2, Ok(json!(7)));
    }

    #[tokio::test]
    async fn test_error_entry_wins_over_result_entry() {
        let http = MockHttp::new(|_| {
            Ok(json!([
                {"jsonrpc": "2.0", "result": 1, "id": "1"},
                {"jsonrpc": "2.0", "error": {"code": -32603, "message": "late failure"}, "id": "1"},
            ])
            .to_string())
        });
        let transport = transport(http);
        let err = transport.request("a", json!({}), None).await.unwrap_err();
        assert_eq!(err.to_string(), "late failure");
    }

    #[tokio::test]
    async fn test_null_error_member_is_ignored() {
        let http = MockHttp::new(|_| {
            Ok(json!([{"jsonrpc": "2.0", "result": 5, "error": null, "id": "1"}]).to_string())
        });
        let transport = transport(http);
        assert_eq!(transport.request("a", json!({}), None).await, Ok(json!(5)));
    }

    #[tokio::test]
    async fn test_error_without_code_is_internal_error() {
        let http = MockHttp::new(|_| {
            Ok(json!([{"jsonrpc": "2.0", "error": {"message": "x"}, "id": "1"}]).to_string())
        });
        let transport = transport(http);
        let err = transport.request("a", json!({}), None).await.unwrap_err();
        assert_eq!(err.code(), Some(-32603));
        assert_eq!(err.to_string(), "x");
    }

    #[tokio::test]
    async fn test_numeric_reply_ids_match() {
        let http = MockHttp::new(|_| Ok(json!([{"jsonrpc": "2.0", "result": true, "id": 1}]).to_string()));
        let transport = transport(http);
        assert_eq!(transport.request("a", json!({}), None).await, Ok(json!(true)));
    }

    #[tokio::test]
    async fn test_max_batch_size_splits_batches() {
        let http = MockHttp::new(calculator);
        let options = TransferOptions::new("http://127.0.0.1:1/rpc")
            .with_batch_window(Duration::from_millis(10))
            .with_max_batch_size(2)
            .with_id_generator(counting_ids());
        let transport = BatchTransport::with_http(options, http.clone()).unwrap();

        let (r1, r2, r3) = tokio::join!(
            transport.request("execute", call("add", 1, 1), None),
            transport.request("execute", call("add", 2, 2), None),
            transport.request("execute", call("add", 3, 3), None),
        );
        assert_eq!(r1, Ok(json!(2)));
        assert_eq!(r2, Ok(json!(4)));
        assert_eq!(r3, Ok(json!(6)));

        let bodies = http.bodies();
        assert_eq!(bodies.len(), 2);
        assert_eq!(bodies[0].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn test_explicit_flush_sends_without_waiting_for_window() {
        let http = MockHttp::new(calculator);
        let options = TransferOptions::new("http://127.0.0.1:1/rpc")
            .with_batch_window(Duration::from_secs(3600))
            .with_id_generator(counting_ids());
        let transport = BatchTransport::with_http(options, http.clone()).unwrap();

        let pending = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.request("execute", call("mul", 6, 7), None).await })
        };
        while transport.pending_count().await == 0 {
            tokio::task::yield_now().await;
        }

        transport.flush().await;
        assert_eq!(pending.await.unwrap(), Ok(json!(42)));
        assert_eq!(transport.pending_count().await, 0);
        assert_eq!(http.bodies().len(), 1);
    }

    /// Holds each post until released, so a test can act while a batch is in flight.
    struct GatedHttp {
        inner: Arc<MockHttp>,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl HttpTransport for GatedHttp {
        async fn post(
            &self,
            url: &str,
            body: String,
            headers: &[(String, String)],
        ) -> Result<String, CallError> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.post(url, body, headers).await
        }
    }

    #[tokio::test]
    async fn test_call_enqueued_during_flush_waits_for_next_drain() {
        let http = MockHttp::new(calculator);
        let gated = Arc::new(GatedHttp {
            inner: http.clone(),
            entered: Notify::new(),
            release: Notify::new(),
        });
        let options = TransferOptions::new("http://127.0.0.1:1/rpc")
            .with_batch_window(Duration::from_secs(3600))
            .with_id_generator(counting_ids());
        let transport = BatchTransport::with_http(options, gated.clone()).unwrap();

        let first = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.request("execute", call("add", 1, 2), None).await })
        };
        while transport.pending_count().await == 0 {
            tokio::task::yield_now().await;
        }

        let flushing = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.flush().await })
        };
        gated.entered.notified().await;

        let second = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.request("execute", call("add", 3, 4), None).await })
        };
        while transport.pending_count().await == 0 {
            tokio::task::yield_now().await;
        }

        gated.release.notify_one();
        flushing.await.unwrap();
        assert_eq!(first.await.unwrap(), Ok(json!(3)));
        assert_eq!(transport.pending_count().await, 1);

        let bodies = http.bodies();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["id"], json!("1"));

        gated.release.notify_one();
        transport.flush().await;
        assert_eq!(second.await.unwrap(), Ok(json!(7)));

        let bodies = http.bodies();
        assert_eq!(bodies.len(), 2);
        assert_eq!(bodies[1]["id"], json!("2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_timer_leaves_next_generation_alone() {
        let http = MockHttp::new(calculator);
        let options = TransferOptions::new("http://127.0.0.1:1/rpc")
            .with_batch_window(Duration::from_millis(50))
            .with_max_batch_size(2)
            .with_id_generator(counting_ids());
        let transport = BatchTransport::with_http(options, http.clone()).unwrap();

        let (r1, r2) = tokio::join!(
            transport.request("execute", call("add", 1, 1), None),
            transport.request("execute", call("add", 2, 2), None),
        );
        assert_eq!(r1, Ok(json!(2)));
        assert_eq!(r2, Ok(json!(4)));

        tokio::time::sleep(Duration::from_millis(30)).await;
        let third = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.request("execute", call("add", 3, 3), None).await })
        };

        // The first generation's timer fires at 50ms; the third call's at 80ms.
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(http.bodies().len(), 1);
        assert_eq!(transport.pending_count().await, 1);

        assert_eq!(third.await.unwrap(), Ok(json!(6)));
        assert_eq!(http.bodies().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_ids_are_rejected() {
        let http = MockHttp::new(calculator);
        let options = TransferOptions::new("http://127.0.0.1:1/rpc")
            .with_batch_window(Duration::from_millis(10))
            .with_id_generator(|| "same".to_string());
        let transport = BatchTransport::with_http(options, http).unwrap();

        let (r1, r2) = tokio::join!(
            transport.request("execute", call("add", 1, 2), None),
            transport.request("execute", call("add", 3, 4), None),
        );
        assert_eq!(r1, Ok(json!(3)));
        assert!(matches!(r2, Err(CallError::DuplicateId { .. })));
    }

    #[test]
    fn test_invalid_options_are_rejected() {
        let http: Arc<dyn HttpTransport> = MockHttp::new(calculator);
        assert!(matches!(
            BatchTransport::with_http(TransferOptions::new("/rpc"), http.clone()),
            Err(ConfigError::InvalidUrl { .. })
        ));
        assert!(matches!(
            BatchTransport::with_http(
                TransferOptions::new("http://localhost/rpc").with_max_batch_size(0),
                http
            ),
            Err(ConfigError::InvalidOption { .. })
        ));
    }

    #[tokio::test]
    async fn test_middleware_sends_execute_params() {
        let http = MockHttp::new(|body| {
            Ok(json!({"jsonrpc": "2.0", "id": body["id"], "result": body["params"]}).to_string())
        });
        let client = Client::new();
        client.use_handler(TransportMiddleware::new(transport(http.clone())));

        let echoed = client
            .execute_request(
                Request::new("A.m1", vec![json!("a1")]).with_constructor_parameters(vec![json!("c1")]),
            )
            .await
            .unwrap();
        assert_eq!(
            echoed,
            json!({"name": "A.m1", "parameters": ["a1"], "constructorParameters": ["c1"]})
        );
        assert_eq!(http.bodies()[0]["method"], json!("execute"));

        let echoed = client.execute("f1", vec![]).await.unwrap();
        assert_eq!(echoed, json!({"name": "f1", "parameters": []}));
    }

    #[tokio::test]
    async fn test_middleware_surfaces_remote_errors() {
        let http = MockHttp::new(|body| {
            Ok(json!({"jsonrpc": "2.0", "id": body["id"],
                "error": {"code": 409, "message": "Conflict"}})
            .to_string())
        });
        let client = Client::new();
        client.use_handler(TransportMiddleware::new(transport(http)));
        let err = client.execute("a", vec![]).await.unwrap_err();
        assert_eq!(err.code(), Some(409));
        assert_eq!(err.to_string(), "Conflict");
    }
}
