//! Server-side protocol handlers.
//!
//! A [`ProtocolHandler`] turns one inbound HTTP body into one outbound body by
//! delegating each call to an [`Executor`]. The HTTP layer selects a handler
//! with [`ProtocolHandler::can_handle`].

use crate::config::{NetworkConfig, RpcConfig};
use crate::error::ExecutionError;
use crate::executor::Executor;
use crate::middleware::HandlerPanic;
use crate::protocol::{codes, parse_message, Entry, Incoming, RpcRequest, RpcResponse};
use crate::value::SerializableValue;
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use tracing::{debug, error, warn};

/// Raw inbound request as seen by a protocol handler.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl InboundMessage {
    pub fn new(content_type: Option<String>, body: impl Into<Bytes>) -> Self {
        Self {
            content_type,
            body: body.into(),
        }
    }

    /// A message carrying `application/json`.
    pub fn json(body: impl Into<Bytes>) -> Self {
        Self::new(Some(NetworkConfig::CONTENT_TYPE.to_string()), body)
    }
}

/// Wire-ready reply. `body` is `None` when nothing is to be sent back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutboundMessage {
    pub body: Option<String>,
}

/// A wire protocol the server can speak.
#[async_trait]
pub trait ProtocolHandler: Send + Sync {
    fn can_handle(&self, message: &InboundMessage) -> bool;

    async fn process(&self, message: InboundMessage, executor: &dyn Executor) -> OutboundMessage;
}

/// JSON-RPC 2.0 over `application/json`.
#[derive(Debug, Clone)]
pub struct JsonRpcHandler {
    method: String,
}

impl Default for JsonRpcHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonRpcHandler {
    pub fn new() -> Self {
        Self {
            method: RpcConfig::EXECUTE_METHOD.to_string(),
        }
    }

    /// Accept calls under a method name other than `execute`.
    pub fn with_method(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
        }
    }

    /// Compute the response for one request-typed message.
    async fn respond(&self, request: RpcRequest, executor: &dyn Executor) -> RpcResponse {
        let id = request.response_id();

        if request.method != self.method {
            return RpcResponse::error(
                id,
                codes::METHOD_NOT_FOUND,
                format!("Method not found: {}", request.method),
            );
        }

        let call = match CallParams::from_request(request.params) {
            Ok(call) => call,
            Err(message) => return RpcResponse::error(id, codes::INVALID_PARAMS, message),
        };

        debug!("Executing {} (id {})", call.name, id);
        let outcome = AssertUnwindSafe(executor.execute(
            &call.name,
            call.parameters,
            call.constructor_parameters,
        ))
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| {
            Err(ExecutionError::Panicked {
                message: HandlerPanic::from_payload(payload).message,
            })
        });

        match outcome {
            Ok(result) => RpcResponse::success(id, result),
            Err(e) => {
                error!("Call to {} failed: {}", call.name, e);
                RpcResponse::error_with_data(
                    id,
                    e.to_rpc_error_code(),
                    e.to_string(),
                    e.rpc_error_data(),
                )
            }
        }
    }

    async fn respond_batch(&self, entries: Vec<Entry>, executor: &dyn Executor) -> Vec<RpcResponse> {
        let pending = entries.into_iter().filter_map(|entry| match entry {
            Entry::Request(request) => Some(self.respond(request, executor).boxed()),
            Entry::Invalid(response) => Some(futures::future::ready(response).boxed()),
            Entry::Notification(request) => {
                warn!(
                    "Notifications are not yet supported; dropping batch member {}",
                    request.method
                );
                None
            }
        });
        join_all(pending).await
    }
}

#[async_trait]
impl ProtocolHandler for JsonRpcHandler {
    fn can_handle(&self, message: &InboundMessage) -> bool {
        message
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with(NetworkConfig::CONTENT_TYPE))
    }

    async fn process(&self, message: InboundMessage, executor: &dyn Executor) -> OutboundMessage {
        let body = match parse_message(&message.body) {
            Incoming::Invalid(response) => {
                warn!("Rejecting malformed payload: {:?}", response.error);
                serde_json::to_string(&response)
            }
            Incoming::Single(Entry::Invalid(response)) => serde_json::to_string(&response),
            Incoming::Single(Entry::Request(request)) => {
                serde_json::to_string(&self.respond(request, executor).await)
            }
            Incoming::Single(Entry::Notification(request)) => {
                debug!("Ignoring notification for {}", request.method);
                return OutboundMessage::default();
            }
            Incoming::Batch(entries) => {
                debug!("Processing batch of {}", entries.len());
                let responses = self.respond_batch(entries, executor).await;
                if responses.is_empty() {
                    return OutboundMessage::default();
                }
                serde_json::to_string(&responses)
            }
        };

        match body {
            Ok(body) => OutboundMessage { body: Some(body) },
            Err(e) => {
                error!("Failed to serialize response: {}", e);
                let fallback = RpcResponse::error(Value::Null, codes::INTERNAL_ERROR, "Internal error");
                OutboundMessage {
                    body: serde_json::to_string(&fallback).ok(),
                }
            }
        }
    }
}

/// The `params` object of an `execute` call.
struct CallParams {
    name: String,
    parameters: Vec<SerializableValue>,
    constructor_parameters: Option<Vec<SerializableValue>>,
}

impl CallParams {
    fn from_request(params: Option<Value>) -> Result<Self, &'static str> {
        let mut params = match params {
            Some(Value::Object(params)) => params,
            _ => serde_json::Map::new(),
        };

        let name = match params.remove("name") {
            Some(Value::String(name)) if !name.is_empty() => name,
            _ => return Err("Function name must be specified."),
        };
        let parameters = match params.remove("parameters") {
            Some(Value::Array(parameters)) => parameters,
            _ => return Err("Parameters must be an array of serializable values."),
        };
        let constructor_parameters = match params.remove("constructorParameters") {
            None | Some(Value::Null) => None,
            Some(Value::Array(parameters)) => Some(parameters),
            Some(_) => return Err("Constructor parameters must be an array of serializable values."),
        };

        Ok(Self {
            name,
            parameters,
            constructor_parameters,
        })
    }
}
