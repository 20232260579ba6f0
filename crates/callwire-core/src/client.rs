//! Call client: the entry point generated stubs call into.
//!
//! A [`Client`] owns one middleware chain over a [`Request`]/[`Response`] pair.
//! One of the registered handlers (normally [`crate::TransportMiddleware`])
//! performs the remote call and stores the result in the response.
//!
//! # Example
//!
//! ```rust,ignore
//! use callwire::{BatchTransport, Client, TransportMiddleware};
//! use serde_json::json;
//!
//! let client = Client::new();
//! let transport = BatchTransport::new("http://127.0.0.1:8080/rpc")?;
//! client.use_handler(TransportMiddleware::new(transport));
//!
//! let sum = client.execute("add", vec![json!(1), json!(2)]).await?;
//! ```

use crate::error::CallError;
use crate::middleware::{ErrorHandler, Handler, Middleware};
use crate::value::SerializableValue;
use async_trait::async_trait;
use std::sync::{Arc, LazyLock};
use tracing::debug;

/// A single remote call as issued by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Function name, or `ClassName.methodName`.
    pub name: String,
    pub parameters: Vec<SerializableValue>,
    pub constructor_parameters: Option<Vec<SerializableValue>>,
    /// Batch queue the call is coalesced into.
    pub group: Option<String>,
}

impl Request {
    pub fn new(name: impl Into<String>, parameters: Vec<SerializableValue>) -> Self {
        Self {
            name: name.into(),
            parameters,
            constructor_parameters: None,
            group: None,
        }
    }

    pub fn with_constructor_parameters(mut self, parameters: Vec<SerializableValue>) -> Self {
        self.constructor_parameters = Some(parameters);
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }
}

/// Result slot filled in by middleware.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    pub result: SerializableValue,
}

/// The arguments one chain run operates on.
#[derive(Debug)]
pub struct Exchange {
    pub request: Request,
    pub response: Response,
}

/// Normal client middleware.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: &Request, response: &mut Response) -> Result<(), CallError>;
}

/// Client middleware that only runs once a previous handler failed.
#[async_trait]
pub trait ErrorRequestHandler: Send + Sync {
    async fn handle(
        &self,
        error: CallError,
        request: &Request,
        response: &mut Response,
    ) -> Result<(), CallError>;
}

/// A client handler tagged with its kind.
#[derive(Clone)]
pub enum ClientHandler {
    Normal(Arc<dyn RequestHandler>),
    Error(Arc<dyn ErrorRequestHandler>),
}

impl ClientHandler {
    pub fn normal(handler: impl RequestHandler + 'static) -> Self {
        ClientHandler::Normal(Arc::new(handler))
    }

    pub fn error(handler: impl ErrorRequestHandler + 'static) -> Self {
        ClientHandler::Error(Arc::new(handler))
    }
}

struct NormalAdapter(Arc<dyn RequestHandler>);

#[async_trait]
impl Handler<Exchange, CallError> for NormalAdapter {
    async fn handle(&self, exchange: &mut Exchange) -> Result<(), CallError> {
        self.0
            .handle(&exchange.request, &mut exchange.response)
            .await
    }
}

struct ErrorAdapter(Arc<dyn ErrorRequestHandler>);

#[async_trait]
impl ErrorHandler<Exchange, CallError> for ErrorAdapter {
    async fn handle(&self, error: CallError, exchange: &mut Exchange) -> Result<(), CallError> {
        self.0
            .handle(error, &exchange.request, &mut exchange.response)
            .await
    }
}

static DEFAULT_CLIENT: LazyLock<Client> = LazyLock::new(Client::new);

/// Public entry point wrapping one middleware chain.
#[derive(Default)]
pub struct Client {
    middleware: Middleware<Exchange, CallError>,
}

impl Client {
    /// Create a client with an empty chain.
    pub fn new() -> Self {
        Self {
            middleware: Middleware::new(),
        }
    }

    /// Process-wide default client, created on first use and never torn down.
    pub fn global() -> &'static Client {
        &DEFAULT_CLIENT
    }

    /// Register handlers in order.
    pub fn use_handlers(&self, handlers: impl IntoIterator<Item = ClientHandler>) {
        for handler in handlers {
            match handler {
                ClientHandler::Normal(h) => self.middleware.use_handler(NormalAdapter(h)),
                ClientHandler::Error(h) => self.middleware.use_error_handler(ErrorAdapter(h)),
            }
        }
    }

    /// Register a normal handler.
    pub fn use_handler(&self, handler: impl RequestHandler + 'static) {
        self.use_handlers([ClientHandler::normal(handler)]);
    }

    /// Register an error handler.
    pub fn use_error_handler(&self, handler: impl ErrorRequestHandler + 'static) {
        self.use_handlers([ClientHandler::error(handler)]);
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.middleware.len()
    }

    /// Call `name` with positional `parameters`.
    pub async fn execute(
        &self,
        name: impl Into<String>,
        parameters: Vec<SerializableValue>,
    ) -> Result<SerializableValue, CallError> {
        self.execute_request(Request::new(name, parameters)).await
    }

    /// Run a fully specified request through the chain.
    ///
    /// Resolves with the response's result, or the error still pending after
    /// the last handler.
    pub async fn execute_request(&self, request: Request) -> Result<SerializableValue, CallError> {
        debug!("Executing {}", request.name);
        let mut exchange = Exchange {
            request,
            response: Response::default(),
        };
        self.middleware.run(&mut exchange).await?;
        Ok(exchange.response.result)
    }
}
