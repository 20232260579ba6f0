//! Callwire - transport-agnostic remote call pipeline.
//!
//! The client side runs each call through a [`Client`]'s middleware chain.
//! One middleware entry, [`TransportMiddleware`], hands the call to a
//! [`BatchTransport`] that coalesces concurrent calls into JSON-RPC batches.
//! The server side classifies inbound payloads with a [`JsonRpcHandler`] and
//! invokes registered callables through a [`CallableExecutor`].
//!
//! The HTTP server itself lives in the `callwire-rpc` crate.
//!
//! # Example
//!
//! ```rust,ignore
//! use callwire::{BatchTransport, Client, TransportMiddleware};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = Client::new();
//!     client.use_handler(TransportMiddleware::new(BatchTransport::new(
//!         "http://127.0.0.1:8080/rpc",
//!     )?));
//!
//!     // Both calls travel in one batch
//!     let (sum, product) = tokio::join!(
//!         client.execute("add", vec![json!(1), json!(2)]),
//!         client.execute("mul", vec![json!(5), json!(2)]),
//!     );
//!     println!("{} {}", sum?, product?);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod handler;
pub mod middleware;
pub mod protocol;
pub mod transport;
pub mod value;

// Re-export commonly used types
pub use client::{Client, ClientHandler, ErrorRequestHandler, Request, RequestHandler, Response};
pub use error::{CallError, ConfigError, ExecutionError};
pub use executor::{
    CallableExecutor, Class, ConstructFactory, Executor, ExecutorBuilder, InstanceFactory, Module,
};
pub use handler::{InboundMessage, JsonRpcHandler, OutboundMessage, ProtocolHandler};
pub use middleware::{ErrorHandler, Handler, Middleware};
pub use transport::{BatchTransport, HttpTransport, ReqwestTransport, TransferOptions, TransportMiddleware};
pub use value::SerializableValue;
