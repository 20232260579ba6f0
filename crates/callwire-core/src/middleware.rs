//! Ordered handler chain with separate normal and error handlers.
//!
//! A chain run walks the registered handlers head-first against one shared,
//! mutable argument value. While no error is pending only normal handlers run;
//! once a handler fails only error handlers run, and each of them may clear the
//! error (`Ok(())`) or pass on the same or a replacement error (`Err(e)`).
//! A handler that panics is treated exactly like one that returned an error.
//!
//! Handlers are registered with an explicit kind ([`Middleware::use_handler`]
//! or [`Middleware::use_error_handler`]) and are never removed or reordered.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::trace;

/// Handler that runs while no error is pending.
#[async_trait]
pub trait Handler<A, E>: Send + Sync {
    /// Returning `Err` switches the chain into error mode.
    async fn handle(&self, args: &mut A) -> Result<(), E>;
}

/// Handler that runs only while an error is pending.
#[async_trait]
pub trait ErrorHandler<A, E>: Send + Sync {
    /// Returning `Ok(())` clears the error; returning `Err` keeps the chain in error mode.
    async fn handle(&self, error: E, args: &mut A) -> Result<(), E>;
}

/// Panic captured while running a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerPanic {
    pub message: String,
}

impl HandlerPanic {
    /// Extract a readable message from a panic payload.
    pub fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self { message }
    }
}

/// Adapter turning a synchronous closure into a [`Handler`].
pub struct FnHandler<F>(F);

/// Wrap a synchronous closure as a normal handler.
pub fn handler_fn<A, E, F>(f: F) -> FnHandler<F>
where
    F: Fn(&mut A) -> Result<(), E> + Send + Sync,
{
    FnHandler(f)
}

#[async_trait]
impl<A, E, F> Handler<A, E> for FnHandler<F>
where
    A: Send + 'static,
    E: Send + 'static,
    F: Fn(&mut A) -> Result<(), E> + Send + Sync,
{
    async fn handle(&self, args: &mut A) -> Result<(), E> {
        (self.0)(args)
    }
}

/// Adapter turning a synchronous closure into an [`ErrorHandler`].
pub struct FnErrorHandler<F>(F);

/// Wrap a synchronous closure as an error handler.
pub fn error_handler_fn<A, E, F>(f: F) -> FnErrorHandler<F>
where
    F: Fn(E, &mut A) -> Result<(), E> + Send + Sync,
{
    FnErrorHandler(f)
}

#[async_trait]
impl<A, E, F> ErrorHandler<A, E> for FnErrorHandler<F>
where
    A: Send + 'static,
    E: Send + 'static,
    F: Fn(E, &mut A) -> Result<(), E> + Send + Sync,
{
    async fn handle(&self, error: E, args: &mut A) -> Result<(), E> {
        (self.0)(error, args)
    }
}

/// A handler tagged with its kind.
enum Registered<A, E> {
    Normal(Arc<dyn Handler<A, E>>),
    Error(Arc<dyn ErrorHandler<A, E>>),
}

impl<A, E> Clone for Registered<A, E> {
    fn clone(&self) -> Self {
        match self {
            Registered::Normal(h) => Registered::Normal(Arc::clone(h)),
            Registered::Error(h) => Registered::Error(Arc::clone(h)),
        }
    }
}

/// Ordered chain of handlers over an argument value `A` with error type `E`.
pub struct Middleware<A, E> {
    handlers: RwLock<Vec<Registered<A, E>>>,
}

impl<A, E> Default for Middleware<A, E>
where
    A: Send + 'static,
    E: Send + From<HandlerPanic> + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<A, E> Middleware<A, E>
where
    A: Send + 'static,
    E: Send + From<HandlerPanic> + 'static,
{
    /// Create an empty chain.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Append a normal handler.
    pub fn use_handler(&self, handler: impl Handler<A, E> + 'static) {
        self.push(Registered::Normal(Arc::new(handler)));
    }

    /// Append an error handler.
    pub fn use_error_handler(&self, handler: impl ErrorHandler<A, E> + 'static) {
        self.push(Registered::Error(Arc::new(handler)));
    }

    /// Number of registered handlers of both kinds.
    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no handler has been registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, entry: Registered<A, E>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    /// Run the chain to completion against `args`.
    ///
    /// Returns the error still pending once every handler has been visited.
    /// Handlers registered while a run is in progress are not seen by that run.
    pub async fn run(&self, args: &mut A) -> Result<(), E> {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut pending: Option<E> = None;
        for (position, entry) in handlers.iter().enumerate() {
            pending = match (entry, pending) {
                (Registered::Normal(handler), None) => guard(handler.handle(args)).await.err(),
                (Registered::Error(handler), Some(error)) => {
                    guard(handler.handle(error, args)).await.err()
                }
                (_, pending) => {
                    trace!(
                        "Skipping handler {} (error pending: {})",
                        position,
                        pending.is_some()
                    );
                    pending
                }
            };
        }

        match pending {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Await a handler future, converting a panic into an error.
async fn guard<E>(future: BoxFuture<'_, Result<(), E>>) -> Result<(), E>
where
    E: From<HandlerPanic>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => Err(HandlerPanic::from_payload(payload).into()),
    }
}
