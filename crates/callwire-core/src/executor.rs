//! Server-side callable resolution and invocation.
//!
//! Callables are registered up front through an [`ExecutorBuilder`], grouped
//! by the module they came from. Each entry is either a plain function or a
//! method of a registered [`Class`]. Names are resolved once into an immutable
//! [`CallableMap`] keyed by `name` or `Class.method`.
//!
//! ```rust,ignore
//! use callwire::executor::{Class, ExecutorBuilder, Module};
//! use callwire::value::param;
//!
//! let executor = ExecutorBuilder::new()
//!     .module(
//!         Module::new("services/math.rs")
//!             .sync_function("add", |args| Ok(param::<i64>(&args, 0)? + param::<i64>(&args, 1)?)),
//!     )
//!     .build()?;
//! ```

use crate::error::{ConfigError, ExecutionError};
use crate::middleware::HandlerPanic;
use crate::value::{to_value, SerializableValue};
use async_trait::async_trait;
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::debug;

/// A constructed class instance.
pub type Instance = Arc<dyn Any + Send + Sync>;

type CallFuture = BoxFuture<'static, Result<SerializableValue, ExecutionError>>;
type FunctionFn = Arc<dyn Fn(Vec<SerializableValue>) -> CallFuture + Send + Sync>;
type MethodFn = Arc<dyn Fn(Instance, Vec<SerializableValue>) -> CallFuture + Send + Sync>;
type ConstructorFn =
    Arc<dyn Fn(Vec<SerializableValue>) -> Result<Instance, ExecutionError> + Send + Sync>;

/// Resolves a call name and invokes it.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        name: &str,
        parameters: Vec<SerializableValue>,
        constructor_parameters: Option<Vec<SerializableValue>>,
    ) -> Result<SerializableValue, ExecutionError>;
}

/// Ordinary construction for one registered class.
pub struct Constructor {
    class: String,
    construct: ConstructorFn,
}

impl Constructor {
    pub fn class_name(&self) -> &str {
        &self.class
    }

    /// Build a new instance from constructor parameters.
    pub fn construct(&self, parameters: Vec<SerializableValue>) -> Result<Instance, ExecutionError> {
        (self.construct)(parameters)
    }
}

impl std::fmt::Debug for Constructor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Constructor").field("class", &self.class).finish()
    }
}

/// Produces the instance a method call runs against.
///
/// Returning `Ok(None)` rejects the call with
/// [`ExecutionError::InstanceUnavailable`].
pub trait InstanceFactory: Send + Sync {
    fn create(
        &self,
        constructor: &Constructor,
        parameters: Vec<SerializableValue>,
    ) -> Result<Option<Instance>, ExecutionError>;
}

impl<F> InstanceFactory for F
where
    F: Fn(&Constructor, Vec<SerializableValue>) -> Result<Option<Instance>, ExecutionError>
        + Send
        + Sync,
{
    fn create(
        &self,
        constructor: &Constructor,
        parameters: Vec<SerializableValue>,
    ) -> Result<Option<Instance>, ExecutionError> {
        self(constructor, parameters)
    }
}

/// Default factory: a fresh instance per call.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConstructFactory;

impl InstanceFactory for ConstructFactory {
    fn create(
        &self,
        constructor: &Constructor,
        parameters: Vec<SerializableValue>,
    ) -> Result<Option<Instance>, ExecutionError> {
        constructor.construct(parameters).map(Some)
    }
}

/// What a callable name resolves to.
#[derive(Clone)]
pub enum Target {
    Function(FunctionFn),
    Method {
        constructor: Arc<Constructor>,
        invoke: MethodFn,
    },
}

/// One remotely invocable unit.
#[derive(Clone)]
pub struct Callable {
    /// Function name, or class name for methods.
    pub name: String,
    /// Method name; `None` for plain functions.
    pub property: Option<String>,
    /// Module the definition was registered from.
    pub source: Option<String>,
    pub target: Target,
}

impl Callable {
    /// Fully qualified lookup key: `name` or `name.property`.
    pub fn key(&self) -> String {
        match &self.property {
            Some(property) => format!("{}.{}", self.name, property),
            None => self.name.clone(),
        }
    }
}

impl std::fmt::Debug for Callable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callable")
            .field("name", &self.name)
            .field("property", &self.property)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// Immutable name -> callable mapping, in registration order.
#[derive(Debug, Default)]
pub struct CallableMap {
    callables: Vec<Callable>,
    index: HashMap<String, usize>,
}

impl CallableMap {
    pub fn get(&self, key: &str) -> Option<&Callable> {
        self.index.get(key).map(|&i| &self.callables[i])
    }

    /// Whether any method of `class` is registered.
    pub fn has_class(&self, class: &str) -> bool {
        self.callables
            .iter()
            .any(|c| c.property.is_some() && c.name == class)
    }

    pub fn keys(&self) -> impl Iterator<Item = String> + '_ {
        self.callables.iter().map(Callable::key)
    }

    pub fn len(&self) -> usize {
        self.callables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callables.is_empty()
    }
}

/// Index callables by key, failing on the first name defined more than once.
pub fn build_callable_map(callables: Vec<Callable>) -> Result<CallableMap, ConfigError> {
    let mut groups: Vec<(String, Vec<Callable>)> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for callable in callables {
        let key = callable.key();
        match positions.get(&key) {
            Some(&i) => groups[i].1.push(callable),
            None => {
                positions.insert(key.clone(), groups.len());
                groups.push((key, vec![callable]));
            }
        }
    }

    if let Some((name, group)) = groups.iter().find(|(_, group)| group.len() != 1) {
        return Err(ConfigError::NameConflict {
            name: name.clone(),
            sources: group
                .iter()
                .map(|c| c.source.clone().unwrap_or_else(|| "<unknown>".to_string()))
                .collect(),
        });
    }

    let mut map = CallableMap::default();
    for (key, mut group) in groups {
        map.index.insert(key, map.callables.len());
        map.callables.extend(group.pop());
    }
    Ok(map)
}

/// Typed registration of a class: its constructor plus its exposed methods.
pub struct Class<T> {
    name: String,
    constructor: Arc<Constructor>,
    methods: Vec<(String, MethodFn)>,
    _instance: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> Class<T> {
    pub fn new<C>(name: impl Into<String>, constructor: C) -> Self
    where
        C: Fn(Vec<SerializableValue>) -> Result<T, ExecutionError> + Send + Sync + 'static,
    {
        let name = name.into();
        let construct: ConstructorFn =
            Arc::new(move |parameters: Vec<SerializableValue>| -> Result<Instance, ExecutionError> {
                Ok(Arc::new(constructor(parameters)?))
            });
        Self {
            constructor: Arc::new(Constructor {
                class: name.clone(),
                construct,
            }),
            name,
            methods: Vec::new(),
            _instance: PhantomData,
        }
    }

    /// Expose an async method.
    pub fn method<F, Fut, R>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(Arc<T>, Vec<SerializableValue>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ExecutionError>> + Send + 'static,
        R: Serialize + Send + 'static,
    {
        let class = self.name.clone();
        let invoke: MethodFn = Arc::new(move |instance: Instance, parameters: Vec<SerializableValue>| {
            match instance.downcast::<T>() {
                Ok(this) => {
                    let call = method(this, parameters);
                    async move { to_value(call.await?) }.boxed()
                }
                Err(_) => future::ready(Err(ExecutionError::InstanceTypeMismatch {
                    class: class.clone(),
                }))
                .boxed(),
            }
        });
        self.methods.push((name.into(), invoke));
        self
    }

    /// Expose a method that completes without suspending.
    pub fn sync_method<F, R>(self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(&T, Vec<SerializableValue>) -> Result<R, ExecutionError> + Send + Sync + 'static,
        R: Serialize + Send + 'static,
    {
        self.method(name, move |this: Arc<T>, parameters: Vec<SerializableValue>| {
            future::ready(method(&*this, parameters))
        })
    }
}

/// The callables one source unit contributes.
pub struct Module {
    source: String,
    callables: Vec<Callable>,
}

impl Module {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            callables: Vec::new(),
        }
    }

    /// Expose an async function.
    pub fn function<F, Fut, R>(mut self, name: impl Into<String>, function: F) -> Self
    where
        F: Fn(Vec<SerializableValue>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ExecutionError>> + Send + 'static,
        R: Serialize + Send + 'static,
    {
        let target: FunctionFn = Arc::new(move |parameters: Vec<SerializableValue>| {
            let call = function(parameters);
            async move { to_value(call.await?) }.boxed()
        });
        self.callables.push(Callable {
            name: name.into(),
            property: None,
            source: Some(self.source.clone()),
            target: Target::Function(target),
        });
        self
    }

    /// Expose a function that completes without suspending.
    pub fn sync_function<F, R>(self, name: impl Into<String>, function: F) -> Self
    where
        F: Fn(Vec<SerializableValue>) -> Result<R, ExecutionError> + Send + Sync + 'static,
        R: Serialize + Send + 'static,
    {
        self.function(name, move |parameters: Vec<SerializableValue>| {
            future::ready(function(parameters))
        })
    }

    /// Expose every method of `class`.
    pub fn class<T: Any + Send + Sync>(mut self, class: Class<T>) -> Self {
        for (property, invoke) in class.methods {
            self.callables.push(Callable {
                name: class.name.clone(),
                property: Some(property),
                source: Some(self.source.clone()),
                target: Target::Method {
                    constructor: Arc::clone(&class.constructor),
                    invoke,
                },
            });
        }
        self
    }
}

/// Collects modules and builds a [`CallableExecutor`].
pub struct ExecutorBuilder {
    callables: Vec<Callable>,
    factory: Arc<dyn InstanceFactory>,
}

impl Default for ExecutorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutorBuilder {
    pub fn new() -> Self {
        Self {
            callables: Vec::new(),
            factory: Arc::new(ConstructFactory),
        }
    }

    pub fn module(mut self, module: Module) -> Self {
        self.callables.extend(module.callables);
        self
    }

    /// Replace the default construct-per-call factory.
    pub fn factory(mut self, factory: impl InstanceFactory + 'static) -> Self {
        self.factory = Arc::new(factory);
        self
    }

    pub fn build(self) -> Result<CallableExecutor, ConfigError> {
        for callable in &self.callables {
            validate_name(&callable.name)?;
            if let Some(property) = &callable.property {
                validate_name(property)?;
            }
            debug!(
                "Callable found: {} ({})",
                callable.key(),
                callable.source.as_deref().unwrap_or("<unknown>")
            );
        }
        let callables = build_callable_map(self.callables)?;
        Ok(CallableExecutor::new(callables, self.factory))
    }
}

fn validate_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() || name.contains('.') {
        return Err(ConfigError::InvalidOption {
            option: "callable name".to_string(),
            message: format!("\"{}\" must be non-empty and must not contain '.'", name),
        });
    }
    Ok(())
}

/// [`Executor`] over a [`CallableMap`].
pub struct CallableExecutor {
    callables: CallableMap,
    factory: Arc<dyn InstanceFactory>,
}

impl CallableExecutor {
    pub fn new(callables: CallableMap, factory: Arc<dyn InstanceFactory>) -> Self {
        Self { callables, factory }
    }

    pub fn callables(&self) -> &CallableMap {
        &self.callables
    }

    fn not_found(&self, name: &str) -> ExecutionError {
        match name.split_once('.') {
            Some((class, method)) if self.callables.has_class(class) => {
                ExecutionError::MethodNotFound {
                    class: class.to_string(),
                    method: method.to_string(),
                }
            }
            Some((class, _)) => ExecutionError::ClassNotFound {
                name: class.to_string(),
            },
            None => ExecutionError::FunctionNotFound {
                name: name.to_string(),
            },
        }
    }

    async fn invoke(
        &self,
        callable: &Callable,
        parameters: Vec<SerializableValue>,
        constructor_parameters: Option<Vec<SerializableValue>>,
    ) -> Result<SerializableValue, ExecutionError> {
        match &callable.target {
            Target::Function(function) => function(parameters).await,
            Target::Method {
                constructor,
                invoke,
            } => {
                let instance = self
                    .factory
                    .create(constructor, constructor_parameters.unwrap_or_default())?
                    .ok_or_else(|| ExecutionError::InstanceUnavailable {
                        class: callable.name.clone(),
                    })?;
                invoke(instance, parameters).await
            }
        }
    }
}

#[async_trait]
impl Executor for CallableExecutor {
    async fn execute(
        &self,
        name: &str,
        parameters: Vec<SerializableValue>,
        constructor_parameters: Option<Vec<SerializableValue>>,
    ) -> Result<SerializableValue, ExecutionError> {
        let Some(callable) = self.callables.get(name) else {
            return Err(self.not_found(name));
        };
        debug!("Invoking {}", name);

        AssertUnwindSafe(self.invoke(callable, parameters, constructor_parameters))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(ExecutionError::Panicked {
                    message: HandlerPanic::from_payload(payload).message,
                })
            })
    }
}
