//! Method-name → handler table used by the companion dispatcher.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::Value;
use tracing::{debug, error, warn};

use pulselink_protocol::{ErrorDescriptor, Outcome};

use crate::push::BoxFuture;

/// What a handler produces.
pub type HandlerFuture = BoxFuture<'static, Result<Value, ErrorDescriptor>>;

type Handler = Arc<dyn Fn(Value) -> HandlerFuture + Send + Sync>;

/// Async handlers keyed by method name.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Handler>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("methods", &self.methods())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `method`, replacing any previous one.
    pub fn register<F, Fut>(&mut self, method: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ErrorDescriptor>> + Send + 'static,
    {
        let method = method.into();
        let boxed: Handler = Arc::new(move |params| -> HandlerFuture { Box::pin(handler(params)) });
        if self.handlers.insert(method.clone(), boxed).is_some() {
            warn!(method = %method, "Replacing existing handler");
        }
        self
    }

    pub fn contains(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<&str> {
        let mut methods: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        methods.sort_unstable();
        methods
    }

    /// Runs the handler for `method`.
    ///
    /// Unknown methods fail with `method_not_supported` without running
    /// anything. A panicking handler becomes an `internal_error` failure.
    #[tracing::instrument(skip(self, params))]
    pub async fn dispatch(&self, method: &str, params: Value) -> Outcome {
        let Some(handler) = self.handlers.get(method).cloned() else {
            debug!("No handler registered");
            return Outcome::failure(ErrorDescriptor::method_not_supported(method));
        };

        match AssertUnwindSafe(async move { handler(params).await })
            .catch_unwind()
            .await
        {
            Ok(Ok(result)) => Outcome::success(result),
            Ok(Err(error)) => {
                debug!(error = %error, "Handler failed");
                Outcome::failure(error)
            }
            Err(_) => {
                error!("Handler panicked");
                Outcome::failure(ErrorDescriptor::internal("handler panicked"))
            }
        }
    }
}
