//! Fan-out of companion pushes to registered handlers.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use pulselink_protocol::Invocation;

/// Error a call handler may return.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A push handler. Receives the whole invocation (method and params).
pub type CallHandler = Arc<dyn Fn(&Invocation) -> Result<(), HandlerError> + Send + Sync>;

#[derive(Clone)]
struct Registration {
    /// `None` receives every call.
    method: Option<String>,
    handler: CallHandler,
}

/// Outcome of delivering one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Ordered list of call handlers.
#[derive(Clone, Default)]
pub struct CallHandlers {
    registrations: Arc<Mutex<Vec<Registration>>>,
}

impl CallHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for every call.
    pub fn on_any<F>(&self, handler: F)
    where
        F: Fn(&Invocation) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.push(None, Arc::new(handler));
    }

    /// Registers a handler for calls named `method`.
    pub fn on_method<F>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(&Invocation) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.push(Some(method.into()), Arc::new(handler));
    }

    fn push(&self, method: Option<String>, handler: CallHandler) {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Registration { method, handler });
    }

    pub fn len(&self) -> usize {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs every matching handler in registration order.
    ///
    /// A handler that errors or panics is logged and skipped; the rest still
    /// run. Handlers may register further handlers; those see the next call.
    pub fn emit(&self, call: &Invocation) -> EmitReport {
        let matching: Vec<CallHandler> = self
            .registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.method.as_deref().is_none_or(|m| m == call.method))
            .map(|r| r.handler.clone())
            .collect();

        let mut report = EmitReport::default();
        for handler in matching {
            match catch_unwind(AssertUnwindSafe(|| handler(call))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    warn!(method = %call.method, error = %e, "Call handler failed");
                    report.failed += 1;
                }
                Err(_) => {
                    warn!(method = %call.method, "Call handler panicked");
                    report.failed += 1;
                }
            }
        }

        if report.delivered + report.failed == 0 {
            debug!(method = %call.method, "No handler for call");
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn call(method: &str) -> Invocation {
        Invocation::new(method, json!({"apiEndpoint": "https://example.test"}))
    }

    #[test]
    fn every_handler_runs_once_despite_failures() {
        let handlers = CallHandlers::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        handlers.on_any(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        handlers.on_any(|_| Err("boom".into()));
        handlers.on_any(|_| panic!("handler bug"));
        let h = hits.clone();
        handlers.on_any(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let report = handlers.emit(&call("SETTINGS_CHANGED"));
        assert_eq!(report, EmitReport { delivered: 2, failed: 2 });
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn method_handlers_filter_by_name() {
        let handlers = CallHandlers::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        handlers.on_method("SETTINGS_CHANGED", move |c| {
            s.lock().unwrap().push(format!("settings:{}", c.method));
            Ok(())
        });
        let s = seen.clone();
        handlers.on_any(move |c| {
            s.lock().unwrap().push(format!("any:{}", c.method));
            Ok(())
        });

        handlers.emit(&call("SETTINGS_CHANGED"));
        handlers.emit(&call("OTHER"));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                "settings:SETTINGS_CHANGED",
                "any:SETTINGS_CHANGED",
                "any:OTHER"
            ]
        );
    }

    #[test]
    fn emit_without_handlers() {
        let handlers = CallHandlers::new();
        assert!(handlers.is_empty());
        assert_eq!(handlers.emit(&call("X")), EmitReport::default());
    }
}
