use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::error;

/// Caller-supplied hook run on the receive loop.
pub type Observer = Arc<dyn Fn(&str) + Send + Sync>;

/// Registries of output and command observers.
///
/// Observers run synchronously, one after another in registration order. A
/// panicking observer is logged and skipped; it never takes down the receive
/// loop or stops the observers after it.
#[derive(Clone, Default)]
pub struct CallbackDispatcher {
    output: Arc<RwLock<Vec<Observer>>>,
    command: Arc<RwLock<Vec<Observer>>>,
}

impl CallbackDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_output_observer<F>(&self, observer: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.output.write().await.push(Arc::new(observer));
    }

    pub async fn register_command_observer<F>(&self, observer: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.command.write().await.push(Arc::new(observer));
    }

    /// Hand a decoded output chunk to every output observer. Returns how many
    /// of them panicked.
    pub async fn dispatch_output(&self, chunk: &str) -> usize {
        let observers = self.output.read().await.clone();
        invoke_all("output", &observers, chunk)
    }

    /// Hand a completed terminal line to every command observer.
    pub async fn dispatch_command(&self, line: &str) -> usize {
        let observers = self.command.read().await.clone();
        invoke_all("command", &observers, line)
    }

    pub async fn output_observer_count(&self) -> usize {
        self.output.read().await.len()
    }

    pub async fn command_observer_count(&self) -> usize {
        self.command.read().await.len()
    }
}

fn invoke_all(kind: &str, observers: &[Observer], value: &str) -> usize {
    let mut failed = 0;
    for (index, observer) in observers.iter().enumerate() {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| observer(value))) {
            failed += 1;
            error!(
                "{} observer #{} panicked: {}",
                kind,
                index,
                panic_message(panic.as_ref())
            );
        }
    }
    failed
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "non-string panic payload"
    }
}
