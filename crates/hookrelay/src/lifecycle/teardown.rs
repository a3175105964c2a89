//! Ordered cleanup of session resources.

use std::future::Future;

use futures::future::BoxFuture;
use tracing::{debug, warn};

/// Cleanup steps, run last-registered-first.
///
/// Each step is awaited on its own; a failing step is logged and the rest
/// still run.
#[derive(Default)]
pub struct TeardownStack {
    steps: Vec<(&'static str, BoxFuture<'static, anyhow::Result<()>>)>,
}

impl TeardownStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step. Nothing runs until [`TeardownStack::run`].
    pub fn push<F>(&mut self, name: &'static str, step: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.steps.push((name, Box::pin(step)));
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step in reverse order. Returns the names of failed steps.
    pub async fn run(mut self) -> Vec<&'static str> {
        let mut failed = Vec::new();
        while let Some((name, step)) = self.steps.pop() {
            debug!(step = name, "teardown");
            if let Err(e) = step.await {
                let error = format!("{e:#}");
                warn!(step = name, %error, "teardown step failed");
                failed.push(name);
            }
        }
        failed
    }
}
