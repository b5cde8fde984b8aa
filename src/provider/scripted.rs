//! Deterministic backends for tests, demos and benchmarks.

use crate::error::GenerationError;
use crate::provider::{GenerationBackend, GenerationOutput, GenerationRequest};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

type Responder =
    Box<dyn Fn(&GenerationRequest) -> Result<GenerationOutput, GenerationError> + Send + Sync>;

/// Backend that replays queued responses per generation config name.
///
/// Each call pops the next scripted response for `request.config_name`; when the queue is
/// empty the fallback responder (if any) answers, otherwise the call fails with
/// [`GenerationError::ScriptExhausted`]. Every request is recorded.
#[derive(Default)]
pub struct ScriptedBackend {
    scripts: Mutex<HashMap<String, VecDeque<Result<GenerationOutput, GenerationError>>>>,
    fallback: Option<Responder>,
    calls: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, config: &str, output: GenerationOutput) -> Self {
        self.push(config, Ok(output));
        self
    }

    pub fn respond_text(self, config: &str, text: impl Into<String>) -> Self {
        self.respond(config, GenerationOutput::text(text))
    }

    pub fn fail(self, config: &str, error: GenerationError) -> Self {
        self.push(config, Err(error));
        self
    }

    pub fn with_fallback<F>(mut self, responder: F) -> Self
    where
        F: Fn(&GenerationRequest) -> Result<GenerationOutput, GenerationError>
            + Send
            + Sync
            + 'static,
    {
        self.fallback = Some(Box::new(responder));
        self
    }

    fn push(&self, config: &str, response: Result<GenerationOutput, GenerationError>) {
        self.scripts
            .lock()
            .entry(config.to_string())
            .or_default()
            .push_back(response);
    }

    /// Every request received so far, in call order.
    pub fn calls(&self) -> Vec<GenerationRequest> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, config: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|request| request.config_name == config)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn invoke(&self, request: GenerationRequest) -> Result<GenerationOutput, GenerationError> {
        self.calls.lock().push(request.clone());
        let scripted = self
            .scripts
            .lock()
            .get_mut(&request.config_name)
            .and_then(VecDeque::pop_front);
        match (scripted, &self.fallback) {
            (Some(response), _) => response,
            (None, Some(fallback)) => fallback(&request),
            (None, None) => Err(GenerationError::ScriptExhausted(request.config_name)),
        }
    }

    fn backend_name(&self) -> &str {
        "scripted"
    }
}

/// Backend that returns the resolved goal as its output text.
#[derive(Debug, Default)]
pub struct EchoBackend {
    calls: Mutex<usize>,
}

impl EchoBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl GenerationBackend for EchoBackend {
    async fn invoke(&self, request: GenerationRequest) -> Result<GenerationOutput, GenerationError> {
        *self.calls.lock() += 1;
        Ok(GenerationOutput::text(request.goal))
    }

    fn backend_name(&self) -> &str {
        "echo"
    }
}
