use super::Generator;
use crate::step::{StepRequest, StepResponse};
use async_trait::async_trait;
use parking_lot::Mutex;
use penman_core::{PenmanError, PenmanResult};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

enum Scripted {
    Respond(StepResponse),
    Fail(String),
}

#[derive(Default)]
struct Script {
    queued: HashMap<String, VecDeque<Scripted>>,
    delays: HashMap<String, Duration>,
    calls: Vec<StepRequest>,
}

/// Deterministic generator that replays queued responses per step name.
///
/// Steps with nothing queued answer with the fallback response, a plain
/// success unless changed with [`ScriptedGenerator::with_fallback`]. Used by
/// tests and by `penman run --dry-run`.
pub struct ScriptedGenerator {
    script: Mutex<Script>,
    fallback: StepResponse,
}

impl Default for ScriptedGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script::default()),
            fallback: StepResponse::success(json!({"scripted": true})),
        }
    }

    /// Response used once a step's queue is empty.
    pub fn with_fallback(mut self, response: StepResponse) -> Self {
        self.fallback = response;
        self
    }

    /// Queue a response for the next call of `step`.
    pub fn push(&self, step: &str, response: StepResponse) -> &Self {
        self.enqueue(step, Scripted::Respond(response))
    }

    /// Queue a backend error for the next call of `step`.
    pub fn push_error(&self, step: &str, message: impl Into<String>) -> &Self {
        self.enqueue(step, Scripted::Fail(message.into()))
    }

    /// Make every call of `step` take at least `delay`.
    pub fn delay(&self, step: &str, delay: Duration) -> &Self {
        self.script.lock().delays.insert(step.to_string(), delay);
        self
    }

    /// Every request received so far, in call order.
    pub fn calls(&self) -> Vec<StepRequest> {
        self.script.lock().calls.clone()
    }

    /// Number of calls received for `step`.
    pub fn calls_for(&self, step: &str) -> usize {
        self.script
            .lock()
            .calls
            .iter()
            .filter(|r| r.step == step)
            .count()
    }

    fn enqueue(&self, step: &str, item: Scripted) -> &Self {
        self.script
            .lock()
            .queued
            .entry(step.to_string())
            .or_default()
            .push_back(item);
        self
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn run_step(&self, request: &StepRequest) -> PenmanResult<StepResponse> {
        let (next, delay) = {
            let mut script = self.script.lock();
            script.calls.push(request.clone());
            let next = script
                .queued
                .get_mut(&request.step)
                .and_then(VecDeque::pop_front);
            (next, script.delays.get(&request.step).copied())
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match next {
            Some(Scripted::Respond(response)) => Ok(response),
            Some(Scripted::Fail(message)) => Err(PenmanError::Upstream(message)),
            None => Ok(self.fallback.clone()),
        }
    }
}
