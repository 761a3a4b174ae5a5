// src/sources/scripted.rs
//! In-process adapter that replays queued readings. Used by tests and local demos
//! where hitting the real APIs is not wanted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{Capabilities, FetchRequest, SourceAdapter};
use crate::error::FetchError;

enum Step {
    Value(f64),
    Fail(String),
}

pub struct ScriptedAdapter {
    name: String,
    caps: Capabilities,
    metrics: Mutex<VecDeque<Step>>,
    narratives: Mutex<VecDeque<serde_json::Value>>,
    /// Returned once the metric queue is drained.
    fallback: Option<f64>,
    delay: Option<Duration>,
    metric_calls: AtomicUsize,
    narrative_calls: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            caps: Capabilities::METRIC,
            metrics: Mutex::new(VecDeque::new()),
            narratives: Mutex::new(VecDeque::new()),
            fallback: None,
            delay: None,
            metric_calls: AtomicUsize::new(0),
            narrative_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_capabilities(mut self, caps: Capabilities) -> Self {
        self.caps = caps;
        self
    }

    /// Queue readings returned in order, one per call.
    pub fn with_values(self, values: &[f64]) -> Self {
        self.push_steps(values.iter().map(|v| Step::Value(*v)));
        self
    }

    pub fn with_failure(self, message: &str) -> Self {
        self.push_steps(std::iter::once(Step::Fail(message.to_string())));
        self
    }

    pub fn with_fallback(mut self, value: f64) -> Self {
        self.fallback = Some(value);
        self
    }

    pub fn with_narrative(self, payload: serde_json::Value) -> Self {
        if let Ok(mut q) = self.narratives.lock() {
            q.push_back(payload);
        }
        self
    }

    /// Sleep before answering (for timeout tests).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn metric_calls(&self) -> usize {
        self.metric_calls.load(Ordering::SeqCst)
    }

    pub fn narrative_calls(&self) -> usize {
        self.narrative_calls.load(Ordering::SeqCst)
    }

    fn push_steps(&self, steps: impl Iterator<Item = Step>) {
        if let Ok(mut q) = self.metrics.lock() {
            q.extend(steps);
        }
    }
}

#[async_trait]
impl SourceAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    async fn fetch_metric(&self, _req: &FetchRequest<'_>) -> Result<f64, FetchError> {
        self.metric_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        let step = self.metrics.lock().ok().and_then(|mut q| q.pop_front());
        match step {
            Some(Step::Value(v)) => Ok(v),
            Some(Step::Fail(msg)) => Err(FetchError::Malformed(msg)),
            None => self
                .fallback
                .ok_or_else(|| FetchError::Malformed(format!("{}: script exhausted", self.name))),
        }
    }

    async fn fetch_narrative(
        &self,
        _req: &FetchRequest<'_>,
        _window: Duration,
    ) -> Result<serde_json::Value, FetchError> {
        self.narrative_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        self.narratives
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .ok_or_else(|| FetchError::Malformed(format!("{}: no narrative queued", self.name)))
    }
}
