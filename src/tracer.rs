//! Per-run tracing for the retrieval chain.
//!
//! Each chain invocation gets a [`RunTrace`]: a `tracing` span tagged with
//! the workspace, project and run number, plus a completion record logged
//! when the run ends (or is abandoned by its consumer). Aggregate counters
//! are kept on the shared [`RunTracer`].

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::error::RagError;

#[derive(Debug, Default)]
pub struct RunTracer {
    workspace: String,
    project: String,
    runs: AtomicU64,
    failed_runs: AtomicU64,
    tokens: AtomicU64,
}

/// Snapshot of a tracer's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceStats {
    pub runs: u64,
    pub failed_runs: u64,
    pub tokens: u64,
}

impl RunTracer {
    pub fn new(workspace: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            workspace: workspace.into(),
            project: project.into(),
            ..Default::default()
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.trace_workspace.clone(), config.trace_project.clone())
    }

    /// Begin tracing one run for `query`.
    pub fn start(self: &Arc<Self>, query: &str) -> RunTrace {
        let run = self.runs.fetch_add(1, Ordering::Relaxed) + 1;
        let span = tracing::info_span!(
            "rag_run",
            workspace = %self.workspace,
            project = %self.project,
            run = run
        );
        span.in_scope(|| tracing::debug!(query_chars = query.chars().count(), "run started"));
        RunTrace {
            tracer: Arc::clone(self),
            span,
            started: Instant::now(),
            started_at: Utc::now(),
            tokens: 0,
            state: RunState::Running,
        }
    }

    pub fn stats(&self) -> TraceStats {
        TraceStats {
            runs: self.runs.load(Ordering::Relaxed),
            failed_runs: self.failed_runs.load(Ordering::Relaxed),
            tokens: self.tokens.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Running,
    Completed,
    Failed,
}

/// One traced run. Dropping it logs the run's outcome.
#[derive(Debug)]
pub struct RunTrace {
    tracer: Arc<RunTracer>,
    span: tracing::Span,
    started: Instant,
    started_at: DateTime<Utc>,
    tokens: u64,
    state: RunState,
}

impl RunTrace {
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn record_token(&mut self) {
        self.tokens += 1;
    }

    pub fn fail(&mut self, error: &RagError) {
        self.state = RunState::Failed;
        self.span
            .in_scope(|| tracing::warn!(error = %error, "run failed"));
    }

    pub fn complete(&mut self) {
        if self.state == RunState::Running {
            self.state = RunState::Completed;
        }
    }
}

impl Drop for RunTrace {
    fn drop(&mut self) {
        self.tracer.tokens.fetch_add(self.tokens, Ordering::Relaxed);
        if self.state == RunState::Failed {
            self.tracer.failed_runs.fetch_add(1, Ordering::Relaxed);
        }
        let outcome = match self.state {
            RunState::Running => "abandoned",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        };
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        let started_at = self.started_at.to_rfc3339();
        let tokens = self.tokens;
        self.span.in_scope(|| {
            tracing::info!(outcome, tokens, elapsed_ms, started_at = %started_at, "run finished")
        });
    }
}
