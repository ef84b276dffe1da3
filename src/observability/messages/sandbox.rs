// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for sandboxed evaluation.

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use std::time::Duration;
use tracing::Span;

/// An expression compiled and is about to run.
///
/// # Log Level
/// `debug!` - Per-evaluation detail
pub struct EvaluationStarted<'a> {
    pub expression_len: usize,
    pub fuel: u64,
    pub time_budget: Duration,
    pub imports: &'a [&'a str],
}

impl Display for EvaluationStarted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Evaluating {} byte expression with fuel={} budget={:?} imports=[{}]",
            self.expression_len,
            self.fuel,
            self.time_budget,
            self.imports.join(", ")
        )
    }
}

impl StructuredLog for EvaluationStarted<'_> {
    fn log(&self) {
        tracing::debug!(
            expression_len = self.expression_len,
            fuel = self.fuel,
            time_budget_ms = self.time_budget.as_millis() as u64,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "sandbox",
            span_name = name,
            expression_len = self.expression_len,
            fuel = self.fuel,
        )
    }
}

/// An evaluation finished, successfully or not.
///
/// # Log Level
/// `debug!` - Per-evaluation detail
pub struct EvaluationFinished<'a> {
    pub outcome: &'a str,
    pub fuel_consumed: u64,
    pub elapsed: Duration,
}

impl Display for EvaluationFinished<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Evaluation {} after {:?}, fuel consumed={}",
            self.outcome, self.elapsed, self.fuel_consumed
        )
    }
}

impl StructuredLog for EvaluationFinished<'_> {
    fn log(&self) {
        tracing::debug!(
            outcome = self.outcome,
            fuel_consumed = self.fuel_consumed,
            elapsed_ms = self.elapsed.as_millis() as u64,
            "{}", self
        );
    }
}

/// An evaluation was stopped from outside (time budget or cancellation).
///
/// # Log Level
/// `warn!` - Guest did not finish on its own
pub struct EvaluationAborted<'a> {
    pub reason: &'a str,
    pub elapsed: Duration,
}

impl Display for EvaluationAborted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Evaluation aborted ({}) after {:?}", self.reason, self.elapsed)
    }
}

impl StructuredLog for EvaluationAborted<'_> {
    fn log(&self) {
        tracing::warn!(
            reason = self.reason,
            elapsed_ms = self.elapsed.as_millis() as u64,
            "{}", self
        );
    }
}

/// A requested fuel level fell outside the configured bounds and was clamped.
///
/// # Log Level
/// `warn!` - Configuration adjusted
pub struct FuelLevelClamped {
    pub requested: u64,
    pub clamped: u64,
    pub minimum: u64,
    pub maximum: u64,
}

impl Display for FuelLevelClamped {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Fuel level {} clamped to {} (allowed range {}..={})",
            self.requested, self.clamped, self.minimum, self.maximum
        )
    }
}

impl StructuredLog for FuelLevelClamped {
    fn log(&self) {
        tracing::warn!(
            requested = self.requested,
            clamped = self.clamped,
            minimum = self.minimum,
            maximum = self.maximum,
            "{}", self
        );
    }
}
