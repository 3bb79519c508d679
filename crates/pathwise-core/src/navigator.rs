//! Step navigation over a protocol's step graph.
//!
//! The navigator reads a treatment instance's completion set and never
//! mutates it. Recording a new completion is the caller's job, after which
//! the current step advances on its own.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::decision::evaluate_decision_point;
use crate::patient::PatientData;
use crate::protocol::{Protocol, ProtocolStep};
use crate::types::StepId;
use crate::EngineError;

/// Lifecycle of a recorded treatment session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

/// A session as kept by the caller's session-tracking store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub step_id: StepId,

    #[serde(default)]
    pub status: SessionStatus,
}

/// A patient's progress through one protocol.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TreatmentInstance {
    pub protocol_id: u64,

    /// Step ids with a completed session
    #[serde(default)]
    pub completed: BTreeSet<StepId>,
}

impl TreatmentInstance {
    pub fn new(protocol_id: u64) -> Self {
        Self {
            protocol_id,
            completed: BTreeSet::new(),
        }
    }

    pub fn with_completed(mut self, steps: impl IntoIterator<Item = StepId>) -> Self {
        self.completed.extend(steps);
        self
    }

    /// Build the completion set from session history. Only completed
    /// sessions count; scheduled, running and cancelled ones are ignored.
    pub fn from_sessions<'a>(
        protocol_id: u64,
        sessions: impl IntoIterator<Item = &'a SessionRecord>,
    ) -> Self {
        let completed = sessions
            .into_iter()
            .filter(|session| session.status == SessionStatus::Completed)
            .map(|session| session.step_id)
            .collect();
        Self {
            protocol_id,
            completed,
        }
    }

    pub fn is_completed(&self, step: StepId) -> bool {
        self.completed.contains(&step)
    }

    pub fn record_completion(&mut self, step: StepId) {
        self.completed.insert(step);
    }
}

/// Walks a protocol's steps against a completion set.
#[derive(Debug, Clone, Copy)]
pub struct StepNavigator<'p> {
    protocol: &'p Protocol,
}

impl<'p> StepNavigator<'p> {
    pub fn new(protocol: &'p Protocol) -> Self {
        Self { protocol }
    }

    pub fn protocol(&self) -> &'p Protocol {
        self.protocol
    }

    /// Lowest-ordered step not yet completed; `None` once every step is.
    ///
    /// A later step never becomes current while an earlier one is open,
    /// even when sessions were recorded out of order.
    pub fn current_step(&self, instance: &TreatmentInstance) -> Option<&'p ProtocolStep> {
        self.protocol
            .steps()
            .iter()
            .find(|step| !instance.is_completed(step.id))
    }

    /// Step that follows `current`.
    ///
    /// Linear steps advance to the next sequence order, or `None` at the end
    /// of the protocol. Decision points need patient data and follow the
    /// branch table entry for the evaluated outcome.
    pub fn next_step(
        &self,
        current: &ProtocolStep,
        patient: Option<&PatientData>,
    ) -> Result<Option<&'p ProtocolStep>, EngineError> {
        self.resolve_next(current, patient).map(|(_, next)| next)
    }

    /// Like [`next_step`](Self::next_step), also returning the decision
    /// outcome when `current` is a decision point. The step is evaluated once.
    pub fn resolve_next<'s>(
        &self,
        current: &'s ProtocolStep,
        patient: Option<&PatientData>,
    ) -> Result<(Option<&'s str>, Option<&'p ProtocolStep>), EngineError> {
        if !current.is_decision_point() {
            let next = current
                .sequence_order
                .checked_add(1)
                .and_then(|order| self.protocol.step_at(order));
            debug!(
                step = %current.id,
                next = ?next.map(|step| step.id),
                "Linear step transition"
            );
            return Ok((None, next));
        }

        let patient = patient.ok_or(EngineError::MissingPatientData { step: current.id })?;
        let outcome = evaluate_decision_point(current, patient)?;

        let branch = current
            .branch_for(outcome)
            .ok_or_else(|| EngineError::NoBranchForOutcome {
                step: current.id,
                outcome: outcome.to_string(),
            })?;

        let target = self
            .protocol
            .step_at(branch.next_step_order)
            .ok_or(EngineError::NoStepAtSequence {
                order: branch.next_step_order,
            })?;

        debug!(
            step = %current.id,
            outcome,
            next = %target.id,
            next_order = target.sequence_order,
            "Branch resolved"
        );
        Ok((Some(outcome), Some(target)))
    }

    /// Every protocol step id is in the completion set.
    ///
    /// Completions for ids outside the protocol are ignored, so stray or
    /// duplicated records never signal completion early.
    pub fn is_complete(&self, instance: &TreatmentInstance) -> bool {
        self.protocol
            .step_ids()
            .all(|id| instance.is_completed(id))
    }

    /// Fraction of the protocol's steps completed, 0.0 for an empty protocol.
    pub fn progress(&self, instance: &TreatmentInstance) -> f64 {
        let total = self.protocol.steps().len();
        if total == 0 {
            return 0.0;
        }
        let done = self
            .protocol
            .step_ids()
            .filter(|id| instance.is_completed(*id))
            .count();
        done as f64 / total as f64
    }
}
