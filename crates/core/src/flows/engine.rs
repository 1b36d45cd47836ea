use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::flows::states::{FlowAction, FlowContext, FlowEvent, FlowState, TransitionOutcome};

pub trait FlowDefinition {
    fn initial_state(&self) -> FlowState;
    fn transition(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// Per-user driver search conversation: collect filters, look drivers up, refine or reset.
#[derive(Clone, Debug, Default)]
pub struct DriverSearchFlow;

impl FlowDefinition for DriverSearchFlow {
    fn initial_state(&self) -> FlowState {
        FlowState::Idle
    }

    fn transition(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_driver_search(current, event, context)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> FlowState {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        context: &FlowContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    audit
                        .event("flow.transition_applied", AuditCategory::Flow, AuditOutcome::Success)
                        .with_metadata("from", outcome.from.as_str())
                        .with_metadata("to", outcome.to.as_str())
                        .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    audit
                        .event("flow.transition_rejected", AuditCategory::Flow, AuditOutcome::Rejected)
                        .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for FlowEngine<DriverSearchFlow> {
    fn default() -> Self {
        Self::new(DriverSearchFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("no filters available to merge in state {state:?}")]
    MissingFilters { state: FlowState },
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: FlowState, event: FlowEvent },
}

fn transition_driver_search(
    current: &FlowState,
    event: &FlowEvent,
    context: &FlowContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use FlowAction::{ClearSession, DispatchLookup, MergeFilters, ReportFailure, ReportResults};
    use FlowEvent::{
        FiltersMerged, LookupCompleted, LookupDispatched, LookupFailed, ResetRequested,
    };
    use FlowState::{AwaitingResult, Collecting, Idle};

    let (to, actions) = match (current, event) {
        (Idle, FiltersMerged) | (Collecting, FiltersMerged) => {
            if !context.has_filters {
                return Err(FlowTransitionError::MissingFilters { state: *current });
            }
            (Collecting, vec![MergeFilters])
        }
        (Collecting, LookupDispatched) => (AwaitingResult, vec![DispatchLookup]),
        (AwaitingResult, LookupCompleted) => (Collecting, vec![ReportResults]),
        (AwaitingResult, LookupFailed) => (Collecting, vec![ReportFailure]),
        (_, ResetRequested) => (Idle, vec![ClearSession]),
        _ => {
            return Err(FlowTransitionError::InvalidTransition {
                state: *current,
                event: event.clone(),
            });
        }
    };

    Ok(TransitionOutcome { from: *current, to, event: event.clone(), actions })
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::flows::engine::{DriverSearchFlow, FlowEngine, FlowTransitionError};
    use crate::flows::states::{FlowAction, FlowContext, FlowEvent, FlowState};

    const WITH_FILTERS: FlowContext = FlowContext { has_filters: true };

    #[test]
    fn search_refine_and_reset_cycle() {
        let engine = FlowEngine::new(DriverSearchFlow);
        let mut state = engine.initial_state();
        assert_eq!(state, FlowState::Idle);

        state = engine.apply(&state, &FlowEvent::FiltersMerged, &WITH_FILTERS).expect("merge").to;
        assert_eq!(state, FlowState::Collecting);

        let dispatched = engine
            .apply(&state, &FlowEvent::LookupDispatched, &WITH_FILTERS)
            .expect("collecting -> awaiting");
        assert_eq!(dispatched.to, FlowState::AwaitingResult);
        assert_eq!(dispatched.actions, vec![FlowAction::DispatchLookup]);

        state = engine
            .apply(&dispatched.to, &FlowEvent::LookupCompleted, &WITH_FILTERS)
            .expect("awaiting -> collecting")
            .to;
        assert_eq!(state, FlowState::Collecting);

        state = engine.apply(&state, &FlowEvent::FiltersMerged, &WITH_FILTERS).expect("refine").to;
        assert_eq!(state, FlowState::Collecting);

        let reset = engine
            .apply(&state, &FlowEvent::ResetRequested, &FlowContext::default())
            .expect("reset");
        assert_eq!(reset.to, FlowState::Idle);
        assert_eq!(reset.actions, vec![FlowAction::ClearSession]);
    }

    #[test]
    fn failed_lookup_returns_to_collecting() {
        let engine = FlowEngine::default();
        let outcome = engine
            .apply(&FlowState::AwaitingResult, &FlowEvent::LookupFailed, &WITH_FILTERS)
            .expect("failure is a valid transition");
        assert_eq!(outcome.to, FlowState::Collecting);
        assert_eq!(outcome.actions, vec![FlowAction::ReportFailure]);
    }

    #[test]
    fn reset_from_idle_stays_idle() {
        let engine = FlowEngine::default();
        let outcome = engine
            .apply(&FlowState::Idle, &FlowEvent::ResetRequested, &FlowContext::default())
            .expect("idle reset");
        assert_eq!(outcome.from, FlowState::Idle);
        assert_eq!(outcome.to, FlowState::Idle);
    }

    #[test]
    fn idle_session_cannot_dispatch_lookup() {
        let engine = FlowEngine::default();
        let error = engine
            .apply(&FlowState::Idle, &FlowEvent::LookupDispatched, &FlowContext::default())
            .expect_err("idle has nothing to search for");

        assert_eq!(
            error,
            FlowTransitionError::InvalidTransition {
                state: FlowState::Idle,
                event: FlowEvent::LookupDispatched
            }
        );
    }

    #[test]
    fn merging_nothing_is_rejected() {
        let engine = FlowEngine::default();
        let error = engine
            .apply(&FlowState::Idle, &FlowEvent::FiltersMerged, &FlowContext::default())
            .expect_err("must reject empty merge");
        assert!(matches!(error, FlowTransitionError::MissingFilters { state: FlowState::Idle }));
    }

    #[test]
    fn completed_lookup_requires_dispatch_first() {
        let engine = FlowEngine::default();
        assert!(engine
            .apply(&FlowState::Collecting, &FlowEvent::LookupCompleted, &WITH_FILTERS)
            .is_err());
    }

    #[test]
    fn flow_transition_emits_audit_event() {
        let engine = FlowEngine::default();
        let sink = InMemoryAuditSink::default();
        let audit = AuditContext::new(
            Some("U123".to_owned()),
            Some("D42".to_owned()),
            "req-42",
            "session-engine",
        );

        engine
            .apply_with_audit(
                &FlowState::Idle,
                &FlowEvent::FiltersMerged,
                &WITH_FILTERS,
                &sink,
                &audit,
            )
            .expect("transition should succeed");
        let _ = engine.apply_with_audit(
            &FlowState::Idle,
            &FlowEvent::LookupCompleted,
            &WITH_FILTERS,
            &sink,
            &audit,
        );

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].correlation_id, "req-42");
        assert_eq!(events[0].user_id.as_deref(), Some("U123"));
        assert_eq!(events[0].event_type, "flow.transition_applied");
        assert_eq!(events[0].metadata.get("to").map(String::as_str), Some("collecting"));
        assert_eq!(events[1].event_type, "flow.transition_rejected");
    }
}
