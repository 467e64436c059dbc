//! Procedure navigation — the per-session guided-walkthrough state machine
//!
//! States: Idle → InProcedure → (AwaitingConfirmation) → InProcedure |
//! Closed; Idle → Closed directly on explicit close. Invalid transitions
//! return `PipelineError::ProcedureState` and leave the session untouched;
//! the composer turns them into a corrective prompt. Every accepted
//! transition is appended to the session history for audit.
//!
//! Invariant held throughout: while a session is `InProcedure` (or
//! awaiting sign-off), `0 <= cursor < procedure.len()`.

use std::collections::HashMap;
use std::sync::Arc;

use foreman_core::error::PipelineError;
use foreman_core::models::{Intent, Procedure, Session, SessionEvent, SessionState, Step};

/// Read-only registry of procedure templates.
#[derive(Default)]
pub struct ProcedureLibrary {
    procedures: HashMap<String, Arc<Procedure>>,
}

impl ProcedureLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// The catalog shipped with the engine. Deployments extend it with
    /// `insert`.
    pub fn with_builtin_catalog() -> Self {
        let mut library = Self::new();
        library.insert(Procedure {
            id: "pump-inspection".to_string(),
            title: "Pump inspection".to_string(),
            estimated_minutes: 20,
            steps: vec![
                step(0, "Lock out and tag out the pump power supply.", &["lockout"], 3),
                step(1, "Inspect the coupling guard for damage or loose bolts.", &[], 5),
                step(2, "Check the seal area for leakage and note any residue.", &[], 5),
                step(3, "Verify bearing temperature is within the rated band.", &[], 4),
                step(4, "Remove the lockout and confirm the pump restarts cleanly.", &["lockout"], 3),
            ],
        });
        library.insert(Procedure {
            id: "valve-check".to_string(),
            title: "Valve check".to_string(),
            estimated_minutes: 10,
            steps: vec![
                step(0, "Confirm the line is depressurized.", &["pressure"], 3),
                step(1, "Cycle the valve fully closed, then fully open.", &[], 4),
                step(2, "Inspect the stem packing for weeping.", &[], 3),
            ],
        });
        library
    }

    pub fn insert(&mut self, procedure: Procedure) {
        self.procedures
            .insert(procedure.id.clone(), Arc::new(procedure));
    }

    pub fn get(&self, id: &str) -> Option<Arc<Procedure>> {
        self.procedures.get(id).cloned()
    }
}

fn step(index: usize, instruction: &str, safety: &[&str], minutes: u32) -> Step {
    Step {
        index,
        instruction: instruction.to_string(),
        safety_flags: safety.iter().map(|s| s.to_string()).collect(),
        estimated_minutes: minutes,
    }
}

/// What an accepted navigation produced, for the composer.
#[derive(Debug, Clone)]
pub enum NavOutcome {
    Started {
        procedure: Arc<Procedure>,
        step: Step,
    },
    Advanced {
        procedure: Arc<Procedure>,
        step: Step,
    },
    Repeated {
        procedure: Arc<Procedure>,
        step: Step,
    },
    /// Stepped past the last step; completion needs spoken sign-off.
    AwaitingSignOff {
        procedure: Arc<Procedure>,
    },
    Completed {
        procedure_id: String,
        summary: String,
    },
    Cancelled {
        had_active_procedure: bool,
    },
    SessionClosed,
}

/// Apply one navigation intent to a session.
///
/// # Constraints
/// * Only navigation intents and `close_session` are accepted.
/// * Rejected transitions leave the session state, cursor, and history
///   unchanged.
/// * `navigate_repeat` is idempotent: it neither transitions nor records.
pub fn navigate(
    session: &mut Session,
    intent: Intent,
    library: &ProcedureLibrary,
    requested_procedure: Option<&str>,
) -> Result<NavOutcome, PipelineError> {
    match intent {
        Intent::StartProcedure => start_procedure(session, library, requested_procedure),
        Intent::NavigateNext => navigate_next(session, library),
        Intent::NavigateRepeat => navigate_repeat(session, library),
        Intent::NavigateComplete => navigate_complete(session, library),
        Intent::NavigateCancel => navigate_cancel(session),
        Intent::CloseSession => close_session(session),
        other => Err(PipelineError::ProcedureState {
            state: session.state,
            action: format!("handle non-navigation intent '{}'", other),
        }),
    }
}

fn start_procedure(
    session: &mut Session,
    library: &ProcedureLibrary,
    requested: Option<&str>,
) -> Result<NavOutcome, PipelineError> {
    if session.state != SessionState::Idle {
        return Err(PipelineError::ProcedureState {
            state: session.state,
            action: "start a procedure".to_string(),
        });
    }

    // Explicit id wins; otherwise an asset with exactly one known
    // procedure selects it implicitly.
    let procedure_id = requested
        .map(str::to_string)
        .or_else(|| {
            session.asset.as_ref().and_then(|a| {
                if a.procedure_ids.len() == 1 {
                    a.procedure_ids.first().cloned()
                } else {
                    None
                }
            })
        })
        .ok_or_else(|| PipelineError::ProcedureState {
            state: session.state,
            action: "start a procedure without naming one".to_string(),
        })?;

    let procedure = library
        .get(&procedure_id)
        .ok_or_else(|| PipelineError::ProcedureState {
            state: session.state,
            action: format!("start unknown procedure '{}'", procedure_id),
        })?;

    if procedure.is_empty() {
        return Err(PipelineError::ProcedureState {
            state: session.state,
            action: format!("start empty procedure '{}'", procedure_id),
        });
    }

    transition(session, SessionState::InProcedure, Intent::StartProcedure);
    session.procedure_id = Some(procedure.id.clone());
    session.cursor = 0;

    let step = procedure.steps[0].clone();
    Ok(NavOutcome::Started { procedure, step })
}

fn navigate_next(
    session: &mut Session,
    library: &ProcedureLibrary,
) -> Result<NavOutcome, PipelineError> {
    if session.state != SessionState::InProcedure {
        return Err(PipelineError::ProcedureState {
            state: session.state,
            action: "advance to the next step".to_string(),
        });
    }

    let procedure = active_procedure(session, library)?;

    if session.cursor + 1 < procedure.len() {
        session.cursor += 1;
        session.touch();
        let step = procedure.steps[session.cursor].clone();
        Ok(NavOutcome::Advanced { procedure, step })
    } else {
        // Past the last step: cursor stays clamped on it, completion
        // waits for sign-off.
        transition(session, SessionState::AwaitingConfirmation, Intent::NavigateNext);
        Ok(NavOutcome::AwaitingSignOff { procedure })
    }
}

fn navigate_repeat(
    session: &mut Session,
    library: &ProcedureLibrary,
) -> Result<NavOutcome, PipelineError> {
    match session.state {
        SessionState::InProcedure => {
            let procedure = active_procedure(session, library)?;
            let step = procedure.steps[session.cursor].clone();
            Ok(NavOutcome::Repeated { procedure, step })
        }
        SessionState::AwaitingConfirmation => {
            let procedure = active_procedure(session, library)?;
            Ok(NavOutcome::AwaitingSignOff { procedure })
        }
        state => Err(PipelineError::ProcedureState {
            state,
            action: "repeat a step".to_string(),
        }),
    }
}

fn navigate_complete(
    session: &mut Session,
    library: &ProcedureLibrary,
) -> Result<NavOutcome, PipelineError> {
    if session.state != SessionState::AwaitingConfirmation {
        return Err(PipelineError::ProcedureState {
            state: session.state,
            action: "sign off a procedure".to_string(),
        });
    }

    let procedure = active_procedure(session, library)?;
    let summary = format!(
        "Completed '{}' ({} steps).",
        procedure.title,
        procedure.len()
    );

    transition(session, SessionState::Closed, Intent::NavigateComplete);
    session.record(SessionEvent::ProcedureCompleted {
        procedure_id: procedure.id.clone(),
        summary: summary.clone(),
    });
    let procedure_id = procedure.id.clone();
    session.procedure_id = None;
    session.cursor = 0;

    Ok(NavOutcome::Completed {
        procedure_id,
        summary,
    })
}

fn navigate_cancel(session: &mut Session) -> Result<NavOutcome, PipelineError> {
    if session.state == SessionState::Closed {
        return Err(PipelineError::ProcedureState {
            state: session.state,
            action: "cancel".to_string(),
        });
    }

    let had_active_procedure = session.procedure_id.is_some();
    if session.state != SessionState::Idle {
        transition(session, SessionState::Idle, Intent::NavigateCancel);
    } else {
        session.touch();
    }
    // Cursor discarded, command history retained.
    session.procedure_id = None;
    session.cursor = 0;

    Ok(NavOutcome::Cancelled {
        had_active_procedure,
    })
}

fn close_session(session: &mut Session) -> Result<NavOutcome, PipelineError> {
    if session.state == SessionState::Closed {
        return Err(PipelineError::ProcedureState {
            state: session.state,
            action: "close a session twice".to_string(),
        });
    }

    transition(session, SessionState::Closed, Intent::CloseSession);
    session.procedure_id = None;
    session.cursor = 0;
    Ok(NavOutcome::SessionClosed)
}

fn active_procedure(
    session: &Session,
    library: &ProcedureLibrary,
) -> Result<Arc<Procedure>, PipelineError> {
    session
        .procedure_id
        .as_deref()
        .and_then(|id| library.get(id))
        .ok_or_else(|| PipelineError::ProcedureState {
            state: session.state,
            action: "navigate a procedure that is no longer loaded".to_string(),
        })
}

fn transition(session: &mut Session, to: SessionState, trigger: Intent) {
    let from = session.state;
    session.state = to;
    session.touch();
    session.record(SessionEvent::Transition { from, to, trigger });
    tracing::debug!(session = %session.id, %from, %to, trigger = %trigger, "Session transition");
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn library() -> ProcedureLibrary {
        ProcedureLibrary::with_builtin_catalog()
    }

    fn session_in_procedure(library: &ProcedureLibrary) -> Session {
        let mut session = Session::new(Uuid::new_v4());
        navigate(
            &mut session,
            Intent::StartProcedure,
            library,
            Some("valve-check"),
        )
        .expect("start should succeed");
        session
    }

    fn cursor_invariant_holds(session: &Session, library: &ProcedureLibrary) -> bool {
        match session.state {
            SessionState::InProcedure | SessionState::AwaitingConfirmation => {
                let len = session
                    .procedure_id
                    .as_deref()
                    .and_then(|id| library.get(id))
                    .map(|p| p.len())
                    .unwrap_or(0);
                session.cursor < len
            }
            _ => true,
        }
    }

    #[test]
    fn test_start_procedure_moves_idle_to_in_procedure_at_step_zero() {
        let library = library();
        let session = session_in_procedure(&library);

        assert_eq!(session.state, SessionState::InProcedure);
        assert_eq!(session.cursor, 0);
        assert_eq!(session.procedure_id.as_deref(), Some("valve-check"));
    }

    #[test]
    fn test_next_at_last_step_awaits_confirmation_not_error() {
        let library = library();
        let mut session = session_in_procedure(&library);

        // valve-check has 3 steps: two advances land on the last one.
        navigate(&mut session, Intent::NavigateNext, &library, None).unwrap();
        navigate(&mut session, Intent::NavigateNext, &library, None).unwrap();
        assert_eq!(session.cursor, 2);

        let outcome = navigate(&mut session, Intent::NavigateNext, &library, None).unwrap();

        assert!(matches!(outcome, NavOutcome::AwaitingSignOff { .. }));
        assert_eq!(session.state, SessionState::AwaitingConfirmation);
        assert!(cursor_invariant_holds(&session, &library));
    }

    #[test]
    fn test_complete_while_idle_is_rejected_and_state_unchanged() {
        let library = library();
        let mut session = Session::new(Uuid::new_v4());

        let result = navigate(&mut session, Intent::NavigateComplete, &library, None);

        assert!(matches!(
            result,
            Err(PipelineError::ProcedureState { state: SessionState::Idle, .. })
        ));
        assert_eq!(session.state, SessionState::Idle);
        assert!(session.history.is_empty());
    }

    #[test]
    fn test_next_while_idle_is_rejected() {
        let library = library();
        let mut session = Session::new(Uuid::new_v4());

        let result = navigate(&mut session, Intent::NavigateNext, &library, None);
        assert!(matches!(result, Err(PipelineError::ProcedureState { .. })));
        assert_eq!(session.state, SessionState::Idle);
    }

    #[test]
    fn test_repeat_is_idempotent() {
        let library = library();
        let mut session = session_in_procedure(&library);
        navigate(&mut session, Intent::NavigateNext, &library, None).unwrap();

        let state_before = (session.state, session.cursor, session.procedure_id.clone());
        let history_len = session.history.len();

        for _ in 0..5 {
            let outcome = navigate(&mut session, Intent::NavigateRepeat, &library, None).unwrap();
            match outcome {
                NavOutcome::Repeated { step, .. } => assert_eq!(step.index, 1),
                other => panic!("Expected Repeated, got {:?}", other),
            }
        }

        assert_eq!(
            (session.state, session.cursor, session.procedure_id.clone()),
            state_before
        );
        assert_eq!(session.history.len(), history_len);
    }

    #[test]
    fn test_complete_after_sign_off_closes_and_records_summary() {
        let library = library();
        let mut session = session_in_procedure(&library);
        navigate(&mut session, Intent::NavigateNext, &library, None).unwrap();
        navigate(&mut session, Intent::NavigateNext, &library, None).unwrap();
        navigate(&mut session, Intent::NavigateNext, &library, None).unwrap();

        let outcome = navigate(&mut session, Intent::NavigateComplete, &library, None).unwrap();

        match outcome {
            NavOutcome::Completed { procedure_id, summary } => {
                assert_eq!(procedure_id, "valve-check");
                assert!(summary.contains("Valve check"));
            }
            other => panic!("Expected Completed, got {:?}", other),
        }
        assert_eq!(session.state, SessionState::Closed);
        assert!(session
            .history
            .iter()
            .any(|e| matches!(e.event, SessionEvent::ProcedureCompleted { .. })));
    }

    #[test]
    fn test_cancel_returns_to_idle_and_keeps_history() {
        let library = library();
        let mut session = session_in_procedure(&library);
        navigate(&mut session, Intent::NavigateNext, &library, None).unwrap();
        let history_before = session.history.len();

        let outcome = navigate(&mut session, Intent::NavigateCancel, &library, None).unwrap();

        assert!(matches!(
            outcome,
            NavOutcome::Cancelled { had_active_procedure: true }
        ));
        assert_eq!(session.state, SessionState::Idle);
        assert_eq!(session.procedure_id, None);
        assert!(session.history.len() > history_before);
    }

    #[test]
    fn test_cancel_while_awaiting_confirmation_returns_to_idle() {
        let library = library();
        let mut session = session_in_procedure(&library);
        for _ in 0..3 {
            navigate(&mut session, Intent::NavigateNext, &library, None).unwrap();
        }
        assert_eq!(session.state, SessionState::AwaitingConfirmation);

        navigate(&mut session, Intent::NavigateCancel, &library, None).unwrap();
        assert_eq!(session.state, SessionState::Idle);
    }

    #[test]
    fn test_start_while_in_procedure_is_rejected() {
        let library = library();
        let mut session = session_in_procedure(&library);

        let result = navigate(
            &mut session,
            Intent::StartProcedure,
            &library,
            Some("pump-inspection"),
        );

        assert!(matches!(result, Err(PipelineError::ProcedureState { .. })));
        assert_eq!(session.procedure_id.as_deref(), Some("valve-check"));
    }

    #[test]
    fn test_start_unknown_procedure_is_rejected() {
        let library = library();
        let mut session = Session::new(Uuid::new_v4());

        let result = navigate(&mut session, Intent::StartProcedure, &library, Some("no-such"));

        assert!(matches!(result, Err(PipelineError::ProcedureState { .. })));
        assert_eq!(session.state, SessionState::Idle);
    }

    #[test]
    fn test_cursor_invariant_holds_across_full_walk() {
        let library = library();
        let mut session = Session::new(Uuid::new_v4());
        navigate(
            &mut session,
            Intent::StartProcedure,
            &library,
            Some("pump-inspection"),
        )
        .unwrap();

        for _ in 0..10 {
            // Over-walking past the end must never break the invariant.
            let _ = navigate(&mut session, Intent::NavigateNext, &library, None);
            assert!(cursor_invariant_holds(&session, &library));
        }
    }

    #[test]
    fn test_idle_close_goes_directly_to_closed() {
        let library = library();
        let mut session = Session::new(Uuid::new_v4());

        let outcome = navigate(&mut session, Intent::CloseSession, &library, None).unwrap();

        assert!(matches!(outcome, NavOutcome::SessionClosed));
        assert_eq!(session.state, SessionState::Closed);
    }

    #[test]
    fn test_transitions_are_recorded_in_history() {
        let library = library();
        let mut session = session_in_procedure(&library);

        let transitions: Vec<_> = session
            .history
            .iter()
            .filter(|e| matches!(e.event, SessionEvent::Transition { .. }))
            .collect();
        assert_eq!(transitions.len(), 1);

        match &transitions[0].event {
            SessionEvent::Transition { from, to, trigger } => {
                assert_eq!(*from, SessionState::Idle);
                assert_eq!(*to, SessionState::InProcedure);
                assert_eq!(*trigger, Intent::StartProcedure);
            }
            _ => unreachable!(),
        }
    }
}
