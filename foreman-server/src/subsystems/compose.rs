//! Response composition — one spoken reply out of whatever path ran
//!
//! The composer is the only place reply text is produced. It applies the
//! clarification gate: when the effective confidence of the chosen path is
//! below the threshold, the reply is a question, carries no action, and
//! the caller must not have advanced any procedure state (navigation gates
//! before the state machine runs).

use std::sync::Arc;

use foreman_core::config::ComposerConfig;
use foreman_core::error::PipelineError;
use foreman_core::models::{
    AssetDescriptor, BusinessAction, Command, MemoryRecord, Reply,
};
use uuid::Uuid;

use super::orchestrate::Orchestrated;
use super::procedure::NavOutcome;

/// Canned reply when every backend is exhausted. Safe: promises nothing.
const UNAVAILABLE_TEXT: &str = "I'm sorry — the assistant service is not responding right now. \
     Nothing was changed. Please try again in a moment.";

/// Build the provider prompt from the command plus retrieved context.
pub fn build_prompt(
    command: &Command,
    memory: &[Arc<MemoryRecord>],
    asset: Option<&AssetDescriptor>,
) -> String {
    let mut prompt = String::new();

    if let Some(asset) = asset {
        prompt.push_str(&format!(
            "Asset {}: {} — status {}, located at {}.\n",
            asset.asset_id, asset.name, asset.status, asset.location
        ));
    }

    if !memory.is_empty() {
        prompt.push_str("Relevant notes:\n");
        for record in memory {
            prompt.push_str("- ");
            prompt.push_str(&record.text);
            prompt.push('\n');
        }
    }

    prompt.push_str("Technician said: ");
    prompt.push_str(&command.transcript);
    prompt
}

/// Compose the reply for a task command (no generative reasoning).
pub fn compose_action_reply(command: &Command, config: &ComposerConfig) -> Reply {
    if command.confidence < config.clarification_threshold {
        return Reply::clarification(
            "I think you want a work order, but I'm not sure I heard it right — could you repeat that?",
            command.confidence,
        );
    }

    let (Some(asset_id), Some(priority)) = (command.entity("asset_id"), command.entity("priority"))
    else {
        let missing = if command.entity("asset_id").is_none() {
            "which asset this is for"
        } else {
            "what priority it should be"
        };
        return Reply::clarification(
            format!("I can create that work order — tell me {}.", missing),
            command.confidence,
        );
    };

    Reply::spoken(
        format!(
            "Creating a {} priority work order for {}.",
            priority, asset_id
        ),
        command.confidence,
    )
    .with_action(BusinessAction::CreateWorkOrder {
        asset_id: asset_id.to_string(),
        priority: priority.to_string(),
        summary: command.transcript.clone(),
    })
}

/// Compose the reply for a generative command from the orchestrator outcome.
pub fn compose_generative_reply(
    orchestrated: &Orchestrated,
    config: &ComposerConfig,
) -> Reply {
    match orchestrated {
        Orchestrated::Answer(result) => {
            if result.confidence < config.clarification_threshold {
                Reply::clarification(
                    "I'm not fully sure I understood — could you rephrase that?",
                    result.confidence,
                )
            } else {
                Reply::spoken(result.text.clone(), result.confidence)
            }
        }
        Orchestrated::Unavailable { .. } => Reply::spoken(UNAVAILABLE_TEXT, 0.0),
    }
}

/// Compose the reply for a navigation outcome (or its corrective error).
pub fn compose_navigation_reply(
    session_id: Uuid,
    confidence: f32,
    result: &Result<NavOutcome, PipelineError>,
) -> Reply {
    match result {
        Ok(NavOutcome::Started { procedure, step }) => {
            step_reply(
                format!(
                    "Starting {}, {} steps, about {} minutes. Step 1 of {}: {}",
                    procedure.title,
                    procedure.len(),
                    procedure.estimated_minutes,
                    procedure.len(),
                    step.instruction
                ),
                step.is_safety_critical(),
                confidence,
            )
        }
        Ok(NavOutcome::Advanced { procedure, step }) => step_reply(
            format!(
                "Step {} of {}: {}",
                step.index + 1,
                procedure.len(),
                step.instruction
            ),
            step.is_safety_critical(),
            confidence,
        ),
        Ok(NavOutcome::Repeated { procedure, step }) => step_reply(
            format!(
                "Again — step {} of {}: {}",
                step.index + 1,
                procedure.len(),
                step.instruction
            ),
            step.is_safety_critical(),
            confidence,
        ),
        Ok(NavOutcome::AwaitingSignOff { procedure }) => Reply::spoken(
            format!(
                "That was the last step of {}. Say 'complete' to sign off, or 'cancel' to discard.",
                procedure.title
            ),
            confidence,
        ),
        Ok(NavOutcome::Completed {
            procedure_id,
            summary,
        }) => Reply::spoken(format!("{} Nice work.", summary), confidence).with_action(
            BusinessAction::CompleteProcedure {
                session_id,
                procedure_id: procedure_id.clone(),
                summary: summary.clone(),
            },
        ),
        Ok(NavOutcome::Cancelled {
            had_active_procedure,
        }) => {
            let text = if *had_active_procedure {
                "Procedure cancelled. We're back where we started."
            } else {
                "Nothing to cancel — no procedure is running."
            };
            Reply::spoken(text, confidence)
        }
        Ok(NavOutcome::SessionClosed) => Reply::spoken("Session closed. Goodbye.", confidence),
        Err(e) => compose_error_reply(e),
    }
}

/// Convert a per-command error into its spoken reply. Nothing fails
/// silently: every terminal failure has a specific message, and the
/// session keeps its prior valid state.
pub fn compose_error_reply(error: &PipelineError) -> Reply {
    match error {
        PipelineError::Extraction => Reply::clarification(
            "I didn't catch any words there — could you say that again?",
            0.0,
        ),
        PipelineError::RecognitionLowConfidence { confidence } => Reply::clarification(
            "I'm not confident I heard that correctly — please repeat it.",
            *confidence,
        ),
        PipelineError::ProcedureState { state, action } => Reply::spoken(
            format!(
                "I can't {} right now — the session is {}. Say 'start procedure' to begin one, or 'cancel' to reset.",
                action, state
            ),
            1.0,
        ),
        PipelineError::ServiceUnavailable => Reply::spoken(UNAVAILABLE_TEXT, 0.0),
        PipelineError::ProviderTimeout { .. }
        | PipelineError::Provider { .. } => Reply::spoken(UNAVAILABLE_TEXT, 0.0),
        PipelineError::MemoryStore(_) => Reply::spoken(
            "I hit a problem reading my notes, so I answered without them.",
            0.5,
        ),
    }
}

fn step_reply(text: String, safety_critical: bool, confidence: f32) -> Reply {
    let text = if safety_critical {
        format!("Caution. {}", text)
    } else {
        text
    };
    let reply = Reply::spoken(text, confidence);
    if safety_critical {
        reply.deliberate()
    } else {
        reply
    }
}

// ============================================================================
// TESTS
// ============================================================================
