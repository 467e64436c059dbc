//! Intent & entity extraction — transcript to structured `Command`
//!
//! A pure function of the transcript plus a compiled grammar: no session
//! state is read or mutated here. Unparseable input maps to `free_form`
//! with low confidence rather than failing; only an empty or non-text
//! transcript is an error.

use std::collections::HashMap;

use chrono::Utc;
use regex::Regex;
use uuid::Uuid;

use foreman_core::config::ExtractorConfig;
use foreman_core::error::PipelineError;
use foreman_core::models::{Command, Intent};

struct Rule {
    intent: Intent,
    pattern: Regex,
    confidence: f32,
}

/// Compiled intent grammar. Build once at startup, share by reference.
pub struct IntentGrammar {
    rules: Vec<Rule>,
    asset_re: Regex,
    priority_re: Regex,
    procedure_by_id_re: Regex,
    procedure_by_name_re: Regex,
    free_form_confidence: f32,
}

impl IntentGrammar {
    pub fn new(config: &ExtractorConfig) -> Self {
        // First match wins, so navigation rules sit above the broader
        // task/query rules.
        let rules = vec![
            rule(
                Intent::NavigateRepeat,
                r"(?i)^\s*(repeat( that)?|say (that|it) again|what was that|once more)\b",
                0.95,
            ),
            rule(
                Intent::NavigateNext,
                r"(?i)^\s*(next( step)?|go on|continue|move on|okay next)\b",
                0.95,
            ),
            rule(
                Intent::NavigateCancel,
                r"(?i)\b(cancel|abort|stop)\b.*\b(procedure|checklist|guide)\b|^\s*(cancel|abort)\s*$",
                0.9,
            ),
            rule(
                Intent::NavigateComplete,
                r"(?i)^\s*(complete|completed|finish(ed)?|done|sign (it )?off)\b",
                0.9,
            ),
            rule(
                Intent::CloseSession,
                r"(?i)\b(goodbye|good bye|close (the )?session|sign out|that('s| is) all)\b",
                0.9,
            ),
            rule(
                Intent::StartProcedure,
                r"(?i)\b(start|begin|walk me through|guide me through)\b.*\b(procedure|checklist|inspection)\b",
                0.9,
            ),
            rule(
                Intent::CreateTask,
                r"(?i)\b(create|open|raise|log)\b.*\b(work order|task|ticket)\b",
                0.9,
            ),
            rule(
                Intent::QueryStatus,
                r"(?i)\b(status|condition|how is|is .+ (running|working|down))\b",
                0.85,
            ),
        ];

        Self {
            rules,
            asset_re: Regex::new(r"(?i)\b([A-Za-z]{2,8}-\d{1,6})\b").expect("asset pattern"),
            priority_re: Regex::new(r"(?i)\b(critical|high|medium|low)\b").expect("priority pattern"),
            procedure_by_id_re: Regex::new(
                r"(?i)\b(?:procedure|checklist)\s+([A-Za-z0-9][A-Za-z0-9_-]+)\s*$",
            )
            .expect("procedure id pattern"),
            procedure_by_name_re: Regex::new(
                r"(?i)\b(?:start|begin|walk me through|guide me through)\s+(?:the\s+)?([a-z][a-z ]*?)\s+(?:procedure|checklist|inspection)\b",
            )
            .expect("procedure name pattern"),
            free_form_confidence: config.free_form_confidence,
        }
    }

    /// Parse one transcript into a `Command`.
    ///
    /// `recognizer_confidence` is the upstream speech recognizer's score,
    /// when it reports one; it scales the grammar rule confidence.
    pub fn extract(
        &self,
        transcript: &str,
        session_id: Uuid,
        recognizer_confidence: Option<f32>,
    ) -> Result<Command, PipelineError> {
        let trimmed = transcript.trim();
        if trimmed.is_empty() || !trimmed.chars().any(|c| c.is_alphanumeric()) {
            return Err(PipelineError::Extraction);
        }

        let (intent, base_confidence) = self
            .rules
            .iter()
            .find(|r| r.pattern.is_match(trimmed))
            .map(|r| (r.intent, r.confidence))
            .unwrap_or((Intent::FreeForm, self.free_form_confidence));

        let confidence =
            (base_confidence * recognizer_confidence.unwrap_or(1.0)).clamp(0.0, 1.0);

        Ok(Command {
            id: Uuid::new_v4(),
            session_id,
            transcript: trimmed.to_string(),
            intent,
            entities: self.entities(trimmed),
            confidence,
            created_at: Utc::now(),
        })
    }

    fn entities(&self, transcript: &str) -> HashMap<String, String> {
        let mut entities = HashMap::new();

        if let Some(cap) = self.asset_re.captures(transcript) {
            entities.insert("asset_id".to_string(), cap[1].to_uppercase());
        }

        if let Some(cap) = self.priority_re.captures(transcript) {
            entities.insert("priority".to_string(), cap[1].to_lowercase());
        }

        // "start procedure pump-inspection" names the template directly;
        // "start the pump inspection procedure" names it by title.
        if let Some(cap) = self.procedure_by_id_re.captures(transcript) {
            entities.insert("procedure_id".to_string(), cap[1].to_lowercase());
        } else if let Some(cap) = self.procedure_by_name_re.captures(transcript) {
            let slug = cap[1].trim().to_lowercase().replace(' ', "-");
            entities.insert("procedure_id".to_string(), slug);
        }

        entities
    }
}

fn rule(intent: Intent, pattern: &str, confidence: f32) -> Rule {
    Rule {
        intent,
        pattern: Regex::new(pattern).expect("grammar pattern"),
        confidence,
    }
}

// ============================================================================
// TESTS
// ============================================================================
