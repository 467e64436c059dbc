//! Provider orchestration — race the top-ranked backends, fall back serially
//!
//! Each invocation is independent and reentrant; the orchestrator owns no
//! long-lived state. The top `race_width` providers run concurrently under
//! a per-provider timeout; the first result whose confidence clears the
//! floor wins and every outstanding racer is aborted. A lost race falls
//! through the remaining providers strictly in priority order. An
//! exhausted list yields `Unavailable`, never a hang — the global pipeline
//! deadline around the whole command is enforced by the caller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;

use foreman_core::config::OrchestratorConfig;
use foreman_core::error::PipelineError;
use foreman_core::models::{ProviderErrorKind, ProviderResult};
use foreman_core::providers::{ProviderAdapter, ProviderError};

/// Outcome of one orchestrated request.
#[derive(Debug, Clone)]
pub enum Orchestrated {
    Answer(ProviderResult),
    /// Every configured provider failed, timed out, or stayed below the
    /// confidence floor. The attempts are kept for logging only.
    Unavailable { attempts: Vec<ProviderResult> },
}

/// Race the ranked providers for one prompt.
///
/// # Constraints
/// * Acceptance is completion-order: the first success at or above
///   `confidence_floor` wins.
/// * Results that completed in the same drain are tie-broken by higher
///   confidence, then by higher priority rank.
/// * Losing in-flight calls are aborted and cannot produce side effects
///   afterwards.
pub async fn run_provider_race(
    prompt: &str,
    providers: &[Arc<dyn ProviderAdapter>],
    config: &OrchestratorConfig,
) -> Orchestrated {
    let mut attempts: Vec<ProviderResult> = Vec::new();

    if providers.is_empty() {
        tracing::warn!("No providers configured — request cannot be served");
        return Orchestrated::Unavailable { attempts };
    }

    let budget = Duration::from_millis(config.provider_timeout_ms);
    let race_width = config.race_width.clamp(1, providers.len());

    let mut set: JoinSet<(usize, ProviderResult)> = JoinSet::new();
    for (rank, adapter) in providers[..race_width].iter().enumerate() {
        let adapter = Arc::clone(adapter);
        let prompt = prompt.to_string();
        set.spawn(async move { (rank, call_provider(adapter, &prompt, budget).await) });
    }

    while let Some(joined) = set.join_next().await {
        let (rank, result) = match joined {
            Ok(pair) => pair,
            Err(e) if e.is_cancelled() => continue,
            Err(e) => {
                tracing::error!(error = %e, "Racer task panicked");
                continue;
            }
        };

        if qualifies(&result, config.confidence_floor) {
            // Drain whatever else already finished in this round so a
            // simultaneous success is resolved by confidence, then rank.
            let mut winner = (rank, result);
            while let Some(Ok((other_rank, other))) = set.try_join_next() {
                if qualifies(&other, config.confidence_floor)
                    && (other.confidence > winner.1.confidence
                        || (other.confidence == winner.1.confidence && other_rank < winner.0))
                {
                    attempts.push(std::mem::replace(&mut winner, (other_rank, other)).1);
                } else {
                    attempts.push(other);
                }
            }
            set.abort_all();
            tracing::info!(
                provider = %winner.1.provider_id,
                latency_ms = winner.1.latency_ms,
                confidence = winner.1.confidence,
                "Provider race won"
            );
            return Orchestrated::Answer(winner.1);
        }

        tracing::warn!(
            error = %recoverable_error(&result),
            confidence = result.confidence,
            "Raced provider did not qualify"
        );
        attempts.push(result);
    }

    // Serial fallback, strictly in priority order.
    for adapter in &providers[race_width..] {
        let result = call_provider(Arc::clone(adapter), prompt, budget).await;

        if qualifies(&result, config.confidence_floor) {
            tracing::info!(
                provider = %result.provider_id,
                latency_ms = result.latency_ms,
                "Fallback provider answered"
            );
            return Orchestrated::Answer(result);
        }

        tracing::warn!(
            error = %recoverable_error(&result),
            "Fallback provider did not qualify"
        );
        attempts.push(result);
    }

    tracing::error!(attempts = attempts.len(), "All providers exhausted");
    Orchestrated::Unavailable { attempts }
}

fn qualifies(result: &ProviderResult, floor: f32) -> bool {
    result.success && result.confidence >= floor
}

/// The recoverable pipeline error one non-qualifying attempt amounts to.
/// Recoverable means exactly that the loop continues to the next provider.
fn recoverable_error(result: &ProviderResult) -> PipelineError {
    match result.error {
        Some(ProviderErrorKind::Timeout) => PipelineError::ProviderTimeout {
            provider: result.provider_id.clone(),
        },
        Some(kind) => PipelineError::Provider {
            provider: result.provider_id.clone(),
            message: format!("{:?} error", kind),
        },
        None => PipelineError::Provider {
            provider: result.provider_id.clone(),
            message: format!("confidence {:.2} below floor", result.confidence),
        },
    }
}

async fn call_provider(
    adapter: Arc<dyn ProviderAdapter>,
    prompt: &str,
    budget: Duration,
) -> ProviderResult {
    let started = Instant::now();

    match tokio::time::timeout(budget, adapter.complete(prompt)).await {
        Ok(Ok(reply)) => ProviderResult::success(
            adapter.name(),
            started.elapsed().as_millis() as u64,
            reply.text,
            reply.confidence,
        ),
        Ok(Err(e)) => ProviderResult::failure(
            adapter.name(),
            started.elapsed().as_millis() as u64,
            error_kind(&e),
        ),
        Err(_) => ProviderResult::failure(
            adapter.name(),
            started.elapsed().as_millis() as u64,
            ProviderErrorKind::Timeout,
        ),
    }
}

fn error_kind(error: &ProviderError) -> ProviderErrorKind {
    match error {
        ProviderError::Http(_) => ProviderErrorKind::Transport,
        ProviderError::Api { .. } => ProviderErrorKind::Api,
        ProviderError::EmptyCompletion => ProviderErrorKind::Malformed,
        ProviderError::MissingApiKey(_) => ProviderErrorKind::Api,
    }
}

// ============================================================================
// TESTS
// ============================================================================
