use chrono::Utc;
use tracing::warn;

use windlass_core::config::ModelConfig;
use windlass_core::traits::Oracle;
use windlass_core::types::{FinishedWorkflow, WorkflowMessage};

use crate::prompts::Prompts;
use crate::state::WorkflowState;

/// Produces the terminal report. The run is considered complete once this
/// node is reached: oracle failures and unparseable replies degrade to the
/// fallback report instead of failing the run.
pub async fn run_finish(
    oracle: &dyn Oracle,
    model: &ModelConfig,
    prompts: &Prompts,
    state: &WorkflowState,
    namespace: &str,
) -> FinishedWorkflow {
    let prompt = prompts.finish.render(&[
        ("messages", &state.transcript()),
        ("current_time", &Utc::now().to_rfc3339()),
    ]);

    let reply = match oracle
        .invoke(model, vec![WorkflowMessage::system(prompt)], &[])
        .await
    {
        Ok(reply) => reply,
        Err(e) => {
            warn!(namespace = %namespace, error = %e, "finish oracle failed, using fallback report");
            return FinishedWorkflow::fallback();
        }
    };

    match parse_finished(&reply.content) {
        Some(report) => report,
        None => {
            warn!(namespace = %namespace, "finish reply was not parseable, using fallback report");
            FinishedWorkflow::fallback()
        }
    }
}

/// Parses a finish report from raw JSON or a JSON object embedded in
/// surrounding text.
pub(crate) fn parse_finished(content: &str) -> Option<FinishedWorkflow> {
    if let Ok(report) = serde_json::from_str(content.trim()) {
        return Some(report);
    }
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&content[start..=end]).ok()
}
