use tracing::{info, warn};

use windlass_core::config::{ModelConfig, PruningParameters};
use windlass_core::event::EventBus;
use windlass_core::traits::Oracle;
use windlass_core::types::{WorkflowEvent, WorkflowMessage};

use crate::prompts::Prompts;
use crate::state::WorkflowState;

pub const SUMMARY_PREFIX: &str = "Summary of conversation earlier:";

/// Whether the history has outgrown the summary window.
pub fn window_exceeded(state: &WorkflowState, pruning: &PruningParameters) -> bool {
    state.messages.len() > pruning.max_window_summary
}

/// Folds the oldest eligible slice of history into one synthetic summary
/// entry, repeating until the history is back under the window. The
/// first message stays as anchor; the prior summary, if one exists, sits
/// right after it and is folded along with the slice.
///
/// Each fold consumes at most `max_queue_size` entries, so a single pass
/// that appended a large batch takes several folds; the step still ends
/// below the window. On oracle failure the step is cut short: nothing is
/// dropped without a summary entry replacing it.
pub async fn run_message_summary(
    oracle: &dyn Oracle,
    model: &ModelConfig,
    prompts: &Prompts,
    pruning: &PruningParameters,
    state: &mut WorkflowState,
    bus: &EventBus,
    namespace: &str,
) {
    let keep_recent = pruning.max_window_summary.saturating_sub(3);

    loop {
        let before = state.messages.len();
        if before <= keep_recent + 1 {
            return;
        }
        // Fold messages[1..fold_end], capped per fold by max_queue_size.
        let fold_end = (before - keep_recent).min(1 + pruning.max_queue_size);
        if fold_end <= 1 {
            return;
        }

        let slice = state.messages[1..fold_end]
            .iter()
            .map(|m| m.describe())
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = prompts.summary.render(&[("messages", &slice)]);

        let reply = match oracle
            .invoke(model, vec![WorkflowMessage::system(prompt)], &[])
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(namespace = %namespace, error = %e, "summary oracle failed, keeping history");
                return;
            }
        };

        let summary = WorkflowMessage::assistant(format!("{} {}", SUMMARY_PREFIX, reply.content));
        let tail = state.messages.split_off(fold_end);
        state.messages.truncate(1);
        state.messages.push(summary);
        state.messages.extend(tail);

        let after = state.messages.len();
        info!(namespace = %namespace, before, after, "message history compacted");
        bus.publish(WorkflowEvent::SummaryCompacted {
            namespace: namespace.to_string(),
            before,
            after,
        });

        if !window_exceeded(state, pruning) || after >= before {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use windlass_test_utils::{FailingOracle, StaticOracle};

    fn state_with(n: usize) -> WorkflowState {
        let messages = (0..n)
            .map(|i| WorkflowMessage::human(format!("message {}", i)))
            .collect();
        WorkflowState::new(messages)
    }

    fn pruning(window: usize, cap: usize) -> PruningParameters {
        PruningParameters {
            max_window_summary: window,
            max_queue_size: cap,
        }
    }

    #[tokio::test]
    async fn test_summary_reduces_below_window() {
        let oracle = StaticOracle::new("we did things");
        let bus = Arc::new(EventBus::default());
        let pruning = pruning(10, 50);
        let mut state = state_with(11);
        assert!(window_exceeded(&state, &pruning));

        run_message_summary(
            &oracle,
            &ModelConfig::default(),
            &Prompts::default(),
            &pruning,
            &mut state,
            &bus,
            "test",
        )
        .await;

        // 11 -> anchor + summary + 7 most recent = 9
        assert_eq!(state.messages.len(), 9);
        assert!(state.messages.len() < pruning.max_window_summary);
        assert!(state.messages[1].content.starts_with(SUMMARY_PREFIX));
        // Anchor and the newest entries survive untouched
        assert_eq!(state.messages[0].content, "message 0");
        assert_eq!(state.messages.last().unwrap().content, "message 10");
    }

    #[tokio::test]
    async fn test_prior_summary_is_folded_in() {
        let oracle = StaticOracle::new("round two");
        let bus = Arc::new(EventBus::default());
        let pruning = pruning(10, 50);
        let mut state = state_with(11);

        run_message_summary(
            &oracle,
            &ModelConfig::default(),
            &Prompts::default(),
            &pruning,
            &mut state,
            &bus,
            "test",
        )
        .await;
        for i in 11..20 {
            state.messages.push(WorkflowMessage::human(format!("message {}", i)));
        }
        run_message_summary(
            &oracle,
            &ModelConfig::default(),
            &Prompts::default(),
            &pruning,
            &mut state,
            &bus,
            "test",
        )
        .await;

        // Exactly one summary entry remains after the second fold
        let summaries = state
            .messages
            .iter()
            .filter(|m| m.content.starts_with(SUMMARY_PREFIX))
            .count();
        assert_eq!(summaries, 1);
        assert!(state.messages.len() < pruning.max_window_summary);
    }

    #[tokio::test]
    async fn test_large_backlog_folds_until_below_window() {
        let oracle = StaticOracle::new("partial");
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let pruning = pruning(10, 10);
        let mut state = state_with(40);

        run_message_summary(
            &oracle,
            &ModelConfig::default(),
            &Prompts::default(),
            &pruning,
            &mut state,
            &bus,
            "test",
        )
        .await;

        // Each fold consumes at most max_queue_size entries, so the
        // backlog takes several: 40 -> 31 -> 22 -> 13 -> 9
        assert_eq!(state.messages.len(), 9);
        assert!(state.messages.len() < pruning.max_window_summary);
        let summaries = state
            .messages
            .iter()
            .filter(|m| m.content.starts_with(SUMMARY_PREFIX))
            .count();
        assert_eq!(summaries, 1);

        let mut compactions = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let WorkflowEvent::SummaryCompacted { before, after, .. } = event {
                compactions.push((before, after));
            }
        }
        assert_eq!(compactions, vec![(40, 31), (31, 22), (22, 13), (13, 9)]);
    }

    #[tokio::test]
    async fn test_oracle_failure_keeps_history() {
        let bus = Arc::new(EventBus::default());
        let pruning = pruning(10, 50);
        let mut state = state_with(11);

        run_message_summary(
            &FailingOracle,
            &ModelConfig::default(),
            &Prompts::default(),
            &pruning,
            &mut state,
            &bus,
            "test",
        )
        .await;

        assert_eq!(state.messages.len(), 11);
    }
}
