use std::sync::Arc;

use crate::queue::task::{Task, Trigger};
use crate::server::AppState;

/// Enqueue a step for every open workflow, now and then every poll interval.
/// The first tick also resumes workflows left open by a restart.
pub async fn run_poller(state: Arc<AppState>) {
    let mut ticker = tokio::time::interval(state.config.poll_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    tracing::info!(interval_secs = state.config.review.poll_interval_secs, "Poller started");

    loop {
        ticker.tick().await;
        poll_once(&state).await;
    }
}

/// One sweep over the store. Returns how many steps were enqueued.
pub async fn poll_once(state: &AppState) -> usize {
    let workflows = match state.orchestrator.context().store.list() {
        Ok(workflows) => workflows,
        Err(e) => {
            tracing::error!(error = %e, "Failed to list workflows");
            return 0;
        }
    };

    let mut queue = state.task_queue.write().await;
    let enqueued = workflows
        .iter()
        .filter(|w| !w.is_terminal())
        .filter(|w| queue.enqueue(Task::step(w.issue_id.clone(), Trigger::Poll)))
        .count();

    tracing::debug!(open = enqueued, "Poll sweep finished");
    enqueued
}
