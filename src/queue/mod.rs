pub mod poller;
pub mod task;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::error::AppError;
use crate::server::AppState;

use task::{acts_immediately, Task, Trigger};

/// Pending steps, serial per issue id and concurrent across issue ids.
#[derive(Default)]
pub struct TaskQueue {
    /// Pending tasks per issue id (processed sequentially).
    queues: HashMap<String, VecDeque<Task>>,
    /// Issue ids with a step currently running.
    in_flight: HashSet<String>,
    /// Notification channel for the processor.
    notify: Option<tokio::sync::mpsc::UnboundedSender<()>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the processor's wake-up channel. Tasks queued before it was
    /// installed are signalled immediately.
    pub fn set_notifier(&mut self, tx: tokio::sync::mpsc::UnboundedSender<()>) {
        self.notify = Some(tx);
        if self.pending_count() > 0 {
            self.wake();
        }
    }

    fn wake(&self) {
        if let Some(ref tx) = self.notify {
            let _ = tx.send(());
        }
    }

    /// Queue a step. A step already pending for the same issue absorbs it.
    pub fn enqueue(&mut self, task: Task) -> bool {
        let queue = self.queues.entry(task.issue_id().to_string()).or_default();
        if queue.iter().any(|pending| pending.issue_id() == task.issue_id()) {
            tracing::debug!(task = %task.description(), "Step already pending");
            return false;
        }

        tracing::info!(task = %task.description(), "Enqueuing task");
        queue.push_back(task);
        self.wake();
        true
    }

    /// Take the next task for an issue with no step running, marking it in flight.
    pub fn take_next(&mut self) -> Option<Task> {
        let issue_id = self
            .queues
            .iter()
            .find(|(id, q)| !q.is_empty() && !self.in_flight.contains(*id))
            .map(|(id, _)| id.clone())?;

        let task = self.queues.get_mut(&issue_id).and_then(|q| q.pop_front());
        if self.queues.get(&issue_id).is_some_and(|q| q.is_empty()) {
            self.queues.remove(&issue_id);
        }
        if task.is_some() {
            self.in_flight.insert(issue_id);
        }
        task
    }

    /// Mark an issue's step finished so its next pending task can run.
    pub fn complete(&mut self, issue_id: &str) {
        self.in_flight.remove(issue_id);
        if self.queues.contains_key(issue_id) {
            self.wake();
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn pending_count(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }
}

async fn run_task(state: &AppState, task: &Task) {
    let Task::Step { issue_id, .. } = task;
    let before = state
        .orchestrator
        .context()
        .store
        .load(issue_id)
        .ok()
        .map(|s| s.status);

    match state.orchestrator.step(issue_id).await {
        Ok(workflow) => {
            tracing::info!(task = %task.description(), status = %workflow.status, "Task completed");
            let moved = before.is_some_and(|status| status != workflow.status);
            if moved && acts_immediately(workflow.status) {
                let mut queue = state.task_queue.write().await;
                queue.enqueue(Task::step(issue_id.clone(), Trigger::FollowUp));
            }
        }
        Err(AppError::StateLocked(_)) => {
            tracing::debug!(task = %task.description(), "Workflow busy, dropping task");
        }
        Err(e) if e.is_transient() => {
            tracing::warn!(task = %task.description(), error = %e, "Task failed, retrying on next poll");
        }
        Err(e) => {
            tracing::error!(task = %task.description(), category = e.category(), error = %e, "Task failed");
        }
    }
}

/// Run the background queue processor.
pub async fn run_queue_processor(state: Arc<AppState>) {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<()>();

    {
        let mut queue = state.task_queue.write().await;
        queue.set_notifier(tx);
    }

    tracing::info!("Queue processor started");

    while rx.recv().await.is_some() {
        // Start every task whose issue is idle
        loop {
            let task = {
                let mut queue = state.task_queue.write().await;
                queue.take_next()
            };

            let Some(task) = task else {
                break;
            };

            tracing::info!(task = %task.description(), "Processing task");
            let task_state = Arc::clone(&state);
            tokio::spawn(async move {
                run_task(&task_state, &task).await;
                task_state.task_queue.write().await.complete(task.issue_id());
            });
        }
    }
}
