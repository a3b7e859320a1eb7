use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

/// Outcome of one fanned-out task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome<T> {
    Ok(T),
    Err(String),
    TimedOut,
}

impl<T> TaskOutcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, TaskOutcome::Ok(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            TaskOutcome::Ok(value) => Some(value),
            _ => None,
        }
    }
}

/// Runs `tasks` with at most `max_concurrency` in flight and a per-task
/// deadline. The returned outcomes are in input order regardless of
/// completion order; a panicking task yields `Err`, not a crash. The deadline
/// covers task execution only, not time spent waiting for a slot.
pub async fn fan_out<T, F>(
    tasks: Vec<F>,
    max_concurrency: usize,
    task_timeout: Duration,
) -> Vec<TaskOutcome<T>>
where
    F: Future<Output = Result<T, String>> + Send + 'static,
    T: Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));

    let handles: Vec<_> = tasks
        .into_iter()
        .map(|task| {
            let semaphore = semaphore.clone();
            tokio::spawn(async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return TaskOutcome::Err("worker pool closed".to_string()),
                };
                match tokio::time::timeout(task_timeout, task).await {
                    Ok(Ok(value)) => TaskOutcome::Ok(value),
                    Ok(Err(reason)) => TaskOutcome::Err(reason),
                    Err(_) => TaskOutcome::TimedOut,
                }
            })
        })
        .collect();

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        outcomes.push(match handle.await {
            Ok(outcome) => outcome,
            Err(join_err) => TaskOutcome::Err(format!("task panicked: {join_err}")),
        });
    }
    outcomes
}
