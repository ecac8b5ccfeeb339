//! The task manager's scheduler: runs up to `W` in-flight backend requests
//! across a dynamic pool of active tasks, until the task source is
//! exhausted and every active task has finished.
//!
//! Grounded on `examples/original_source/dispatcher/taskmanager/taskmanager.py`'s
//! `TaskManager.process_tasks` loop (reap → schedule → pull → save →
//! terminate). The original runs one scheduler thread plus a
//! `ThreadPoolExecutor`; this expansion's natural async-Rust analogue is one
//! scheduler task polling a `FuturesUnordered` pool of backend calls, per
//! spec.md §4.5's grounding note — no OS thread pool is needed since the
//! backend call itself is `async`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::FutureExt;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};

use crate::backend::BackendManager;
use crate::task::Task;
use crate::tasksource::TaskSource;

/// Tunables for [`TaskManager`]. Grounded on `TaskManager.__init__`'s
/// `num_workers`/`max_active_tasks` parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskManagerConfig {
    /// `W`: the number of backend requests allowed in flight at once.
    pub workers: usize,
    /// `M`: the soft cap on active tasks. Exceeding it only logs a one-shot
    /// warning — no task is ever rejected.
    pub max_active_tasks: usize,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_active_tasks: 1000,
        }
    }
}

pub struct TaskManager {
    config: TaskManagerConfig,
    warned_about_task_limit: AtomicBool,
}

type InFlight = FuturesUnordered<std::pin::Pin<Box<dyn std::future::Future<Output = (u64, dispatcher_common::backend::Response)> + Send>>>;

impl TaskManager {
    pub fn new(config: TaskManagerConfig) -> Self {
        Self {
            config,
            warned_about_task_limit: AtomicBool::new(false),
        }
    }

    /// Drive `source` to exhaustion, running every task's requests against
    /// `backend`. Returns once every active task has finished and the
    /// source will never produce another.
    pub async fn run(&self, mut source: impl TaskSource, backend: Arc<dyn BackendManager>) {
        tracing::info!(workers = self.config.workers, "task manager started");

        let mut tasks: HashMap<u64, Box<dyn Task>> = HashMap::new();
        let mut order: Vec<u64> = Vec::new();
        let mut next_id: u64 = 0;
        let mut inflight: InFlight = FuturesUnordered::new();

        loop {
            // 1. Reap whatever has already completed, without blocking.
            while let Some(Some((task_id, response))) = inflight.next().now_or_never() {
                if let Some(task) = tasks.get_mut(&task_id) {
                    task.process_result(response);
                }
            }

            // 2. Fill idle slots by scanning active tasks in round-robin order.
            loop {
                if inflight.len() >= self.config.workers {
                    break;
                }
                let Some((task_id, request)) = order.iter().find_map(|&id| {
                    let task = tasks.get_mut(&id)?;
                    if task.is_done() {
                        return None;
                    }
                    task.get_next_request().map(|req| (id, req))
                }) else {
                    break;
                };
                let backend = backend.clone();
                inflight.push(
                    async move {
                        let response = backend.process(request).await;
                        (task_id, response)
                    }
                    .boxed(),
                );
            }

            // 3. Pull more tasks if there's room and the source isn't dry.
            if inflight.len() < self.config.workers
                && order.len() < self.config.max_active_tasks
                && !source.is_exhausted()
            {
                let new_tasks = source.get_next_tasks().await;
                if !new_tasks.is_empty() {
                    if order.len() + new_tasks.len() > self.config.max_active_tasks
                        && !self.warned_about_task_limit.swap(true, Ordering::Relaxed)
                    {
                        tracing::warn!(
                            limit = self.config.max_active_tasks,
                            "exceeding suggested maximum active tasks limit"
                        );
                    }
                    tracing::info!(count = new_tasks.len(), total = order.len() + new_tasks.len(), "added new tasks");
                    for task in new_tasks {
                        let id = next_id;
                        next_id += 1;
                        order.push(id);
                        tasks.insert(id, task);
                    }
                }
            }

            // 4. Save and drop tasks that finished.
            let mut i = 0;
            while i < order.len() {
                let id = order[i];
                let done = tasks.get(&id).map(|t| t.is_done()).unwrap_or(true);
                if done {
                    order.remove(i);
                    if let Some(mut task) = tasks.remove(&id) {
                        let (result, context) = task.get_result();
                        source.save_task_result(result, context).await;
                        tracing::info!(task_id = id, "saved task result");
                    }
                } else {
                    i += 1;
                }
            }

            // 5. Terminate once nothing is active, nothing is in flight, and
            // the source will never produce more.
            if order.is_empty() && inflight.is_empty() && source.is_exhausted() {
                tracing::info!("all work completed; exiting");
                break;
            }

            // Avoid a busy spin: wait for the next backend completion, but
            // wake up periodically anyway so newly-ready tasks or a
            // previously-exhausted-looking source get re-checked.
            if inflight.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            } else {
                tokio::select! {
                    maybe = inflight.next() => {
                        if let Some((task_id, response)) = maybe {
                            if let Some(task) = tasks.get_mut(&task_id) {
                                task.process_result(response);
                            }
                        }
                    }
                    _ = tokio::time::sleep(Duration::from_millis(50)) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::task::{FlowStep, GeneratorFlow, GeneratorInput, GeneratorTask, TaskContext};
    use crate::tasksource::TaskSource;
    use async_trait::async_trait;
    use dispatcher_common::backend::Request;
    use serde_json::{json, Value};
    use std::collections::VecDeque;

    struct OneShotFlow {
        data: Value,
    }

    impl GeneratorFlow for OneShotFlow {
        fn start(&mut self) -> FlowStep {
            FlowStep::YieldOne(Request::new(json!({"messages": [{"role": "user", "content": self.data["text"]}]})))
        }
        fn resume(&mut self, input: GeneratorInput) -> FlowStep {
            let GeneratorInput::Single(resp) = input else { unreachable!() };
            FlowStep::Done(json!({"echo": resp.get_text()}))
        }
    }

    struct VecTaskSource {
        remaining: VecDeque<Value>,
        batch_size: usize,
        saved: Vec<Value>,
    }

    #[async_trait]
    impl TaskSource for VecTaskSource {
        async fn get_next_tasks(&mut self) -> Vec<Box<dyn Task>> {
            let mut out = Vec::new();
            while out.len() < self.batch_size {
                let Some(data) = self.remaining.pop_front() else { break };
                out.push(Box::new(GeneratorTask::new(
                    OneShotFlow { data },
                    TaskContext::File { line_number: 0 },
                )) as Box<dyn Task>);
            }
            out
        }

        async fn save_task_result(&mut self, result: Value, _context: TaskContext) {
            self.saved.push(result);
        }

        fn is_exhausted(&self) -> bool {
            self.remaining.is_empty()
        }
    }

    #[tokio::test]
    async fn drives_every_task_to_completion() {
        let manager = TaskManager::new(TaskManagerConfig {
            workers: 2,
            max_active_tasks: 100,
        });
        let backend: Arc<dyn BackendManager> = Arc::new(MockBackend::new());

        // Capture saved results via a shared `Arc<Mutex<...>>` since `run`
        // consumes the source by value.
        let saved = Arc::new(std::sync::Mutex::new(Vec::new()));
        struct Wrapper {
            inner: VecTaskSource,
            saved: Arc<std::sync::Mutex<Vec<Value>>>,
        }
        #[async_trait]
        impl TaskSource for Wrapper {
            async fn get_next_tasks(&mut self) -> Vec<Box<dyn Task>> {
                self.inner.get_next_tasks().await
            }
            async fn save_task_result(&mut self, result: Value, context: TaskContext) {
                self.saved.lock().unwrap().push(result.clone());
                self.inner.save_task_result(result, context).await;
            }
            fn is_exhausted(&self) -> bool {
                self.inner.is_exhausted()
            }
        }

        let wrapper = Wrapper {
            inner: VecTaskSource {
                remaining: (0..5).map(|i| json!({"text": format!("msg-{i}")})).collect(),
                batch_size: 2,
                saved: Vec::new(),
            },
            saved: saved.clone(),
        };
        manager.run(wrapper, backend).await;

        assert_eq!(saved.lock().unwrap().len(), 5);
    }
}
