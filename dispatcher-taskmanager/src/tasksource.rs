//! Task sources: pluggable providers of tasks, feeding the task manager and
//! receiving its results. Two implementations of one contract, grounded on
//! `examples/original_source/dispatcher/taskmanager/tasksource/{base,file,dispatcher}.py`.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dispatcher_client::{BackoffPolicy, WorkClient};
use dispatcher_common::wire::{WorkItem, WorkStatus};
use dispatcher_common::DispatcherError;
use serde_json::Value;

use crate::task::{Task, TaskContext, TaskFactory};

/// Source of tasks and destination for their results. The scheduler in
/// [`crate::manager::TaskManager`] is the sole caller.
#[async_trait]
pub trait TaskSource: Send {
    /// Fetch up to the source's internal batch size worth of new tasks.
    /// Returns an empty vec if none are available right now (which may or
    /// may not mean the source is exhausted — check [`Self::is_exhausted`]).
    async fn get_next_tasks(&mut self) -> Vec<Box<dyn Task>>;

    /// Persist a completed task's result and context.
    async fn save_task_result(&mut self, result: Value, context: TaskContext);

    /// True once no new tasks will ever become available.
    fn is_exhausted(&self) -> bool;
}

/// Reads one task per input line, writes one result per output line.
/// Grounded on `FileTaskSource` in `tasksource/file.py`.
pub struct FileTaskSource {
    input: BufReader<File>,
    output: File,
    factory: TaskFactory,
    batch_size: usize,
    line_number: u64,
    exhausted: bool,
}

impl FileTaskSource {
    pub fn open(
        input_path: &Path,
        output_path: &Path,
        factory: TaskFactory,
        batch_size: usize,
    ) -> Result<Self, DispatcherError> {
        let input = BufReader::new(File::open(input_path)?);
        let output = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(output_path)?;
        Ok(Self {
            input,
            output,
            factory,
            batch_size,
            line_number: 0,
            exhausted: false,
        })
    }
}

#[async_trait]
impl TaskSource for FileTaskSource {
    async fn get_next_tasks(&mut self) -> Vec<Box<dyn Task>> {
        if self.exhausted {
            return Vec::new();
        }

        let mut tasks = Vec::new();
        let mut line = String::new();
        while tasks.len() < self.batch_size {
            line.clear();
            let read = match self.input.read_line(&mut line) {
                Ok(n) => n,
                Err(err) => {
                    tracing::error!(error = %err, "error reading input file; treating as exhausted");
                    self.exhausted = true;
                    break;
                }
            };
            if read == 0 {
                tracing::info!("reached end of input file");
                self.exhausted = true;
                break;
            }

            let line_number = self.line_number;
            self.line_number += 1;
            let trimmed = line.trim_end_matches(['\n', '\r']);
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<Value>(trimmed) {
                Ok(data) => {
                    let context = TaskContext::File { line_number };
                    tasks.push((self.factory)(data, context));
                }
                Err(source) => {
                    let error = DispatcherError::MalformedInputRecord { line: line_number, source };
                    tracing::error!(line_number, %error, "skipping malformed input line");
                }
            }
        }

        if !tasks.is_empty() {
            tracing::info!(count = tasks.len(), "created new tasks from input file");
        }
        tasks
    }

    async fn save_task_result(&mut self, result: Value, context: TaskContext) {
        let line_number = match context {
            TaskContext::File { line_number } => line_number,
            TaskContext::Dispatcher { .. } => {
                tracing::error!("file task source received a dispatcher-style context; ignoring");
                return;
            }
        };
        if let Err(err) = writeln!(self.output, "{result}") {
            tracing::error!(line_number, error = %err, "error writing task result to output file");
            return;
        }
        if let Err(err) = self.output.flush() {
            tracing::error!(line_number, error = %err, "error flushing output file");
        }
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

/// Pulls tasks from a dispatcher coordinator over RPC and reports their
/// results back to it. Grounded on `DispatcherTaskSource` in
/// `tasksource/dispatcher.py`.
pub struct DispatcherTaskSource {
    client: WorkClient,
    factory: TaskFactory,
    batch_size: usize,
    exhausted: bool,
    backoff: BackoffPolicy,
    attempt: u32,
    next_attempt_at: Instant,
}

impl DispatcherTaskSource {
    pub fn new(server: impl AsRef<str>, factory: TaskFactory, batch_size: usize) -> Self {
        Self {
            client: WorkClient::new(server),
            factory,
            batch_size,
            exhausted: false,
            backoff: BackoffPolicy::default(),
            attempt: 0,
            next_attempt_at: Instant::now(),
        }
    }
}

#[async_trait]
impl TaskSource for DispatcherTaskSource {
    async fn get_next_tasks(&mut self) -> Vec<Box<dyn Task>> {
        if self.exhausted || Instant::now() < self.next_attempt_at {
            return Vec::new();
        }

        let resp = self.client.get_work(self.batch_size).await;
        match resp.status {
            WorkStatus::Ok => {
                self.attempt = 0;
                let mut tasks = Vec::new();
                for item in resp.items {
                    match serde_json::from_str::<Value>(&item.content) {
                        Ok(data) => {
                            let context = TaskContext::Dispatcher {
                                work_id: item.work_id,
                            };
                            tasks.push((self.factory)(data, context));
                        }
                        Err(err) => {
                            tracing::error!(
                                work_id = item.work_id,
                                error = %err,
                                "error parsing JSON for work item; reporting error back"
                            );
                            let error_result =
                                serde_json::json!({ "error": format!("failed to parse JSON: {err}") });
                            self.client
                                .submit_results(vec![WorkItem {
                                    work_id: item.work_id,
                                    content: item.content,
                                    result: Some(error_result.to_string()),
                                }])
                                .await;
                        }
                    }
                }
                if !tasks.is_empty() {
                    tracing::info!(count = tasks.len(), "created new tasks from dispatcher");
                }
                tasks
            }
            WorkStatus::AllWorkComplete => {
                tracing::info!("dispatcher reports all work is complete");
                self.exhausted = true;
                Vec::new()
            }
            WorkStatus::Retry => {
                let retry_in = resp.retry_in.unwrap_or(5);
                self.next_attempt_at = Instant::now() + Duration::from_secs(retry_in);
                Vec::new()
            }
            WorkStatus::ServerUnavailable => {
                let delay = self.backoff.delay_for(self.attempt);
                self.attempt = self.attempt.saturating_add(1);
                tracing::debug!(attempt = self.attempt, delay_ms = delay.as_millis() as u64, "backing off");
                self.next_attempt_at = Instant::now() + delay;
                Vec::new()
            }
        }
    }

    async fn save_task_result(&mut self, result: Value, context: TaskContext) {
        let work_id = match context {
            TaskContext::Dispatcher { work_id } => work_id,
            TaskContext::File { .. } => {
                tracing::error!("dispatcher task source received a file-style context; ignoring");
                return;
            }
        };
        let item = WorkItem {
            work_id,
            content: String::new(),
            result: Some(result.to_string()),
        };
        let resp = self.client.submit_results(vec![item]).await;
        if resp.status != WorkStatus::Ok {
            tracing::warn!(work_id, "failed to submit result back to dispatcher");
        }
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::GeneratorTask;
    use crate::tasks::echo::EchoFlow;

    fn echo_factory(data: Value, context: TaskContext) -> Box<dyn Task> {
        Box::new(GeneratorTask::new(EchoFlow::new(data), context))
    }

    #[tokio::test]
    async fn file_source_reads_tasks_and_writes_results() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.jsonl");
        let output = dir.path().join("out.jsonl");
        std::fs::write(&input, "{\"text\":\"a\"}\n{\"text\":\"b\"}\n").unwrap();

        let mut source = FileTaskSource::open(&input, &output, echo_factory, 10).unwrap();
        let tasks = source.get_next_tasks().await;
        assert_eq!(tasks.len(), 2);
        assert!(source.is_exhausted());

        for mut task in tasks {
            while !task.is_done() {
                if let Some(req) = task.get_next_request() {
                    let resp = dispatcher_common::backend::Response::success(
                        serde_json::json!({"choices": [{"message": {"content": "echoed"}}]}),
                        req.context,
                    );
                    task.process_result(resp);
                }
            }
            let (result, context) = task.get_result();
            source.save_task_result(result, context).await;
        }

        let contents = std::fs::read_to_string(&output).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[tokio::test]
    async fn file_source_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.jsonl");
        let output = dir.path().join("out.jsonl");
        std::fs::write(&input, "not json\n{\"text\":\"ok\"}\n").unwrap();

        let mut source = FileTaskSource::open(&input, &output, echo_factory, 10).unwrap();
        let tasks = source.get_next_tasks().await;
        assert_eq!(tasks.len(), 1);
    }
}
