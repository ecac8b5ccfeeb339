//! Minimal one-request demo task: forwards `data` as the user message and
//! returns the backend's text verbatim. Used by the crate's own tests and
//! registered in `dispatcher-run` as a network-free smoke-test task.

use dispatcher_common::backend::Request;
use serde_json::{json, Value};

use crate::task::{FlowStep, GeneratorFlow, GeneratorInput, GeneratorTask, Task, TaskContext};

pub struct EchoFlow {
    data: Value,
}

impl EchoFlow {
    pub fn new(data: Value) -> Self {
        Self { data }
    }
}

impl GeneratorFlow for EchoFlow {
    fn start(&mut self) -> FlowStep {
        let text = self
            .data
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let content = json!({"messages": [{"role": "user", "content": text}]});
        FlowStep::YieldOne(Request::new(content))
    }

    fn resume(&mut self, input: GeneratorInput) -> FlowStep {
        let GeneratorInput::Single(response) = input else {
            return FlowStep::Done(json!({"error": "expected a single response"}));
        };
        FlowStep::Done(json!({"echo": response.get_text()}))
    }
}

pub fn new_echo_task(data: Value, context: TaskContext) -> Box<dyn Task> {
    Box::new(GeneratorTask::new(EchoFlow::new(data), context))
}
