//! Port of `examples/original_source/examples/example_task.py`'s
//! `CompareTwoResponsesTask`: generate two candidate answers, have the model
//! judge which is better, and return the preferred/dispreferred pair.
//!
//! The original expresses this as a Python generator with two `yield`
//! points. Rust has no stable generator syntax, so it's hand-compiled into
//! an explicit `state` enum driven by `start`/`resume` — the state a
//! generator's local variables would otherwise hold across a `yield`
//! becomes fields on the enum variant instead.

use dispatcher_common::backend::Request;
use serde_json::{json, Value};

use crate::task::{FlowStep, GeneratorFlow, GeneratorInput, GeneratorTask, Task, TaskContext};

const GEN_TEMPERATURE: f64 = 0.7;
const GEN_TOP_P: f64 = 0.95;
const GEN_MAX_TOKENS: u32 = 512;

const JUDGE_TEMPERATURE: f64 = 0.0;
const JUDGE_TOP_P: f64 = 1.0;
const JUDGE_MAX_TOKENS: u32 = 256;

enum State {
    Init,
    AwaitingCandidates {
        messages: Value,
    },
    AwaitingJudge {
        messages: Value,
        text_a: String,
        text_b: String,
    },
}

pub struct CompareTwoResponsesFlow {
    data: Value,
    state: State,
}

impl CompareTwoResponsesFlow {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            state: State::Init,
        }
    }
}

fn generation_request(messages: &Value) -> Value {
    json!({
        "messages": messages,
        "temperature": GEN_TEMPERATURE,
        "top_p": GEN_TOP_P,
        "max_tokens": GEN_MAX_TOKENS,
    })
}

fn user_prompt_of(messages: &Value) -> String {
    messages
        .as_array()
        .and_then(|msgs| {
            msgs.iter()
                .find(|m| m.get("role").and_then(Value::as_str) == Some("user"))
        })
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .unwrap_or("(unknown)")
        .to_string()
}

impl GeneratorFlow for CompareTwoResponsesFlow {
    fn start(&mut self) -> FlowStep {
        let messages = self
            .data
            .get("messages")
            .cloned()
            .unwrap_or_else(|| json!([]));
        let request_body = generation_request(&messages);
        self.state = State::AwaitingCandidates {
            messages: messages.clone(),
        };
        FlowStep::YieldBatch(vec![
            Request::new(request_body.clone()),
            Request::new(request_body),
        ])
    }

    fn resume(&mut self, input: GeneratorInput) -> FlowStep {
        match std::mem::replace(&mut self.state, State::Init) {
            State::AwaitingCandidates { messages } => {
                let GeneratorInput::Batch(responses) = input else {
                    return FlowStep::Done(json!({"error": "expected two candidate responses"}));
                };
                if responses.len() != 2 {
                    return FlowStep::Done(json!({"error": "expected exactly two candidate responses"}));
                }
                let text_a = responses[0].get_text();
                let text_b = responses[1].get_text();

                let user_prompt = user_prompt_of(&messages);
                let judge_messages = json!([
                    {
                        "role": "system",
                        "content": "You are a strict judge. Reply with 'A' or 'B' to indicate which response is better.",
                    },
                    {
                        "role": "user",
                        "content": format!(
                            "### User prompt\n{user_prompt}\n\n### Response A\n{text_a}\n\n### Response B\n{text_b}\n\nWhich response is better? Reply with just 'A' or 'B'."
                        ),
                    },
                ]);
                let judge_body = json!({
                    "messages": judge_messages,
                    "temperature": JUDGE_TEMPERATURE,
                    "top_p": JUDGE_TOP_P,
                    "max_tokens": JUDGE_MAX_TOKENS,
                });

                self.state = State::AwaitingJudge {
                    messages,
                    text_a,
                    text_b,
                };
                FlowStep::YieldOne(Request::new(judge_body))
            }
            State::AwaitingJudge {
                messages,
                text_a,
                text_b,
            } => {
                let GeneratorInput::Single(response) = input else {
                    return FlowStep::Done(json!({"error": "expected a single judge response"}));
                };
                let judge_text = response.get_text().trim().to_uppercase();
                let winner_is_a = judge_text.starts_with('A');
                let (preferred_text, dispreferred_text) = if winner_is_a {
                    (text_a, text_b)
                } else {
                    (text_b, text_a)
                };
                FlowStep::Done(json!({
                    "messages": messages,
                    "preferred_text": preferred_text,
                    "dispreferred_text": dispreferred_text,
                }))
            }
            State::Init => FlowStep::Done(json!({"error": "resumed before yielding anything"})),
        }
    }
}

pub fn new_compare_two_responses_task(data: Value, context: TaskContext) -> Box<dyn Task> {
    Box::new(GeneratorTask::new(CompareTwoResponsesFlow::new(data), context))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatcher_common::backend::Response;

    fn chat(text: &str, context: Option<Value>) -> Response {
        Response::success(
            json!({"choices": [{"message": {"content": text}}]}),
            context,
        )
    }

    #[test]
    fn full_flow_picks_judged_winner() {
        let data = json!({"messages": [{"role": "user", "content": "what is rust?"}]});
        let mut task = GeneratorTask::new(CompareTwoResponsesFlow::new(data), TaskContext::File { line_number: 0 });

        let req_a = task.get_next_request().unwrap();
        let req_b = task.get_next_request().unwrap();
        assert!(task.get_next_request().is_none());

        task.process_result(chat("answer B is better", req_b.context));
        assert!(!task.is_done());
        task.process_result(chat("answer A", req_a.context));

        let judge_req = task.get_next_request().expect("judge request ready");
        assert!(!task.is_done());

        task.process_result(chat("B", judge_req.context));
        assert!(task.is_done());

        let (result, _) = task.get_result();
        assert_eq!(result["preferred_text"], "answer B is better");
        assert_eq!(result["dispreferred_text"], "answer A");
    }
}
