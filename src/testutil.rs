//! Test helpers: a scripted stand-in for the hosted model.
//!
//! `MockModel` serves `POST /chat/completions` on an ephemeral port, records
//! every request body and answers with whatever the reply closure returns.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use crate::config::{ModelConfig, Prompts};
use crate::flows::Flows;
use crate::openai::OpenAI;

type Reply = Arc<dyn Fn(&Value) -> (StatusCode, Value) + Send + Sync>;
type Delay = Arc<dyn Fn(&Value) -> Duration + Send + Sync>;

#[derive(Clone)]
struct MockState {
  reply: Reply,
  delay: Delay,
  seen: Arc<Mutex<Vec<Value>>>,
}

pub struct MockModel {
  pub base_url: String,
  seen: Arc<Mutex<Vec<Value>>>,
}

impl MockModel {
  pub async fn start<F>(reply: F) -> Self
  where
    F: Fn(&Value) -> (StatusCode, Value) + Send + Sync + 'static,
  {
    Self::start_with_delay(reply, |_| Duration::ZERO).await
  }

  /// Like `start`, but holds each answer back for `delay(request)`.
  pub async fn start_with_delay<F, D>(reply: F, delay: D) -> Self
  where
    F: Fn(&Value) -> (StatusCode, Value) + Send + Sync + 'static,
    D: Fn(&Value) -> Duration + Send + Sync + 'static,
  {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let state = MockState { reply: Arc::new(reply), delay: Arc::new(delay), seen: seen.clone() };
    let app = Router::new().route("/chat/completions", post(handle)).with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock model");
    let addr = listener.local_addr().expect("mock addr");
    tokio::spawn(async move {
      let _ = axum::serve(listener, app).await;
    });
    Self { base_url: format!("http://{}", addr), seen }
  }

  /// Bodies received so far, in order.
  pub fn requests(&self) -> Vec<Value> {
    self.seen.lock().expect("mock lock").clone()
  }

  pub fn hits(&self) -> usize {
    self.seen.lock().expect("mock lock").len()
  }

  pub fn client(&self) -> OpenAI {
    OpenAI::new(&model_config(&self.base_url)).expect("client")
  }

  pub fn flows(&self) -> Flows {
    Flows::new(self.client(), Prompts::default())
  }
}

async fn handle(State(state): State<MockState>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
  let (status, value) = (state.reply)(&body);
  let delay = (state.delay)(&body);
  state.seen.lock().expect("mock lock").push(body);
  if !delay.is_zero() {
    tokio::time::sleep(delay).await;
  }
  (status, Json(value))
}

pub fn model_config(base_url: &str) -> ModelConfig {
  ModelConfig {
    api_key: "test-key".into(),
    base_url: base_url.into(),
    fast_model: "fast-model".into(),
    strong_model: "strong-model".into(),
    timeout: Duration::from_secs(5),
  }
}

/// An address nobody listens on: every call fails at the transport level.
pub async fn unreachable_flows() -> Flows {
  let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
  let addr = listener.local_addr().expect("addr");
  drop(listener);
  let client = OpenAI::new(&model_config(&format!("http://{}", addr))).expect("client");
  Flows::new(client, Prompts::default())
}

/// Wrap message content in a chat.completions envelope.
pub fn completion(content: &str) -> Value {
  json!({
    "choices": [{ "message": { "role": "assistant", "content": content } }],
    "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 }
  })
}

/// Same, with a JSON value serialized as the content.
pub fn completion_json(content: Value) -> Value {
  completion(&content.to_string())
}

/// The user prompt of a recorded request.
pub fn user_prompt(request: &Value) -> String {
  request["messages"][1]["content"].as_str().unwrap_or_default().to_string()
}

/// Answer each flow by recognising its prompt. Good enough for scenario tests.
pub fn scripted_reply(request: &Value) -> (StatusCode, Value) {
  let user = user_prompt(request);
  let content = if user.contains("Transform raw content") {
    json!({
      "problemStatement": "**PROBLEM STATEMENT:**\nReturn the indices of two numbers that add up to target.",
      "expectedOutput": "**EXPECTED OUTPUT:**\nInput: [2,7,11,15], 9\nOutput: [0,1]",
      "codeSkeleton": "class Solution {\n    int[] twoSum(int[] nums, int target) {\n    }\n}"
    })
  } else if user.contains("Generate a coding problem") {
    json!({
      "problemStatement": "**PROBLEM STATEMENT:**\nPrint the first n Fibonacci numbers.",
      "expectedOutput": "For n = 5: 0 1 1 2 3",
      "codeSkeleton": "public class Main {\n    public static void main(String[] args) {\n        // TODO\n    }\n}"
    })
  } else if user.contains("as if you had executed it") {
    json!({ "status": "🟡 HALFWAY", "output": "**Status:** 🟡 HALFWAY\n**Key Result:** Compiles but prints nothing." })
  } else if user.contains("only code quality") {
    json!({ "feedback": "Readable overall.", "suggestions": "Extract the loop into a method." })
  } else {
    json!({ "answer": "Think about the two previous values." })
  };
  (StatusCode::OK, completion_json(content))
}
