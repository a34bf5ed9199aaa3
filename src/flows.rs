//! The five AI flows: generate-problem, check-code, run-code, chatbot and enhance-problem.
//!
//! Every flow follows the same contract:
//! 1) validate the raw request (fails fast, before any network call),
//! 2) render the prompt from the configured templates,
//! 3) call the model in JSON mode,
//! 4) parse and validate the structured output.
//!
//! `*_or_fallback` variants turn upstream failures into a shape-correct
//! fallback value; validation failures are still returned.

use serde::Deserialize;
use tracing::{error, info, instrument, warn};

use crate::config::Prompts;
use crate::domain::{CheckResult, Problem, RunResult, RunStatus, Sender};
use crate::openai::{parse_content, ModelError, OpenAI, Tier};
use crate::util::{fill_template, strip_code_fence};
use crate::validate::{
  ChatbotInput, ChatbotRequest, CheckCodeInput, CheckCodeRequest, EnhanceProblemInput, EnhanceProblemRequest,
  GenerateProblemInput, GenerateProblemRequest, RunCodeInput, RunCodeRequest, ValidationError,
};

pub const CHAT_FALLBACK: &str = "Sorry, I encountered an error. Please try again.";

#[derive(Debug, thiserror::Error)]
pub enum FlowError {
  #[error(transparent)]
  Invalid(#[from] ValidationError),
  #[error(transparent)]
  Upstream(#[from] ModelError),
  #[error("malformed model output: {0}")]
  Malformed(String),
}

impl FlowError {
  pub fn is_invalid(&self) -> bool {
    matches!(self, FlowError::Invalid(_))
  }
}

/// Safe value returned in place of a failed model call.
pub trait Fallback {
  fn fallback() -> Self;
}

impl Fallback for Problem {
  fn fallback() -> Self {
    Problem {
      problem_statement: "Sorry, a problem could not be generated right now. Please try again.".into(),
      expected_output: "Unavailable.".into(),
      code_skeleton: String::new(),
    }
  }
}

impl Fallback for CheckResult {
  fn fallback() -> Self {
    CheckResult {
      feedback: "Sorry, I encountered an error while reviewing your code. Please try again.".into(),
      suggestions: String::new(),
    }
  }
}

impl Fallback for RunResult {
  fn fallback() -> Self {
    RunResult {
      status: RunStatus::Fail,
      output: "Sorry, I encountered an error while analyzing your code. Please try again.".into(),
    }
  }
}

/// Chatbot output.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct ChatAnswer {
  pub answer: String,
}

impl Fallback for ChatAnswer {
  fn fallback() -> Self {
    ChatAnswer { answer: CHAT_FALLBACK.into() }
  }
}

/// Resolve upstream/malformed failures to the fallback; keep validation errors.
pub fn or_fallback<T: Fallback>(result: Result<T, FlowError>) -> Result<T, ValidationError> {
  match result {
    Ok(v) => Ok(v),
    Err(FlowError::Invalid(e)) => Err(e),
    Err(e) => {
      warn!(target: "flow", error = %e, "Flow failed; resolving with fallback");
      Ok(T::fallback())
    }
  }
}

// --- Model output records ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProblemOut {
  #[serde(alias = "problem_statement")]
  problem_statement: String,
  #[serde(alias = "expected_output")]
  expected_output: String,
  #[serde(default, alias = "code_skeleton")]
  code_skeleton: Option<String>,
}

impl ProblemOut {
  fn into_problem(self) -> Result<Problem, FlowError> {
    if self.problem_statement.trim().is_empty() {
      return Err(FlowError::Malformed("problemStatement is empty".into()));
    }
    if self.expected_output.trim().is_empty() {
      return Err(FlowError::Malformed("expectedOutput is empty".into()));
    }
    Ok(Problem {
      problem_statement: self.problem_statement.trim().to_string(),
      expected_output: self.expected_output.trim().to_string(),
      code_skeleton: self.code_skeleton.map(|s| strip_code_fence(&s).to_string()).unwrap_or_default(),
    })
  }
}

/// The shapes a chat answer has been seen in.
#[derive(Deserialize)]
#[serde(untagged)]
enum AnswerShape {
  Answer { answer: String },
  Response { response: String },
  Text(String),
}

/// Normalise chatbot content to one answer string.
fn normalize_answer(content: &str) -> Result<ChatAnswer, FlowError> {
  let answer = match parse_content::<AnswerShape>(content) {
    Ok(AnswerShape::Answer { answer }) | Ok(AnswerShape::Response { response: answer }) | Ok(AnswerShape::Text(answer)) => {
      answer
    }
    // Some models ignore JSON mode; plain prose is still a usable answer.
    Err(_) if !strip_code_fence(content).starts_with('{') => content.to_string(),
    Err(e) => return Err(e.into()),
  };
  let cleaned = answer.replace("**", "").trim().to_string();
  if cleaned.is_empty() {
    return Err(FlowError::Malformed("answer is empty".into()));
  }
  Ok(ChatAnswer { answer: cleaned })
}

// --- Prompt rendering (pure) ---

pub fn render_generate_problem(prompts: &Prompts, input: &GenerateProblemInput) -> String {
  let hints_block = input.hints.as_deref().map(|h| format!("Hints: {}\n", h)).unwrap_or_default();
  fill_template(
    &prompts.generate_problem_user_template,
    &[
      ("topic", &input.topic),
      ("language", input.language.as_str()),
      ("complexity", input.complexity.as_str()),
      ("hints_block", &hints_block),
    ],
  )
}

pub fn render_check_code(prompts: &Prompts, input: &CheckCodeInput) -> String {
  let problem_block = input.problem.as_deref().map(|p| format!("Problem:\n{}\n", p)).unwrap_or_default();
  fill_template(
    &prompts.check_code_user_template,
    &[("language", input.language.as_str()), ("code", &input.code), ("problem_block", &problem_block)],
  )
}

pub fn render_run_code(prompts: &Prompts, input: &RunCodeInput) -> String {
  let expected = if input.expected_output.trim().is_empty() {
    "(not provided; infer it from the problem statement)"
  } else {
    input.expected_output.as_str()
  };
  fill_template(
    &prompts.run_code_user_template,
    &[
      ("language", input.language.as_str()),
      ("code", &input.code),
      ("problem_statement", &input.problem_statement),
      ("expected_output", expected),
    ],
  )
}

pub fn render_chatbot(prompts: &Prompts, input: &ChatbotInput) -> String {
  let language = input.language.as_str();
  let code_block = input
    .code
    .as_deref()
    .map(|c| format!("\nTheir current code is:\n```{}\n{}\n```\n", language, c))
    .unwrap_or_default();
  let history_block = if input.history.is_empty() {
    String::new()
  } else {
    let mut s = String::from("\nThis is the conversation history so far:\n");
    for turn in &input.history {
      let who = match turn.sender {
        Sender::User => "user",
        Sender::Bot => "bot",
      };
      s.push_str(&format!("{}: {}\n", who, turn.text));
    }
    s
  };
  fill_template(
    &prompts.chatbot_user_template,
    &[
      ("language", language),
      ("problem_statement", &input.problem_statement),
      ("code_block", &code_block),
      ("history_block", &history_block),
      ("question", &input.question),
      ("length_instruction", input.response_length.instruction()),
    ],
  )
}

pub fn render_enhance_problem(prompts: &Prompts, input: &EnhanceProblemInput) -> String {
  let expected = if input.expected_output.trim().is_empty() { "(none provided)" } else { input.expected_output.as_str() };
  fill_template(
    &prompts.enhance_problem_user_template,
    &[
      ("problem_statement", &input.problem_statement),
      ("expected_output", expected),
      ("language", input.language.as_str()),
      ("complexity", input.complexity.as_str()),
      ("topic", &input.topic),
    ],
  )
}

/// The flows, bound to a model client and the prompt set.
pub struct Flows {
  client: OpenAI,
  prompts: Prompts,
}

impl Flows {
  pub fn new(client: OpenAI, prompts: Prompts) -> Self {
    Self { client, prompts }
  }

  #[instrument(level = "info", target = "flow", skip_all)]
  pub async fn generate_problem(&self, req: GenerateProblemRequest) -> Result<Problem, FlowError> {
    let input = req.validate()?;
    let user = render_generate_problem(&self.prompts, &input);
    let out: ProblemOut = self
      .client
      .chat_json(Tier::Strong, &self.prompts.generate_problem_system, &user, 0.9)
      .await
      .map_err(|e| log_upstream("generate-problem", e))?;
    let problem = out.into_problem()?;
    info!(
      target: "flow",
      topic = %input.topic,
      language = input.language.as_str(),
      complexity = input.complexity.as_str(),
      statement_len = problem.problem_statement.len(),
      has_skeleton = !problem.code_skeleton.is_empty(),
      "Problem generated"
    );
    Ok(problem)
  }

  #[instrument(level = "info", target = "flow", skip_all)]
  pub async fn check_code(&self, req: CheckCodeRequest) -> Result<CheckResult, FlowError> {
    let input = req.validate()?;
    let user = render_check_code(&self.prompts, &input);
    let out: CheckResult = self
      .client
      .chat_json(Tier::Fast, &self.prompts.check_code_system, &user, 0.2)
      .await
      .map_err(|e| log_upstream("check-code", e))?;
    if out.feedback.trim().is_empty() {
      return Err(FlowError::Malformed("feedback is empty".into()));
    }
    info!(target: "flow", language = input.language.as_str(), code_len = input.code.len(), "Code checked");
    Ok(out)
  }

  #[instrument(level = "info", target = "flow", skip_all)]
  pub async fn run_code(&self, req: RunCodeRequest) -> Result<RunResult, FlowError> {
    let input = req.validate()?;
    let user = render_run_code(&self.prompts, &input);
    let out: RunResult = self
      .client
      .chat_json(Tier::Strong, &self.prompts.run_code_system, &user, 0.1)
      .await
      .map_err(|e| log_upstream("run-code", e))?;
    if out.output.trim().is_empty() {
      return Err(FlowError::Malformed("output is empty".into()));
    }
    info!(target: "flow", language = input.language.as_str(), status = out.status.as_str(), "Code run evaluated");
    Ok(out)
  }

  #[instrument(level = "info", target = "flow", skip_all)]
  pub async fn ask_chatbot(&self, req: ChatbotRequest) -> Result<ChatAnswer, FlowError> {
    let input = req.validate()?;
    let user = render_chatbot(&self.prompts, &input);
    let content = self
      .client
      .chat_json_raw(Tier::Fast, &self.prompts.chatbot_system, &user, 0.3)
      .await
      .map_err(|e| log_upstream("chatbot", e))?;
    let answer = normalize_answer(&content)?;
    info!(
      target: "flow",
      history = input.history.len(),
      response_length = input.response_length.as_str(),
      answer_len = answer.answer.len(),
      "Chatbot answered"
    );
    Ok(answer)
  }

  #[instrument(level = "info", target = "flow", skip_all)]
  pub async fn enhance_problem(&self, req: EnhanceProblemRequest) -> Result<Problem, FlowError> {
    let input = req.validate()?;
    let user = render_enhance_problem(&self.prompts, &input);
    let out: ProblemOut = self
      .client
      .chat_json(Tier::Strong, &self.prompts.enhance_problem_system, &user, 0.2)
      .await
      .map_err(|e| log_upstream("enhance-problem", e))?;
    let problem = out.into_problem()?;
    info!(target: "flow", topic = %input.topic, statement_len = problem.problem_statement.len(), "Imported problem enhanced");
    Ok(problem)
  }

  pub async fn generate_problem_or_fallback(&self, req: GenerateProblemRequest) -> Result<Problem, ValidationError> {
    or_fallback(self.generate_problem(req).await)
  }

  pub async fn check_code_or_fallback(&self, req: CheckCodeRequest) -> Result<CheckResult, ValidationError> {
    or_fallback(self.check_code(req).await)
  }

  pub async fn run_code_or_fallback(&self, req: RunCodeRequest) -> Result<RunResult, ValidationError> {
    or_fallback(self.run_code(req).await)
  }

  pub async fn ask_chatbot_or_fallback(&self, req: ChatbotRequest) -> Result<ChatAnswer, ValidationError> {
    or_fallback(self.ask_chatbot(req).await)
  }

  pub async fn enhance_problem_or_fallback(&self, req: EnhanceProblemRequest) -> Result<Problem, ValidationError> {
    or_fallback(self.enhance_problem(req).await)
  }
}

fn log_upstream(flow: &'static str, e: ModelError) -> FlowError {
  error!(target: "flow", flow, error = %e, "Model call failed");
  FlowError::Upstream(e)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::{ChatTurn, Complexity, Language, ResponseLength};
  use crate::testutil::{completion_json, scripted_reply, unreachable_flows, user_prompt, MockModel};
  use axum::http::StatusCode;
  use serde_json::json;

  fn fib_request() -> GenerateProblemRequest {
    GenerateProblemRequest {
      topic: Some("Fibonacci Sequence".into()),
      language: Some("java".into()),
      complexity: Some("easy".into()),
      hints: None,
    }
  }

  #[test]
  fn generate_prompt_mentions_hints_only_when_present() {
    let prompts = Prompts::default();
    let mut input = GenerateProblemInput {
      topic: "Recursion".into(),
      language: Language::Python,
      complexity: Complexity::Hard,
      hints: None,
    };
    let without = render_generate_problem(&prompts, &input);
    assert!(without.contains("Topic: Recursion"));
    assert!(without.contains("Complexity: hard"));
    assert!(!without.contains("Hints:"));

    input.hints = Some("use memoization".into());
    assert!(render_generate_problem(&prompts, &input).contains("Hints: use memoization"));
  }

  #[test]
  fn chatbot_prompt_replays_history_in_order() {
    let input = ChatbotInput {
      question: "What next?".into(),
      problem_statement: "Reverse a string.".into(),
      code: None,
      language: Language::C,
      history: vec![
        ChatTurn { sender: Sender::User, text: "first".into() },
        ChatTurn { sender: Sender::Bot, text: "second".into() },
      ],
      response_length: ResponseLength::Short,
    };
    let prompt = render_chatbot(&Prompts::default(), &input);
    let first = prompt.find("user: first").unwrap();
    let second = prompt.find("bot: second").unwrap();
    assert!(first < second);
    assert!(prompt.contains("1-2 sentences"));
    assert!(!prompt.contains("Their current code is"));
  }

  #[test]
  fn answers_are_normalised_from_every_shape() {
    assert_eq!(normalize_answer(r#"{"answer":"a"}"#).unwrap().answer, "a");
    assert_eq!(normalize_answer(r#"{"response":"**b**"}"#).unwrap().answer, "b");
    assert_eq!(normalize_answer(r#""c""#).unwrap().answer, "c");
    assert_eq!(normalize_answer("Just prose.").unwrap().answer, "Just prose.");
    assert!(normalize_answer(r#"{"other": 1}"#).is_err());
    assert!(normalize_answer(r#"{"answer":"  "}"#).is_err());
  }

  #[tokio::test]
  async fn generate_problem_returns_non_empty_problem() {
    let mock = MockModel::start(scripted_reply).await;
    let problem = mock.flows().generate_problem(fib_request()).await.unwrap();
    assert!(!problem.problem_statement.is_empty());
    assert!(!problem.expected_output.is_empty());
    assert!(!problem.code_skeleton.is_empty());

    let req = &mock.requests()[0];
    assert_eq!(req["model"], "strong-model");
    assert!(user_prompt(req).contains("Topic: Fibonacci Sequence"));
  }

  #[tokio::test]
  async fn missing_fields_never_reach_the_model() {
    let mock = MockModel::start(scripted_reply).await;
    let flows = mock.flows();

    let err = flows.generate_problem(GenerateProblemRequest { topic: None, ..fib_request() }).await.unwrap_err();
    assert!(err.is_invalid());
    let err = flows.check_code(CheckCodeRequest { code: None, language: Some("java".into()), problem: None }).await.unwrap_err();
    assert!(err.is_invalid());
    let err = flows
      .run_code(RunCodeRequest { code: Some("x".into()), language: None, ..Default::default() })
      .await
      .unwrap_err();
    assert!(err.is_invalid());
    let err = flows.ask_chatbot(ChatbotRequest::default()).await.unwrap_err();
    assert!(err.is_invalid());
    let err = flows.enhance_problem(EnhanceProblemRequest::default()).await.unwrap_err();
    assert!(err.is_invalid());
    // Fallback variants still fail fast on invalid input.
    assert!(flows.ask_chatbot_or_fallback(ChatbotRequest::default()).await.is_err());

    assert_eq!(mock.hits(), 0);
  }

  #[tokio::test]
  async fn upstream_failure_resolves_with_fallbacks() {
    let flows = unreachable_flows().await;

    let problem = flows.generate_problem_or_fallback(fib_request()).await.unwrap();
    assert_eq!(problem, Problem::fallback());

    let check = flows
      .check_code_or_fallback(CheckCodeRequest { code: Some("int x;".into()), language: Some("c".into()), problem: None })
      .await
      .unwrap();
    assert_eq!(check, CheckResult::fallback());

    let run = flows
      .run_code_or_fallback(RunCodeRequest {
        code: Some("print(1)".into()),
        language: Some("python".into()),
        problem_statement: Some("Print 1".into()),
        expected_output: None,
      })
      .await
      .unwrap();
    assert_eq!(run.status, RunStatus::Fail);

    let chat = flows
      .ask_chatbot_or_fallback(ChatbotRequest {
        question: Some("help".into()),
        problem_statement: Some(String::new()),
        language: Some("java".into()),
        ..Default::default()
      })
      .await
      .unwrap();
    assert_eq!(chat.answer, CHAT_FALLBACK);

    let enhanced = flows
      .enhance_problem_or_fallback(EnhanceProblemRequest {
        topic: Some("Two Sum".into()),
        language: Some("java".into()),
        complexity: Some("easy".into()),
        problem_statement: Some("raw".into()),
        expected_output: None,
      })
      .await
      .unwrap();
    assert_eq!(enhanced, Problem::fallback());
  }

  #[tokio::test]
  async fn run_status_outside_vocabulary_is_malformed() {
    let mock =
      MockModel::start(|_| (StatusCode::OK, completion_json(json!({"status": "excellent", "output": "ok"})))).await;
    let err = mock
      .flows()
      .run_code(RunCodeRequest {
        code: Some("x".into()),
        language: Some("java".into()),
        problem_statement: Some("p".into()),
        expected_output: Some("e".into()),
      })
      .await
      .unwrap_err();
    assert!(matches!(err, FlowError::Upstream(ModelError::Parse(_))));
  }

  #[tokio::test]
  async fn empty_problem_fields_are_malformed() {
    let mock = MockModel::start(|_| {
      (StatusCode::OK, completion_json(json!({"problemStatement": "x", "expectedOutput": " "})))
    })
    .await;
    let err = mock.flows().generate_problem(fib_request()).await.unwrap_err();
    assert!(matches!(err, FlowError::Malformed(_)));
  }

  #[tokio::test]
  async fn generated_skeleton_then_run_yields_documented_status() {
    let mock = MockModel::start(scripted_reply).await;
    let flows = mock.flows();
    let problem = flows.generate_problem(fib_request()).await.unwrap();
    let run = flows
      .run_code(RunCodeRequest {
        code: Some(problem.code_skeleton.clone()),
        language: Some("java".into()),
        problem_statement: Some(problem.problem_statement.clone()),
        expected_output: Some(problem.expected_output.clone()),
      })
      .await
      .unwrap();
    assert!(matches!(run.status, RunStatus::Correct | RunStatus::Halfway | RunStatus::Moderate | RunStatus::Fail));
    assert_eq!(run.status, RunStatus::Halfway);
  }
}
