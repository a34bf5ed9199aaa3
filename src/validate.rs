//! Request validation: raw (all-optional) request records → typed flow inputs.
//!
//! Raw records keep every field optional so that a missing field is reported
//! here with a readable message instead of a serde decode error. Validation
//! collects every problem before failing and never partially succeeds.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::{ChatTurn, Complexity, Language, ResponseLength, Sender, UnknownVariant};
use crate::util::non_blank;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldIssue {
  pub field: String,
  pub message: String,
}

/// Rejected input. Lists every offending field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
  pub issues: Vec<FieldIssue>,
}

impl fmt::Display for ValidationError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "invalid input: ")?;
    for (i, issue) in self.issues.iter().enumerate() {
      if i > 0 {
        write!(f, "; ")?;
      }
      write!(f, "{} {}", issue.field, issue.message)?;
    }
    Ok(())
  }
}

impl std::error::Error for ValidationError {}

impl ValidationError {
  pub fn single(field: &str, message: &str) -> Self {
    Self { issues: vec![FieldIssue { field: field.into(), message: message.into() }] }
  }

  pub fn has_field(&self, field: &str) -> bool {
    self.issues.iter().any(|i| i.field == field)
  }
}

/// Accumulates issues while fields are checked.
#[derive(Default)]
struct Checker {
  issues: Vec<FieldIssue>,
}

impl Checker {
  fn issue(&mut self, field: &str, message: impl Into<String>) {
    self.issues.push(FieldIssue { field: field.into(), message: message.into() });
  }

  /// Present and not blank. Returns the value untrimmed (code keeps indentation).
  fn required_text(&mut self, field: &str, value: Option<String>) -> String {
    match value {
      Some(v) if !v.trim().is_empty() => v,
      Some(_) => {
        self.issue(field, "must not be empty");
        String::new()
      }
      None => {
        self.issue(field, "is required");
        String::new()
      }
    }
  }

  /// Key must be present; the value may be empty.
  fn present_text(&mut self, field: &str, value: Option<String>) -> String {
    match value {
      Some(v) => v,
      None => {
        self.issue(field, "is required");
        String::new()
      }
    }
  }

  fn required_enum<T: FromStr<Err = UnknownVariant>>(&mut self, field: &str, value: Option<&str>) -> Option<T> {
    match value {
      None => {
        self.issue(field, "is required");
        None
      }
      Some(raw) => match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(e) => {
          self.issue(field, e.to_string());
          None
        }
      },
    }
  }

  fn optional_enum<T: FromStr<Err = UnknownVariant>>(&mut self, field: &str, value: Option<&str>) -> Option<T> {
    match non_blank(value) {
      None => None,
      Some(raw) => self.required_enum(field, Some(raw)),
    }
  }

  fn finish<T>(self, build: impl FnOnce() -> T) -> Result<T, ValidationError> {
    if self.issues.is_empty() {
      Ok(build())
    } else {
      Err(ValidationError { issues: self.issues })
    }
  }
}

fn optional_text(value: Option<String>) -> Option<String> {
  value.filter(|v| !v.trim().is_empty())
}

//
// generate-problem
//

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GenerateProblemRequest {
  pub topic: Option<String>,
  pub language: Option<String>,
  pub complexity: Option<String>,
  pub hints: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateProblemInput {
  pub topic: String,
  pub language: Language,
  pub complexity: Complexity,
  pub hints: Option<String>,
}

impl GenerateProblemRequest {
  pub fn validate(self) -> Result<GenerateProblemInput, ValidationError> {
    let mut c = Checker::default();
    let topic = c.required_text("topic", self.topic);
    let language = c.required_enum::<Language>("language", self.language.as_deref());
    let complexity = c.required_enum::<Complexity>("complexity", self.complexity.as_deref());
    let hints = optional_text(self.hints);
    c.finish(|| GenerateProblemInput {
      topic: topic.trim().to_string(),
      language: language.unwrap_or(Language::Java),
      complexity: complexity.unwrap_or(Complexity::Medium),
      hints,
    })
  }
}

//
// check-code
//

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CheckCodeRequest {
  pub code: Option<String>,
  pub language: Option<String>,
  /// Problem context; also accepted as `problemStatement`.
  #[serde(alias = "problemStatement")]
  pub problem: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckCodeInput {
  pub code: String,
  pub language: Language,
  pub problem: Option<String>,
}

impl CheckCodeRequest {
  pub fn validate(self) -> Result<CheckCodeInput, ValidationError> {
    let mut c = Checker::default();
    let code = c.required_text("code", self.code);
    let language = c.required_enum::<Language>("language", self.language.as_deref());
    let problem = optional_text(self.problem);
    c.finish(|| CheckCodeInput { code, language: language.unwrap_or(Language::Java), problem })
  }
}

//
// run-code
//

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCodeRequest {
  pub code: Option<String>,
  pub language: Option<String>,
  /// Older clients send the statement as `problem`.
  #[serde(alias = "problem")]
  pub problem_statement: Option<String>,
  pub expected_output: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunCodeInput {
  pub code: String,
  pub language: Language,
  pub problem_statement: String,
  pub expected_output: String,
}

impl RunCodeRequest {
  pub fn validate(self) -> Result<RunCodeInput, ValidationError> {
    let mut c = Checker::default();
    let code = c.required_text("code", self.code);
    let language = c.required_enum::<Language>("language", self.language.as_deref());
    let problem_statement = c.required_text("problemStatement", self.problem_statement);
    let expected_output = self.expected_output.unwrap_or_default();
    c.finish(|| RunCodeInput {
      code,
      language: language.unwrap_or(Language::Java),
      problem_statement,
      expected_output,
    })
  }
}

//
// chatbot
//

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawChatTurn {
  pub sender: Option<String>,
  pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatbotRequest {
  pub question: Option<String>,
  pub problem_statement: Option<String>,
  pub code: Option<String>,
  pub language: Option<String>,
  pub history: Option<Vec<RawChatTurn>>,
  pub response_length: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatbotInput {
  pub question: String,
  pub problem_statement: String,
  pub code: Option<String>,
  pub language: Language,
  pub history: Vec<ChatTurn>,
  pub response_length: ResponseLength,
}

impl ChatbotRequest {
  pub fn validate(self) -> Result<ChatbotInput, ValidationError> {
    let mut c = Checker::default();
    let question = c.required_text("question", self.question);
    let problem_statement = c.present_text("problemStatement", self.problem_statement);
    let language = c.required_enum::<Language>("language", self.language.as_deref());
    let response_length = c
      .optional_enum::<ResponseLength>("responseLength", self.response_length.as_deref())
      .unwrap_or_default();

    let mut history = Vec::new();
    for (i, turn) in self.history.unwrap_or_default().into_iter().enumerate() {
      let sender = c.required_enum::<Sender>(&format!("history[{}].sender", i), turn.sender.as_deref());
      let text = c.present_text(&format!("history[{}].text", i), turn.text);
      if let Some(sender) = sender {
        history.push(ChatTurn { sender, text });
      }
    }

    let code = optional_text(self.code);
    c.finish(|| ChatbotInput {
      question: question.trim().to_string(),
      problem_statement,
      code,
      language: language.unwrap_or(Language::Java),
      history,
      response_length,
    })
  }
}

//
// enhance-problem
//

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhanceProblemRequest {
  pub topic: Option<String>,
  pub language: Option<String>,
  pub complexity: Option<String>,
  pub problem_statement: Option<String>,
  pub expected_output: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhanceProblemInput {
  pub topic: String,
  pub language: Language,
  pub complexity: Complexity,
  pub problem_statement: String,
  pub expected_output: String,
}

impl EnhanceProblemRequest {
  pub fn validate(self) -> Result<EnhanceProblemInput, ValidationError> {
    let mut c = Checker::default();
    let topic = c.required_text("topic", self.topic);
    let language = c.required_enum::<Language>("language", self.language.as_deref());
    let complexity = c.required_enum::<Complexity>("complexity", self.complexity.as_deref());
    let problem_statement = c.required_text("problemStatement", self.problem_statement);
    let expected_output = self.expected_output.unwrap_or_default();
    c.finish(|| EnhanceProblemInput {
      topic: topic.trim().to_string(),
      language: language.unwrap_or(Language::Java),
      complexity: complexity.unwrap_or(Complexity::Medium),
      problem_statement,
      expected_output,
    })
  }
}
