//! Domain models: languages, difficulty tiers, problems, results and chat messages.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Programming language a problem is posed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
  Java,
  Python,
  C,
}

impl Language {
  pub const ALL: [Language; 3] = [Language::Java, Language::Python, Language::C];

  pub fn as_str(self) -> &'static str {
    match self {
      Language::Java => "java",
      Language::Python => "python",
      Language::C => "c",
    }
  }
}

/// Difficulty tier of a problem.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
  Easy,
  Medium,
  Hard,
}

impl Complexity {
  pub const ALL: [Complexity; 3] = [Complexity::Easy, Complexity::Medium, Complexity::Hard];

  pub fn as_str(self) -> &'static str {
    match self {
      Complexity::Easy => "easy",
      Complexity::Medium => "medium",
      Complexity::Hard => "hard",
    }
  }
}

/// Requested verbosity for chatbot answers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseLength {
  Short,
  #[default]
  Medium,
  Full,
}

impl ResponseLength {
  pub fn as_str(self) -> &'static str {
    match self {
      ResponseLength::Short => "short",
      ResponseLength::Medium => "medium",
      ResponseLength::Full => "full",
    }
  }

  /// Sentence budget handed to the model. Not enforced server-side.
  pub fn instruction(self) -> &'static str {
    match self {
      ResponseLength::Short => "Keep the answer short: 1-2 sentences.",
      ResponseLength::Medium => "Keep the answer to 2-3 sentences.",
      ResponseLength::Full => "Give a fuller answer of 3-4 sentences.",
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
  User,
  Bot,
}

impl Sender {
  pub fn as_str(self) -> &'static str {
    match self {
      Sender::User => "user",
      Sender::Bot => "bot",
    }
  }
}

/// Error for enum parsing; carries the accepted values for the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
  pub allowed: &'static str,
}

impl fmt::Display for UnknownVariant {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "must be one of {}", self.allowed)
  }
}

macro_rules! parse_lowercase {
  ($ty:ty, $allowed:literal, { $($name:literal => $variant:expr),+ $(,)? }) => {
    impl FromStr for $ty {
      type Err = UnknownVariant;

      fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
          $($name => Ok($variant),)+
          _ => Err(UnknownVariant { allowed: $allowed }),
        }
      }
    }
  };
}

parse_lowercase!(Language, "java, python, c", {
  "java" => Language::Java,
  "python" => Language::Python,
  "c" => Language::C,
});
parse_lowercase!(Complexity, "easy, medium, hard", {
  "easy" => Complexity::Easy,
  "medium" => Complexity::Medium,
  "hard" => Complexity::Hard,
});
parse_lowercase!(ResponseLength, "short, medium, full", {
  "short" => ResponseLength::Short,
  "medium" => ResponseLength::Medium,
  "full" => ResponseLength::Full,
});
parse_lowercase!(Sender, "user, bot", {
  "user" => Sender::User,
  "bot" => Sender::Bot,
});

/// What the learner asked for: topic + language + difficulty.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemSpec {
  pub topic: String,
  pub language: Language,
  pub complexity: Complexity,
}

/// The coding challenge currently shown to the learner.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
  pub problem_statement: String,
  pub expected_output: String,
  /// Empty when the model (or an import) gave no starting code.
  #[serde(default)]
  pub code_skeleton: String,
}

/// Code-quality review of the learner's code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
  pub feedback: String,
  #[serde(default)]
  pub suggestions: String,
}

/// Correctness level reported by the run-code flow.
///
/// Parsing is lenient about decoration ("🟢 CORRECT", "Correct") and maps the
/// older three-level `wrong` onto `fail`; anything else is rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum RunStatus {
  Correct,
  Halfway,
  Moderate,
  Fail,
}

impl RunStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      RunStatus::Correct => "correct",
      RunStatus::Halfway => "halfway",
      RunStatus::Moderate => "moderate",
      RunStatus::Fail => "fail",
    }
  }
}

impl TryFrom<String> for RunStatus {
  type Error = String;

  fn try_from(raw: String) -> Result<Self, Self::Error> {
    let word: String = raw
      .chars()
      .filter(|c| c.is_ascii_alphabetic())
      .collect::<String>()
      .to_ascii_lowercase();
    match word.as_str() {
      "correct" => Ok(RunStatus::Correct),
      "halfway" => Ok(RunStatus::Halfway),
      "moderate" => Ok(RunStatus::Moderate),
      "fail" | "wrong" => Ok(RunStatus::Fail),
      _ => Err(format!("unknown run status '{}': expected correct, halfway, moderate or fail", raw)),
    }
  }
}

/// Model-judged "execution" result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
  pub status: RunStatus,
  pub output: String,
}

/// One turn of a conversation as replayed to the chatbot flow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
  pub sender: Sender,
  pub text: String,
}

/// A chat message kept in session history (and persisted).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
  pub id: String,
  pub sender: Sender,
  pub text: String,
  pub timestamp: DateTime<Utc>,
  #[serde(default)]
  pub response_length: ResponseLength,
}

impl ChatMessage {
  pub fn new(sender: Sender, text: impl Into<String>, response_length: ResponseLength) -> Self {
    Self {
      id: Uuid::new_v4().to_string(),
      sender,
      text: text.into(),
      timestamp: Utc::now(),
      response_length,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn enums_parse_case_insensitively() {
    assert_eq!(" Java ".parse::<Language>(), Ok(Language::Java));
    assert_eq!("HARD".parse::<Complexity>(), Ok(Complexity::Hard));
    assert_eq!("full".parse::<ResponseLength>(), Ok(ResponseLength::Full));
    let err = "rust".parse::<Language>().unwrap_err();
    assert_eq!(err.to_string(), "must be one of java, python, c");
  }

  #[test]
  fn run_status_accepts_decorated_and_legacy_values() {
    let s: RunStatus = serde_json::from_str("\"🟢 CORRECT\"").unwrap();
    assert_eq!(s, RunStatus::Correct);
    let s: RunStatus = serde_json::from_str("\"wrong\"").unwrap();
    assert_eq!(s, RunStatus::Fail);
    assert!(serde_json::from_str::<RunStatus>("\"great job\"").is_err());
    assert_eq!(serde_json::to_string(&RunStatus::Halfway).unwrap(), "\"halfway\"");
  }

  #[test]
  fn problem_uses_camel_case_and_optional_skeleton() {
    let p: Problem = serde_json::from_str(r#"{"problemStatement":"a","expectedOutput":"b"}"#).unwrap();
    assert_eq!(p.code_skeleton, "");
    let v = serde_json::to_value(&p).unwrap();
    assert!(v.get("problemStatement").is_some());
  }
}
