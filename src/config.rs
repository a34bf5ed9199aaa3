//! Configuration: process settings from the environment, and agent configuration
//! (prompts + learning paths) from an optional TOML file.
//!
//! See `AgentConfig` and `Prompts` for the TOML schema.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info};

use crate::catalog::LearningPath;

/// Fatal startup problems.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("OPENAI_API_KEY environment variable is required")]
  MissingApiKey,
  #[error("failed to build HTTP client: {0}")]
  HttpClient(#[from] reqwest::Error),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreBackend {
  File,
  Memory,
}

/// Process-level settings read once at startup.
#[derive(Clone, Debug)]
pub struct ServerConfig {
  pub port: u16,
  pub data_dir: PathBuf,
  pub store_backend: StoreBackend,
  pub static_dir: PathBuf,
  /// Sessions with no socket attached are dropped from memory after this long.
  pub session_idle: Duration,
}

impl ServerConfig {
  pub fn from_env() -> Self {
    let port = std::env::var("PORT").ok().and_then(|p| p.parse::<u16>().ok()).unwrap_or(3000);
    let data_dir = std::env::var("DATA_DIR").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("./data"));
    let store_backend = match std::env::var("STORE_BACKEND").as_deref() {
      Ok("memory") => StoreBackend::Memory,
      _ => StoreBackend::File,
    };
    let static_dir = std::env::var("STATIC_DIR").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("./static"));
    let session_idle = std::env::var("SESSION_IDLE_SECS")
      .ok()
      .and_then(|s| s.parse::<u64>().ok())
      .map(Duration::from_secs)
      .unwrap_or(Duration::from_secs(30 * 60));
    Self { port, data_dir, store_backend, static_dir, session_idle }
  }
}

/// Hosted-model settings. The API key is mandatory.
#[derive(Clone)]
pub struct ModelConfig {
  pub api_key: String,
  pub base_url: String,
  pub fast_model: String,
  pub strong_model: String,
  pub timeout: Duration,
}

impl ModelConfig {
  pub fn from_env() -> Result<Self, ConfigError> {
    Self::from_lookup(|name| std::env::var(name).ok())
  }

  /// Build from any variable source; `from_env` passes the process environment.
  pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
    let api_key = lookup("OPENAI_API_KEY")
      .filter(|k| !k.trim().is_empty())
      .ok_or(ConfigError::MissingApiKey)?;
    let base_url = lookup("OPENAI_BASE_URL").unwrap_or_else(|| "https://api.openai.com/v1".into());
    let fast_model = lookup("OPENAI_FAST_MODEL").unwrap_or_else(|| "gpt-4o-mini".into());
    let strong_model = lookup("OPENAI_STRONG_MODEL").unwrap_or_else(|| "gpt-4o".into());
    let timeout = lookup("OPENAI_TIMEOUT_SECS")
      .and_then(|s| s.parse::<u64>().ok())
      .map(Duration::from_secs)
      .unwrap_or(Duration::from_secs(60));
    Ok(Self { api_key, base_url, fast_model, strong_model, timeout })
  }
}

// Never print the key.
impl std::fmt::Debug for ModelConfig {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ModelConfig")
      .field("base_url", &self.base_url)
      .field("fast_model", &self.fast_model)
      .field("strong_model", &self.strong_model)
      .field("timeout", &self.timeout)
      .finish_non_exhaustive()
  }
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AgentConfig {
  #[serde(default)]
  pub prompts: Prompts,
  /// Replaces the built-in learning paths when non-empty.
  #[serde(default)]
  pub paths: Vec<LearningPath>,
}

const GENERATE_PROBLEM_USER: &str = r#"Generate a coding problem based on the provided topic, language, and complexity.

Topic: {topic}
Language: {language}
Complexity: {complexity}
{hints_block}
Provide:
- problemStatement: a detailed, well-defined and testable description in markdown, using **bold** section headers (**PROBLEM STATEMENT:**, **Examples:**, **Constraints:**).
- expectedOutput: the expected output of a correct solution, with concrete test cases.
- codeSkeleton: starting code in {language} with the function/method signature to complete and no solution.

If there are no hints, do not mention hints in the response.
Return JSON: {"problemStatement": string, "expectedOutput": string, "codeSkeleton": string}"#;

const CHECK_CODE_USER: &str = r#"Analyze the following code and provide feedback on potential issues and suggestions for improvement.

Language: {language}
{problem_block}
Code:
```{language}
{code}
```

Give specific feedback on the single responsibility principle, commenting, naming and readability.
Include suggestions for refactoring or optimization where applicable.
Do not check for correctness, only code quality.
Return JSON: {"feedback": string, "suggestions": string}"#;

const RUN_CODE_USER: &str = r#"Evaluate whether this code solves the problem, as if you had executed it.

CODE EXECUTED:
```{language}
{code}
```

PROBLEM STATEMENT:
{problem_statement}

EXPECTED OUTPUT:
{expected_output}

Pick status from exactly: "correct" (perfect), "halfway" (good progress), "moderate" (almost there), "fail" (needs work).
Write output in this format, one line per section, 5 lines maximum:
**Status:** [🟢 CORRECT / 🟡 HALFWAY / 🟠 MODERATE / 🔴 FAIL]
**Key Result:** [one sentence summary of what the code achieved]
**Main Issue:** [primary problem or area for improvement]
**Quick Fix:** [specific actionable suggestion]
**Next Step:** [what to do next]

Return JSON: {"status": "correct" | "halfway" | "moderate" | "fail", "output": string}"#;

const CHATBOT_USER: &str = r#"The user is working on the following problem in {language}:
Problem Statement: {problem_statement}
{code_block}{history_block}
The user's new question is: "{question}"

{length_instruction}
Do not give away the full solution unless they explicitly ask for it. Guide them towards the answer.
Format the answer as clean text, without markdown such as asterisks for bolding.
Return JSON: {"answer": string}"#;

const ENHANCE_PROBLEM_USER: &str = r#"Transform raw content copied from a coding website into a professional coding problem.

RAW PROBLEM CONTENT:
{problem_statement}

RAW EXPECTED OUTPUT:
{expected_output}

LANGUAGE: {language}
COMPLEXITY: {complexity}
TOPIC: {topic}

problemStatement must follow this layout, with **bold** headers:
**PROBLEM STATEMENT:**
[clean description in 2-3 sentences]

**Examples:**
**Example 1:**
Input: [input]
Output: [output]

**Constraints:**
- [constraint]

expectedOutput must follow this layout:
**EXPECTED OUTPUT:**
**Test Cases:**
[input/output pairs]

**Performance Requirements:**
[time/space complexity if mentioned]

codeSkeleton: language-specific starting code in {language}, without a solution.
Never use inline code or "Code Block" text.
Return JSON: {"problemStatement": string, "expectedOutput": string, "codeSkeleton": string}"#;

/// Prompts used by the flows. Defaults target the coding-practice arena.
/// Any field can be overridden in TOML to tune tone/structure.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub generate_problem_system: String,
  pub generate_problem_user_template: String,
  pub check_code_system: String,
  pub check_code_user_template: String,
  pub run_code_system: String,
  pub run_code_user_template: String,
  pub chatbot_system: String,
  pub chatbot_user_template: String,
  pub enhance_problem_system: String,
  pub enhance_problem_user_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      generate_problem_system: "You are a coding problem generator for learners. Respond ONLY with strict JSON.".into(),
      generate_problem_user_template: GENERATE_PROBLEM_USER.into(),
      check_code_system: "You are an AI code reviewer focused on code quality. Respond ONLY with strict JSON.".into(),
      check_code_user_template: CHECK_CODE_USER.into(),
      run_code_system: "You are an expert code execution analyzer. Be concise and actionable. Respond ONLY with strict JSON.".into(),
      run_code_user_template: RUN_CODE_USER.into(),
      chatbot_system: "You are a friendly and helpful coding assistant bot helping a learner solve a coding problem. Respond ONLY with strict JSON.".into(),
      chatbot_user_template: CHATBOT_USER.into(),
      enhance_problem_system: "You are an expert coding problem formatter. Respond ONLY with strict JSON.".into(),
      enhance_problem_user_template: ENHANCE_PROBLEM_USER.into(),
    }
  }
}

/// Attempt to load `AgentConfig` from AGENT_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_agent_config_from_env() -> Option<AgentConfig> {
  let path = std::env::var("AGENT_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => parse_agent_config(&s, &path),
    Err(e) => {
      error!(target: "codegym_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

fn parse_agent_config(raw: &str, path: &str) -> Option<AgentConfig> {
  match toml::from_str::<AgentConfig>(raw) {
    Ok(cfg) => {
      info!(target: "codegym_backend", %path, paths = cfg.paths.len(), "Loaded agent config (TOML)");
      Some(cfg)
    }
    Err(e) => {
      error!(target: "codegym_backend", %path, error = %e, "Failed to parse TOML config");
      None
    }
  }
}
