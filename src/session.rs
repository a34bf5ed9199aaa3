//! Session orchestration: the learner's "page" state and the sequencing of flows.
//!
//! A session owns the current problem, the code buffer, the last check/run
//! results and the chat history, plus one pending flag per operation kind.
//! Operations may overlap (check and run can be in flight together); each one
//! only updates its own result slot.
//!
//! Rules:
//!   - state sits behind one async mutex that is never held across a model call
//!   - every problem replacement bumps `epoch`; results computed for an older
//!     epoch are dropped instead of being paired with the new problem
//!   - guard failures and flow failures become `Notice`s, never errors
//!   - chat history and progress are saved through the store on every change,
//!     by a per-session writer task so file IO never runs on the async workers
//!   - `chat_epoch` bumps whenever the conversation is reset; a bot answer for
//!     an older conversation is dropped
//!
//! Every mutation publishes a fresh `SessionView` on a watch channel so live
//! clients (WebSocket) can re-render intermediate states.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{
  ChatMessage, CheckResult, Language, Problem, ProblemSpec, ResponseLength, RunResult, RunStatus, Sender,
};
use crate::flows::{Flows, CHAT_FALLBACK};
use crate::progress::ProgressRecord;
use crate::store::{load_json, session_key, KvStore, CHAT_HISTORY_KEY, PROGRESS_KEY};
use crate::validate::{ChatbotRequest, CheckCodeRequest, EnhanceProblemRequest, GenerateProblemRequest, RawChatTurn, RunCodeRequest};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Pending {
  pub generating: bool,
  pub checking: bool,
  pub running: bool,
  pub typing: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
  Info,
  Success,
  Error,
}

/// Non-blocking notification (a toast, in UI terms).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Notice {
  pub level: NoticeLevel,
  pub title: String,
  pub description: String,
}

impl Notice {
  pub fn error(title: &str, description: impl Into<String>) -> Self {
    Self { level: NoticeLevel::Error, title: title.into(), description: description.into() }
  }

  pub fn info(title: &str, description: impl Into<String>) -> Self {
    Self { level: NoticeLevel::Info, title: title.into(), description: description.into() }
  }

  pub fn success(title: &str, description: impl Into<String>) -> Self {
    Self { level: NoticeLevel::Success, title: title.into(), description: description.into() }
  }
}

/// Everything a client needs to render the page.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
  pub id: String,
  pub epoch: u64,
  pub spec: Option<ProblemSpec>,
  pub problem: Option<Problem>,
  pub code: String,
  pub language: Language,
  pub check_result: Option<CheckResult>,
  pub run_result: Option<RunResult>,
  pub chat: Vec<ChatMessage>,
  pub pending: Pending,
}

/// Result of a session operation: the state after it, plus an optional notice.
#[derive(Clone, Debug, Serialize)]
pub struct Outcome {
  pub view: SessionView,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub notice: Option<Notice>,
}

const MAX_SESSION_ID_LEN: usize = 64;

/// Client-supplied session id that cannot be used as a store namespace.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid session id '{0}': use 1-64 letters, digits, '-' or '_'")]
pub struct InvalidSessionId(pub String);

/// Session ids are UUIDs or short `[A-Za-z0-9_-]` names.
pub fn check_session_id(id: &str) -> Result<(), InvalidSessionId> {
  let ok = !id.is_empty()
    && id.len() <= MAX_SESSION_ID_LEN
    && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
  if ok {
    Ok(())
  } else {
    Err(InvalidSessionId(id.to_string()))
  }
}

/// A pending write, already serialized under the state lock.
enum StoreOp {
  Set { key: String, value: String },
  Remove { key: String },
  Flush(oneshot::Sender<()>),
}

/// Applies store writes in order, each on the blocking pool.
async fn run_writer(id: String, store: Arc<dyn KvStore>, mut ops: mpsc::UnboundedReceiver<StoreOp>) {
  while let Some(op) = ops.recv().await {
    let store = store.clone();
    let (key, result) = match op {
      StoreOp::Flush(done) => {
        let _ = done.send(());
        continue;
      }
      StoreOp::Set { key, value } => {
        let k = key.clone();
        (key, tokio::task::spawn_blocking(move || store.set(&k, &value)).await)
      }
      StoreOp::Remove { key } => {
        let k = key.clone();
        (key, tokio::task::spawn_blocking(move || store.remove(&k)).await)
      }
    };
    match result {
      Ok(Ok(())) => {}
      Ok(Err(e)) => warn!(target: "session", %id, %key, error = %e, "Store write failed"),
      Err(e) => warn!(target: "session", %id, %key, error = %e, "Store write task aborted"),
    }
  }
  debug!(target: "session", %id, "Store writer stopped");
}

struct SessionState {
  spec: Option<ProblemSpec>,
  problem: Option<Problem>,
  epoch: u64,
  chat_epoch: u64,
  code: String,
  check_result: Option<CheckResult>,
  run_result: Option<RunResult>,
  chat: Vec<ChatMessage>,
  pending: Pending,
  started_at: Option<Instant>,
  solved_current: bool,
  progress: ProgressRecord,
}

impl SessionState {
  fn language(&self) -> Language {
    self.spec.as_ref().map(|s| s.language).unwrap_or(Language::Java)
  }

  fn view(&self, id: &str) -> SessionView {
    SessionView {
      id: id.to_string(),
      epoch: self.epoch,
      spec: self.spec.clone(),
      problem: self.problem.clone(),
      code: self.code.clone(),
      language: self.language(),
      check_result: self.check_result.clone(),
      run_result: self.run_result.clone(),
      chat: self.chat.clone(),
      pending: self.pending,
    }
  }
}

/// What a check/run needs from the state, captured under the lock.
struct CodeSnapshot {
  epoch: u64,
  code: String,
  language: Language,
  problem: Problem,
}

/// A chat turn that has been accepted and is waiting for the bot.
pub struct ChatTicket {
  chat_epoch: u64,
  request: ChatbotRequest,
  response_length: ResponseLength,
}

pub struct Session {
  id: String,
  flows: Arc<Flows>,
  writes: mpsc::UnboundedSender<StoreOp>,
  state: Mutex<SessionState>,
  views: watch::Sender<SessionView>,
}

impl Session {
  /// Open a session; a known `id` resumes its persisted chat history and progress.
  /// Client ids must pass `check_session_id` first. Must run inside a tokio runtime.
  #[instrument(level = "info", target = "session", skip(flows, store))]
  pub fn open(id: Option<String>, flows: Arc<Flows>, store: Arc<dyn KvStore>) -> Arc<Self> {
    let id = id.filter(|s| !s.trim().is_empty()).unwrap_or_else(|| Uuid::new_v4().to_string());
    let chat: Vec<ChatMessage> = load_json(store.as_ref(), &session_key(&id, CHAT_HISTORY_KEY)).unwrap_or_default();
    let progress = load_json::<ProgressRecord>(store.as_ref(), &session_key(&id, PROGRESS_KEY))
      .map(ProgressRecord::normalized)
      .unwrap_or_default();
    info!(target: "session", %id, restored_messages = chat.len(), solved = progress.solved_problems, "Session opened");

    let state = SessionState {
      spec: None,
      problem: None,
      epoch: 0,
      chat_epoch: 0,
      code: String::new(),
      check_result: None,
      run_result: None,
      chat,
      pending: Pending::default(),
      started_at: None,
      solved_current: false,
      progress,
    };
    let (views, _) = watch::channel(state.view(&id));
    let (writes, ops) = mpsc::unbounded_channel();
    tokio::spawn(run_writer(id.clone(), store, ops));
    Arc::new(Self { id, flows, writes, state: Mutex::new(state), views })
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub async fn view(&self) -> SessionView {
    self.state.lock().await.view(&self.id)
  }

  pub fn subscribe(&self) -> watch::Receiver<SessionView> {
    self.views.subscribe()
  }

  pub async fn progress(&self) -> ProgressRecord {
    self.state.lock().await.progress.clone()
  }

  fn publish(&self, st: &SessionState) -> SessionView {
    let view = st.view(&self.id);
    self.views.send_replace(view.clone());
    view
  }

  fn finish(&self, st: &SessionState, notice: Option<Notice>) -> Outcome {
    Outcome { view: self.publish(st), notice }
  }

  fn enqueue(&self, op: StoreOp) {
    if self.writes.send(op).is_err() {
      warn!(target: "session", id = %self.id, "Store writer is gone; change not persisted");
    }
  }

  fn enqueue_json<T: Serialize>(&self, key: String, value: &T) {
    match serde_json::to_string(value) {
      Ok(value) => self.enqueue(StoreOp::Set { key, value }),
      Err(e) => warn!(target: "session", id = %self.id, %key, error = %e, "Failed to serialize for store"),
    }
  }

  fn persist_chat(&self, st: &SessionState) {
    let key = session_key(&self.id, CHAT_HISTORY_KEY);
    if st.chat.is_empty() {
      self.enqueue(StoreOp::Remove { key });
    } else {
      self.enqueue_json(key, &st.chat);
    }
  }

  fn persist_progress(&self, st: &SessionState) {
    self.enqueue_json(session_key(&self.id, PROGRESS_KEY), &st.progress);
  }

  /// Wait until every change made so far has reached the store.
  pub async fn flush(&self) {
    let (done, wait) = oneshot::channel();
    self.enqueue(StoreOp::Flush(done));
    let _ = wait.await;
  }

  /// Empty the conversation and orphan any bot answer still in flight.
  fn reset_chat(&self, st: &mut SessionState) {
    st.chat.clear();
    st.chat_epoch += 1;
    st.pending.typing = false;
    self.persist_chat(st);
  }

  /// Swap in a new current problem and reset everything derived from the old one.
  fn replace_problem(&self, st: &mut SessionState, spec: ProblemSpec, problem: Problem) {
    st.epoch += 1;
    st.code = problem.code_skeleton.clone();
    st.check_result = None;
    st.run_result = None;
    st.started_at = Some(Instant::now());
    st.solved_current = false;
    st.progress.record_attempt(spec.language, spec.complexity);
    st.spec = Some(spec);
    st.problem = Some(problem);
    self.reset_chat(st);
    self.persist_progress(st);
  }

  #[instrument(level = "debug", target = "session", skip(self, code), fields(id = %self.id, code_len = code.len()))]
  pub async fn update_code(&self, code: String) -> Outcome {
    let mut st = self.state.lock().await;
    st.code = code;
    self.finish(&st, None)
  }

  /// Select a topic / regenerate.
  #[instrument(level = "info", target = "session", skip(self, req), fields(id = %self.id))]
  pub async fn generate(&self, req: GenerateProblemRequest) -> Outcome {
    let spec = match req.clone().validate() {
      Ok(input) => ProblemSpec { topic: input.topic, language: input.language, complexity: input.complexity },
      Err(e) => {
        let st = self.state.lock().await;
        return self.finish(&st, Some(Notice::error("Invalid Selection", e.to_string())));
      }
    };
    {
      let mut st = self.state.lock().await;
      if st.pending.generating {
        return self.finish(&st, Some(Notice::info("Please wait", "A problem is already being generated.")));
      }
      st.pending.generating = true;
      self.publish(&st);
    }

    let result = self.flows.generate_problem(req).await;

    let mut st = self.state.lock().await;
    st.pending.generating = false;
    match result {
      Ok(problem) => {
        info!(target: "session", id = %self.id, topic = %spec.topic, "New problem loaded");
        self.replace_problem(&mut st, spec, problem);
        self.finish(&st, None)
      }
      Err(e) => {
        warn!(target: "session", id = %self.id, error = %e, "Problem generation failed; keeping previous problem");
        self.finish(&st, Some(Notice::error("Error", "Could not generate a new coding problem. Please try again.")))
      }
    }
  }

  /// Shared preconditions for check and run.
  fn code_snapshot(st: &SessionState, verb: &str, no_problem: &str) -> Result<CodeSnapshot, Notice> {
    if st.code.trim().is_empty() {
      return Err(Notice::error("Empty Code", format!("Please write some code before {}.", verb)));
    }
    let problem = st.problem.clone().ok_or_else(|| Notice::error("No Problem", no_problem))?;
    Ok(CodeSnapshot { epoch: st.epoch, code: st.code.clone(), language: st.language(), problem })
  }

  #[instrument(level = "info", target = "session", skip(self), fields(id = %self.id))]
  pub async fn check(&self) -> Outcome {
    let snap = {
      let mut st = self.state.lock().await;
      if st.pending.checking {
        return self.finish(&st, Some(Notice::info("Please wait", "Your code is already being checked.")));
      }
      if st.pending.generating {
        return self.finish(&st, Some(generating_notice()));
      }
      let snap = match Self::code_snapshot(&st, "checking", "Please generate a problem first before checking code.") {
        Ok(snap) => snap,
        Err(notice) => return self.finish(&st, Some(notice)),
      };
      st.pending.checking = true;
      st.check_result = None;
      self.publish(&st);
      snap
    };

    let result = self
      .flows
      .check_code(CheckCodeRequest {
        code: Some(snap.code),
        language: Some(snap.language.as_str().into()),
        problem: Some(snap.problem.problem_statement),
      })
      .await;

    let mut st = self.state.lock().await;
    st.pending.checking = false;
    if st.epoch != snap.epoch {
      debug!(target: "session", id = %self.id, "Discarding check result for a replaced problem");
      return self.finish(&st, Some(stale_notice()));
    }
    match result {
      Ok(check) => {
        st.check_result = Some(check);
        self.finish(&st, None)
      }
      Err(e) => {
        warn!(target: "session", id = %self.id, error = %e, "Code check failed");
        self.finish(&st, Some(Notice::error("Error", "Could not check your code. Please try again.")))
      }
    }
  }

  #[instrument(level = "info", target = "session", skip(self), fields(id = %self.id))]
  pub async fn run(&self) -> Outcome {
    let snap = {
      let mut st = self.state.lock().await;
      if st.pending.running {
        return self.finish(&st, Some(Notice::info("Please wait", "Your code is already running.")));
      }
      if st.pending.generating {
        return self.finish(&st, Some(generating_notice()));
      }
      let snap = match Self::code_snapshot(&st, "running", "Please select a problem first.") {
        Ok(snap) => snap,
        Err(notice) => return self.finish(&st, Some(notice)),
      };
      st.pending.running = true;
      st.run_result = None;
      self.publish(&st);
      snap
    };

    let result = self
      .flows
      .run_code(RunCodeRequest {
        code: Some(snap.code),
        language: Some(snap.language.as_str().into()),
        problem_statement: Some(snap.problem.problem_statement),
        expected_output: Some(snap.problem.expected_output),
      })
      .await;

    let mut st = self.state.lock().await;
    st.pending.running = false;
    if st.epoch != snap.epoch {
      debug!(target: "session", id = %self.id, "Discarding run result for a replaced problem");
      return self.finish(&st, Some(stale_notice()));
    }
    match result {
      Ok(run) => {
        if run.status == RunStatus::Correct && !st.solved_current {
          self.record_solve(&mut st);
        }
        st.run_result = Some(run);
        self.finish(&st, None)
      }
      Err(e) => {
        warn!(target: "session", id = %self.id, error = %e, "Code run failed");
        self.finish(&st, Some(Notice::error("Error", "Failed to run code via AI.")))
      }
    }
  }

  fn record_solve(&self, st: &mut SessionState) {
    let Some(spec) = st.spec.clone() else { return };
    let elapsed = st.started_at.map(|t| t.elapsed()).unwrap_or_default();
    st.progress.record_solve(spec.language, spec.complexity, elapsed, Utc::now());
    st.solved_current = true;
    info!(target: "session", id = %self.id, solved = st.progress.solved_problems, streak = st.progress.current_streak, "Problem solved");
    self.persist_progress(st);
  }

  /// Send a chat message: accept it, then wait for the bot.
  pub async fn chat(&self, message: &str, response_length: ResponseLength) -> Outcome {
    match self.begin_chat(message, response_length).await {
      Ok(ticket) => self.finish_chat(ticket).await,
      Err(outcome) => outcome,
    }
  }

  /// Append the user's message (and set `typing`) or reject it with a notice.
  #[instrument(level = "info", target = "session", skip(self, message), fields(id = %self.id, message_len = message.len()))]
  pub async fn begin_chat(&self, message: &str, response_length: ResponseLength) -> Result<ChatTicket, Outcome> {
    let mut st = self.state.lock().await;
    let text = message.trim();
    if text.is_empty() {
      return Err(self.finish(&st, Some(Notice::error("Empty Message", "Please type a question first."))));
    }
    if st.pending.generating {
      return Err(self.finish(
        &st,
        Some(Notice::info("Please wait", "I'm still loading the problem. Once it's ready, I can help you with it!")),
      ));
    }
    let Some(problem) = st.problem.clone() else {
      return Err(self.finish(
        &st,
        Some(Notice::error(
          "No Problem",
          "I need a coding problem to work with! Generate a problem first, then ask me about it.",
        )),
      ));
    };
    if st.pending.typing {
      return Err(self.finish(&st, Some(Notice::info("Please wait", "The assistant is still answering."))));
    }

    let history: Vec<RawChatTurn> = st
      .chat
      .iter()
      .map(|m| RawChatTurn { sender: Some(m.sender.as_str().into()), text: Some(m.text.clone()) })
      .collect();
    let code = Some(st.code.clone()).filter(|c| !c.trim().is_empty());
    let request = ChatbotRequest {
      question: Some(text.to_string()),
      problem_statement: Some(problem.problem_statement),
      code,
      language: Some(st.language().as_str().into()),
      history: Some(history),
      response_length: Some(response_length.as_str().into()),
    };

    st.chat.push(ChatMessage::new(Sender::User, text, response_length));
    st.pending.typing = true;
    self.persist_chat(&st);
    self.publish(&st);
    Ok(ChatTicket { chat_epoch: st.chat_epoch, request, response_length })
  }

  /// Ask the bot and append its answer (or the apology). Always clears `typing`.
  #[instrument(level = "info", target = "session", skip(self, ticket), fields(id = %self.id))]
  pub async fn finish_chat(&self, ticket: ChatTicket) -> Outcome {
    let answer = match self.flows.ask_chatbot_or_fallback(ticket.request).await {
      Ok(a) => a.answer,
      Err(e) => {
        warn!(target: "session", id = %self.id, error = %e, "Chat request rejected; replying with apology");
        CHAT_FALLBACK.to_string()
      }
    };

    let mut st = self.state.lock().await;
    if st.chat_epoch != ticket.chat_epoch {
      // The reset already cleared `typing`; a newer turn may own it now.
      debug!(target: "session", id = %self.id, "Dropping bot answer for a reset conversation");
      return self.finish(&st, None);
    }
    st.pending.typing = false;
    st.chat.push(ChatMessage::new(Sender::Bot, answer, ticket.response_length));
    self.persist_chat(&st);
    self.finish(&st, None)
  }

  /// Import a pasted problem, enhanced by the model when possible.
  #[instrument(level = "info", target = "session", skip(self, req), fields(id = %self.id))]
  pub async fn import(&self, req: EnhanceProblemRequest) -> Outcome {
    let input = match req.clone().validate() {
      Ok(input) => input,
      Err(e) => {
        let st = self.state.lock().await;
        return self.finish(&st, Some(Notice::error("Invalid Import", e.to_string())));
      }
    };
    {
      let mut st = self.state.lock().await;
      if st.pending.generating {
        return self.finish(&st, Some(Notice::info("Please wait", "A problem is already being generated.")));
      }
      st.pending.generating = true;
      self.publish(&st);
    }

    let result = self.flows.enhance_problem(req).await;

    let spec = ProblemSpec { topic: input.topic.clone(), language: input.language, complexity: input.complexity };
    let mut st = self.state.lock().await;
    st.pending.generating = false;
    let (problem, notice) = match result {
      Ok(problem) => (
        problem,
        Notice::success(
          "Problem Imported Successfully!",
          format!("Enhanced \"{}\" problem is now ready to work on.", input.topic),
        ),
      ),
      Err(e) if e.is_invalid() => {
        return self.finish(&st, Some(Notice::error("Invalid Import", e.to_string())));
      }
      Err(e) => {
        warn!(target: "session", id = %self.id, error = %e, "Enhancement failed; importing raw problem");
        (
          Problem {
            problem_statement: input.problem_statement,
            expected_output: input.expected_output,
            code_skeleton: String::new(),
          },
          Notice::info("Problem Imported", "The problem was imported as pasted."),
        )
      }
    };
    self.replace_problem(&mut st, spec, problem);
    self.finish(&st, Some(notice))
  }

  /// Start over with an empty conversation. Idempotent.
  #[instrument(level = "info", target = "session", skip(self), fields(id = %self.id))]
  pub async fn new_chat(&self) -> Outcome {
    let mut st = self.state.lock().await;
    self.reset_chat(&mut st);
    self.finish(&st, None)
  }
}

fn generating_notice() -> Notice {
  Notice::info("Please wait", "A new problem is loading. Try again once it is ready.")
}

fn stale_notice() -> Notice {
  Notice::info("Problem Changed", "The result was for a previous problem and has been discarded.")
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::MemoryStore;
  use crate::testutil::{completion_json, scripted_reply, unreachable_flows, user_prompt, MockModel};
  use axum::http::StatusCode;
  use serde_json::{json, Value};
  use std::time::Duration;

  fn memory() -> Arc<dyn KvStore> {
    Arc::new(MemoryStore::new())
  }

  fn pick(topic: &str) -> GenerateProblemRequest {
    GenerateProblemRequest {
      topic: Some(topic.into()),
      language: Some("java".into()),
      complexity: Some("easy".into()),
      hints: None,
    }
  }

  fn paste() -> EnhanceProblemRequest {
    EnhanceProblemRequest {
      topic: Some("Two Sum".into()),
      language: Some("python".into()),
      complexity: Some("medium".into()),
      problem_statement: Some("find two numbers adding to target".into()),
      expected_output: Some("[0,1]".into()),
    }
  }

  async fn loaded(mock: &MockModel, store: Arc<dyn KvStore>) -> Arc<Session> {
    let session = Session::open(None, Arc::new(mock.flows()), store);
    let out = session.generate(pick("Fibonacci Sequence")).await;
    assert!(out.notice.is_none(), "{:?}", out.notice);
    session
  }

  #[tokio::test]
  async fn generate_loads_problem_and_resets_workspace() {
    let mock = MockModel::start(scripted_reply).await;
    let session = loaded(&mock, memory()).await;
    let view = session.view().await;

    assert_eq!(view.epoch, 1);
    assert_eq!(view.spec.as_ref().map(|s| s.topic.as_str()), Some("Fibonacci Sequence"));
    assert_eq!(view.code, view.problem.as_ref().unwrap().code_skeleton);
    assert_eq!(view.pending, Pending::default());
    assert_eq!(session.progress().await.total_problems, 1);
  }

  #[tokio::test]
  async fn failed_generation_keeps_previous_problem() {
    let mock = MockModel::start(|req: &Value| {
      if user_prompt(req).contains("Broken Topic") {
        (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": { "message": "boom" } }))
      } else {
        scripted_reply(req)
      }
    })
    .await;
    let session = loaded(&mock, memory()).await;
    let before = session.view().await;

    let out = session.generate(pick("Broken Topic")).await;
    let notice = out.notice.expect("notice");
    assert_eq!(notice.level, NoticeLevel::Error);
    assert_eq!(notice.description, "Could not generate a new coding problem. Please try again.");
    assert_eq!(out.view.problem, before.problem);
    assert_eq!(out.view.epoch, before.epoch);
    assert!(!out.view.pending.generating);
  }

  #[tokio::test]
  async fn invalid_selection_never_reaches_the_model() {
    let mock = MockModel::start(scripted_reply).await;
    let session = Session::open(None, Arc::new(mock.flows()), memory());
    let mut req = pick("Loops");
    req.language = Some("cobol".into());

    let out = session.generate(req).await;
    assert!(out.notice.unwrap().description.contains("language"));
    assert_eq!(mock.hits(), 0);
  }

  #[tokio::test]
  async fn chat_appends_user_then_bot_and_persists() {
    let mock = MockModel::start(scripted_reply).await;
    let store = memory();
    let session = loaded(&mock, store.clone()).await;

    let ticket = session.begin_chat("  how do I start?  ", ResponseLength::Short).await.ok().expect("accepted");
    let mid = session.view().await;
    assert!(mid.pending.typing);
    assert_eq!(mid.chat.len(), 1);
    assert_eq!(mid.chat[0].sender, Sender::User);
    assert_eq!(mid.chat[0].text, "how do I start?");

    let out = session.finish_chat(ticket).await;
    assert!(!out.view.pending.typing);
    assert_eq!(out.view.chat.len(), 2);
    assert_eq!(out.view.chat[1].sender, Sender::Bot);
    assert_eq!(out.view.chat[1].text, "Think about the two previous values.");
    assert_eq!(out.view.chat[1].response_length, ResponseLength::Short);

    session.flush().await;
    let saved: Vec<ChatMessage> = load_json(store.as_ref(), &session_key(session.id(), CHAT_HISTORY_KEY)).unwrap();
    assert_eq!(saved, out.view.chat);

    // The second question carries the first exchange as history.
    session.chat("and then?", ResponseLength::Medium).await;
    let last = mock.requests().pop().unwrap();
    assert!(user_prompt(&last).contains("how do I start?"));
  }

  #[tokio::test]
  async fn chat_requires_a_problem_and_text() {
    let mock = MockModel::start(scripted_reply).await;
    let session = Session::open(None, Arc::new(mock.flows()), memory());

    let out = session.chat("hello", ResponseLength::Medium).await;
    assert_eq!(out.notice.unwrap().title, "No Problem");
    assert!(out.view.chat.is_empty());

    let out = session.chat("   ", ResponseLength::Medium).await;
    assert_eq!(out.notice.unwrap().title, "Empty Message");
    assert_eq!(mock.hits(), 0);
  }

  #[tokio::test]
  async fn chat_failure_appends_apology() {
    let mock = MockModel::start(|req: &Value| {
      if user_prompt(req).contains("Generate a coding problem") {
        scripted_reply(req)
      } else {
        (StatusCode::BAD_GATEWAY, json!({}))
      }
    })
    .await;
    let session = loaded(&mock, memory()).await;

    let out = session.chat("help", ResponseLength::Medium).await;
    assert_eq!(out.view.chat.len(), 2);
    assert_eq!(out.view.chat[1].text, CHAT_FALLBACK);
    assert!(!out.view.pending.typing);
  }

  #[tokio::test]
  async fn new_chat_is_idempotent_and_clears_storage() {
    let mock = MockModel::start(scripted_reply).await;
    let store = memory();
    let session = loaded(&mock, store.clone()).await;
    session.chat("hint please", ResponseLength::Medium).await;
    session.flush().await;
    let key = session_key(session.id(), CHAT_HISTORY_KEY);
    assert!(store.get(&key).unwrap().is_some());

    let first = session.new_chat().await;
    let second = session.new_chat().await;
    session.flush().await;
    assert!(first.view.chat.is_empty());
    assert_eq!(first.view, second.view);
    assert_eq!(store.get(&key).unwrap(), None);
  }

  #[tokio::test]
  async fn new_chat_drops_the_answer_still_in_flight() {
    let mock = MockModel::start_with_delay(scripted_reply, |req: &Value| {
      if user_prompt(req).contains("The user's new question is") {
        Duration::from_millis(300)
      } else {
        Duration::ZERO
      }
    })
    .await;
    let store = memory();
    let session = loaded(&mock, store.clone()).await;

    let chatting = {
      let session = session.clone();
      tokio::spawn(async move { session.chat("hint?", ResponseLength::Medium).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    let reset = session.new_chat().await;
    assert!(reset.view.chat.is_empty());
    assert!(!reset.view.pending.typing);

    let out = chatting.await.unwrap();
    assert!(out.view.chat.is_empty());
    assert!(!out.view.pending.typing);

    session.flush().await;
    assert_eq!(store.get(&session_key(session.id(), CHAT_HISTORY_KEY)).unwrap(), None);
  }

  #[tokio::test]
  async fn check_and_run_wait_for_generation() {
    let mock = MockModel::start_with_delay(scripted_reply, |req: &Value| {
      if user_prompt(req).contains("Prime Number Check") {
        Duration::from_millis(400)
      } else {
        Duration::ZERO
      }
    })
    .await;
    let session = loaded(&mock, memory()).await;
    session.update_code("class Main {}".into()).await;

    let generating = {
      let session = session.clone();
      tokio::spawn(async move { session.generate(pick("Prime Number Check")).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    let hits = mock.hits();

    let checked = session.check().await;
    assert_eq!(checked.notice.unwrap().title, "Please wait");
    assert!(checked.view.check_result.is_none());
    let ran = session.run().await;
    assert_eq!(ran.notice.unwrap().title, "Please wait");
    assert_eq!(mock.hits(), hits);

    generating.await.unwrap();
    assert!(session.check().await.notice.is_none());
  }

  #[test]
  fn session_ids_are_restricted_to_safe_names() {
    assert!(check_session_id(&Uuid::new_v4().to_string()).is_ok());
    assert!(check_session_id("tab_1-a").is_ok());
    let long = "x".repeat(65);
    for bad in ["", "alice.1", "../etc", "a b", "ünïcode", long.as_str()] {
      assert!(check_session_id(bad).is_err(), "{:?} accepted", bad);
    }
  }

  #[tokio::test]
  async fn check_and_run_guard_before_calling_the_model() {
    let mock = MockModel::start(scripted_reply).await;
    let empty = Session::open(None, Arc::new(mock.flows()), memory());
    empty.update_code("print(1)".into()).await;
    assert_eq!(empty.check().await.notice.unwrap().title, "No Problem");
    assert_eq!(empty.run().await.notice.unwrap().title, "No Problem");

    let session = loaded(&mock, memory()).await;
    let hits = mock.hits();
    session.update_code("   \n".into()).await;
    let out = session.check().await;
    assert_eq!(out.notice.unwrap().title, "Empty Code");
    assert_eq!(session.run().await.notice.unwrap().title, "Empty Code");
    assert_eq!(mock.hits(), hits);
  }

  #[tokio::test]
  async fn check_and_run_fill_their_own_slots() {
    let mock = MockModel::start(scripted_reply).await;
    let session = loaded(&mock, memory()).await;
    session.update_code("class Main {}".into()).await;

    let (checked, ran) = tokio::join!(session.check(), session.run());
    assert!(checked.notice.is_none());
    assert!(ran.notice.is_none());

    let view = session.view().await;
    assert_eq!(view.check_result.unwrap().feedback, "Readable overall.");
    assert_eq!(view.run_result.unwrap().status, RunStatus::Halfway);
    assert_eq!(view.pending, Pending::default());
    // Not correct, so nothing is recorded as solved.
    assert_eq!(session.progress().await.solved_problems, 0);
  }

  #[tokio::test]
  async fn correct_run_records_one_solve_per_problem() {
    let mock = MockModel::start(|req: &Value| {
      if user_prompt(req).contains("as if you had executed it") {
        (StatusCode::OK, completion_json(json!({ "status": "correct", "output": "**Status:** ✅ CORRECT" })))
      } else {
        scripted_reply(req)
      }
    })
    .await;
    let store = memory();
    let session = loaded(&mock, store.clone()).await;
    session.update_code("class Main {}".into()).await;

    session.run().await;
    session.run().await;
    let progress = session.progress().await;
    assert_eq!(progress.solved_problems, 1);
    assert!(progress.achievement("first-problem").unwrap().unlocked);

    session.flush().await;
    let saved: ProgressRecord = load_json(store.as_ref(), &session_key(session.id(), PROGRESS_KEY)).unwrap();
    assert_eq!(saved.solved_problems, 1);
  }

  #[tokio::test]
  async fn results_for_a_replaced_problem_are_discarded() {
    let mock = MockModel::start_with_delay(scripted_reply, |req: &Value| {
      if user_prompt(req).contains("as if you had executed it") {
        Duration::from_millis(400)
      } else {
        Duration::ZERO
      }
    })
    .await;
    let session = loaded(&mock, memory()).await;
    session.update_code("class Main {}".into()).await;

    let running = {
      let session = session.clone();
      tokio::spawn(async move { session.run().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(session.view().await.pending.running);

    session.generate(pick("Prime Number Check")).await;
    let out = running.await.unwrap();

    assert_eq!(out.notice.unwrap().title, "Problem Changed");
    assert_eq!(out.view.epoch, 2);
    assert!(out.view.run_result.is_none());
    assert!(!out.view.pending.running);
  }

  #[tokio::test]
  async fn import_enhances_and_announces() {
    let mock = MockModel::start(scripted_reply).await;
    let session = Session::open(None, Arc::new(mock.flows()), memory());

    let out = session.import(paste()).await;
    let notice = out.notice.unwrap();
    assert_eq!(notice.level, NoticeLevel::Success);
    assert_eq!(notice.title, "Problem Imported Successfully!");
    assert!(out.view.problem.unwrap().problem_statement.contains("indices of two numbers"));
    assert_eq!(out.view.language, Language::Python);
    assert!(out.view.code.contains("twoSum"));
  }

  #[tokio::test]
  async fn import_falls_back_to_raw_input() {
    let session = Session::open(None, Arc::new(unreachable_flows().await), memory());

    let out = session.import(paste()).await;
    let problem = out.view.problem.unwrap();
    assert_eq!(problem.problem_statement, "find two numbers adding to target");
    assert_eq!(problem.expected_output, "[0,1]");
    assert_eq!(problem.code_skeleton, "");
    assert_eq!(out.view.code, "");
    assert_eq!(out.notice.unwrap().level, NoticeLevel::Info);
  }

  #[tokio::test]
  async fn resuming_restores_chat_and_progress() {
    let mock = MockModel::start(scripted_reply).await;
    let store = memory();
    let flows = Arc::new(mock.flows());
    let first = Session::open(None, flows.clone(), store.clone());
    first.generate(pick("Fibonacci Sequence")).await;
    first.chat("hint?", ResponseLength::Medium).await;
    first.flush().await;

    let again = Session::open(Some(first.id().to_string()), flows, store);
    let view = again.view().await;
    assert_eq!(view.chat.len(), 2);
    assert!(view.problem.is_none());
    assert_eq!(again.progress().await.total_problems, 1);
  }

  #[tokio::test]
  async fn subscribers_see_each_change() {
    let mock = MockModel::start(scripted_reply).await;
    let session = Session::open(None, Arc::new(mock.flows()), memory());
    let mut rx = session.subscribe();

    session.update_code("x = 1".into()).await;
    assert!(rx.has_changed().unwrap());
    assert_eq!(rx.borrow_and_update().code, "x = 1");
  }
}
