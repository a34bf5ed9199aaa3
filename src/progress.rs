//! Gamification: solved counts, streaks, per-language/complexity tallies and achievements.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Complexity, Language};

const SPEED_DEMON_LIMIT: Duration = Duration::from_secs(5 * 60);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
  pub solved: u32,
  pub total: u32,
}

impl Tally {
  fn attempt(&mut self) {
    self.total += 1;
  }

  fn solve(&mut self) {
    self.solved += 1;
    self.total = self.total.max(self.solved);
  }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageTallies {
  pub java: Tally,
  pub python: Tally,
  pub c: Tally,
}

impl LanguageTallies {
  fn get_mut(&mut self, language: Language) -> &mut Tally {
    match language {
      Language::Java => &mut self.java,
      Language::Python => &mut self.python,
      Language::C => &mut self.c,
    }
  }

  fn with_solves(&self) -> u32 {
    [self.java, self.python, self.c].iter().filter(|t| t.solved > 0).count() as u32
  }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplexityTallies {
  pub easy: Tally,
  pub medium: Tally,
  pub hard: Tally,
}

impl ComplexityTallies {
  fn get_mut(&mut self, complexity: Complexity) -> &mut Tally {
    match complexity {
      Complexity::Easy => &mut self.easy,
      Complexity::Medium => &mut self.medium,
      Complexity::Hard => &mut self.hard,
    }
  }

  fn with_solves(&self) -> u32 {
    [self.easy, self.medium, self.hard].iter().filter(|t| t.solved > 0).count() as u32
  }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Achievement {
  pub id: String,
  pub name: String,
  pub description: String,
  pub icon: String,
  pub unlocked: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub unlocked_at: Option<DateTime<Utc>>,
  pub progress: u32,
  pub max_progress: u32,
}

impl Achievement {
  fn new(id: &str, name: &str, description: &str, icon: &str, max_progress: u32) -> Self {
    Self {
      id: id.into(),
      name: name.into(),
      description: description.into(),
      icon: icon.into(),
      unlocked: false,
      unlocked_at: None,
      progress: 0,
      max_progress,
    }
  }

  /// Progress never exceeds the max and never goes back; unlock is sticky.
  fn advance(&mut self, value: u32, now: DateTime<Utc>) {
    let value = value.min(self.max_progress);
    if value > self.progress {
      self.progress = value;
    }
    if !self.unlocked && self.progress >= self.max_progress {
      self.unlocked = true;
      self.unlocked_at = Some(now);
    }
  }
}

pub fn default_achievements() -> Vec<Achievement> {
  vec![
    Achievement::new("first-problem", "First Steps", "Solve your first coding problem", "🎯", 1),
    Achievement::new("streak-3", "On Fire!", "Maintain a 3-day solving streak", "🔥", 3),
    Achievement::new("streak-7", "Week Warrior", "Maintain a 7-day solving streak", "⚡", 7),
    Achievement::new("language-master", "Polyglot", "Solve problems in all three languages", "🌍", 3),
    Achievement::new("complexity-climber", "Difficulty Climber", "Solve problems of all complexity levels", "🏔️", 3),
    Achievement::new("speed-demon", "Speed Demon", "Solve a problem in under 5 minutes", "⚡", 1),
  ]
}

/// Learner progress. Times are in minutes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProgressRecord {
  pub total_problems: u32,
  pub solved_problems: u32,
  pub current_streak: u32,
  pub longest_streak: u32,
  pub total_time: f64,
  pub average_time: f64,
  pub languages: LanguageTallies,
  pub complexity: ComplexityTallies,
  pub achievements: Vec<Achievement>,
  pub last_solved_on: Option<NaiveDate>,
}

impl Default for ProgressRecord {
  fn default() -> Self {
    Self {
      total_problems: 0,
      solved_problems: 0,
      current_streak: 0,
      longest_streak: 0,
      total_time: 0.0,
      average_time: 0.0,
      languages: LanguageTallies::default(),
      complexity: ComplexityTallies::default(),
      achievements: default_achievements(),
      last_solved_on: None,
    }
  }
}

impl ProgressRecord {
  /// Re-establish invariants on a record loaded from storage: every default
  /// achievement present, progress within bounds, tallies consistent.
  pub fn normalized(mut self) -> Self {
    for default in default_achievements() {
      if !self.achievements.iter().any(|a| a.id == default.id) {
        self.achievements.push(default);
      }
    }
    for a in &mut self.achievements {
      a.progress = a.progress.min(a.max_progress);
    }
    for t in [
      &mut self.languages.java,
      &mut self.languages.python,
      &mut self.languages.c,
      &mut self.complexity.easy,
      &mut self.complexity.medium,
      &mut self.complexity.hard,
    ] {
      t.total = t.total.max(t.solved);
    }
    self.total_problems = self.total_problems.max(self.solved_problems);
    self.longest_streak = self.longest_streak.max(self.current_streak);
    self
  }

  /// A new problem was put in front of the learner.
  pub fn record_attempt(&mut self, language: Language, complexity: Complexity) {
    self.total_problems += 1;
    self.languages.get_mut(language).attempt();
    self.complexity.get_mut(complexity).attempt();
  }

  /// The current problem was solved after `elapsed`.
  pub fn record_solve(
    &mut self,
    language: Language,
    complexity: Complexity,
    elapsed: Duration,
    now: DateTime<Utc>,
  ) {
    self.solved_problems += 1;
    self.total_problems = self.total_problems.max(self.solved_problems);
    self.languages.get_mut(language).solve();
    self.complexity.get_mut(complexity).solve();

    let today = now.date_naive();
    self.current_streak = match self.last_solved_on {
      Some(last) if last == today => self.current_streak.max(1),
      Some(last) if last.succ_opt() == Some(today) => self.current_streak + 1,
      _ => 1,
    };
    self.longest_streak = self.longest_streak.max(self.current_streak);
    self.last_solved_on = Some(today);

    let minutes = elapsed.as_secs_f64() / 60.0;
    self.total_time += minutes;
    self.average_time = self.total_time / f64::from(self.solved_problems);

    let fast = elapsed < SPEED_DEMON_LIMIT;
    let (solved, streak) = (self.solved_problems, self.current_streak);
    let (langs, tiers) = (self.languages.with_solves(), self.complexity.with_solves());
    for a in &mut self.achievements {
      let value = match a.id.as_str() {
        "first-problem" => solved,
        "streak-3" | "streak-7" => streak,
        "language-master" => langs,
        "complexity-climber" => tiers,
        "speed-demon" => u32::from(fast),
        _ => continue,
      };
      a.advance(value, now);
    }
  }

  pub fn overall_percent(&self) -> u32 {
    percent(self.solved_problems, self.total_problems)
  }

  pub fn achievement(&self, id: &str) -> Option<&Achievement> {
    self.achievements.iter().find(|a| a.id == id)
  }
}

fn percent(solved: u32, total: u32) -> u32 {
  if total == 0 {
    0
  } else {
    ((f64::from(solved) / f64::from(total)) * 100.0).round() as u32
  }
}
