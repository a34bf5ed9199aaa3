//! Built-in learning paths and chat quick prompts.
//!
//! Guarantees the sidebar has something to offer even without TOML config.

use serde::{Deserialize, Serialize};

use crate::domain::{Complexity, Language, ProblemSpec};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicGroup {
  pub name: String,
  pub problems: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearningPath {
  pub language: Language,
  pub name: String,
  #[serde(default)]
  pub topics: Vec<TopicGroup>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
  pub paths: Vec<LearningPath>,
  pub languages: Vec<Language>,
  pub complexities: Vec<Complexity>,
  pub quick_prompts: Vec<String>,
  pub default_problem: ProblemSpec,
}

impl Catalog {
  /// Built-in catalog, with `paths` replacing the built-in paths when non-empty.
  pub fn new(paths: Vec<LearningPath>) -> Self {
    let paths = if paths.is_empty() { default_paths() } else { paths };
    Self {
      paths,
      languages: Language::ALL.to_vec(),
      complexities: Complexity::ALL.to_vec(),
      quick_prompts: QUICK_PROMPTS.iter().map(|s| s.to_string()).collect(),
      default_problem: default_problem(),
    }
  }

  pub fn topic_count(&self) -> usize {
    self.paths.iter().flat_map(|p| &p.topics).map(|t| t.problems.len()).sum()
  }
}

impl Default for Catalog {
  fn default() -> Self {
    Self::new(Vec::new())
  }
}

const QUICK_PROMPTS: [&str; 5] = [
  "How do I approach this problem?",
  "What's the time complexity?",
  "Can you explain this algorithm?",
  "Show me an example",
  "What are the edge cases?",
];

/// Problem loaded when a learner opens a fresh session.
pub fn default_problem() -> ProblemSpec {
  ProblemSpec { topic: "Fibonacci Sequence".into(), language: Language::Java, complexity: Complexity::Easy }
}

fn group(name: &str, problems: &[&str]) -> TopicGroup {
  TopicGroup { name: name.into(), problems: problems.iter().map(|p| p.to_string()).collect() }
}

pub fn default_paths() -> Vec<LearningPath> {
  vec![
    LearningPath {
      language: Language::Java,
      name: "Java Path".into(),
      topics: vec![
        group("Basics", &["Hello World", "Data Types", "Operators"]),
        group("Control Flow", &["If-Else Statement", "Switch Statement", "For Loop", "While Loop"]),
        group("Arrays & Strings", &["Array Manipulation", "String Reversal", "Palindrome Check"]),
        group("Algorithms", &["Fibonacci Sequence", "Prime Number Check", "Factorial Calculation"]),
      ],
    },
    LearningPath {
      language: Language::Python,
      name: "Python Path".into(),
      topics: vec![
        group("Basics", &["Hello World", "Variables", "Data Types"]),
        group("Data Structures", &["Lists", "Tuples", "Dictionaries"]),
        group("Functions", &["Function Definition", "Lambda Functions", "Recursion"]),
        group("Algorithms", &["Linear Search", "Binary Search", "Sorting a List"]),
      ],
    },
    LearningPath {
      language: Language::C,
      name: "C Path".into(),
      topics: vec![
        group("Basics", &["Hello World", "Variables and Types", "Input/Output"]),
        group("Pointers", &["Pointer Declaration", "Pointer Arithmetic", "Pointers and Arrays"]),
        group("Structs", &["Struct Definition", "Accessing Members", "Structs and Functions"]),
        group("File I/O", &["Reading from a file", "Writing to a file", "File Modes"]),
      ],
    },
  ]
}
