//! Task-aware relevance scoring for candidate files.
//!
//! A score is the sum of a file-type prior and a set of boosts, clamped to
//! `[0, 1]`, with a multiplicative penalty for very large files:
//!
//! | signal                                   | effect                     |
//! |------------------------------------------|----------------------------|
//! | source code / config / docs / other      | base 0.3 / 0.2 / 0.1 / 0.05 |
//! | each keyword found in content            | + `keyword_content_boost`  |
//! | each keyword found in path               | + `keyword_path_boost`     |
//! | file is in the current change set        | + `recency_boost`          |
//! | dependency fan-in above threshold        | + `fan_in_boost`           |
//! | size above `large_file_bytes`            | × `large_file_penalty`     |
//!
//! Keyword matches are case-insensitive substring matches. Path matches run
//! against the path relative to the scorer's root when one is set.

use ctxgraph_core::{Language, RelevanceConfig, TaskContext};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "into", "are", "was", "were", "will",
    "have", "has", "had", "not", "but", "all", "any", "can", "its", "our", "you", "your", "they",
    "them", "then", "than", "there", "when", "where", "which", "what", "who", "how", "why",
    "should", "would", "could", "make", "some", "more", "also", "only", "just", "about",
];

const BUILD_FILE_NAMES: &[&str] = &[
    "makefile",
    "dockerfile",
    "cmakelists.txt",
    "cargo.lock",
    "build.gradle",
    "pom.xml",
    "package-lock.json",
];

/// Per-file signals that are not derivable from path and content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileSignals {
    pub size_bytes: usize,
    /// Number of files depending on this one.
    pub fan_in: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct ScoringInput<'a> {
    pub path: &'a str,
    pub content: &'a str,
    pub signals: FileSignals,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredFile {
    pub path: String,
    pub score: f64,
}

impl ScoredFile {
    pub fn new(path: impl Into<String>, score: f64) -> Self {
        Self {
            path: path.into(),
            score,
        }
    }
}

fn base_score(path: &str) -> f64 {
    let p = Path::new(path);
    let file_name = p
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_ascii_lowercase())
        .unwrap_or_default();
    if BUILD_FILE_NAMES.contains(&file_name.as_str()) {
        return 0.2;
    }

    let language = Language::from_path(p);
    if language.is_source_code() {
        0.3
    } else {
        match language {
            Language::Json | Language::Toml | Language::Yaml => 0.2,
            Language::Markdown | Language::Text => 0.1,
            _ => 0.05,
        }
    }
}

/// Relevance scorer holding the current task context and change set.
#[derive(Debug, Clone)]
pub struct RelevanceScorer {
    config: RelevanceConfig,
    keywords: Vec<String>,
    change_set: HashSet<String>,
    root: Option<PathBuf>,
}

impl RelevanceScorer {
    pub fn new(config: RelevanceConfig) -> Self {
        Self {
            config,
            keywords: Vec::new(),
            change_set: HashSet::new(),
            root: None,
        }
    }

    /// Keywords are lowercased and deduplicated. Words of three or more
    /// letters from `description` that are not stop words are added.
    pub fn set_task_context(&mut self, keywords: &[String], description: &str) {
        let mut seen = HashSet::new();
        let explicit = keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty());
        let described = description
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .map(str::to_lowercase)
            .filter(|w| w.chars().count() >= 3 && !STOP_WORDS.contains(&w.as_str()));

        self.keywords = explicit
            .chain(described)
            .filter(|k| seen.insert(k.clone()))
            .collect();
    }

    pub fn set_task(&mut self, task: &TaskContext) {
        self.set_task_context(&task.keywords, &task.description);
    }

    pub fn set_change_set<I, S>(&mut self, paths: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.change_set = paths.into_iter().map(Into::into).collect();
    }

    /// Directory stripped from paths before keyword matching.
    pub fn set_root(&mut self, root: impl Into<PathBuf>) {
        self.root = Some(root.into());
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn score_file(&self, path: &str, content: &str, signals: &FileSignals) -> f64 {
        let mut score = base_score(path);

        if !self.keywords.is_empty() {
            let content_lower = content.to_lowercase();
            let path_lower = self.match_path(path).to_lowercase();
            for keyword in &self.keywords {
                if content_lower.contains(keyword.as_str()) {
                    score += self.config.keyword_content_boost;
                }
                if path_lower.contains(keyword.as_str()) {
                    score += self.config.keyword_path_boost;
                }
            }
        }

        if self.change_set.contains(path) {
            score += self.config.recency_boost;
        }
        if signals.fan_in > self.config.fan_in_threshold {
            score += self.config.fan_in_boost;
        }

        score = score.clamp(0.0, 1.0);
        if signals.size_bytes > self.config.large_file_bytes {
            score *= self.config.large_file_penalty;
        }
        score.clamp(0.0, 1.0)
    }

    fn match_path<'p>(&self, path: &'p str) -> Cow<'p, str> {
        match &self.root {
            Some(root) => match Path::new(path).strip_prefix(root) {
                Ok(relative) => relative.to_string_lossy(),
                Err(_) => path.into(),
            },
            None => path.into(),
        }
    }

    /// Scores in input order.
    pub fn score_files(&self, inputs: &[ScoringInput<'_>]) -> Vec<ScoredFile> {
        inputs
            .iter()
            .map(|input| {
                ScoredFile::new(
                    input.path,
                    self.score_file(input.path, input.content, &input.signals),
                )
            })
            .collect()
    }

    /// Files scoring at least `threshold`, in input order.
    pub fn filter_by_relevance(files: &[ScoredFile], threshold: f64) -> Vec<ScoredFile> {
        files
            .iter()
            .filter(|f| f.score >= threshold)
            .cloned()
            .collect()
    }

    /// Highest score first; equal scores ordered by path.
    pub fn rank_files(mut files: Vec<ScoredFile>) -> Vec<ScoredFile> {
        files.sort_by(compare_ranked);
        files
    }
}

pub fn compare_ranked(a: &ScoredFile, b: &ScoredFile) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.path.cmp(&b.path))
}
