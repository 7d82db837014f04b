//! Progress aggregation: monotonic per-module accumulation and the analytics
//! snapshot computed from quiz history.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{AnalyticsSnapshot, ModuleBreakdown, ModuleProgress, QuizAttempt, RecentScore, SkillLevel};

const RECENT_SCORES: usize = 10;

/// Fold one time/completion delta into the existing record (or start a new one).
/// Time only grows and `completed` never reverts.
pub fn accumulate(
  existing: Option<ModuleProgress>,
  user_id: Uuid,
  module: &str,
  time_delta_seconds: u64,
  completed: bool,
  now: DateTime<Utc>,
) -> ModuleProgress {
  match existing {
    Some(mut p) => {
      p.time_on_task_seconds = p.time_on_task_seconds.saturating_add(time_delta_seconds);
      p.completed = p.completed || completed;
      if p.completed && p.completed_at.is_none() {
        p.completed_at = Some(now);
      }
      p.updated_at = now;
      p
    }
    None => ModuleProgress {
      user_id,
      module: module.to_string(),
      completed,
      completed_at: completed.then_some(now),
      time_on_task_seconds: time_delta_seconds,
      updated_at: now,
    },
  }
}

/// Seconds credited for one interaction: the caller's report (floored) or
/// `default`, never less than `minimum`.
pub fn credited_seconds(reported: Option<f64>, default: u64, minimum: u64) -> u64 {
  let reported = reported.filter(|v| v.is_finite()).map(f64::floor);
  match reported {
    Some(v) if v > minimum as f64 => v as u64,
    Some(_) => minimum,
    None => default.max(minimum),
  }
}

/// Rounded mean score over completed attempts; 0 when there are none.
pub fn average_score(attempts: &[QuizAttempt]) -> u32 {
  let scores: Vec<u32> = attempts.iter().filter(|a| a.is_completed()).filter_map(|a| a.score).collect();
  if scores.is_empty() {
    return 0;
  }
  let sum: u64 = scores.iter().map(|s| *s as u64).sum();
  (sum as f64 / scores.len() as f64).round() as u32
}

pub fn snapshot(
  user_id: Uuid,
  skill_level: SkillLevel,
  attempts: &[QuizAttempt],
  progress: &[ModuleProgress],
) -> AnalyticsSnapshot {
  let finished: Vec<&QuizAttempt> = attempts.iter().filter(|a| a.is_completed() && a.score.is_some()).collect();

  let mut best: HashMap<&str, u32> = HashMap::new();
  for a in &finished {
    let score = a.score.unwrap_or(0);
    best.entry(a.module.as_str()).and_modify(|b| *b = (*b).max(score)).or_insert(score);
  }

  let module_breakdown = progress
    .iter()
    .map(|p| ModuleBreakdown {
      module: p.module.clone(),
      completed: p.completed,
      time_on_task_seconds: p.time_on_task_seconds,
      best_score: best.get(p.module.as_str()).copied(),
    })
    .collect();

  let mut recent: Vec<RecentScore> = finished
    .iter()
    .filter_map(|a| {
      a.completed_at.map(|at| RecentScore { module: a.module.clone(), score: a.score.unwrap_or(0), completed_at: at })
    })
    .collect();
  recent.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
  recent.truncate(RECENT_SCORES);

  AnalyticsSnapshot {
    user_id,
    current_skill_level: skill_level,
    total_quiz_attempts: attempts.len(),
    average_quiz_score: average_score(attempts),
    completed_modules: progress.iter().filter(|p| p.completed).count(),
    total_time_on_task_seconds: progress.iter().map(|p| p.time_on_task_seconds).sum(),
    module_breakdown,
    recent_quiz_scores: recent,
  }
}
