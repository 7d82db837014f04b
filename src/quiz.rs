//! Quiz flow: start an attempt from generated questions, evaluate answers
//! deterministically, close the attempt once and adapt the learner's skill.

use tracing::{info, instrument};

use crate::config::Tuning;
use crate::domain::{QuestionKind, QuizQuestion, User};
use crate::error::TrainerError;
use crate::generation::QuizRequest;
use crate::profiling::derive_skill_level;
use crate::progress::{average_score, credited_seconds};
use crate::protocol::{QuestionOut, QuizAnswerIn, QuizAnswerOut, QuizStartOut};
use crate::state::AppState;
use crate::store::NewAnswer;
use crate::util::normalize_answer;
use crate::vector_store::VectorQuery;

/// No model call. Multiple choice accepts the key itself or the text of the
/// option whose letter matches the key; short answers need enough of the
/// expected tokens to show up in the submission.
pub fn evaluate_answer(question: &QuizQuestion, user_answer: &str, tuning: &Tuning) -> bool {
  let submitted = normalize_answer(user_answer);
  let expected = normalize_answer(&question.answer_key);

  match &question.kind {
    QuestionKind::MultipleChoice { options } => {
      if submitted == expected {
        return true;
      }
      options
        .iter()
        .position(|o| normalize_answer(o) == submitted)
        .and_then(|idx| u8::try_from(idx).ok())
        .and_then(|idx| b'a'.checked_add(idx))
        .map(|letter| expected == (letter as char).to_string())
        .unwrap_or(false)
    }
    QuestionKind::ShortAnswer => {
      let tokens: Vec<&str> = expected.split(' ').filter(|t| !t.is_empty()).collect();
      if tokens.is_empty() {
        return false;
      }
      let hits = tokens.iter().filter(|t| submitted.contains(**t)).count();
      hits as f64 / tokens.len() as f64 >= tuning.short_answer_threshold
    }
  }
}

fn score_percent(correct: usize, total: usize) -> u32 {
  if total == 0 {
    return 0;
  }
  (correct as f64 / total as f64 * 100.0).round() as u32
}

#[instrument(level = "info", skip(state, user), fields(user = %user.id, module = ?module))]
pub async fn start_quiz(state: &AppState, user: &User, module: Option<&str>) -> Result<QuizStartOut, TrainerError> {
  let topic = module.map(str::trim).filter(|m| !m.is_empty()).unwrap_or(state.tuning.default_module.as_str()).to_string();

  let context = state
    .vectors
    .query(&VectorQuery::new(
      format!("{topic} standard operating procedures"),
      state.tuning.quiz_top_k,
      Some(topic.clone()),
    ))
    .await;

  let drafts = state
    .llm
    .generate_quiz(QuizRequest {
      topic: &topic,
      language: &user.language,
      skill_level: user.skill_level,
      context: &context,
    })
    .await;

  let attempt = state.store.create_quiz_attempt(user.id, &topic, drafts.len()).await?;
  let questions = state.store.create_quiz_questions(attempt.id, &drafts).await?;
  info!(target: "quiz", attempt = %attempt.id, questions = questions.len(), "Quiz attempt started");

  Ok(QuizStartOut {
    attempt_id: attempt.id,
    module: topic,
    questions: questions.iter().map(QuestionOut::from).collect(),
  })
}

#[instrument(level = "info", skip(state, user, input), fields(user = %user.id, attempt = %input.attempt_id, question = %input.question_id))]
pub async fn submit_answer(state: &AppState, user: &User, input: QuizAnswerIn) -> Result<QuizAnswerOut, TrainerError> {
  if input.user_answer.trim().is_empty() {
    return Err(TrainerError::InvalidRequest("userAnswer must not be empty".into()));
  }

  let attempt = match state.store.get_quiz_attempt(input.attempt_id).await? {
    Some(a) if a.user_id == user.id => a,
    _ => return Err(TrainerError::AttemptNotFound),
  };
  let question = match state.store.get_quiz_question(input.question_id).await? {
    Some(q) if q.attempt_id == attempt.id => q,
    _ => return Err(TrainerError::QuestionMismatch),
  };

  let correct = evaluate_answer(&question, &input.user_answer, &state.tuning);
  let feedback = if correct {
    format!("Correct. {}", question.explanation)
  } else {
    format!("Not quite. Expected answer: {}. {}", question.answer_key, question.explanation)
  };

  state
    .store
    .create_quiz_answer(NewAnswer {
      attempt_id: attempt.id,
      question_id: question.id,
      user_answer: input.user_answer,
      is_correct: correct,
      explanation: feedback.clone(),
    })
    .await?;

  let answers = state.store.list_quiz_answers(attempt.id).await?;
  let answered_count = answers.len();
  let correct_count = answers.iter().filter(|a| a.is_correct).count();
  let score = score_percent(correct_count, attempt.total_questions);
  let completed = answered_count >= attempt.total_questions;

  if completed && state.store.complete_quiz_attempt(attempt.id, score).await? {
    info!(target: "quiz", attempt = %attempt.id, score, "Quiz attempt completed");
    adapt_skill_level(state, user).await?;
  }

  let credited = credited_seconds(
    input.time_on_task_seconds,
    state.tuning.default_quiz_seconds,
    state.tuning.min_quiz_seconds,
  );
  state
    .store
    .upsert_module_progress(user.id, &attempt.module, credited, completed && score >= state.tuning.module_pass_score)
    .await?;

  Ok(QuizAnswerOut {
    correct,
    feedback,
    explanation: question.explanation,
    completed,
    score_percent: score,
    answered_count,
    total_questions: attempt.total_questions,
  })
}

/// Re-derive skill from the lifetime average; write only on change.
async fn adapt_skill_level(state: &AppState, user: &User) -> Result<(), TrainerError> {
  let attempts = state.store.list_quiz_attempts(user.id).await?;
  let average = average_score(&attempts);
  let current = state.store.get_user(user.id).await?.map(|u| u.skill_level).unwrap_or(user.skill_level);
  let next = derive_skill_level(average, &state.tuning);
  if next != current {
    info!(target: "quiz", user = %user.id, average, from = current.as_str(), to = next.as_str(), "Skill level changed");
    state.store.update_user(user.id, None, Some(next)).await?;
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::SkillLevel;
  use crate::state::test_support::{learner, offline_state};
  use uuid::Uuid;

  fn question(kind: QuestionKind, key: &str) -> QuizQuestion {
    QuizQuestion {
      id: Uuid::new_v4(),
      attempt_id: Uuid::new_v4(),
      position: 0,
      prompt: "prompt".into(),
      kind,
      answer_key: key.into(),
      explanation: "because".into(),
    }
  }

  fn mc() -> QuestionKind {
    QuestionKind::MultipleChoice {
      options: vec!["A) Skip checks".into(), "B) Verify PPE".into(), "C) Ask maintenance".into()],
    }
  }

  #[test]
  fn multiple_choice_accepts_letter_in_any_case() {
    let t = Tuning::default();
    let q = question(mc(), "B");
    assert!(evaluate_answer(&q, "b", &t));
    assert!(evaluate_answer(&q, "  B ", &t));
    assert!(!evaluate_answer(&q, "C", &t));
  }

  #[test]
  fn multiple_choice_accepts_matching_option_text() {
    let t = Tuning::default();
    let q = question(mc(), "B");
    assert!(evaluate_answer(&q, "b) verify   ppe", &t));
    assert!(!evaluate_answer(&q, "A) Skip checks", &t));
    assert!(!evaluate_answer(&q, "Verify PPE", &t));
  }

  #[test]
  fn short_answer_uses_token_overlap() {
    let t = Tuning::default();
    let q = question(QuestionKind::ShortAnswer, "prevents unexpected machine startup");
    // 3 of 4 expected tokens present
    assert!(evaluate_answer(&q, "It prevents the machine startup", &t));
    // 2 of 4
    assert!(!evaluate_answer(&q, "prevents startup", &t));
    assert!(!evaluate_answer(&question(QuestionKind::ShortAnswer, "   "), "anything", &t));
  }

  #[test]
  fn score_rounds_to_nearest_percent() {
    assert_eq!(score_percent(2, 3), 67);
    assert_eq!(score_percent(1, 3), 33);
    assert_eq!(score_percent(3, 3), 100);
    assert_eq!(score_percent(0, 0), 0);
  }

  #[tokio::test]
  async fn start_returns_learner_safe_questions() {
    let state = offline_state();
    let user = learner(&state).await;
    let out = start_quiz(&state, &user, None).await.unwrap();
    assert_eq!(out.module, "General Onboarding");
    assert_eq!(out.questions.len(), 3);
    let attempt = state.store.get_quiz_attempt(out.attempt_id).await.unwrap().unwrap();
    assert_eq!(attempt.total_questions, 3);
    let json = serde_json::to_value(&out).unwrap();
    assert!(json["questions"][0].get("answerKey").is_none());
  }

  async fn answer(state: &AppState, user: &User, attempt: Uuid, question: Uuid, text: &str) -> Result<QuizAnswerOut, TrainerError> {
    submit_answer(
      state,
      user,
      QuizAnswerIn { attempt_id: attempt, question_id: question, user_answer: text.into(), time_on_task_seconds: None },
    )
    .await
  }

  #[tokio::test]
  async fn full_attempt_completes_scores_and_adapts_skill() {
    let state = offline_state();
    let user = learner(&state).await;
    let out = start_quiz(&state, &user, Some("Safety Basics")).await.unwrap();
    let ids: Vec<Uuid> = out.questions.iter().map(|q| q.id).collect();

    let first = answer(&state, &user, out.attempt_id, ids[0], "b").await.unwrap();
    assert!(first.correct);
    assert!(first.feedback.starts_with("Correct. "));
    assert!(!first.completed);

    let second = answer(&state, &user, out.attempt_id, ids[1], "wrong").await.unwrap();
    assert!(!second.correct);
    assert!(second.feedback.starts_with("Not quite. Expected answer: prevents unexpected machine startup."));

    let last = answer(&state, &user, out.attempt_id, ids[2], "C").await.unwrap();
    assert!(last.completed);
    assert_eq!(last.score_percent, 67);
    assert_eq!(last.answered_count, 3);

    let profile = state.store.get_user(user.id).await.unwrap().unwrap();
    assert_eq!(profile.skill_level, SkillLevel::Intermediate);

    // 67 < 70: time accrues but the module stays open
    let progress = state.store.list_module_progress(user.id).await.unwrap();
    assert_eq!(progress[0].time_on_task_seconds, 60);
    assert!(!progress[0].completed);
  }

  #[tokio::test]
  async fn perfect_attempt_completes_module() {
    let state = offline_state();
    let user = learner(&state).await;
    let out = start_quiz(&state, &user, Some("Safety Basics")).await.unwrap();
    let ids: Vec<Uuid> = out.questions.iter().map(|q| q.id).collect();
    answer(&state, &user, out.attempt_id, ids[0], "B").await.unwrap();
    answer(&state, &user, out.attempt_id, ids[1], "it prevents unexpected machine startup").await.unwrap();
    let last = answer(&state, &user, out.attempt_id, ids[2], "C) Stop and report per SOP").await.unwrap();
    assert_eq!(last.score_percent, 100);

    let snap = state.store.get_analytics(user.id).await.unwrap();
    assert_eq!(snap.completed_modules, 1);
    assert_eq!(snap.current_skill_level, SkillLevel::Advanced);
  }

  #[tokio::test]
  async fn duplicate_answer_conflicts_without_state_change() {
    let state = offline_state();
    let user = learner(&state).await;
    let out = start_quiz(&state, &user, None).await.unwrap();
    let q = out.questions[0].id;
    answer(&state, &user, out.attempt_id, q, "B").await.unwrap();
    let err = answer(&state, &user, out.attempt_id, q, "A").await.unwrap_err();
    assert!(matches!(err, TrainerError::DuplicateAnswer));
    assert_eq!(state.store.list_quiz_answers(out.attempt_id).await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn foreign_attempts_and_questions_are_not_found() {
    let state = offline_state();
    let owner = learner(&state).await;
    let other = learner(&state).await;
    let a = start_quiz(&state, &owner, None).await.unwrap();
    let b = start_quiz(&state, &owner, None).await.unwrap();

    let err = answer(&state, &other, a.attempt_id, a.questions[0].id, "B").await.unwrap_err();
    assert!(matches!(err, TrainerError::AttemptNotFound));
    let err = answer(&state, &owner, a.attempt_id, b.questions[0].id, "B").await.unwrap_err();
    assert!(matches!(err, TrainerError::QuestionMismatch));
  }
}
