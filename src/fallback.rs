//! Deterministic content that keeps every learner-facing flow usable when no
//! generation provider is configured or reachable.

use crate::domain::{QuestionKind, QuizQuestionDraft, RetrievedChunk};

const DEFAULT_GUIDANCE: &str =
  "Follow lockout/tagout procedures, confirm PPE, and escalate to a supervisor when uncertain.";

/// Templated three-step answer quoting the best retrieved chunk verbatim.
pub fn assistance_answer(module: &str, context: &[RetrievedChunk]) -> String {
  let grounding = context.first().map(|c| c.chunk.text.as_str()).unwrap_or(DEFAULT_GUIDANCE);
  format!(
    "1) Review the relevant SOP step for {module}.\n\
     2) Perform the task in sequence and confirm each safety checkpoint.\n\
     3) If a machine behaves unexpectedly, stop and escalate before continuing.\n\
     Why: This guidance aligns with your request and the available training context: {grounding}"
  )
}

/// Fixed three-question set: PPE (multiple choice), lockout/tagout (short
/// answer), out-of-tolerance handling (multiple choice).
pub fn quiz(topic: &str) -> Vec<QuizQuestionDraft> {
  vec![
    QuizQuestionDraft {
      prompt: format!("What is the first action before starting a {topic} task?"),
      kind: QuestionKind::MultipleChoice {
        options: vec![
          "A) Skip checks to save time".into(),
          "B) Verify PPE and safety status".into(),
          "C) Ask maintenance to run it".into(),
          "D) Start machine immediately".into(),
        ],
      },
      answer_key: "B".into(),
      explanation: "Safety checks and PPE verification always come before machine operation.".into(),
    },
    QuizQuestionDraft {
      prompt: format!("Name one reason lockout/tagout is important in {topic}."),
      kind: QuestionKind::ShortAnswer,
      answer_key: "prevents unexpected machine startup".into(),
      explanation: "Lockout/tagout controls hazardous energy and prevents accidental activation.".into(),
    },
    QuizQuestionDraft {
      prompt: "When quality readings are out of tolerance, what should you do first?".into(),
      kind: QuestionKind::MultipleChoice {
        options: vec![
          "A) Continue production".into(),
          "B) Disable all alarms".into(),
          "C) Stop and report per SOP".into(),
          "D) Ignore one-time deviations".into(),
        ],
      },
      answer_key: "C".into(),
      explanation: "Out-of-tolerance readings require immediate SOP-based containment and escalation.".into(),
    },
  ]
}

pub fn explanation() -> String {
  "The response prioritized safety and SOP compliance, then selected actions supported by the retrieved training snippets."
    .into()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::Chunk;

  #[test]
  fn assistance_quotes_first_chunk() {
    let ctx = vec![RetrievedChunk {
      chunk: Chunk {
        id: "1".into(),
        text: "Isolate the hydraulic supply before clearing a jam.".into(),
        module: "Press Line".into(),
        source: "press.md".into(),
        metadata: Default::default(),
      },
      score: 0.9,
    }];
    let answer = assistance_answer("Press Line", &ctx);
    assert!(answer.contains("SOP step for Press Line"));
    assert!(answer.ends_with("Isolate the hydraulic supply before clearing a jam."));
  }

  #[test]
  fn assistance_without_context_escalates() {
    let answer = assistance_answer("General Onboarding", &[]);
    assert!(answer.contains("escalate to a supervisor"));
  }

  #[test]
  fn quiz_is_three_well_formed_questions() {
    let qs = quiz("Safety Basics");
    assert_eq!(qs.len(), 3);
    assert_eq!(qs[0].kind.type_name(), "multiple_choice");
    assert_eq!(qs[1].kind, QuestionKind::ShortAnswer);
    assert_eq!(qs[2].kind.type_name(), "multiple_choice");
    for q in &qs {
      if let QuestionKind::MultipleChoice { options } = &q.kind {
        let idx = (q.answer_key.as_bytes()[0] - b'A') as usize;
        assert!(idx < options.len());
      }
      assert!(!q.explanation.is_empty());
    }
    assert_eq!(qs, quiz("Safety Basics"));
  }
}
