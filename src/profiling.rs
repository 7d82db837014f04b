//! Skill-level prompt tiers and skill-level derivation from quiz averages.

use crate::config::Tuning;
use crate::domain::SkillLevel;

pub fn skill_prompt_guide(level: SkillLevel) -> &'static str {
  match level {
    SkillLevel::Advanced => "Use concise, technical guidance with standards, edge cases, and optimization tips.",
    SkillLevel::Intermediate => "Use practical step-by-step instructions with short rationale and checks.",
    SkillLevel::Beginner => "Use plain language, short steps, and define jargon before using it.",
  }
}

/// Thresholds are inclusive lower bounds.
pub fn derive_skill_level(average_score: u32, tuning: &Tuning) -> SkillLevel {
  if average_score >= tuning.advanced_threshold {
    SkillLevel::Advanced
  } else if average_score >= tuning.intermediate_threshold {
    SkillLevel::Intermediate
  } else {
    SkillLevel::Beginner
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn thresholds_are_inclusive() {
    let t = Tuning::default();
    assert_eq!(derive_skill_level(100, &t), SkillLevel::Advanced);
    assert_eq!(derive_skill_level(85, &t), SkillLevel::Advanced);
    assert_eq!(derive_skill_level(84, &t), SkillLevel::Intermediate);
    assert_eq!(derive_skill_level(60, &t), SkillLevel::Intermediate);
    assert_eq!(derive_skill_level(59, &t), SkillLevel::Beginner);
    assert_eq!(derive_skill_level(0, &t), SkillLevel::Beginner);
  }

  #[test]
  fn thresholds_follow_tuning() {
    let t = Tuning { advanced_threshold: 90, intermediate_threshold: 50, ..Tuning::default() };
    assert_eq!(derive_skill_level(85, &t), SkillLevel::Intermediate);
    assert_eq!(derive_skill_level(50, &t), SkillLevel::Intermediate);
  }

  #[test]
  fn each_level_has_its_own_guide() {
    assert!(skill_prompt_guide(SkillLevel::Beginner).contains("define jargon"));
    assert!(skill_prompt_guide(SkillLevel::Intermediate).contains("step-by-step"));
    assert!(skill_prompt_guide(SkillLevel::Advanced).contains("standards"));
  }
}
