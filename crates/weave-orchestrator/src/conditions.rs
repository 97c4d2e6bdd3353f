// Condition Evaluator
// Evaluates branching conditions for the conditional strategy

use regex::RegexBuilder;
use weave_types::{AgentOutcome, BranchCondition, ConditionKind, OrchestratorAgentResult};

use crate::error::{OrchestratorError, Result};

/// Result of evaluating one or more conditions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionEvaluation {
    pub passed: bool,
    /// Caller-visible notes about conditions that degenerated (never errors)
    pub warnings: Vec<String>,
}

pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// Evaluate a single condition against the most recent agent result and
    /// the run's cumulative token count. `invert` is applied last.
    pub fn evaluate(
        condition: &BranchCondition,
        last_result: Option<&OrchestratorAgentResult>,
        total_tokens: u64,
    ) -> Result<ConditionEvaluation> {
        let output = last_result.map(|r| r.output.as_str()).unwrap_or("");
        let mut warnings = Vec::new();

        let raw = match condition.kind {
            ConditionKind::AgentSucceeded => {
                last_result.is_some_and(|r| r.status == AgentOutcome::Completed)
            }
            ConditionKind::AgentFailed => {
                last_result.is_some_and(|r| r.status == AgentOutcome::Failed)
            }
            ConditionKind::OutputContains => {
                let needle = condition.value.as_deref().unwrap_or("");
                if needle.is_empty() {
                    warnings.push(
                        "output-contains condition has an empty value and always matches"
                            .to_string(),
                    );
                    true
                } else {
                    output.to_lowercase().contains(&needle.to_lowercase())
                }
            }
            ConditionKind::OutputMatches => {
                let pattern = condition.value.as_deref().unwrap_or("");
                match RegexBuilder::new(pattern).size_limit(1 << 20).build() {
                    Ok(re) => re.is_match(output),
                    Err(e) => {
                        tracing::warn!(
                            "Invalid output-matches pattern {:?}, treating condition as false: {}",
                            pattern,
                            e
                        );
                        false
                    }
                }
            }
            ConditionKind::TokenCountBelow => match condition.threshold {
                Some(threshold) => total_tokens < threshold,
                None => true,
            },
            ConditionKind::CustomExpression => {
                return Err(OrchestratorError::ConditionNotImplemented(
                    ConditionKind::CustomExpression.as_str().to_string(),
                ));
            }
        };

        Ok(ConditionEvaluation {
            passed: raw != condition.invert,
            warnings,
        })
    }

    /// AND all conditions together. An empty list always passes.
    pub fn evaluate_all(
        conditions: &[BranchCondition],
        last_result: Option<&OrchestratorAgentResult>,
        total_tokens: u64,
    ) -> Result<ConditionEvaluation> {
        let mut combined = ConditionEvaluation {
            passed: true,
            warnings: Vec::new(),
        };
        for condition in conditions {
            let evaluation = Self::evaluate(condition, last_result, total_tokens)?;
            combined.warnings.extend(evaluation.warnings);
            if !evaluation.passed {
                combined.passed = false;
                break;
            }
        }
        Ok(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(output: &str) -> OrchestratorAgentResult {
        OrchestratorAgentResult::completed("prev", output)
    }

    fn eval(condition: BranchCondition, last: &OrchestratorAgentResult, tokens: u64) -> bool {
        ConditionEvaluator::evaluate(&condition, Some(last), tokens)
            .unwrap()
            .passed
    }

    #[test]
    fn success_and_failure_follow_last_status() {
        let ok = completed("fine");
        let failed = OrchestratorAgentResult::failed("prev", "boom");

        assert!(eval(BranchCondition::new(ConditionKind::AgentSucceeded), &ok, 0));
        assert!(!eval(BranchCondition::new(ConditionKind::AgentSucceeded), &failed, 0));
        assert!(eval(BranchCondition::new(ConditionKind::AgentFailed), &failed, 0));
        assert!(eval(
            BranchCondition::new(ConditionKind::AgentFailed).inverted(),
            &ok,
            0
        ));
    }

    #[test]
    fn output_contains_is_case_insensitive() {
        let last = completed("Verdict: APPROVED with notes");
        assert!(eval(
            BranchCondition::new(ConditionKind::OutputContains).with_value("approved"),
            &last,
            0
        ));
        assert!(!eval(
            BranchCondition::new(ConditionKind::OutputContains).with_value("rejected"),
            &last,
            0
        ));
    }

    #[test]
    fn empty_contains_value_matches_with_warning() {
        let last = completed("anything");
        let evaluation = ConditionEvaluator::evaluate(
            &BranchCondition::new(ConditionKind::OutputContains),
            Some(&last),
            0,
        )
        .unwrap();
        assert!(evaluation.passed);
        assert_eq!(evaluation.warnings.len(), 1);
    }

    #[test]
    fn output_matches_uses_regex_and_survives_bad_patterns() {
        let last = completed("score=42");
        assert!(eval(
            BranchCondition::new(ConditionKind::OutputMatches).with_value(r"score=\d+"),
            &last,
            0
        ));
        assert!(!eval(
            BranchCondition::new(ConditionKind::OutputMatches).with_value("score=("),
            &last,
            0
        ));
    }

    #[test]
    fn token_count_below_defaults_to_open_gate() {
        let last = completed("x");
        assert!(eval(
            BranchCondition::new(ConditionKind::TokenCountBelow).with_threshold(500),
            &last,
            499
        ));
        assert!(!eval(
            BranchCondition::new(ConditionKind::TokenCountBelow).with_threshold(500),
            &last,
            500
        ));
        assert!(eval(
            BranchCondition::new(ConditionKind::TokenCountBelow),
            &last,
            u64::MAX
        ));
    }

    #[test]
    fn custom_expression_is_a_hard_error() {
        let last = completed("x");
        let err = ConditionEvaluator::evaluate(
            &BranchCondition::new(ConditionKind::CustomExpression),
            Some(&last),
            0,
        )
        .unwrap_err();
        assert!(matches!(err, OrchestratorError::ConditionNotImplemented(_)));
    }

    #[test]
    fn evaluate_all_is_and_and_empty_passes() {
        let last = completed("approved");
        assert!(ConditionEvaluator::evaluate_all(&[], Some(&last), 0).unwrap().passed);

        let conditions = vec![
            BranchCondition::new(ConditionKind::AgentSucceeded),
            BranchCondition::new(ConditionKind::OutputContains).with_value("rejected"),
        ];
        assert!(!ConditionEvaluator::evaluate_all(&conditions, Some(&last), 0)
            .unwrap()
            .passed);
    }
}
