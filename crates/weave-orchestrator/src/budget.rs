// Orchestrator Budget Guard
// Admission checks against token/cost ceilings and parallel concurrency sizing

use weave_types::{OrchestrationRun, OrchestratorBudget};

/// Outcome of a pre-agent (or pre-batch) budget check
#[derive(Debug, Clone, PartialEq)]
pub enum BudgetCheckResult {
    Ok,
    /// Consumption reached `percentage` of a total ceiling but is still below it
    Warning { dimension: String, percentage: f64 },
    Exceeded { dimension: String, reason: String },
}

impl BudgetCheckResult {
    pub fn is_exceeded(&self) -> bool {
        matches!(self, BudgetCheckResult::Exceeded { .. })
    }
}

/// Outcome of sizing a parallel run against the budget
#[derive(Debug, Clone, PartialEq)]
pub enum ParallelBudgetCheck {
    Proceed {
        effective_concurrency: usize,
        /// Advisory only: a total ceiling exists but nothing bounds a single agent
        warning: Option<String>,
    },
    Reject {
        reason: String,
    },
}

pub struct BudgetGuard;

impl BudgetGuard {
    /// Reject once consumed tokens or cost meet or exceed a configured total ceiling
    pub fn can_run_agent(budget: &OrchestratorBudget, run: &OrchestrationRun) -> BudgetCheckResult {
        Self::check_usage(budget, run.total_tokens(), run.total_cost, None)
    }

    /// Same as [`can_run_agent`](Self::can_run_agent), but reports a warning once
    /// usage crosses `warning_ratio` of a ceiling
    pub fn check_with_warning(
        budget: &OrchestratorBudget,
        run: &OrchestrationRun,
        warning_ratio: f64,
    ) -> BudgetCheckResult {
        Self::check_usage(budget, run.total_tokens(), run.total_cost, Some(warning_ratio))
    }

    fn check_usage(
        budget: &OrchestratorBudget,
        tokens_used: u64,
        cost_used: f64,
        warning_ratio: Option<f64>,
    ) -> BudgetCheckResult {
        if let Some(max_tokens) = budget.max_total_tokens {
            if tokens_used >= max_tokens {
                return BudgetCheckResult::Exceeded {
                    dimension: "tokens".to_string(),
                    reason: format!(
                        "Token budget exhausted: {} of {} tokens used",
                        tokens_used, max_tokens
                    ),
                };
            }
        }
        if let Some(max_cost) = budget.max_total_cost {
            if cost_used >= max_cost {
                return BudgetCheckResult::Exceeded {
                    dimension: "cost".to_string(),
                    reason: format!(
                        "Cost budget exhausted: ${:.4} of ${:.4} spent",
                        cost_used, max_cost
                    ),
                };
            }
        }

        let Some(ratio) = warning_ratio else {
            return BudgetCheckResult::Ok;
        };
        let token_pct = budget
            .max_total_tokens
            .filter(|max| *max > 0)
            .map(|max| tokens_used as f64 / max as f64);
        let cost_pct = budget
            .max_total_cost
            .filter(|max| *max > 0.0)
            .map(|max| cost_used / max);

        match (token_pct, cost_pct) {
            (Some(t), Some(c)) if c > t && c >= ratio => BudgetCheckResult::Warning {
                dimension: "cost".to_string(),
                percentage: c,
            },
            (Some(t), _) if t >= ratio => BudgetCheckResult::Warning {
                dimension: "tokens".to_string(),
                percentage: t,
            },
            (_, Some(c)) if c >= ratio => BudgetCheckResult::Warning {
                dimension: "cost".to_string(),
                percentage: c,
            },
            _ => BudgetCheckResult::Ok,
        }
    }

    /// Compute how many agents a parallel batch may run at once.
    ///
    /// Token and cost dimensions are evaluated independently and the more
    /// restrictive wins. A total ceiling without a matching per-agent ceiling
    /// cannot be enforced up front, so it only produces an advisory warning.
    pub fn validate_parallel_budget(
        budget: &OrchestratorBudget,
        agent_count: usize,
    ) -> ParallelBudgetCheck {
        if !budget.has_total_ceiling() {
            return ParallelBudgetCheck::Proceed {
                effective_concurrency: agent_count,
                warning: None,
            };
        }

        let mut concurrency = agent_count;
        let mut advisories = Vec::new();

        match (budget.max_total_tokens, budget.max_tokens_per_agent) {
            (Some(total), Some(per_agent)) => {
                let slots = if per_agent == 0 {
                    agent_count as u64
                } else {
                    total / per_agent
                };
                if slots < 1 {
                    return ParallelBudgetCheck::Reject {
                        reason: format!(
                            "Per-agent token budget ({}) exceeds total token budget ({})",
                            per_agent, total
                        ),
                    };
                }
                concurrency = concurrency.min(slots.min(usize::MAX as u64) as usize);
            }
            (Some(total), None) => advisories.push(format!(
                "total token budget of {} has no per-agent cap; parallel agents may overshoot it",
                total
            )),
            _ => {}
        }

        match (budget.max_total_cost, budget.max_cost_per_agent) {
            (Some(total), Some(per_agent)) => {
                let slots = if per_agent <= 0.0 {
                    agent_count as f64
                } else {
                    (total / per_agent).floor()
                };
                if slots < 1.0 {
                    return ParallelBudgetCheck::Reject {
                        reason: format!(
                            "Per-agent cost budget (${:.4}) exceeds total cost budget (${:.4})",
                            per_agent, total
                        ),
                    };
                }
                if slots < concurrency as f64 {
                    concurrency = slots as usize;
                }
            }
            (Some(total), None) => advisories.push(format!(
                "total cost budget of ${:.4} has no per-agent cap; parallel agents may overshoot it",
                total
            )),
            _ => {}
        }

        let warning = if advisories.is_empty() {
            None
        } else {
            Some(format!("Budget may be exceeded: {}", advisories.join("; ")))
        };

        ParallelBudgetCheck::Proceed {
            effective_concurrency: concurrency,
            warning,
        }
    }

    /// Describe a result that overshot a per-agent ceiling, if any
    pub fn per_agent_overrun(
        budget: &OrchestratorBudget,
        tokens: u64,
        cost: f64,
    ) -> Option<String> {
        if let Some(max) = budget.max_tokens_per_agent {
            if tokens > max {
                return Some(format!(
                    "Agent used {} tokens, above the per-agent budget of {}",
                    tokens, max
                ));
            }
        }
        if let Some(max) = budget.max_cost_per_agent {
            if cost > max {
                return Some(format!(
                    "Agent cost ${:.4}, above the per-agent budget of ${:.4}",
                    cost, max
                ));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_types::OrchestratorConfig;

    fn run_with_usage(tokens: u64, cost: f64) -> OrchestrationRun {
        let mut run = OrchestrationRun::new("orch", None, &OrchestratorConfig::default());
        run.add_usage(tokens, 0, cost, 0);
        run
    }

    #[test]
    fn unlimited_budget_always_allows() {
        let budget = OrchestratorBudget::unlimited();
        let run = run_with_usage(10_000_000, 1_000.0);
        assert_eq!(BudgetGuard::can_run_agent(&budget, &run), BudgetCheckResult::Ok);
    }

    #[test]
    fn rejects_when_tokens_meet_ceiling() {
        let budget = OrchestratorBudget {
            max_total_tokens: Some(1_000),
            ..Default::default()
        };
        assert!(!BudgetGuard::can_run_agent(&budget, &run_with_usage(999, 0.0)).is_exceeded());
        assert!(BudgetGuard::can_run_agent(&budget, &run_with_usage(1_000, 0.0)).is_exceeded());
    }

    #[test]
    fn rejects_when_cost_exceeds_ceiling() {
        let budget = OrchestratorBudget {
            max_total_cost: Some(2.0),
            ..Default::default()
        };
        match BudgetGuard::can_run_agent(&budget, &run_with_usage(0, 2.5)) {
            BudgetCheckResult::Exceeded { dimension, .. } => assert_eq!(dimension, "cost"),
            other => panic!("expected exceeded, got {:?}", other),
        }
    }

    #[test]
    fn warns_past_ratio() {
        let budget = OrchestratorBudget {
            max_total_tokens: Some(1_000),
            ..Default::default()
        };
        match BudgetGuard::check_with_warning(&budget, &run_with_usage(850, 0.0), 0.8) {
            BudgetCheckResult::Warning {
                dimension,
                percentage,
            } => {
                assert_eq!(dimension, "tokens");
                assert!((percentage - 0.85).abs() < 1e-9);
            }
            other => panic!("expected warning, got {:?}", other),
        }
        assert_eq!(
            BudgetGuard::check_with_warning(&budget, &run_with_usage(100, 0.0), 0.8),
            BudgetCheckResult::Ok
        );
    }

    #[test]
    fn parallel_concurrency_is_total_over_per_agent() {
        let budget = OrchestratorBudget {
            max_total_tokens: Some(1_000),
            max_tokens_per_agent: Some(300),
            ..Default::default()
        };
        assert_eq!(
            BudgetGuard::validate_parallel_budget(&budget, 5),
            ParallelBudgetCheck::Proceed {
                effective_concurrency: 3,
                warning: None
            }
        );
    }

    #[test]
    fn parallel_rejects_when_per_agent_exceeds_total() {
        let budget = OrchestratorBudget {
            max_total_tokens: Some(1_000),
            max_tokens_per_agent: Some(1_100),
            ..Default::default()
        };
        assert!(matches!(
            BudgetGuard::validate_parallel_budget(&budget, 5),
            ParallelBudgetCheck::Reject { .. }
        ));
    }

    #[test]
    fn parallel_without_total_ceiling_runs_everything() {
        let budget = OrchestratorBudget {
            max_tokens_per_agent: Some(10),
            ..Default::default()
        };
        assert_eq!(
            BudgetGuard::validate_parallel_budget(&budget, 7),
            ParallelBudgetCheck::Proceed {
                effective_concurrency: 7,
                warning: None
            }
        );
    }

    #[test]
    fn parallel_total_without_per_agent_is_advisory() {
        let budget = OrchestratorBudget {
            max_total_tokens: Some(1_000),
            ..Default::default()
        };
        match BudgetGuard::validate_parallel_budget(&budget, 4) {
            ParallelBudgetCheck::Proceed {
                effective_concurrency,
                warning,
            } => {
                assert_eq!(effective_concurrency, 4);
                assert!(warning.unwrap().contains("no per-agent cap"));
            }
            other => panic!("expected proceed, got {:?}", other),
        }
    }

    #[test]
    fn parallel_picks_more_restrictive_dimension() {
        let budget = OrchestratorBudget {
            max_total_tokens: Some(1_000),
            max_tokens_per_agent: Some(250),
            max_total_cost: Some(1.0),
            max_cost_per_agent: Some(0.5),
        };
        assert_eq!(
            BudgetGuard::validate_parallel_budget(&budget, 10),
            ParallelBudgetCheck::Proceed {
                effective_concurrency: 2,
                warning: None
            }
        );
    }

    #[test]
    fn per_agent_overrun_reports_tokens() {
        let budget = OrchestratorBudget {
            max_tokens_per_agent: Some(100),
            ..Default::default()
        };
        assert!(BudgetGuard::per_agent_overrun(&budget, 150, 0.0).is_some());
        assert!(BudgetGuard::per_agent_overrun(&budget, 100, 0.0).is_none());
    }
}
