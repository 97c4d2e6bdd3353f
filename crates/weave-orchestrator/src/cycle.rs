// Orchestration Cycle Detection
// Walks the parent-orchestration chain before a run is admitted

/// How a parent id resolves to an in-flight orchestration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLink {
    pub orchestrator_id: String,
    pub run_id: String,
    pub parent_orchestration_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleCheck {
    pub has_cycle: bool,
    /// Orchestrator ids visited, starting with the one being started
    pub chain: Vec<String>,
}

pub struct CycleDetector;

impl CycleDetector {
    pub const DEFAULT_MAX_DEPTH: usize = 20;

    /// Follow parent ids until the starting orchestrator reappears (cycle),
    /// the chain ends (no cycle) or `max_depth` hops are exceeded (treated
    /// as a cycle so malformed chains cannot be walked forever).
    ///
    /// `resolve` maps a parent id to the still-active orchestration it
    /// names, if any. A parent with no active run ends the chain.
    pub fn detect<F>(
        orchestrator_id: &str,
        parent_orchestration_id: Option<&str>,
        max_depth: usize,
        resolve: F,
    ) -> CycleCheck
    where
        F: Fn(&str) -> Option<ParentLink>,
    {
        let mut chain = vec![orchestrator_id.to_string()];
        let mut current = parent_orchestration_id.map(str::to_string);
        let mut hops = 0usize;

        while let Some(parent_id) = current {
            if hops >= max_depth {
                chain.push(parent_id);
                return CycleCheck {
                    has_cycle: true,
                    chain,
                };
            }
            hops += 1;

            let link = resolve(&parent_id);
            let identity = link
                .as_ref()
                .map(|l| l.orchestrator_id.clone())
                .unwrap_or_else(|| parent_id.clone());
            let revisits_start = identity == orchestrator_id || parent_id == orchestrator_id;
            chain.push(identity);

            if revisits_start {
                return CycleCheck {
                    has_cycle: true,
                    chain,
                };
            }

            current = link.and_then(|l| l.parent_orchestration_id);
        }

        CycleCheck {
            has_cycle: false,
            chain,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn link(id: &str, parent: Option<&str>) -> ParentLink {
        ParentLink {
            orchestrator_id: id.to_string(),
            run_id: format!("run-{}", id),
            parent_orchestration_id: parent.map(String::from),
        }
    }

    /// Chain o1 <- o2 <- ... <- oN where each o(k) was started by o(k+1)
    fn linear_chain(len: usize) -> HashMap<String, ParentLink> {
        (1..=len)
            .map(|k| {
                let id = format!("o{}", k);
                let parent = if k < len {
                    Some(format!("o{}", k + 1))
                } else {
                    None
                };
                (id.clone(), link(&id, parent.as_deref()))
            })
            .collect()
    }

    fn check(
        table: &HashMap<String, ParentLink>,
        start: &str,
        parent: Option<&str>,
    ) -> CycleCheck {
        CycleDetector::detect(start, parent, CycleDetector::DEFAULT_MAX_DEPTH, |id| {
            table.get(id).cloned()
        })
    }

    #[test]
    fn no_parent_means_no_cycle() {
        let table = HashMap::new();
        let result = check(&table, "root", None);
        assert!(!result.has_cycle);
        assert_eq!(result.chain, vec!["root".to_string()]);
    }

    #[test]
    fn direct_self_reference_is_a_cycle() {
        let table = HashMap::new();
        let result = check(&table, "root", Some("root"));
        assert!(result.has_cycle);
        assert_eq!(result.chain, vec!["root".to_string(), "root".to_string()]);
    }

    #[test]
    fn indirect_cycle_is_detected() {
        let mut table = HashMap::new();
        table.insert("b".to_string(), link("b", Some("c")));
        table.insert("c".to_string(), link("c", Some("a")));
        let result = check(&table, "a", Some("b"));
        assert!(result.has_cycle);
        assert_eq!(result.chain, vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn revisit_on_twentieth_hop_is_a_cycle() {
        let mut table = linear_chain(19);
        // o19 was started by "start", so "start" reappears on hop 20
        table.insert("o19".to_string(), link("o19", Some("start")));
        let result = check(&table, "start", Some("o1"));
        assert!(result.has_cycle);
        assert_eq!(result.chain.len(), 21);
    }

    #[test]
    fn acyclic_chain_of_nineteen_is_allowed() {
        let table = linear_chain(19);
        let result = check(&table, "start", Some("o1"));
        assert!(!result.has_cycle);
        assert_eq!(result.chain.len(), 20);
    }

    #[test]
    fn runaway_chain_trips_depth_guard() {
        let mut table = HashMap::new();
        table.insert("x".to_string(), link("x", Some("y")));
        table.insert("y".to_string(), link("y", Some("x")));
        let result = check(&table, "start", Some("x"));
        assert!(result.has_cycle);
        assert_eq!(result.chain.len(), CycleDetector::DEFAULT_MAX_DEPTH + 2);
    }

    #[test]
    fn parent_resolved_by_run_id() {
        let table: HashMap<String, ParentLink> =
            [("run-b".to_string(), link("b", Some("a")))].into_iter().collect();
        let result = check(&table, "a", Some("run-b"));
        assert!(result.has_cycle);
        assert_eq!(result.chain, vec!["a", "b", "a"]);
    }
}
