//! Per-prompt aggregation of iteration results.

use std::collections::HashMap;

use super::result::{AggregatedResult, IterationResult};

/// Folds iteration results into one [`AggregatedResult`] per prompt.
///
/// Prompts keep the order in which they first appear in `results`. Cancelled
/// entries are not folded, and a prompt left with no results is omitted.
pub fn aggregate(results: &[IterationResult]) -> Vec<AggregatedResult> {
    let mut order: Vec<&str> = Vec::new();
    let mut totals: HashMap<&str, (u32, f64)> = HashMap::new();

    for result in results.iter().filter(|r| !r.is_cancelled()) {
        let entry = totals.entry(result.prompt_id.as_str()).or_insert_with(|| {
            order.push(result.prompt_id.as_str());
            (0, 0.0)
        });
        entry.0 += 1;
        entry.1 += result.points;
    }

    order
        .into_iter()
        .filter_map(|prompt_id| {
            let (count, sum) = totals.get(prompt_id).copied()?;
            Some(AggregatedResult {
                prompt_id: prompt_id.to_string(),
                iterations: count,
                average_points: sum / count as f64,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::result::{Classification, IterationTask};

    fn result(prompt_id: &str, iteration: u32, points: f64) -> IterationResult {
        let task = IterationTask {
            prompt_id: prompt_id.to_string(),
            prompt_index: 0,
            iteration,
        };
        let mut result = IterationResult::failed(&task, "x");
        result.points = points;
        result.classification = if points > 0.0 {
            Classification::Partial
        } else {
            Classification::Fail
        };
        result.error = None;
        result
    }

    fn cancelled(prompt_id: &str, iteration: u32) -> IterationResult {
        IterationResult::cancelled(&IterationTask {
            prompt_id: prompt_id.to_string(),
            prompt_index: 0,
            iteration,
        })
    }

    #[test]
    fn test_mean_and_count_per_prompt() {
        let aggregated = aggregate(&[
            result("a", 1, 1.0),
            result("a", 2, 0.5),
            result("a", 3, 0.0),
            result("b", 1, 0.25),
        ]);

        assert_eq!(aggregated.len(), 2);
        assert_eq!(aggregated[0].prompt_id, "a");
        assert_eq!(aggregated[0].iterations, 3);
        assert!((aggregated[0].average_points - 0.5).abs() < 1e-9);
        assert_eq!(aggregated[1].prompt_id, "b");
        assert_eq!(aggregated[1].iterations, 1);
        assert!((aggregated[1].average_points - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_first_seen_order_is_kept() {
        let aggregated = aggregate(&[
            result("zeta", 1, 0.1),
            result("alpha", 1, 0.9),
            result("zeta", 2, 0.1),
        ]);
        let ids: Vec<_> = aggregated.iter().map(|a| a.prompt_id.as_str()).collect();
        assert_eq!(ids, vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_cancelled_entries_are_skipped() {
        let aggregated = aggregate(&[
            result("a", 1, 1.0),
            cancelled("a", 2),
            cancelled("b", 1),
            cancelled("b", 2),
        ]);

        assert_eq!(aggregated.len(), 1);
        assert_eq!(aggregated[0].prompt_id, "a");
        assert_eq!(aggregated[0].iterations, 1);
        assert_eq!(aggregated[0].average_points, 1.0);
    }

    #[test]
    fn test_agent_error_reading_cancelled_is_folded() {
        let task = IterationTask {
            prompt_id: "a".to_string(),
            prompt_index: 0,
            iteration: 1,
        };
        let aggregated = aggregate(&[
            IterationResult::failed(&task, crate::runner::result::CANCELLED_MARKER),
            result("a", 2, 1.0),
        ]);

        assert_eq!(aggregated.len(), 1);
        assert_eq!(aggregated[0].iterations, 2);
        assert_eq!(aggregated[0].average_points, 0.5);
    }

    #[test]
    fn test_empty_input() {
        assert!(aggregate(&[]).is_empty());
    }
}
