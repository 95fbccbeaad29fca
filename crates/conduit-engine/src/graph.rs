use std::collections::HashSet;

use conduit_core::error::{ConduitError, Result};
use conduit_core::flow::Step;

/// Partition steps into waves by greedy leveling.
///
/// A step joins the current wave when every dependency was placed in an
/// earlier wave. Steps inside a wave have no relative order. If a pass finds
/// nothing eligible while steps remain, the remaining steps form a cycle or
/// depend on something that is not in the list.
pub fn build_waves(steps: &[Step]) -> Result<Vec<Vec<Step>>> {
    let mut placed: HashSet<&str> = HashSet::new();
    let mut remaining: Vec<&Step> = steps.iter().collect();
    let mut waves = Vec::new();

    while !remaining.is_empty() {
        let (ready, blocked): (Vec<&Step>, Vec<&Step>) = remaining
            .into_iter()
            .partition(|s| s.dependencies.iter().all(|d| placed.contains(d.as_str())));

        if ready.is_empty() {
            return Err(ConduitError::CircularDependency(
                blocked.iter().map(|s| s.id.clone()).collect(),
            ));
        }

        placed.extend(ready.iter().map(|s| s.id.as_str()));
        waves.push(ready.into_iter().cloned().collect());
        remaining = blocked;
    }

    Ok(waves)
}

/// Step ids per wave, for display.
pub fn wave_ids(waves: &[Vec<Step>]) -> Vec<Vec<String>> {
    waves
        .iter()
        .map(|w| w.iter().map(|s| s.id.clone()).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::flow::StepKind;

    fn step(id: &str, deps: &[&str]) -> Step {
        Step::new(id, StepKind::api("https://example.test")).depends_on(deps.iter().copied())
    }

    #[test]
    fn diamond_levels() {
        let steps = vec![
            step("d", &["b", "c"]),
            step("b", &["a"]),
            step("a", &[]),
            step("c", &["a"]),
        ];
        let waves = wave_ids(&build_waves(&steps).unwrap());
        assert_eq!(
            waves,
            vec![
                vec!["a".to_string()],
                vec!["b".to_string(), "c".to_string()],
                vec!["d".to_string()],
            ]
        );
    }

    #[test]
    fn every_dependency_lands_in_an_earlier_wave() {
        let steps = vec![
            step("e", &["a", "d"]),
            step("a", &[]),
            step("b", &[]),
            step("c", &["b"]),
            step("d", &["c", "a"]),
            step("f", &[]),
        ];
        let waves = build_waves(&steps).unwrap();
        let level = |id: &str| waves.iter().position(|w| w.iter().any(|s| s.id == id)).unwrap();

        let total: usize = waves.iter().map(|w| w.len()).sum();
        assert_eq!(total, steps.len());
        for s in &steps {
            for d in &s.dependencies {
                assert!(level(d) < level(&s.id), "{} must come after {}", s.id, d);
            }
        }
    }

    #[test]
    fn cycle_is_reported_with_blocked_steps() {
        let steps = vec![step("a", &["b"]), step("b", &["a"]), step("c", &[])];
        match build_waves(&steps) {
            Err(ConduitError::CircularDependency(ids)) => {
                assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("expected cycle, got {:?}", other.map(|w| w.len())),
        }
    }

    #[test]
    fn missing_dependency_is_unsatisfiable() {
        let steps = vec![step("a", &["nope"])];
        assert!(matches!(
            build_waves(&steps),
            Err(ConduitError::CircularDependency(_))
        ));
    }

    #[test]
    fn empty_input_has_no_waves() {
        assert!(build_waves(&[]).unwrap().is_empty());
    }
}
