use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::catalog::{EffectCatalog, Level};

/// Relative cost of one unit of energy and of water.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceWeights {
    pub energy: f64,
    pub water: f64,
}

impl Default for ResourceWeights {
    fn default() -> Self {
        Self {
            energy: 1.0,
            water: 1.0,
        }
    }
}

/// A role able to correct a metric, at the level it would run at.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub role: String,
    pub level: Level,
    /// Value the correction aims for
    pub target: f64,
    /// Already commanded on, or about to be
    pub engaged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score {
    /// Whole ticks until the target is reached, `None` if never
    pub ticks: Option<u64>,
    /// Weighted resource use per tick
    pub rate: f64,
}

impl Score {
    /// Resources spent until the target is reached.
    pub fn cost(&self) -> f64 {
        match self.ticks {
            Some(ticks) => self.rate * ticks as f64,
            None => f64::INFINITY,
        }
    }

    fn reaches_within(&self, horizon_ticks: u32) -> bool {
        self.ticks.is_some_and(|ticks| ticks <= u64::from(horizon_ticks))
    }
}

impl EffectCatalog {
    /// Whole ticks `role` at `level` needs to move `metric` from `value` to
    /// `target`.
    pub fn ticks_to_target(&self, role: &str, level: Level, metric: &str, value: f64, target: f64) -> Option<u64> {
        let delta = self.lookup(role, level).ok()?.delta(metric);
        let distance = target - value;

        if distance == 0.0 {
            return Some(0);
        }
        if delta == 0.0 || delta.signum() != distance.signum() {
            return None;
        }

        Some((distance / delta).ceil() as u64)
    }

    pub fn score(&self, candidate: &Candidate, metric: &str, value: f64, weights: ResourceWeights) -> Score {
        let rate = self
            .lookup(&candidate.role, candidate.level)
            .map(|entry| entry.energy_rate * weights.energy + entry.water_rate * weights.water)
            .unwrap_or(0.0);

        Score {
            ticks: self.ticks_to_target(&candidate.role, candidate.level, metric, value, candidate.target),
            rate,
        }
    }

    /// Picks the one role that corrects `metric`.
    ///
    /// An engaged role keeps the job. Otherwise roles reaching the target
    /// within `horizon_ticks` come first and the cheapest of them wins;
    /// if none does, the fastest wins. Remaining ties go to the earlier
    /// candidate.
    pub fn choose<'a>(
        &self,
        candidates: &'a [Candidate],
        metric: &str,
        value: f64,
        horizon_ticks: u32,
        weights: ResourceWeights,
    ) -> Option<&'a Candidate> {
        candidates
            .iter()
            .map(|candidate| (candidate, self.score(candidate, metric, value, weights)))
            .min_by(|(a, a_score), (b, b_score)| {
                b.engaged
                    .cmp(&a.engaged)
                    .then_with(|| b_score.reaches_within(horizon_ticks).cmp(&a_score.reaches_within(horizon_ticks)))
                    .then_with(|| {
                        if a_score.reaches_within(horizon_ticks) {
                            by_cost(a_score, b_score).then_with(|| by_ticks(a_score, b_score))
                        } else {
                            by_ticks(a_score, b_score).then_with(|| a_score.rate.total_cmp(&b_score.rate))
                        }
                    })
            })
            .map(|(candidate, _)| candidate)
    }
}

fn by_cost(a: &Score, b: &Score) -> Ordering {
    a.cost().total_cmp(&b.cost())
}

fn by_ticks(a: &Score, b: &Score) -> Ordering {
    a.ticks.unwrap_or(u64::MAX).cmp(&b.ticks.unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use greenbox_api::models::{ENERGY_CONSUMPTION, EffectRecord, LevelValue, TEMPERATURE, WATER_CONSUMPTION};

    use super::*;
    use crate::metrics::MetricRegistry;

    fn record(system: &str, fields: &[(&str, f64)]) -> EffectRecord {
        EffectRecord {
            system: system.to_string(),
            level: LevelValue::Text("100%".to_string()),
            fields: fields
                .iter()
                .map(|(name, value)| (name.to_string(), Some(*value)))
                .collect(),
        }
    }

    fn catalog() -> EffectCatalog {
        EffectCatalog::from_records(
            &[
                record("ventilation_system", &[(TEMPERATURE, -0.0625), (ENERGY_CONSUMPTION, 2.0)]),
                record("misting_system", &[(TEMPERATURE, -0.03125), (WATER_CONSUMPTION, 0.5)]),
                record("shading_system", &[(TEMPERATURE, -0.0078125), (ENERGY_CONSUMPTION, 0.1)]),
            ],
            &MetricRegistry::greenhouse_defaults(),
        )
        .unwrap()
    }

    fn candidate(role: &str, engaged: bool) -> Candidate {
        Candidate {
            role: role.to_string(),
            level: Level::MAX,
            target: 24.5,
            engaged,
        }
    }

    fn chosen(candidates: &[Candidate], weights: ResourceWeights) -> String {
        catalog()
            .choose(candidates, TEMPERATURE, 26.0, 60, weights)
            .unwrap()
            .role
            .clone()
    }

    #[test]
    fn test_ticks_to_target() {
        let catalog = catalog();

        assert_eq!(catalog.ticks_to_target("ventilation_system", Level::MAX, TEMPERATURE, 26.0, 24.5), Some(24));
        assert_eq!(catalog.ticks_to_target("misting_system", Level::MAX, TEMPERATURE, 26.0, 24.5), Some(48));
        assert_eq!(catalog.ticks_to_target("ventilation_system", Level::MAX, TEMPERATURE, 19.0, 20.5), None);
        assert_eq!(catalog.ticks_to_target("ventilation_system", Level::MAX, TEMPERATURE, 24.5, 24.5), Some(0));
    }

    #[test]
    fn test_cheapest_sufficient_role_wins() {
        let candidates = [candidate("ventilation_system", false), candidate("misting_system", false)];

        // Ventilation burns 48 energy units, misting 24 water units
        assert_eq!(chosen(&candidates, ResourceWeights::default()), "misting_system");

        let dear_water = ResourceWeights { energy: 1.0, water: 10.0 };
        assert_eq!(chosen(&candidates, dear_water), "ventilation_system");
    }

    #[test]
    fn test_insufficient_role_ranks_last() {
        // Shading is the cheapest but needs 192 ticks
        let candidates = [candidate("shading_system", false), candidate("misting_system", false)];
        assert_eq!(chosen(&candidates, ResourceWeights::default()), "misting_system");

        // Without a sufficient role the fastest one wins
        let candidates = [candidate("shading_system", false)];
        assert_eq!(chosen(&candidates, ResourceWeights::default()), "shading_system");
        let catalog = catalog();
        let slow = [candidate("shading_system", false), candidate("ventilation_system", false)];
        let fastest = catalog.choose(&slow, TEMPERATURE, 30.0, 60, ResourceWeights::default());
        assert_eq!(fastest.unwrap().role, "ventilation_system");
    }

    #[test]
    fn test_engaged_role_keeps_the_job() {
        let candidates = [candidate("misting_system", false), candidate("ventilation_system", true)];
        assert_eq!(chosen(&candidates, ResourceWeights::default()), "ventilation_system");

        assert!(catalog().choose(&[], TEMPERATURE, 26.0, 60, ResourceWeights::default()).is_none());
    }
}
