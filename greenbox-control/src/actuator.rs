use std::collections::BTreeMap;

use greenbox_api::models::Command;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::catalog::Level;

/// What the evaluator asks of an actuator; debounced before it takes effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "lowercase")]
pub enum Intent {
    Engage { level: Level },
    Disengage,
}

impl Intent {
    /// Engage beats disengage, a higher level beats a lower one.
    pub fn merge(self, other: Intent) -> Intent {
        match (self, other) {
            (Intent::Engage { level: a }, Intent::Engage { level: b }) => Intent::Engage { level: a.max(b) },
            (engage @ Intent::Engage { .. }, Intent::Disengage) => engage,
            (Intent::Disengage, other) => other,
        }
    }
}

/// Intents of one tick keyed by actuator role.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntentSet {
    intents: BTreeMap<String, Intent>,
}

impl IntentSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, role: &str, intent: Intent) {
        self.intents
            .entry(role.to_string())
            .and_modify(|current| *current = current.merge(intent))
            .or_insert(intent);
    }

    pub fn get(&self, role: &str) -> Option<Intent> {
        self.intents.get(role).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Intent)> {
        self.intents.iter().map(|(role, intent)| (role.as_str(), *intent))
    }

    pub fn len(&self) -> usize {
        self.intents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "lowercase")]
pub enum ActuatorPhase {
    #[default]
    Off,
    /// Starting up; contributes no effect yet.
    Ramping {
        level: Level,
        #[serde(with = "time::serde::timestamp")]
        since: OffsetDateTime,
    },
    On {
        level: Level,
    },
}

impl ActuatorPhase {
    pub fn commanded_level(&self) -> Option<Level> {
        match self {
            ActuatorPhase::Off => None,
            ActuatorPhase::Ramping { level, .. } | ActuatorPhase::On { level } => Some(*level),
        }
    }

    /// Level contributing to the environment, only once fully on.
    pub fn effective_level(&self) -> Option<Level> {
        match self {
            ActuatorPhase::On { level } => Some(*level),
            _ => None,
        }
    }

    fn satisfies(&self, intent: Intent) -> bool {
        match intent {
            Intent::Engage { level } => self.commanded_level() == Some(level),
            Intent::Disengage => self.commanded_level().is_none(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingIntent {
    pub intent: Intent,
    #[serde(with = "time::serde::timestamp")]
    pub since: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActuatorState {
    pub phase: ActuatorPhase,
    #[serde(with = "time::serde::timestamp::option")]
    pub last_transition_at: Option<OffsetDateTime>,
    pub pending: Option<PendingIntent>,
}

impl ActuatorState {
    pub fn commanded_level(&self) -> Option<Level> {
        self.phase.commanded_level()
    }

    pub fn pending_since(&self) -> Option<OffsetDateTime> {
        self.pending.map(|pending| pending.since)
    }

    /// Level the actuator is heading to, counting a queued intent.
    pub fn intended_level(&self) -> Option<Level> {
        match self.pending.map(|pending| pending.intent) {
            Some(Intent::Engage { level }) => Some(level),
            Some(Intent::Disengage) => None,
            None => self.commanded_level(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transition", rename_all = "snake_case")]
pub enum Transition {
    Engaged { from: Option<Level>, level: Level },
    RampCompleted { level: Level },
    Disengaged { from: Level },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActuatorTiming {
    /// Startup lag before an engaged actuator takes effect
    pub ramp: Duration,
    /// Minimum time between two commanded transitions
    pub min_dwell: Duration,
}

impl Default for ActuatorTiming {
    fn default() -> Self {
        Self {
            ramp: Duration::minutes(2),
            min_dwell: Duration::minutes(5),
        }
    }
}

/// Sole owner of one actuator's state inside one greenhouse.
#[derive(Debug, Clone)]
pub struct ActuatorController {
    role: String,
    timing: ActuatorTiming,
    state: ActuatorState,
}

impl ActuatorController {
    pub fn new(role: &str, timing: ActuatorTiming) -> Self {
        Self {
            role: role.to_string(),
            timing,
            state: ActuatorState::default(),
        }
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn state(&self) -> &ActuatorState {
        &self.state
    }

    pub fn phase(&self) -> ActuatorPhase {
        self.state.phase
    }

    /// Command matching the current commanded state; re-sent verbatim on retry.
    pub fn intended_command(&self) -> Command {
        match self.state.commanded_level() {
            Some(level) => Command::On {
                level: level.percent(),
            },
            None => Command::Off,
        }
    }

    /// Offers this tick's intent, then applies whatever the dwell time allows
    /// and completes a ramp that has run its course.
    pub fn step(&mut self, intent: Option<Intent>, now: OffsetDateTime) -> Vec<Transition> {
        let mut transitions = Vec::new();

        if let Some(intent) = intent {
            if self.state.phase.satisfies(intent) {
                self.state.pending = None;
            } else {
                let since = self.state.pending_since().unwrap_or(now);
                self.state.pending = Some(PendingIntent { intent, since });
            }
        }

        if let Some(pending) = self.state.pending {
            if self.is_eligible(now) {
                self.state.pending = None;
                transitions.extend(self.apply(pending.intent, now));
            } else {
                tracing::trace!(role = %self.role, ?pending, "intent held back by dwell time");
            }
        }

        if let ActuatorPhase::Ramping { level, since } = self.state.phase {
            if now - since >= self.timing.ramp {
                self.state.phase = ActuatorPhase::On { level };
                transitions.push(Transition::RampCompleted { level });
            }
        }

        transitions
    }

    fn is_eligible(&self, now: OffsetDateTime) -> bool {
        self.state
            .last_transition_at
            .is_none_or(|last| now - last >= self.timing.min_dwell)
    }

    fn apply(&mut self, intent: Intent, now: OffsetDateTime) -> Option<Transition> {
        let from = self.state.commanded_level();

        let transition = match (intent, from) {
            (Intent::Engage { level }, current) if current != Some(level) => {
                self.state.phase = ActuatorPhase::Ramping { level, since: now };
                Transition::Engaged { from: current, level }
            }
            (Intent::Disengage, Some(level)) => {
                self.state.phase = ActuatorPhase::Off;
                Transition::Disengaged { from: level }
            }
            _ => return None,
        };

        self.state.last_transition_at = Some(now);
        tracing::debug!(role = %self.role, ?transition, "actuator transition");

        Some(transition)
    }
}
