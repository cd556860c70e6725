use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Identity of an operation: the machine type that performs it plus the
/// operation code. Serialized as `"machine;code"` so map keys stay flat in
/// YAML; solver-facing display names are generated separately at variable
/// registration time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpId {
    pub machine: String,
    pub code: String,
}

impl OpId {
    pub fn new(machine: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            machine: machine.into(),
            code: code.into(),
        }
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};{}", self.machine, self.code)
    }
}

impl FromStr for OpId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(';') {
            Some((machine, code)) if !machine.is_empty() && !code.is_empty() => {
                Ok(OpId::new(machine, code))
            }
            _ => Err(format!("expected \"machine;code\", got {s:?}")),
        }
    }
}

impl Serialize for OpId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for OpId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// Scalar knobs of the model.
///
/// `max_revisited_station_count` was hard-coded to 2 in the original system;
/// it defaults to that value here but can be configured per instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    pub max_stations_per_worker: u32,
    pub max_machines_per_station: u32,
    pub max_cycle_count: u32,
    #[serde(default = "default_revisit_cap")]
    pub max_revisited_station_count: u32,
    pub volatility_rate: f64,
    #[serde(default = "default_weight")]
    pub throughput_weight: f64,
    #[serde(default = "default_weight")]
    pub volatility_weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

fn default_revisit_cap() -> u32 {
    2
}

/// A machine permanently installed at a station.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixedMachine {
    pub station: String,
    pub machine: String,
}

/// A (machine, operation, worker, station) tuple that must be selected
/// regardless of cost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixedAssignment {
    pub machine: String,
    pub operation: String,
    pub worker: String,
    pub station: String,
}

/// A "joint operation" edge: the last operation of `from` feeds into `to`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrecedenceEdge {
    pub from: String,
    pub to: String,
}

/// The full problem instance: sparse eligibility maps, part structure, fixed
/// allocations, and configuration. All maps are BTreeMaps so iteration (and
/// therefore variable registration order) is deterministic.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    pub config: ModelConfig,
    /// Part code → ordered operation sequence (process order fixed by input).
    pub parts: BTreeMap<String, Vec<OpId>>,
    /// Joint-operation edges between parts.
    #[serde(default)]
    pub precedence: Vec<PrecedenceEdge>,
    /// Operation → eligible workers.
    pub op_workers: BTreeMap<OpId, Vec<String>>,
    /// Operation → eligible stations.
    pub op_stations: BTreeMap<OpId, Vec<String>>,
    /// Worker → eligible stations.
    pub worker_stations: BTreeMap<String, Vec<String>>,
    /// Station → machines that may be installed there.
    pub station_machines: BTreeMap<String, Vec<String>>,
    /// Station → position along the line. Doubles as the station universe.
    pub station_index: BTreeMap<String, i64>,
    /// Operation code → worker → efficiency-adjusted processing time.
    pub processing_times: BTreeMap<String, BTreeMap<String, f64>>,
    /// (station, machine) pairs forced to 1.
    #[serde(default)]
    pub fixed_station_machines: Vec<FixedMachine>,
    /// Machine types that exclude all other machines from their station.
    #[serde(default)]
    pub mono_machines: BTreeSet<String>,
    /// Mono machines that are free-floating rather than fixed.
    #[serde(default)]
    pub movable_mono_machines: BTreeSet<String>,
    /// Full tuples forced into the solution.
    #[serde(default)]
    pub fixed_assignments: Vec<FixedAssignment>,
    /// Stations hosting fixed machines; exempt from the revisit bound.
    #[serde(default)]
    pub fixed_stations: BTreeSet<String>,
}

impl Problem {
    /// Processing time for an operation when performed by `worker`.
    pub fn processing_time(&self, op: &OpId, worker: &str) -> Option<f64> {
        self.processing_times.get(&op.code)?.get(worker).copied()
    }

    /// Largest processing time in the instance; the base of every big-M bound.
    pub fn max_processing_time(&self) -> Option<f64> {
        self.processing_times
            .values()
            .flat_map(|by_worker| by_worker.values())
            .copied()
            .fold(None, |acc, t| match acc {
                Some(m) if m >= t => Some(m),
                _ => Some(t),
            })
    }

    /// Total number of operations across all parts.
    pub fn op_count(&self) -> usize {
        self.parts.values().map(|ops| ops.len()).sum()
    }

    /// Part owning the given operation.
    pub fn part_of(&self, op: &OpId) -> Option<&str> {
        self.parts
            .iter()
            .find(|(_, ops)| ops.contains(op))
            .map(|(part, _)| part.as_str())
    }

    /// Number of operations the given worker is eligible for.
    pub fn eligible_op_count(&self, worker: &str) -> usize {
        self.op_workers
            .values()
            .filter(|workers| workers.iter().any(|w| w == worker))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_id_round_trips_through_display() {
        let op = OpId::new("press", "p-010");
        let parsed: OpId = op.to_string().parse().unwrap();
        assert_eq!(op, parsed);
    }

    #[test]
    fn op_id_rejects_missing_separator() {
        assert!("press".parse::<OpId>().is_err());
        assert!(";p-010".parse::<OpId>().is_err());
        assert!("press;".parse::<OpId>().is_err());
    }

    #[test]
    fn op_id_deserializes_as_map_key() {
        let yaml = "press;p-010: [w1, w2]\n";
        let map: BTreeMap<OpId, Vec<String>> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(map[&OpId::new("press", "p-010")], vec!["w1", "w2"]);
    }
}
