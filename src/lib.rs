//! Assembly-line resource allocation as a Mixed Integer Linear Program.
//!
//! The crate turns combinatorial scheduling rules — "every operation gets
//! exactly one worker and one station", "a movable mono machine excludes all
//! others from its station", "a part may only travel backward around the
//! line a bounded number of times" — into linear constraints over binary,
//! integer, and continuous decision variables, then hands the model to CBC
//! through [`good_lp`] and reshapes the solution into an assignment table.
//!
//! Model construction is single-threaded and all-or-nothing: any
//! configuration or data defect aborts with a [`ModelError`] naming the
//! offending entity, while infeasibility is a reported [`SolveStatus`], not
//! an error.

mod constraints;
mod error;
mod graph;
mod model;
mod objective;
mod solution;
mod types;

pub use error::ModelError;
pub use graph::PrecedenceGraph;
pub use model::ModelBuilder;
pub use solution::{Assignment, Diagnostics, Outcome, SolveStatus};
pub use types::{
    FixedAssignment, FixedMachine, ModelConfig, OpId, PrecedenceEdge, Problem,
};

impl Problem {
    /// Build the full model — variables, constraint groups, both objective
    /// terms — and run one blocking solve.
    pub fn solve(&self) -> Result<Outcome, ModelError> {
        let mut builder = ModelBuilder::new(self)?;
        builder.allocate_station_machines()?;
        builder.allocate_op_workers()?;
        builder.allocate_worker_stations()?;
        builder.allocate_op_stations()?;
        builder.create_triples()?;
        builder.link_triples()?;
        builder.apply_fixed_assignments()?;
        builder.bound_circular_routing()?;
        builder.bound_station_revisits()?;
        builder.add_throughput_objective()?;
        builder.add_volatility_objective()?;
        builder.solve()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    const SPLIT_SCENARIO: &str = r#"
config:
  maxStationsPerWorker: 1
  maxMachinesPerStation: 1
  maxCycleCount: 2
  volatilityRate: 1.0
parts:
  p1: ["m1;o1", "m1;o2"]
opWorkers:
  "m1;o1": [w1, w2]
  "m1;o2": [w1, w2]
opStations:
  "m1;o1": [s1, s2]
  "m1;o2": [s1, s2]
workerStations:
  w1: [s1, s2]
  w2: [s1, s2]
stationMachines:
  s1: [m1]
  s2: [m1]
stationIndex:
  s1: 1
  s2: 2
processingTimes:
  o1: { w1: 10.0, w2: 10.0 }
  o2: { w1: 10.0, w2: 10.0 }
"#;

    fn strs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn cfg(max_stations_per_worker: u32) -> ModelConfig {
        ModelConfig {
            max_stations_per_worker,
            max_machines_per_station: 1,
            max_cycle_count: 2,
            max_revisited_station_count: 2,
            volatility_rate: 1.0,
            throughput_weight: 1.0,
            volatility_weight: 1.0,
        }
    }

    fn two_station_skeleton(max_stations_per_worker: u32) -> Problem {
        Problem {
            config: cfg(max_stations_per_worker),
            parts: BTreeMap::new(),
            precedence: Vec::new(),
            op_workers: BTreeMap::new(),
            op_stations: BTreeMap::new(),
            worker_stations: BTreeMap::new(),
            station_machines: BTreeMap::from([
                ("s1".to_string(), strs(&["m1"])),
                ("s2".to_string(), strs(&["m1"])),
            ]),
            station_index: BTreeMap::from([("s1".to_string(), 1), ("s2".to_string(), 2)]),
            processing_times: BTreeMap::new(),
            fixed_station_machines: Vec::new(),
            mono_machines: Default::default(),
            movable_mono_machines: Default::default(),
            fixed_assignments: Vec::new(),
            fixed_stations: Default::default(),
        }
    }

    fn times(op: &str, entries: &[(&str, f64)]) -> (String, BTreeMap<String, f64>) {
        (
            op.to_string(),
            entries
                .iter()
                .map(|(w, t)| (w.to_string(), *t))
                .collect(),
        )
    }

    fn assert_close(actual: f64, expected: f64, what: &str) {
        assert!(
            (actual - expected).abs() < 1e-3,
            "{what}: expected {expected}, got {actual}"
        );
    }

    /// var must equal x AND y AND v in every solved instance.
    fn assert_triples_consistent(outcome: &Outcome) {
        let diag = &outcome.diagnostics;
        for ((op, worker, station), &value) in &diag.triples {
            let x = diag.op_worker[&(op.clone(), worker.clone())];
            let y = diag.worker_station[&(worker.clone(), station.clone())];
            let v = diag
                .routed
                .get(&(op.clone(), station.clone()))
                .copied()
                .unwrap_or(0.0);
            let expected = if x > 0.5 && y > 0.5 && v > 0.5 { 1.0 } else { 0.0 };
            assert_close(value, expected, &format!("var_{op}_{worker}_{station}"));
        }
    }

    #[test]
    fn splits_two_operations_across_workers() {
        let problem: Problem = serde_yaml::from_str(SPLIT_SCENARIO).unwrap();
        let outcome = problem.solve().unwrap();

        assert_eq!(outcome.status, SolveStatus::Optimal);
        assert_close(outcome.objective.unwrap(), 10.0, "objective");
        assert_close(outcome.max_cycle_time.unwrap(), 10.0, "max cycle time");

        assert_eq!(outcome.assignments.len(), 2);
        let [first, second] = &outcome.assignments[..] else {
            panic!("expected two assignments");
        };
        assert_ne!(first.worker, second.worker);
        assert_ne!(first.station, second.station);
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(first.part, "p1");

        for cycle in outcome.diagnostics.cycle_times.values() {
            assert_close(*cycle, 10.0, "worker cycle time");
        }
        assert_triples_consistent(&outcome);

        let rendered = serde_yaml::to_string(&outcome).unwrap();
        assert!(rendered.contains("OPTIMAL"), "status serialization: {rendered}");
    }

    #[test]
    fn fixed_assignment_overrides_cheaper_worker() {
        let op = OpId::new("m1", "o1");
        let mut problem = two_station_skeleton(1);
        problem.parts = BTreeMap::from([("p1".to_string(), vec![op.clone()])]);
        problem.op_workers = BTreeMap::from([(op.clone(), strs(&["w1", "w2"]))]);
        problem.op_stations = BTreeMap::from([(op.clone(), strs(&["s1", "s2"]))]);
        problem.worker_stations = BTreeMap::from([
            ("w1".to_string(), strs(&["s1", "s2"])),
            ("w2".to_string(), strs(&["s1", "s2"])),
        ]);
        problem.processing_times =
            BTreeMap::from([times("o1", &[("w1", 10.0), ("w2", 100.0)])]);
        problem.fixed_assignments = vec![FixedAssignment {
            machine: "m1".to_string(),
            operation: "o1".to_string(),
            worker: "w2".to_string(),
            station: "s2".to_string(),
        }];

        let outcome = problem.solve().unwrap();
        assert_eq!(outcome.status, SolveStatus::Optimal);
        assert_close(outcome.max_cycle_time.unwrap(), 100.0, "max cycle time");

        let diag = &outcome.diagnostics;
        assert!(diag.op_worker[&(op.clone(), "w2".to_string())] > 0.5);
        assert!(diag.worker_station[&("w2".to_string(), "s2".to_string())] > 0.5);
        assert!(diag.triples[&(op, "w2".to_string(), "s2".to_string())] > 0.5);
        assert_triples_consistent(&outcome);
    }

    fn routing_problem(first_station: &str, second_station: &str) -> Problem {
        let o1 = OpId::new("m1", "o1");
        let o2 = OpId::new("m1", "o2");
        let mut problem = two_station_skeleton(2);
        problem.parts = BTreeMap::from([("p1".to_string(), vec![o1.clone(), o2.clone()])]);
        problem.op_workers = BTreeMap::from([
            (o1.clone(), strs(&["w1"])),
            (o2.clone(), strs(&["w1"])),
        ]);
        problem.op_stations = BTreeMap::from([
            (o1, strs(&[first_station])),
            (o2, strs(&[second_station])),
        ]);
        problem.worker_stations =
            BTreeMap::from([("w1".to_string(), strs(&["s1", "s2"]))]);
        problem.processing_times = BTreeMap::from([
            times("o1", &[("w1", 10.0)]),
            times("o2", &[("w1", 10.0)]),
        ]);
        problem
    }

    #[test]
    fn forward_routing_has_no_wraps() {
        let outcome = routing_problem("s1", "s2").solve().unwrap();
        assert_eq!(outcome.status, SolveStatus::Optimal);
        assert_close(outcome.diagnostics.wraps["p1"], 0.0, "wrap count");
    }

    #[test]
    fn backward_routing_wraps_once() {
        let outcome = routing_problem("s2", "s1").solve().unwrap();
        assert_eq!(outcome.status, SolveStatus::Optimal);
        assert_close(outcome.diagnostics.wraps["p1"], 1.0, "wrap count");
    }

    #[test]
    fn returning_part_raises_repeat_visit_flag() {
        let ops: Vec<OpId> = ["o1", "o2", "o3", "o4"]
            .iter()
            .map(|code| OpId::new("m1", *code))
            .collect();
        let mut problem = two_station_skeleton(2);
        problem.parts = BTreeMap::from([("p1".to_string(), ops.clone())]);
        problem.op_workers = ops
            .iter()
            .map(|op| (op.clone(), strs(&["w1"])))
            .collect();
        problem.op_stations = BTreeMap::from([
            (ops[0].clone(), strs(&["s1", "s2"])),
            (ops[1].clone(), strs(&["s1", "s2"])),
            (ops[2].clone(), strs(&["s1", "s2"])),
            (ops[3].clone(), strs(&["s2"])),
        ]);
        problem.worker_stations =
            BTreeMap::from([("w1".to_string(), strs(&["s1", "s2"]))]);
        problem.processing_times = BTreeMap::from([
            times("o1", &[("w1", 10.0)]),
            times("o2", &[("w1", 10.0)]),
            times("o3", &[("w1", 10.0)]),
            times("o4", &[("w1", 10.0)]),
        ]);
        // Pin the s1 → s2 → s1 walk; the fourth operation only fits s2.
        problem.fixed_assignments = ["s1", "s2", "s1"]
            .iter()
            .zip(["o1", "o2", "o3"])
            .map(|(station, operation)| FixedAssignment {
                machine: "m1".to_string(),
                operation: operation.to_string(),
                worker: "w1".to_string(),
                station: station.to_string(),
            })
            .collect();

        let outcome = problem.solve().unwrap();
        assert_eq!(outcome.status, SolveStatus::Optimal);
        let flag = outcome.diagnostics.revisits[&("s1".to_string(), "p1".to_string())];
        assert!(flag > 0.5, "expected repeat-visit flag at s1, got {flag}");
        assert_triples_consistent(&outcome);
    }

    #[test]
    fn sparse_line_indices_route_forward_without_wraps() {
        // Line indices are ordinal, not dense; gaps must not shrink the
        // wrap split's bounds.
        let mut problem = routing_problem("s1", "s2");
        problem.station_index =
            BTreeMap::from([("s1".to_string(), 1), ("s2".to_string(), 10)]);
        let outcome = problem.solve().unwrap();
        assert_eq!(outcome.status, SolveStatus::Optimal);
        assert_close(outcome.diagnostics.wraps["p1"], 0.0, "wrap count");

        let mut problem = routing_problem("s2", "s1");
        problem.station_index =
            BTreeMap::from([("s1".to_string(), 1), ("s2".to_string(), 10)]);
        let outcome = problem.solve().unwrap();
        assert_eq!(outcome.status, SolveStatus::Optimal);
        assert_close(outcome.diagnostics.wraps["p1"], 1.0, "wrap count");
    }

    #[test]
    fn worker_without_station_posting_is_rejected() {
        let op = OpId::new("m1", "o1");
        let mut problem = two_station_skeleton(1);
        problem.parts = BTreeMap::from([("p1".to_string(), vec![op.clone()])]);
        // "ghost" can take the operation but has no workerStations entry.
        problem.op_workers = BTreeMap::from([(op.clone(), strs(&["w1", "ghost"]))]);
        problem.op_stations = BTreeMap::from([(op, strs(&["s1"]))]);
        problem.worker_stations = BTreeMap::from([("w1".to_string(), strs(&["s1"]))]);
        problem.processing_times =
            BTreeMap::from([times("o1", &[("w1", 10.0), ("ghost", 1.0)])]);

        let err = problem.solve().unwrap_err();
        assert!(
            matches!(err, ModelError::WorkerWithoutStations { ref worker } if worker == "ghost"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn two_workers_one_station_is_infeasible() {
        let op = OpId::new("m1", "o1");
        let mut problem = two_station_skeleton(1);
        problem.station_machines = BTreeMap::from([("s1".to_string(), strs(&["m1"]))]);
        problem.station_index = BTreeMap::from([("s1".to_string(), 1)]);
        problem.parts = BTreeMap::from([("p1".to_string(), vec![op.clone()])]);
        problem.op_workers = BTreeMap::from([(op.clone(), strs(&["w1", "w2"]))]);
        problem.op_stations = BTreeMap::from([(op, strs(&["s1"]))]);
        problem.worker_stations = BTreeMap::from([
            ("w1".to_string(), strs(&["s1"])),
            ("w2".to_string(), strs(&["s1"])),
        ]);
        problem.processing_times =
            BTreeMap::from([times("o1", &[("w1", 10.0), ("w2", 10.0)])]);

        let outcome = problem.solve().unwrap();
        assert_eq!(outcome.status, SolveStatus::Infeasible);
        assert!(outcome.objective.is_none());
        assert!(outcome.assignments.is_empty());
    }

    #[test]
    fn operation_without_workers_fails_fast() {
        let op = OpId::new("m1", "o1");
        let mut problem = two_station_skeleton(1);
        problem.parts = BTreeMap::from([("p1".to_string(), vec![op.clone()])]);
        problem.op_stations = BTreeMap::from([(op.clone(), strs(&["s1"]))]);
        problem.worker_stations = BTreeMap::from([("w1".to_string(), strs(&["s1"]))]);
        problem.processing_times = BTreeMap::from([times("o1", &[("w1", 10.0)])]);

        // No opWorkers entry at all.
        let err = problem.solve().unwrap_err();
        assert!(matches!(err, ModelError::NoEligibleWorkers { op: ref missing } if *missing == op));

        // An entry with an empty list is just as dead.
        problem.op_workers = BTreeMap::from([(op.clone(), Vec::new())]);
        let err = problem.solve().unwrap_err();
        assert!(
            matches!(err, ModelError::WorkerWithoutOperations { .. })
                || matches!(err, ModelError::NoEligibleWorkers { .. }),
            "unexpected error: {err}"
        );
    }
}
