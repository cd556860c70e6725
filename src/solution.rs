use good_lp::Solution as LpSolution;
use good_lp::solvers::coin_cbc::coin_cbc;
use good_lp::{ResolutionError, SolverModel};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{info, warn};

use crate::error::ModelError;
use crate::model::ModelBuilder;
use crate::types::OpId;

/// Solver outcome taxonomy. Statuses are reported verbatim; infeasibility is
/// an outcome, never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SolveStatus {
    Optimal,
    Feasible,
    Infeasible,
    Unbounded,
    Abnormal,
    NotSolved,
}

/// One selected triple, reshaped for export: which part's operation runs at
/// which station under which worker.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub line_index: i64,
    pub station: String,
    pub worker: String,
    pub operation: String,
    pub sequence: usize,
    pub part: String,
}

/// Solved values of the variable families and indicator groups, keyed by the
/// typed index tuples. Not serialized; exists so callers (and tests) can
/// check model-level properties without reaching into the solver.
#[derive(Debug, Default)]
pub struct Diagnostics {
    pub op_worker: BTreeMap<(OpId, String), f64>,
    pub worker_station: BTreeMap<(String, String), f64>,
    pub routed: BTreeMap<(OpId, String), f64>,
    pub triples: BTreeMap<(OpId, String, String), f64>,
    /// Part → total wrap count around the circular line.
    pub wraps: BTreeMap<String, f64>,
    /// (station, part) → repeat-visit indicator.
    pub revisits: BTreeMap<(String, String), f64>,
    pub cycle_times: BTreeMap<String, f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub status: SolveStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub objective: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_cycle_time: Option<f64>,
    pub assignments: Vec<Assignment>,
    #[serde(skip)]
    pub diagnostics: Diagnostics,
}

fn unsolved(status: SolveStatus) -> Outcome {
    Outcome {
        status,
        objective: None,
        max_cycle_time: None,
        assignments: Vec::new(),
        diagnostics: Diagnostics::default(),
    }
}

impl ModelBuilder<'_> {
    /// Hand the assembled model to CBC, block on the solve, and reshape the
    /// solution. Consumes the builder; variables live exactly once.
    pub fn solve(self) -> Result<Outcome, ModelError> {
        let objective = self.objective_expression()?;
        let ModelBuilder {
            problem,
            graph,
            vars,
            constraints,
            op_worker,
            worker_station,
            routed,
            triple,
            wrap_step,
            revisit_flag,
            cycle_time,
            max_cycle_time,
            ..
        } = self;
        let max_cycle_time = max_cycle_time.ok_or(ModelError::ObjectiveNotBuilt)?;

        let constraint_count = constraints.len();
        let start = Instant::now();
        #[allow(unused_mut)]
        let mut model = vars.minimise(objective.clone()).using(coin_cbc);
        #[cfg(not(debug_assertions))]
        model.set_parameter("loglevel", "0");
        let model = constraints
            .into_iter()
            .fold(model, |model, constraint| model.with(constraint));
        info!(constraints = constraint_count, "model handed to solver");

        let solution = match model.solve() {
            Ok(solution) => solution,
            Err(ResolutionError::Infeasible) => {
                info!("solver reported infeasible");
                return Ok(unsolved(SolveStatus::Infeasible));
            }
            Err(ResolutionError::Unbounded) => {
                warn!("solver reported unbounded");
                return Ok(unsolved(SolveStatus::Unbounded));
            }
            Err(error) => {
                warn!(%error, "solver stopped abnormally");
                return Ok(unsolved(SolveStatus::Abnormal));
            }
        };
        info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "solve finished"
        );

        // Sequence numbers follow layer order (max layer first), then each
        // part's fixed operation order.
        let mut sequence: BTreeMap<&OpId, usize> = BTreeMap::new();
        let mut counter = 1usize;
        for (_, parts) in graph.groups() {
            for part in parts {
                for op in &problem.parts[part] {
                    sequence.insert(op, counter);
                    counter += 1;
                }
            }
        }
        let mut part_of: BTreeMap<&OpId, &str> = BTreeMap::new();
        for (part, ops) in &problem.parts {
            for op in ops {
                part_of.insert(op, part);
            }
        }

        let mut diagnostics = Diagnostics::default();
        for (op, assignees) in &op_worker {
            for (worker, &x) in assignees {
                diagnostics
                    .op_worker
                    .insert((op.clone(), worker.clone()), solution.value(x));
            }
        }
        for (worker, postings) in &worker_station {
            for (station, &y) in postings {
                diagnostics
                    .worker_station
                    .insert((worker.clone(), station.clone()), solution.value(y));
            }
        }
        for (op, routes) in &routed {
            for (station, &v) in routes {
                diagnostics
                    .routed
                    .insert((op.clone(), station.clone()), solution.value(v));
            }
        }
        for ((part, _), &wrap) in &wrap_step {
            *diagnostics.wraps.entry(part.clone()).or_insert(0.0) += solution.value(wrap);
        }
        for ((station, part), &flag) in &revisit_flag {
            diagnostics
                .revisits
                .insert((station.clone(), part.clone()), solution.value(flag));
        }
        for (worker, cycle) in &cycle_time {
            diagnostics
                .cycle_times
                .insert(worker.clone(), solution.eval(cycle.clone()));
        }

        let mut assignments = Vec::new();
        for (op, by_worker) in &triple {
            for (worker, by_station) in by_worker {
                for (station, &resolved) in by_station {
                    let value = solution.value(resolved);
                    diagnostics
                        .triples
                        .insert((op.clone(), worker.clone(), station.clone()), value);
                    if value > 0.5 {
                        assignments.push(Assignment {
                            line_index: problem.station_index[station],
                            station: station.clone(),
                            worker: worker.clone(),
                            operation: op.code.clone(),
                            sequence: sequence[op],
                            part: part_of[op].to_string(),
                        });
                    }
                }
            }
        }
        assignments.sort_by(|a, b| {
            (a.sequence, a.line_index).cmp(&(b.sequence, b.line_index))
        });

        Ok(Outcome {
            status: SolveStatus::Optimal,
            objective: Some(solution.eval(objective)),
            max_cycle_time: Some(solution.value(max_cycle_time)),
            assignments,
            diagnostics,
        })
    }
}
