use good_lp::{Constraint, Expression, ProblemVariables, Variable, variable, variables};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::ModelError;
use crate::graph::PrecedenceGraph;
use crate::types::{OpId, Problem};

/// Owner of all decision variables and pending constraints.
///
/// Variables are created once, registered with the solver pool under a
/// deterministic name (family tag + full index tuple), and indexed in nested
/// maps keyed by typed entity ids. Constraints are accumulated and only
/// attached to the solver model when [`ModelBuilder::solve`] consumes the
/// builder, because auxiliary-variable creation interleaves with constraint
/// construction.
pub struct ModelBuilder<'a> {
    pub(crate) problem: &'a Problem,
    pub(crate) graph: PrecedenceGraph,
    pub(crate) vars: ProblemVariables,
    pub(crate) constraints: Vec<Constraint>,
    /// x: operation → worker → primary-assignee variable.
    pub(crate) op_worker: BTreeMap<OpId, BTreeMap<String, Variable>>,
    /// y: worker → station → posting variable.
    pub(crate) worker_station: BTreeMap<String, BTreeMap<String, Variable>>,
    /// z: operation → station → routing variable.
    pub(crate) op_station: BTreeMap<OpId, BTreeMap<String, Variable>>,
    /// w: station → machine → installation variable.
    pub(crate) station_machine: BTreeMap<String, BTreeMap<String, Variable>>,
    /// v: operation → station, the machine-backed routing (w ∧ z).
    pub(crate) routed: BTreeMap<OpId, BTreeMap<String, Variable>>,
    /// var: operation → worker → station, the fully resolved triple.
    pub(crate) triple: BTreeMap<OpId, BTreeMap<String, BTreeMap<String, Variable>>>,
    /// Effective machine load per station where a movable mono machine
    /// substitutes the plain sum.
    pub(crate) station_load: BTreeMap<String, Expression>,
    /// (part, step) → wrap indicator from the circularity split.
    pub(crate) wrap_step: BTreeMap<(String, usize), Variable>,
    /// (station, part) → repeat-visit indicator.
    pub(crate) revisit_flag: BTreeMap<(String, String), Variable>,
    /// Worker → cycle-time expression, recorded by the throughput objective.
    pub(crate) cycle_time: BTreeMap<String, Expression>,
    /// Worker → absolute deviation from the fleet average.
    pub(crate) deviation: BTreeMap<String, Variable>,
    pub(crate) max_cycle_time: Option<Variable>,
}

impl<'a> ModelBuilder<'a> {
    pub fn new(problem: &'a Problem) -> Result<Self, ModelError> {
        validate(problem)?;
        let graph = PrecedenceGraph::build(problem.parts.keys(), &problem.precedence)?;
        debug!(
            parts = problem.parts.len(),
            operations = problem.op_count(),
            stations = problem.station_index.len(),
            workers = problem.worker_stations.len(),
            max_layer = graph.max_layer(),
            "model inputs validated"
        );
        Ok(Self {
            problem,
            graph,
            vars: variables!(),
            constraints: Vec::new(),
            op_worker: BTreeMap::new(),
            worker_station: BTreeMap::new(),
            op_station: BTreeMap::new(),
            station_machine: BTreeMap::new(),
            routed: BTreeMap::new(),
            triple: BTreeMap::new(),
            station_load: BTreeMap::new(),
            wrap_step: BTreeMap::new(),
            revisit_flag: BTreeMap::new(),
            cycle_time: BTreeMap::new(),
            deviation: BTreeMap::new(),
            max_cycle_time: None,
        })
    }

    /// Create the x family and require exactly one primary worker per
    /// operation.
    pub fn allocate_op_workers(&mut self) -> Result<(), ModelError> {
        for (op, workers) in &self.problem.op_workers {
            if workers.is_empty() {
                return Err(ModelError::NoEligibleWorkers { op: op.clone() });
            }
            let pool = self.op_worker.entry(op.clone()).or_default();
            for worker in workers {
                let var = self
                    .vars
                    .add(variable().binary().name(format!("x_{op}_{worker}")));
                pool.insert(worker.clone(), var);
            }
        }
        for assignees in self.op_worker.values() {
            let total = assignees
                .values()
                .fold(Expression::from(0.0), |sum, &v| sum + v);
            self.constraints.push(total.eq(1.0));
        }
        Ok(())
    }

    /// Create the y family; every worker holds between 1 and the configured
    /// maximum number of stations, and every station holds at most one
    /// worker.
    pub fn allocate_worker_stations(&mut self) -> Result<(), ModelError> {
        for (worker, stations) in &self.problem.worker_stations {
            if stations.is_empty() {
                return Err(ModelError::WorkerWithoutStations {
                    worker: worker.clone(),
                });
            }
            let pool = self.worker_station.entry(worker.clone()).or_default();
            for station in stations {
                let var = self
                    .vars
                    .add(variable().binary().name(format!("y_{worker}_{station}")));
                pool.insert(station.clone(), var);
            }
        }
        let max_stations = f64::from(self.problem.config.max_stations_per_worker);
        for postings in self.worker_station.values() {
            let total = postings
                .values()
                .fold(Expression::from(0.0), |sum, &v| sum + v);
            self.constraints.push(total.clone().geq(1.0));
            self.constraints.push(total.leq(max_stations));
        }
        for station in self.problem.station_index.keys() {
            let occupancy = self
                .worker_station
                .values()
                .filter_map(|postings| postings.get(station))
                .fold(Expression::from(0.0), |sum, &v| sum + v);
            self.constraints.push(occupancy.leq(1.0));
        }
        Ok(())
    }

    /// Create the z family and require exactly one station per operation.
    pub fn allocate_op_stations(&mut self) -> Result<(), ModelError> {
        for (op, stations) in &self.problem.op_stations {
            if stations.is_empty() {
                return Err(ModelError::NoEligibleStations { op: op.clone() });
            }
            let pool = self.op_station.entry(op.clone()).or_default();
            for station in stations {
                let var = self
                    .vars
                    .add(variable().binary().name(format!("z_{op}_{station}")));
                pool.insert(station.clone(), var);
            }
        }
        for routings in self.op_station.values() {
            let total = routings
                .values()
                .fold(Expression::from(0.0), |sum, &v| sum + v);
            self.constraints.push(total.eq(1.0));
        }
        Ok(())
    }

    /// Create the var family for every (operation, eligible worker, eligible
    /// station) combination.
    pub fn create_triples(&mut self) -> Result<(), ModelError> {
        for (op, workers) in &self.problem.op_workers {
            let stations = self
                .problem
                .op_stations
                .get(op)
                .ok_or_else(|| ModelError::NoEligibleStations { op: op.clone() })?;
            let by_worker = self.triple.entry(op.clone()).or_default();
            for worker in workers {
                let by_station = by_worker.entry(worker.clone()).or_default();
                for station in stations {
                    let var = self
                        .vars
                        .add(variable().binary().name(format!("var_{op}_{worker}_{station}")));
                    by_station.insert(station.clone(), var);
                }
            }
        }
        Ok(())
    }
}

fn validate(problem: &Problem) -> Result<(), ModelError> {
    if problem.parts.is_empty() {
        return Err(ModelError::InvalidBound {
            what: "part count",
            value: 0.0,
        });
    }
    if problem.station_index.is_empty() {
        return Err(ModelError::InvalidBound {
            what: "station count",
            value: 0.0,
        });
    }
    match problem.max_processing_time() {
        Some(t) if t.is_finite() && t > 0.0 => {}
        other => {
            return Err(ModelError::InvalidBound {
                what: "max processing time",
                value: other.unwrap_or(0.0),
            });
        }
    }
    for ops in problem.parts.values() {
        for op in ops {
            if !problem.op_workers.contains_key(op) {
                return Err(ModelError::NoEligibleWorkers { op: op.clone() });
            }
            if !problem.op_stations.contains_key(op) {
                return Err(ModelError::NoEligibleStations { op: op.clone() });
            }
        }
    }
    for (station, machines) in &problem.station_machines {
        if machines.is_empty() {
            return Err(ModelError::StationWithoutMachines {
                station: station.clone(),
            });
        }
    }
    for op in problem.op_workers.keys() {
        if problem.part_of(op).is_none() {
            return Err(ModelError::OperationWithoutPart { op: op.clone() });
        }
    }
    for station in problem
        .station_machines
        .keys()
        .chain(problem.worker_stations.values().flatten())
        .chain(problem.op_stations.values().flatten())
    {
        if !problem.station_index.contains_key(station) {
            return Err(ModelError::MissingStationIndex {
                station: station.clone(),
            });
        }
    }
    for worker in problem.worker_stations.keys() {
        if problem.eligible_op_count(worker) == 0 {
            return Err(ModelError::WorkerWithoutOperations {
                worker: worker.clone(),
            });
        }
    }
    // A worker without a station posting has no balance constraint and no
    // cycle-time term, so operations assigned to it would vanish from the
    // solution.
    for worker in problem.op_workers.values().flatten() {
        if !problem.worker_stations.contains_key(worker) {
            return Err(ModelError::WorkerWithoutStations {
                worker: worker.clone(),
            });
        }
    }
    Ok(())
}
