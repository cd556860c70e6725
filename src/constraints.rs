use good_lp::{Expression, Variable, variable};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::ModelError;
use crate::model::ModelBuilder;
use crate::types::OpId;

/// Strict-positivity margin for the revisit entry split; a step difference of
/// exactly 0 must not count as a new entry.
const EPSILON: f64 = 1e-6;

impl ModelBuilder<'_> {
    /// Station-machine allocation (w family).
    ///
    /// Fixed (station, machine) pairs are forced in; a fixed mono machine
    /// additionally forces its station's machine count to exactly 1. Movable
    /// mono machines get a linked integer load variable via the big-M
    /// pattern, which then replaces the plain machine sum in the per-station
    /// capacity bound.
    pub fn allocate_station_machines(&mut self) -> Result<(), ModelError> {
        let problem = self.problem;
        for (station, machines) in &problem.station_machines {
            if machines.is_empty() {
                return Err(ModelError::StationWithoutMachines {
                    station: station.clone(),
                });
            }
            let pool = self.station_machine.entry(station.clone()).or_default();
            for machine in machines {
                let var = self
                    .vars
                    .add(variable().binary().name(format!("w_{station}_{machine}")));
                pool.insert(machine.clone(), var);
            }
        }

        for fixed in &problem.fixed_station_machines {
            let pool = self.station_machine.get(&fixed.station).ok_or_else(|| {
                ModelError::UnknownFixedReference {
                    what: "station",
                    id: fixed.station.clone(),
                }
            })?;
            let &installed =
                pool.get(&fixed.machine)
                    .ok_or_else(|| ModelError::UnknownFixedReference {
                        what: "machine",
                        id: format!("{}@{}", fixed.machine, fixed.station),
                    })?;
            self.constraints.push(Expression::from(installed).eq(1.0));
            if problem.mono_machines.contains(&fixed.machine) {
                let total = pool
                    .values()
                    .fold(Expression::from(0.0), |sum, &v| sum + v);
                self.constraints.push(total.eq(1.0));
            }
        }

        // A movable mono machine excludes every other machine from whichever
        // station it lands on. Linearized with an integer "other machines at
        // this station" variable: load = (1 - w) * others.
        let capacity = f64::from(problem.config.max_machines_per_station);
        let mut mono_sites: Vec<(String, String, Variable, Expression)> = Vec::new();
        for (station, pool) in &self.station_machine {
            for (machine, &installed) in pool {
                if problem.movable_mono_machines.contains(machine) {
                    let others = pool
                        .iter()
                        .filter(|(other, _)| *other != machine)
                        .fold(Expression::from(0.0), |sum, (_, &v)| sum + v);
                    mono_sites.push((station.clone(), machine.clone(), installed, others));
                }
            }
        }
        for (station, machine, installed, others) in mono_sites {
            let load = self.vars.add(
                variable()
                    .integer()
                    .min(0)
                    .max(capacity)
                    .name(format!("contr_mono_{station}_{machine}")),
            );
            self.constraints
                .push(Expression::from(load).leq(installed * capacity));
            self.constraints
                .push(Expression::from(load).leq(others.clone()));
            self.constraints
                .push((others + installed * capacity - capacity).leq(load));
            self.station_load
                .insert(station, Expression::from(installed) + load);
        }

        for (station, pool) in &self.station_machine {
            let load = match self.station_load.get(station) {
                Some(substitute) => substitute.clone(),
                None => pool
                    .values()
                    .fold(Expression::from(0.0), |sum, &v| sum + v),
            };
            self.constraints.push(load.leq(capacity));
        }
        Ok(())
    }

    /// Cross-family consistency: v = w ∧ z, var = x ∧ y ∧ v, at most one
    /// station per (operation, worker), and the per-worker balance between
    /// primary assignments and fully resolved triples.
    pub fn link_triples(&mut self) -> Result<(), ModelError> {
        // An operation with a decided worker resolves to at most one station.
        for by_worker in self.triple.values() {
            for by_station in by_worker.values() {
                let total = by_station
                    .values()
                    .fold(Expression::from(0.0), |sum, &v| sum + v);
                self.constraints.push(total.leq(1.0));
            }
        }

        // A worker assigned on paper must have a matching resolved triple.
        for worker in self.worker_station.keys() {
            let assigned = self
                .op_worker
                .values()
                .filter_map(|assignees| assignees.get(worker))
                .fold(Expression::from(0.0), |sum, &v| sum + v);
            let resolved = self
                .triple
                .values()
                .filter_map(|by_worker| by_worker.get(worker))
                .flat_map(|by_station| by_station.values())
                .fold(Expression::from(0.0), |sum, &v| sum + v);
            self.constraints.push(assigned.eq(resolved));
        }

        // v[op][s] = w[s][machine(op)] AND z[op][s]: an operation only truly
        // reaches a station that hosts its machine type.
        for (op, routings) in &self.op_station {
            for (station, &z) in routings {
                let Some(&w) = self
                    .station_machine
                    .get(station)
                    .and_then(|pool| pool.get(&op.machine))
                else {
                    continue;
                };
                let v = self
                    .vars
                    .add(variable().binary().name(format!("constr_eq_{op}_{station}")));
                self.constraints.push(Expression::from(v).leq(w));
                self.constraints.push(Expression::from(v).leq(z));
                self.constraints.push((Expression::from(w) + z - 1.0).leq(v));
                self.routed
                    .entry(op.clone())
                    .or_default()
                    .insert(station.clone(), v);
            }
        }

        // var[op][w][s] = x AND y AND v. Triples whose y or v link does not
        // exist can never be selected.
        let mut dead_triples = 0usize;
        for (op, by_worker) in &self.triple {
            for (worker, by_station) in by_worker {
                let x = self.op_worker[op][worker];
                for (station, &resolved) in by_station {
                    let y = self
                        .worker_station
                        .get(worker)
                        .and_then(|pool| pool.get(station));
                    let v = self
                        .routed
                        .get(op)
                        .and_then(|pool| pool.get(station));
                    match (y, v) {
                        (Some(&y), Some(&v)) => {
                            self.constraints.push(Expression::from(resolved).leq(x));
                            self.constraints.push(Expression::from(resolved).leq(y));
                            self.constraints.push(Expression::from(resolved).leq(v));
                            self.constraints.push(
                                (Expression::from(x) + y + v - 2.0).leq(resolved),
                            );
                        }
                        _ => {
                            self.constraints.push(Expression::from(resolved).eq(0.0));
                            dead_triples += 1;
                        }
                    }
                }
            }
        }
        if dead_triples > 0 {
            debug!(dead_triples, "triples pinned to 0 (no worker posting or machine route)");
        }
        Ok(())
    }

    /// Force every fixed (machine, operation, worker, station) tuple into the
    /// solution by pinning its x, y, v, and var entries to 1.
    pub fn apply_fixed_assignments(&mut self) -> Result<(), ModelError> {
        for fixed in &self.problem.fixed_assignments {
            let op = OpId::new(fixed.machine.clone(), fixed.operation.clone());
            let &x = self
                .op_worker
                .get(&op)
                .and_then(|pool| pool.get(&fixed.worker))
                .ok_or_else(|| ModelError::UnknownFixedReference {
                    what: "operation-worker pair",
                    id: format!("{op}/{}", fixed.worker),
                })?;
            let &y = self
                .worker_station
                .get(&fixed.worker)
                .and_then(|pool| pool.get(&fixed.station))
                .ok_or_else(|| ModelError::UnknownFixedReference {
                    what: "worker-station pair",
                    id: format!("{}/{}", fixed.worker, fixed.station),
                })?;
            let &v = self
                .routed
                .get(&op)
                .and_then(|pool| pool.get(&fixed.station))
                .ok_or_else(|| ModelError::UnknownFixedReference {
                    what: "operation-station route",
                    id: format!("{op}/{}", fixed.station),
                })?;
            let &resolved = self
                .triple
                .get(&op)
                .and_then(|pool| pool.get(&fixed.worker))
                .and_then(|pool| pool.get(&fixed.station))
                .ok_or_else(|| ModelError::UnknownFixedReference {
                    what: "triple",
                    id: format!("{op}/{}/{}", fixed.worker, fixed.station),
                })?;
            self.constraints.push(Expression::from(x).eq(1.0));
            self.constraints.push(Expression::from(y).eq(1.0));
            self.constraints.push(Expression::from(v).eq(1.0));
            self.constraints.push(Expression::from(resolved).eq(1.0));
        }
        Ok(())
    }

    /// Bound how often each part may travel backward around the circular
    /// line. For every adjacent operation pair the assigned-position
    /// difference is split over a binary pair; the negative branch is the
    /// wrap indicator.
    pub fn bound_circular_routing(&mut self) -> Result<(), ModelError> {
        let problem = self.problem;
        let station_count = problem.station_index.len() as f64;
        let span = station_count - 1.0;
        let cap = (f64::from(problem.config.max_cycle_count) - 1.0).max(1.0);
        let parts: Vec<String> = self.graph.parts_in_order().map(str::to_string).collect();

        // Line indices only order the stations; rank them into dense 1..N
        // positions so the split's ±(N-1) bounds hold for any index values.
        let mut ordered: Vec<(&String, i64)> = problem
            .station_index
            .iter()
            .map(|(station, &index)| (station, index))
            .collect();
        ordered.sort_by_key(|&(_, index)| index);
        let rank: BTreeMap<&str, f64> = ordered
            .iter()
            .enumerate()
            .map(|(position, (station, _))| (station.as_str(), (position + 1) as f64))
            .collect();

        for part in parts {
            let ops = &problem.parts[&part];
            if ops.len() < 2 {
                continue;
            }
            let station_numbers: Vec<Expression> = ops
                .iter()
                .map(|op| {
                    self.op_station[op]
                        .iter()
                        .fold(Expression::from(0.0), |sum, (station, &z)| {
                            sum + z * rank[station.as_str()]
                        })
                })
                .collect();

            let mut wraps = Expression::from(0.0);
            for i in 0..station_numbers.len() - 1 {
                // diff ∈ [-(N-1), N-1]; wrap = 1 exactly when diff < 0.
                let diff = station_numbers[i + 1].clone() - station_numbers[i].clone();
                let tag = format!("circle_{part}_{i}_{}_{}", ops[i], ops[i + 1]);
                let wrap = self
                    .vars
                    .add(variable().binary().name(format!("{tag}_1")));
                let forward = self
                    .vars
                    .add(variable().binary().name(format!("{tag}_2")));
                self.constraints
                    .push((Expression::from(wrap) + forward).eq(1.0));
                self.constraints.push((diff.clone() + wrap * span).geq(0.0));
                self.constraints
                    .push((diff + wrap - forward * span).leq(0.0));
                wraps = wraps + wrap;
                self.wrap_step.insert((part.clone(), i), wrap);
            }
            self.constraints.push(wraps.leq(cap));
        }
        Ok(())
    }

    /// Bound repeat visits per station. For each (station, part), rising
    /// edges across the part's routing variables count station entries; a
    /// second binary split flags parts that enter more than once, and the
    /// per-station flag total is capped. Stations with fixed machines are
    /// exempt.
    pub fn bound_station_revisits(&mut self) -> Result<(), ModelError> {
        let problem = self.problem;
        let cap = f64::from(problem.config.max_revisited_station_count);
        let stations: Vec<String> = problem
            .station_index
            .keys()
            .filter(|station| !problem.fixed_stations.contains(*station))
            .cloned()
            .collect();
        let parts: Vec<String> = self.graph.parts_in_order().map(str::to_string).collect();

        for station in &stations {
            let mut flags = Expression::from(0.0);
            let mut bounded = false;
            for part in &parts {
                let ops = &problem.parts[part];
                if ops.len() < 2 {
                    continue;
                }
                let here: Vec<Variable> = ops
                    .iter()
                    .filter_map(|op| {
                        self.op_station
                            .get(op)
                            .and_then(|pool| pool.get(station))
                            .copied()
                    })
                    .collect();
                if here.is_empty() {
                    continue;
                }

                let mut entries = Expression::from(0.0);
                for (i, &z) in here.iter().enumerate() {
                    let step = if i == 0 {
                        Expression::from(z)
                    } else {
                        Expression::from(z) - here[i - 1]
                    };
                    let tag = format!("cnt_{station}_{part}_{i}");
                    let stay = self
                        .vars
                        .add(variable().binary().name(format!("{tag}_1")));
                    let enter = self
                        .vars
                        .add(variable().binary().name(format!("{tag}_2")));
                    self.constraints
                        .push((Expression::from(stay) + enter).eq(1.0));
                    // step ∈ {-1, 0, 1}; enter = 1 exactly when step = 1.
                    self.constraints
                        .push((step.clone() + stay - enter * EPSILON).geq(0.0));
                    self.constraints.push((step - enter).leq(0.0));
                    entries = entries + enter;
                }

                let tag = format!("revisited_{station}_{part}");
                let single = self
                    .vars
                    .add(variable().binary().name(format!("{tag}_1")));
                let repeat = self
                    .vars
                    .add(variable().binary().name(format!("{tag}_2")));
                self.constraints
                    .push((Expression::from(single) + repeat).eq(1.0));
                // repeat is forced to 1 once the part enters more than once.
                self.constraints
                    .push((entries.clone() + single).geq(1.0));
                self.constraints.push(
                    (entries - repeat * (ops.len() as f64 - 2.0) - single).leq(0.0),
                );
                flags = flags + repeat;
                self.revisit_flag
                    .insert((station.clone(), part.clone()), repeat);
                bounded = true;
            }
            if bounded {
                self.constraints.push(flags.leq(cap));
            }
        }
        Ok(())
    }
}
