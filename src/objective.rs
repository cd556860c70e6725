use good_lp::{Expression, variable};
use tracing::debug;

use crate::error::ModelError;
use crate::model::ModelBuilder;

impl ModelBuilder<'_> {
    /// Term 1: minimize the worst per-worker cycle time. Introduces the free
    /// `max_tt` variable, bounded by the largest processing time times the
    /// operation count, and pins it above every worker's cycle time.
    pub fn add_throughput_objective(&mut self) -> Result<(), ModelError> {
        let problem = self.problem;
        let max_time = problem
            .max_processing_time()
            .ok_or(ModelError::InvalidBound {
                what: "max processing time",
                value: 0.0,
            })?;
        let big_m = max_time * problem.op_count() as f64;
        let max_tt = self
            .vars
            .add(variable().min(0.0).max(big_m).name("max_tt"));

        let workers: Vec<String> = self.worker_station.keys().cloned().collect();
        for worker in workers {
            let mut cycle = Expression::from(0.0);
            for (op, assignees) in &self.op_worker {
                if let Some(&x) = assignees.get(&worker) {
                    let time = problem.processing_time(op, &worker).ok_or_else(|| {
                        ModelError::MissingProcessingTime {
                            op: op.code.clone(),
                            worker: worker.clone(),
                        }
                    })?;
                    cycle = cycle + x * time;
                }
            }
            self.constraints.push(cycle.clone().leq(max_tt));
            self.cycle_time.insert(worker, cycle);
        }
        self.max_cycle_time = Some(max_tt);
        debug!(big_m, "throughput objective built");
        Ok(())
    }

    /// Term 2: minimize aggregate cycle-time volatility. Each worker's
    /// |cycle − average| is linearized with the two-sided bound and capped at
    /// `volatility_rate` times the fleet average.
    pub fn add_volatility_objective(&mut self) -> Result<(), ModelError> {
        let problem = self.problem;
        let max_time = problem
            .max_processing_time()
            .ok_or(ModelError::InvalidBound {
                what: "max processing time",
                value: 0.0,
            })?;
        let worker_count = self.cycle_time.len();
        if worker_count == 0 {
            return Err(ModelError::ObjectiveNotBuilt);
        }
        let average = self
            .cycle_time
            .values()
            .fold(Expression::from(0.0), |sum, cycle| sum + cycle.clone())
            * (1.0 / worker_count as f64);
        let volatility_rate = problem.config.volatility_rate;

        let cycles: Vec<(String, Expression)> = self
            .cycle_time
            .iter()
            .map(|(worker, cycle)| (worker.clone(), cycle.clone()))
            .collect();
        for (worker, cycle) in cycles {
            // Per-worker big-M: this worker can at most run every operation
            // it is eligible for.
            let bound = max_time * problem.eligible_op_count(&worker) as f64;
            let deviation = self
                .vars
                .add(variable().min(0.0).max(bound).name(format!("obj_{worker}")));
            self.constraints
                .push((cycle.clone() - average.clone()).leq(deviation));
            self.constraints
                .push((average.clone() - cycle).leq(deviation));
            self.constraints
                .push(Expression::from(deviation).leq(average.clone() * volatility_rate));
            self.deviation.insert(worker, deviation);
        }
        Ok(())
    }

    /// `W1 · max_tt + W2 · Σ deviations`, handed to the solver for
    /// minimization.
    pub(crate) fn objective_expression(&self) -> Result<Expression, ModelError> {
        let max_tt = self.max_cycle_time.ok_or(ModelError::ObjectiveNotBuilt)?;
        let deviation_total = self
            .deviation
            .values()
            .fold(Expression::from(0.0), |sum, &d| sum + d);
        Ok(Expression::from(max_tt) * self.problem.config.throughput_weight
            + deviation_total * self.problem.config.volatility_weight)
    }
}
