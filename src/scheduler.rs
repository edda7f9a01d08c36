//! Run scheduling and reporting.
//!
//! Units are drained from a shared queue by a bounded pool of workers. A
//! worker that dies takes nothing down with it: its in-flight unit is
//! reported as failed and the remaining queue is marked rather than lost.

use crate::hydration::HydrationUnit;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Outcome of one full run.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Number of items that entered the run.
    pub total: usize,
    /// Failed items, by name, with the labels of the stages that failed.
    pub failures: BTreeMap<String, Vec<String>>,
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        if self.failures.is_empty() {
            0
        } else {
            1
        }
    }

    /// Human-readable run summary, one line per failed item.
    pub fn summary(&self) -> String {
        if self.failures.is_empty() {
            return format!("successfully hydrated {} item(s)", self.total);
        }
        let mut out = format!(
            "hydrated {} item(s); {} failed:\n",
            self.total,
            self.failures.len()
        );
        for (name, stages) in &self.failures {
            out.push_str(&format!("  '{}' failed: {}\n", name, stages.join(", ")));
        }
        out.pop();
        out
    }

    fn record(&mut self, unit: &HydrationUnit) {
        let stages = unit.status().failed_stages();
        if !stages.is_empty() {
            self.failures.insert(unit.name().to_string(), stages);
        }
    }
}

/// Run every unit to completion and collect the report.
///
/// `workers == 0` runs units one at a time on the current task; otherwise up
/// to `workers` units hydrate concurrently.
pub async fn run_units(units: Vec<HydrationUnit>, workers: usize) -> RunReport {
    let mut report = RunReport {
        total: units.len(),
        ..Default::default()
    };
    let names: Vec<String> = units.iter().map(|u| u.name().to_string()).collect();

    if workers == 0 {
        info!("hydrating {} item(s) sequentially", units.len());
        for mut unit in units {
            unit.run().await;
            report.record(&unit);
        }
        return report;
    }

    let pool = workers.min(units.len().max(1));
    info!(
        "hydrating {} item(s) with {} worker(s)",
        units.len(),
        pool
    );

    let queue = Arc::new(Mutex::new(VecDeque::from(units)));
    let done: Arc<Mutex<Vec<HydrationUnit>>> = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..pool)
        .map(|worker| {
            let queue = Arc::clone(&queue);
            let done = Arc::clone(&done);
            tokio::spawn(async move {
                loop {
                    let next = queue.lock().pop_front();
                    let Some(mut unit) = next else {
                        debug!("worker {} drained the queue", worker);
                        break;
                    };
                    unit.run().await;
                    done.lock().push(unit);
                }
            })
        })
        .collect();

    for result in join_all(handles).await {
        if let Err(err) = result {
            error!("hydration worker died: {}", err);
        }
    }

    // units stranded in the queue by dead workers never ran
    for mut unit in queue.lock().drain(..) {
        unit.fail_preflight();
        done.lock().push(unit);
    }

    let done = done.lock();
    for unit in done.iter() {
        report.record(unit);
    }
    // a unit missing entirely was in flight when its worker died
    for name in names {
        if !done.iter().any(|u| u.name() == name) && !report.failures.contains_key(&name) {
            report
                .failures
                .insert(name, vec!["pre-flight".to_string()]);
        }
    }

    report
}
