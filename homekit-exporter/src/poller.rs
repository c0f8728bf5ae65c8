//! Bridge polling: fetch accessories, normalize, update the registry.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use homekit_common::TemperatureUnit;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::client::BridgeClient;
use crate::collector::{SharedRegistry, Upsert};
use crate::config::ExporterConfig;
use crate::mapping::normalize;

/// Errors that abandon a whole poll cycle.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("No poll targets: room discovery returned nothing and no devices are configured")]
    NoTargets,
    #[error("All {attempted} poll targets failed")]
    AllTargetsFailed { attempted: usize },
}

/// Outcome of one successful poll cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Rooms and accessories queried.
    pub targets: usize,
    /// Targets whose fetch failed.
    pub failed_targets: Vec<String>,
    /// Whether `/list/rooms` failed this cycle.
    pub discovery_failed: bool,
    /// Accessory records normalized.
    pub devices: usize,
    /// Samples written to the registry.
    pub samples: usize,
    /// Samples that allocated a new registry entry.
    pub created: usize,
    /// Metric names produced by more than one accessory.
    pub collisions: usize,
    /// Wall time of the cycle.
    pub elapsed: Duration,
}

/// Poller for a single bridge.
pub struct Poller {
    client: BridgeClient,
    registry: SharedRegistry,
    devices: Vec<String>,
    unit: TemperatureUnit,
    interval: Duration,
}

impl Poller {
    /// Create a new poller.
    pub fn new(client: BridgeClient, registry: SharedRegistry, config: &ExporterConfig) -> Self {
        Self {
            client,
            registry,
            devices: config.devices.clone(),
            unit: config.settings.temperature,
            interval: Duration::from_secs(config.settings.poll_secs),
        }
    }

    /// Run the polling loop until the shutdown signal is received.
    ///
    /// The first cycle starts immediately. A cycle in progress is always
    /// allowed to finish; shutdown is only observed between cycles.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            bridge = %self.client.base_url(),
            interval_secs = self.interval.as_secs(),
            unit = %self.unit,
            "Starting bridge poller"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            self.run_cycle().await;
        }

        info!("Bridge poller stopped");
    }

    /// Run one cycle, record its outcome and log it. Never fails.
    pub async fn run_cycle(&self) {
        match self.poll_once().await {
            Ok(report) => {
                self.registry
                    .record_cycle_success(report.failed_targets.len());
                debug!(
                    targets = report.targets,
                    failed = report.failed_targets.len(),
                    devices = report.devices,
                    samples = report.samples,
                    created = report.created,
                    collisions = report.collisions,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "Poll cycle complete"
                );
            }
            Err(e) => {
                let failed = match &e {
                    PollError::AllTargetsFailed { attempted } => *attempted,
                    PollError::NoTargets => 0,
                };
                self.registry.record_cycle_failure(failed);
                error!(error = %e, "Poll cycle failed, keeping previous values");
            }
        }
    }

    /// Perform a single poll cycle.
    pub async fn poll_once(&self) -> Result<CycleReport, PollError> {
        let started = Instant::now();
        let mut report = CycleReport::default();

        let targets = self.targets(&mut report).await;
        if targets.is_empty() {
            return Err(PollError::NoTargets);
        }
        report.targets = targets.len();

        // metric name -> accessory that produced it this cycle
        let mut producers: HashMap<String, String> = HashMap::new();

        for target in &targets {
            let devices = match self.client.devices_for(target).await {
                Ok(devices) => devices,
                Err(e) => {
                    warn!(
                        target_name = %target,
                        error = %e,
                        "Failed to fetch accessories, skipping"
                    );
                    report.failed_targets.push(target.clone());
                    continue;
                }
            };

            for device in &devices {
                let label = device.label();
                report.devices += 1;

                // names produced by this record, to catch keys that sanitize alike
                let mut own = HashSet::new();

                for sample in normalize(device, self.unit) {
                    let repeated = !own.insert(sample.name.clone());

                    match producers.get(&sample.name) {
                        Some(previous) if previous != &label || repeated => {
                            warn!(
                                metric = %sample.name,
                                first = %previous,
                                second = %label,
                                "Metric name collision, last value wins"
                            );
                            report.collisions += 1;
                        }
                        Some(_) => {}
                        None => {
                            producers.insert(sample.name.clone(), label.clone());
                        }
                    }

                    if self.registry.record(&sample) == Upsert::Created {
                        report.created += 1;
                    }
                    report.samples += 1;
                }
            }
        }

        if report.failed_targets.len() == targets.len() {
            return Err(PollError::AllTargetsFailed {
                attempted: targets.len(),
            });
        }

        report.elapsed = started.elapsed();
        Ok(report)
    }

    /// Discovered rooms followed by configured targets, without duplicates.
    async fn targets(&self, report: &mut CycleReport) -> Vec<String> {
        let rooms = match self.client.list_rooms().await {
            Ok(rooms) => rooms,
            Err(e) => {
                warn!(error = %e, "Room discovery failed, polling configured devices only");
                report.discovery_failed = true;
                Vec::new()
            }
        };

        let mut seen = HashSet::new();
        rooms
            .into_iter()
            .chain(self.devices.iter().cloned())
            .filter(|target| seen.insert(target.clone()))
            .collect()
    }
}
