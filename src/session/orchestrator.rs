use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

use super::driver::run_device;
use super::{CommandBatch, Connector, SessionOutcome, SessionSettings};
use crate::device::{Credential, Device};
use crate::error::GatherError;

/// Runs one session per device concurrently and collects exactly one outcome
/// for each of them.
pub struct Orchestrator<C: Connector> {
    connector: Arc<C>,
    settings: Arc<SessionSettings>,
}

impl<C: Connector> Clone for Orchestrator<C> {
    fn clone(&self) -> Self {
        Self {
            connector: self.connector.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<C: Connector> Orchestrator<C> {
    pub fn new(connector: C, settings: SessionSettings) -> Self {
        Self {
            connector: Arc::new(connector),
            settings: Arc::new(settings),
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Collects outcomes from every device, in the order sessions finish.
    ///
    /// Workers live in a [`JoinSet`] owned by this call, so dropping the
    /// returned future aborts every session still running. A worker that
    /// panics or is cancelled is recorded as [`GatherError::WorkerLost`] for
    /// its device.
    pub async fn run(
        &self,
        devices: Vec<Device>,
        credential: Credential,
        commands: CommandBatch,
    ) -> Vec<SessionOutcome> {
        let started = Instant::now();
        let total = devices.len();
        if total == 0 {
            warn!("inventory has no devices, nothing to collect");
            return Vec::new();
        }
        info!(
            "collecting {} commands from {} devices",
            commands.commands().len(),
            total
        );

        let credential = Arc::new(credential);
        let limiter = self
            .settings
            .max_parallel
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));

        let mut workers = JoinSet::new();
        let mut pending = HashMap::with_capacity(total);
        for device in devices {
            let address = device.address.clone();
            let connector = self.connector.clone();
            let settings = self.settings.clone();
            let credential = credential.clone();
            let commands = commands.clone();
            let limiter = limiter.clone();

            let handle = workers.spawn(async move {
                let _permit = match limiter {
                    Some(semaphore) => match semaphore.acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(_) => {
                            return SessionOutcome::Failed {
                                error: GatherError::WorkerLost {
                                    address: device.address.clone(),
                                    reason: "session limiter closed".to_string(),
                                },
                                address: device.address,
                            };
                        }
                    },
                    None => None,
                };
                debug!("{} session starting", device.address);
                run_device(
                    connector.as_ref(),
                    &device,
                    &credential,
                    &commands,
                    &settings,
                )
                .await
            });
            pending.insert(handle.id(), address);
        }

        let mut outcomes = Vec::with_capacity(total);
        while let Some(joined) = workers.join_next_with_id().await {
            match joined {
                Ok((id, outcome)) => {
                    pending.remove(&id);
                    outcomes.push(outcome);
                }
                Err(err) => {
                    let Some(address) = pending.remove(&err.id()) else {
                        warn!("unknown worker {} ended: {}", err.id(), err);
                        continue;
                    };
                    let reason = lost_reason(err);
                    warn!("{} worker ended without reporting: {}", address, reason);
                    outcomes.push(SessionOutcome::Failed {
                        error: GatherError::WorkerLost {
                            address: address.clone(),
                            reason,
                        },
                        address,
                    });
                }
            }
        }

        let failed = outcomes.iter().filter(|o| !o.is_success()).count();
        info!(
            "{} devices completed, {} failed",
            outcomes.len() - failed,
            failed
        );
        info!("collecting outputs took {:?}", started.elapsed());
        outcomes
    }
}

fn lost_reason(err: JoinError) -> String {
    if err.is_cancelled() {
        return "cancelled".to_string();
    }
    match err.try_into_panic() {
        Ok(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
        Err(err) => err.to_string(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}
