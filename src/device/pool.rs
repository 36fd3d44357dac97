//! Fork-join worker pool: exactly one OS thread per device
//!
//! Workers are spawned first and released together through a start gate.
//! If any spawn fails, the gate opens "closed" and the already spawned workers
//! return without touching the barrier, so nobody is stranded.
//!
//! A worker that returns an error or panics aborts its [`DeviceGroup`]. Peers
//! still inside a collective step then fail with
//! [`SnmgError::CollectiveFailure`] and the join completes.

use super::{Backend, DeviceGroup, DeviceId, DeviceMemory, DeviceTopology, ExecutionContext};
use crate::error::{Result, SnmgError};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

struct StartGate {
    state: Mutex<Option<bool>>,
    opened: Condvar,
}

impl StartGate {
    const fn new() -> Self {
        Self {
            state: Mutex::new(None),
            opened: Condvar::new(),
        }
    }

    fn release(&self, go: bool) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = Some(go);
        self.opened.notify_all();
    }

    fn wait(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(go) = *state {
                return go;
            }
            state = self
                .opened
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Outcome of a successful launch
#[derive(Debug)]
pub struct Launched<R> {
    /// Value returned by each worker, indexed by device
    pub per_device: Vec<R>,

    /// Vector published by the leader, if any
    pub published: Option<Vec<f32>>,
}

/// Run `worker` once per device, in parallel, and join
///
/// Each worker binds its thread to one device (see
/// [`ExecutionContext::bind`]) before running. Binding failures are agreed on
/// collectively, so either every worker runs `worker` or none does.
///
/// # Errors
///
/// - [`SnmgError::InvalidArgument`] if `num_devices` is zero or exceeds the
///   topology or the memory arenas
/// - [`SnmgError::DeviceBinding`] if a worker thread cannot be spawned or bound
/// - any error returned by a worker; an original error is preferred over the
///   [`SnmgError::CollectiveFailure`] its peers observed
/// - [`SnmgError::CollectiveFailure`] naming the device whose worker panicked
pub fn launch<R, F>(
    topology: &DeviceTopology,
    memory: &Arc<DeviceMemory>,
    backend: Backend,
    num_devices: usize,
    worker: F,
) -> Result<Launched<R>>
where
    R: Send,
    F: Fn(&ExecutionContext<'_>) -> Result<R> + Sync,
{
    if num_devices == 0 || num_devices > topology.devices {
        return Err(SnmgError::invalid_argument(format!(
            "num_devices must be in 1..={}, got {num_devices}",
            topology.devices
        )));
    }
    if num_devices > memory.num_devices() {
        return Err(SnmgError::invalid_argument(format!(
            "memory has {} device arenas, {num_devices} requested",
            memory.num_devices()
        )));
    }

    let group = DeviceGroup::new(num_devices);
    let gate = StartGate::new();
    let lanes = topology.lanes_per_device;

    let outcomes = thread::scope(|scope| {
        let mut handles = Vec::with_capacity(num_devices);
        let mut spawn_error = None;

        for index in 0..num_devices {
            let (group, gate, worker) = (&group, &gate, &worker);
            let device = DeviceId(index);
            let spawned = thread::Builder::new()
                .name(format!("snmg-device-{index}"))
                .spawn_scoped(scope, move || -> Result<R> {
                    if !gate.wait() {
                        return Err(SnmgError::DeviceBinding {
                            device,
                            reason: "worker pool failed to start".to_string(),
                        });
                    }
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                        let ctx = ExecutionContext::bind(
                            group,
                            device,
                            Arc::clone(memory),
                            lanes,
                            backend,
                        );
                        let ctx = group.agree(device, ctx)?;
                        worker(&ctx)
                    }));

                    match outcome {
                        Ok(Ok(value)) => Ok(value),
                        Ok(Err(err)) => {
                            group.abort(device, err.to_string());
                            Err(err)
                        }
                        Err(payload) => {
                            let reason =
                                format!("worker panicked: {}", panic_message(payload.as_ref()));
                            group.abort(device, reason.clone());
                            Err(SnmgError::CollectiveFailure { device, reason })
                        }
                    }
                });

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    spawn_error = Some(SnmgError::DeviceBinding {
                        device,
                        reason: e.to_string(),
                    });
                    break;
                }
            }
        }

        gate.release(spawn_error.is_none());

        let joined: Vec<Result<R>> = handles
            .into_iter()
            .enumerate()
            .map(|(index, handle)| {
                handle.join().unwrap_or_else(|_| {
                    Err(SnmgError::CollectiveFailure {
                        device: DeviceId(index),
                        reason: "worker panicked".to_string(),
                    })
                })
            })
            .collect();

        match spawn_error {
            Some(err) => Err(err),
            None => Ok(joined),
        }
    })?;

    let mut per_device = Vec::with_capacity(num_devices);
    let mut first_error: Option<SnmgError> = None;
    for outcome in outcomes {
        match outcome {
            Ok(value) => per_device.push(value),
            Err(err) => {
                let replace = match &first_error {
                    None => true,
                    Some(SnmgError::CollectiveFailure { .. }) => {
                        !matches!(err, SnmgError::CollectiveFailure { .. })
                    }
                    Some(_) => false,
                };
                if replace {
                    first_error = Some(err);
                }
            }
        }
    }

    if let Some(err) = first_error {
        return Err(err);
    }

    Ok(Launched {
        per_device,
        published: group.take_result(),
    })
}
