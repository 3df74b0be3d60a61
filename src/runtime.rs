// Async boundary around the blocking arm, and the 50 Hz pose stream
//
// Every arm operation blocks on serial round trips, so each one runs on a
// blocking thread. The pose stream jogs toward the newest target each tick;
// its watchdog stops jogging once targets stop arriving.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, watch};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{info, warn};

use crate::arm::{CalibrationStore, LoadOutcome, Result, System};
use crate::config::{CMD_TIMEOUT, LOOP_HZ};
use crate::messages::{JointPose, RuntimeHealth, TargetPose};

/// Newest-target-wins watchdog state
pub struct Runtime {
    latest_cmd: Option<TargetPose>,
    cmd_received_at: Instant,
    health: RuntimeHealth,
    timeout: Duration,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_timeout(CMD_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            latest_cmd: None,
            cmd_received_at: Instant::now(),
            health: RuntimeHealth::CmdStale, // Start stale until first cmd
            timeout,
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    pub fn on_command(&mut self, cmd: TargetPose) {
        self.latest_cmd = Some(cmd);
        self.cmd_received_at = Instant::now();
    }

    /// Target to jog toward this tick, or nothing once the watchdog has fired
    pub fn compute_actuation(&mut self) -> Option<TargetPose> {
        let cmd_age = self.cmd_received_at.elapsed();

        if cmd_age > self.timeout {
            if self.health != RuntimeHealth::CmdStale {
                warn!("Command stale ({:?} old), holding position", cmd_age);
            }
            self.health = RuntimeHealth::CmdStale;
            None
        } else if let Some(cmd) = self.latest_cmd {
            self.health = RuntimeHealth::Ok;
            Some(cmd)
        } else {
            // No command ever received
            self.health = RuntimeHealth::CmdStale;
            None
        }
    }
}

/// Shared handle that runs arm operations off the async executor
#[derive(Clone)]
pub struct ArmRuntime {
    system: Arc<System>,
}

impl ArmRuntime {
    pub fn new(system: System) -> Self {
        Self {
            system: Arc::new(system),
        }
    }

    pub fn system(&self) -> &Arc<System> {
        &self.system
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&System) -> Result<T> + Send + 'static,
    {
        let system = Arc::clone(&self.system);
        tokio::task::spawn_blocking(move || op(&system)).await?
    }

    /// Home every joint from the calibration files in `store`
    pub async fn home(&self, store: CalibrationStore) -> Result<LoadOutcome> {
        self.blocking(move |system| system.load_motors(&store, None))
            .await
    }

    pub async fn smooth_move(
        &self,
        duration: f64,
        timeout: f64,
        epsilon: f64,
        target: JointPose,
    ) -> Result<()> {
        self.blocking(move |system| system.smooth_move(duration, timeout, epsilon, &target))
            .await
    }

    pub async fn move_to(&self, target: TargetPose, duration: f64) -> Result<()> {
        self.blocking(move |system| system.move_to(&target, duration))
            .await
    }

    /// Runs alongside whatever else is in flight
    pub async fn emergency_stop(&self) -> Result<()> {
        self.blocking(|system| system.emergency_stop()).await
    }

    /// Jog toward the newest target from `commands` at the loop rate until the
    /// channel closes. Health is published on `health`; a failed jog ends the
    /// stream with `Faulted`.
    pub async fn stream(
        &self,
        mut commands: mpsc::Receiver<TargetPose>,
        health: watch::Sender<RuntimeHealth>,
    ) -> Result<()> {
        let mut runtime = Runtime::new();
        let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_sent: Option<TargetPose> = None;

        info!(
            "Pose stream started: {}Hz loop, {}ms watchdog timeout",
            LOOP_HZ,
            CMD_TIMEOUT.as_millis()
        );

        loop {
            tick.tick().await;

            // 1. Drain all pending commands, keep latest
            let mut closed = false;
            loop {
                match commands.try_recv() {
                    Ok(cmd) => runtime.on_command(cmd),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        closed = true;
                        break;
                    }
                }
            }

            // 2. Watchdog
            let target = runtime.compute_actuation();
            publish(&health, runtime.health());

            // 3. Jog when the target changed
            if let Some(target) = target
                && last_sent != Some(target)
            {
                let pose = self.system.pose_to_joints(&target);
                if let Err(e) = self.blocking(move |system| system.jog(&pose)).await {
                    warn!("Pose stream stopped: {}", e);
                    publish(&health, RuntimeHealth::Faulted);
                    return Err(e);
                }
                last_sent = Some(target);
            }

            if closed {
                info!("Command channel closed, pose stream ending");
                return Ok(());
            }
        }
    }
}

fn publish(health: &watch::Sender<RuntimeHealth>, value: RuntimeHealth) {
    health.send_if_modified(|current| {
        let changed = *current != value;
        *current = value;
        changed
    });
}
