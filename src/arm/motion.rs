// Joint-space motion: immediate jogs and eased, convergence-checked moves

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::bezier::ease;
use super::error::{ArmError, Result};
use super::system::System;
use crate::end_effector::EndEffectorDevice;
use crate::messages::{JointPose, TargetPose};

impl System {
    /// Command every joint once, without waiting. `pose.r` is world-relative,
    /// so the end rotation motor gets `r - t1`.
    pub fn jog(&self, pose: &JointPose) -> Result<()> {
        self.ensure_running()?;
        let joints = self.joints();
        joints.t1.move_to(pose.t1).map_err(ArmError::Motion)?;
        joints.r.move_to(pose.r - pose.t1).map_err(ArmError::Motion)?;
        joints.t2.move_to(pose.t2).map_err(ArmError::Motion)?;
        joints.z.move_to(pose.z).map_err(ArmError::Motion)?;
        if let Some(e) = pose.e {
            self.end_effector().move_to(e)?;
        }
        Ok(())
    }

    /// Current pose with `r` as a world bearing
    pub fn current_pose(&self) -> Result<JointPose> {
        let [t1, t2, z, r] = self.positions()?;
        Ok(JointPose {
            t1,
            t2,
            z,
            r: r + t1,
            e: None,
        })
    }

    /// Ease every joint from where it is to `target` over `duration` seconds,
    /// then wait up to `timeout` seconds for all of them to settle within
    /// `epsilon`.
    ///
    /// Blocks for the whole move. A failed command aborts it where it is;
    /// nothing is rolled back.
    pub fn smooth_move(
        &self,
        duration: f64,
        timeout: f64,
        epsilon: f64,
        target: &JointPose,
    ) -> Result<()> {
        self.ensure_running()?;
        let motion = &self.config().motion;
        let start = self.current_pose()?.with_end_effector(target.e);
        info!("Smooth move {:?} -> {:?} over {}s", start, target, duration);

        self.jog(&start)?;
        let began = Instant::now();
        loop {
            let t = began.elapsed().as_secs_f64();
            if t >= duration {
                break;
            }
            let pose = JointPose {
                t1: ease(start.t1, target.t1, duration, t)?,
                t2: ease(start.t2, target.t2, duration, t)?,
                z: ease(start.z, target.z, duration, t)?,
                r: ease(start.r, target.r, duration, t)?,
                e: None,
            };
            self.jog(&pose)?;
            thread::sleep(motion.tick);
        }
        // Land on the end of the curve rather than the last tick before it
        self.jog(&target.with_end_effector(None))?;

        let timeout = Duration::try_from_secs_f64(timeout).unwrap_or_default();
        let settling = Instant::now();
        let mut residual = [f64::NAN; 4];
        while settling.elapsed() < timeout {
            thread::sleep(motion.poll);
            self.ensure_running()?;
            let [t1, t2, z, r] = self.positions()?;
            residual = [
                target.t1 - t1,
                target.t2 - t2,
                target.z - z,
                target.r - r - t1,
            ];
            if residual.iter().all(|d| d.abs() < epsilon) {
                info!("Smooth move settled after {:?}", began.elapsed());
                return Ok(());
            }
            debug!("Residual {:?}", residual);
        }

        warn!("Smooth move timed out, residual {:?}", residual);
        Err(ArmError::MotionTimeout { timeout, residual })
    }

    /// Inverse kinematics for a Cartesian target
    pub fn pose_to_joints(&self, target: &TargetPose) -> JointPose {
        let (t1, t2) = self.geometry().inverse(target.x, target.y);
        JointPose {
            t1,
            t2,
            z: target.z,
            r: target.r,
            e: target.e,
        }
    }

    /// Smooth move to a Cartesian target using the configured timeout and tolerance
    pub fn move_to(&self, target: &TargetPose, duration: f64) -> Result<()> {
        let motion = &self.config().motion;
        self.smooth_move(
            duration,
            motion.timeout,
            motion.epsilon,
            &self.pose_to_joints(target),
        )
    }
}
