// SCARA kinematics between Cartesian (x, y) and dual-polar joint angles (t1, t2)
//
// t1 is the inner link's angle from the x axis, t2 the outer link's angle
// relative to the inner link. Lengths are in the same unit as x and y (cm).

/// Arm segment lengths of the physical arm
pub const L1: f64 = 15.5;
pub const L2: f64 = 15.25;

/// Closest the end effector may be commanded to the base axis
pub const MINIMUM_RADIUS: f64 = 15.0;

/// Targets inside the minimum radius are moved this far past it
const BOUNDARY_MARGIN: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArmGeometry {
    pub l1: f64,
    pub l2: f64,
    pub minimum_radius: f64,
}

impl Default for ArmGeometry {
    fn default() -> Self {
        Self::new(L1, L2, MINIMUM_RADIUS)
    }
}

impl ArmGeometry {
    pub fn new(l1: f64, l2: f64, minimum_radius: f64) -> Self {
        Self {
            l1,
            l2,
            minimum_radius,
        }
    }

    /// Fully extended reach
    pub fn max_radius(&self) -> f64 {
        self.l1 + self.l2
    }

    /// Joint angles to end effector position
    pub fn forward(&self, t1: f64, t2: f64) -> (f64, f64) {
        (
            self.l1 * (-t1).cos() + self.l2 * (-t1 - t2).cos(),
            self.l1 * t1.sin() + self.l2 * (t1 + t2).sin(),
        )
    }

    /// End effector position to joint angles
    ///
    /// Targets within the minimum radius are snapped outward along the same
    /// bearing; targets beyond reach give the fully extended pose pointing at
    /// them. Of the two elbow solutions, `y >= 0` takes a positive `t2` and
    /// `y < 0` a negative one.
    pub fn inverse(&self, x: f64, y: f64) -> (f64, f64) {
        let r = x.hypot(y);
        let a = y.atan2(x);

        if r <= self.minimum_radius {
            let snapped = self.minimum_radius + BOUNDARY_MARGIN;
            return self.inverse(snapped * a.cos(), snapped * a.sin());
        } else if r > self.max_radius() {
            return (a, 0.0);
        }

        let (l1, l2) = (self.l1, self.l2);
        // Clamped so rounding at full extension cannot leave acos's domain
        let mut acos_value = ((r * r + l1 * l1 - l2 * l2) / (2.0 * l1 * r))
            .clamp(-1.0, 1.0)
            .acos();
        let mut t2 = std::f64::consts::PI
            - ((l1 * l1 + l2 * l2 - r * r) / (2.0 * l1 * l2))
                .clamp(-1.0, 1.0)
                .acos();

        if y >= 0.0 {
            acos_value = -acos_value;
        } else {
            t2 = -t2;
        }

        (a + acos_value, t2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn assert_close(actual: (f64, f64), expected: (f64, f64), tolerance: f64) {
        assert!(
            (actual.0 - expected.0).abs() < tolerance && (actual.1 - expected.1).abs() < tolerance,
            "{:?} != {:?}",
            actual,
            expected
        );
    }

    #[test]
    fn test_forward_straight_out() {
        let arm = ArmGeometry::default();
        assert_close(arm.forward(0.0, 0.0), (30.75, 0.0), 1e-12);
        assert_close(arm.forward(PI / 2.0, 0.0), (0.0, 30.75), 1e-12);
    }

    #[test]
    fn test_inverse_example_point() {
        let arm = ArmGeometry::new(15.5, 15.25, 15.0);
        let (t1, t2) = arm.inverse(20.0, 0.0);
        println!("inverse(20, 0) = ({}, {})", t1, t2);
        assert_close(arm.forward(t1, t2), (20.0, 0.0), 1e-6);
    }

    #[test]
    fn test_forward_of_inverse_round_trip() {
        let arm = ArmGeometry::default();
        for i in 0..36 {
            let bearing = i as f64 * PI / 18.0;
            for r in [15.2, 18.0, 22.5, 27.0, 30.5] {
                let (x, y) = (r * bearing.cos(), r * bearing.sin());
                let (t1, t2) = arm.inverse(x, y);
                assert_close(arm.forward(t1, t2), (x, y), 1e-6);
            }
        }
    }

    #[test]
    fn test_elbow_follows_sign_of_y() {
        let arm = ArmGeometry::default();
        let (_, upper) = arm.inverse(18.0, 5.0);
        let (_, lower) = arm.inverse(18.0, -5.0);
        assert!(upper > 0.0);
        assert!(lower < 0.0);
        assert!((upper + lower).abs() < 1e-12);
    }

    #[test]
    fn test_inside_minimum_radius_snaps_to_boundary() {
        let arm = ArmGeometry::default();
        for (x, y) in [(3.0, 4.0), (-10.0, 2.0), (0.0, -15.0), (15.0, 0.0)] {
            let a = f64::atan2(y, x);
            let snapped = arm.inverse(15.1 * a.cos(), 15.1 * a.sin());
            assert_eq!(arm.inverse(x, y), snapped);
        }
    }

    #[test]
    fn test_origin_is_handled() {
        let arm = ArmGeometry::default();
        let (t1, t2) = arm.inverse(0.0, 0.0);
        assert_close(arm.forward(t1, t2), (15.1, 0.0), 1e-6);
    }

    #[test]
    fn test_unreachable_points_extend_toward_target() {
        let arm = ArmGeometry::default();
        for (x, y) in [(40.0, 0.0), (-20.0, 30.0), (0.0, -31.0)] {
            assert_eq!(arm.inverse(x, y), (f64::atan2(y, x), 0.0));
        }
    }
}
