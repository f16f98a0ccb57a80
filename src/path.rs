//! Piecewise linear search paths inside the `(s, c)` box.
//!
//! A [`BoxPath`] starts at a point `x`, follows `direction` until it leaves the
//! box `[x_min, x_max]` at parameter `t_out`, then runs straight to `end_point`,
//! which it reaches at `t_max = t_out + 1`. Evaluating a residual along the path
//! turns a two-dimensional line search into a scalar bracketing problem whose
//! iterates never leave the admissible region.

use crate::properties::FluidProperties;
use crate::residual::{CellResidual, Equation};

/// Two-segment path parametrised by `t` in `[0, t_max]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxPath {
    origin: [f64; 2],
    direction: [f64; 2],
    end_point: [f64; 2],
    x_out: [f64; 2],
    t_out: f64,
    t_max: f64,
}

impl BoxPath {
    /// Builds the path from `origin` towards `end_point`.
    ///
    /// `direction` is reversed when it points away from `end_point`. A zero
    /// direction is replaced by `end_point - origin`.
    pub fn new(
        origin: [f64; 2],
        direction: [f64; 2],
        end_point: [f64; 2],
        x_min: [f64; 2],
        x_max: [f64; 2],
    ) -> Self {
        let mut direction = direction;
        if direction == [0.0, 0.0] {
            direction = [end_point[0] - origin[0], end_point[1] - origin[1]];
        }
        let towards_end =
            (end_point[0] - origin[0]) * direction[0] + (end_point[1] - origin[1]) * direction[1];
        if towards_end < 0.0 {
            direction = [-direction[0], -direction[1]];
        }

        let mut t_out = f64::INFINITY;
        for axis in 0..2 {
            let d = direction[axis];
            if d > 0.0 {
                t_out = t_out.min((x_max[axis] - origin[axis]) / d);
            } else if d < 0.0 {
                t_out = t_out.min((x_min[axis] - origin[axis]) / d);
            }
        }
        // Zero or non-finite direction: the path degenerates to the straight segment
        if !t_out.is_finite() {
            t_out = 0.0;
        }
        let t_out = t_out.max(0.0);
        let x_out = [origin[0] + t_out * direction[0], origin[1] + t_out * direction[1]];

        BoxPath { origin, direction, end_point, x_out, t_out, t_max: t_out + 1.0 }
    }

    /// Parameter at which the first segment leaves the box.
    pub fn t_out(&self) -> f64 {
        self.t_out
    }

    /// End of the parameter interval.
    pub fn t_max(&self) -> f64 {
        self.t_max
    }

    /// Direction of the straight segment, pointing towards the end point.
    pub fn direction(&self) -> [f64; 2] {
        self.direction
    }

    /// Drops the second segment, so the path ends where it leaves the box.
    pub fn truncate_at_exit(&mut self) {
        self.t_max = self.t_out;
    }

    /// Point on the path at parameter `t`.
    pub fn point(&self, t: f64) -> [f64; 2] {
        if t <= self.t_out {
            return [self.origin[0] + t * self.direction[0], self.origin[1] + t * self.direction[1]];
        }
        let span = self.t_max - self.t_out;
        if span <= 0.0 {
            return self.x_out;
        }
        let w_out = (self.t_max - t) / span;
        let w_end = (t - self.t_out) / span;
        [
            w_out * self.x_out[0] + w_end * self.end_point[0],
            w_out * self.x_out[1] + w_end * self.end_point[1],
        ]
    }
}

/// One of the cell residuals evaluated along a [`BoxPath`].
pub struct PathResidual<'r, 'a, F: FluidProperties + ?Sized> {
    residual: &'r CellResidual<'a, F>,
    path: BoxPath,
    equation: Equation,
}

impl<'r, 'a, F: FluidProperties + ?Sized> PathResidual<'r, 'a, F> {
    /// Restricts `equation` of `residual` to `path`.
    pub fn new(residual: &'r CellResidual<'a, F>, path: BoxPath, equation: Equation) -> Self {
        PathResidual { residual, path, equation }
    }

    /// Path being searched.
    pub fn path(&self) -> &BoxPath {
        &self.path
    }

    /// Mutable access to the path, for truncation.
    pub fn path_mut(&mut self) -> &mut BoxPath {
        &mut self.path
    }

    /// Equation evaluated along the path.
    pub fn equation(&self) -> Equation {
        self.equation
    }

    /// Residual of the selected equation at `path.point(t)`.
    pub fn eval(&self, t: f64) -> f64 {
        let [s, c] = self.path.point(t);
        match self.equation {
            Equation::Saturation => self.residual.residual_s(s, c),
            Equation::Concentration => self.residual.residual_c(s, c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const UNIT_MIN: [f64; 2] = [0.0, 0.0];
    const UNIT_MAX: [f64; 2] = [1.0, 1.0];

    #[test]
    fn test_exit_and_second_segment() {
        let path = BoxPath::new([0.5, 0.5], [1.0, 0.0], [1.0, 1.0], UNIT_MIN, UNIT_MAX);
        assert_relative_eq!(path.t_out(), 0.5);
        assert_relative_eq!(path.t_max(), 1.5);
        assert_eq!(path.point(0.0), [0.5, 0.5]);
        assert_eq!(path.point(0.5), [1.0, 0.5]);
        let mid = path.point(1.0);
        assert_relative_eq!(mid[0], 1.0);
        assert_relative_eq!(mid[1], 0.75);
        assert_eq!(path.point(1.5), [1.0, 1.0]);
    }

    #[test]
    fn test_direction_flipped_towards_end_point() {
        let path = BoxPath::new([0.5, 0.5], [-1.0, 0.0], [1.0, 1.0], UNIT_MIN, UNIT_MAX);
        assert_eq!(path.direction(), [1.0, 0.0]);
        assert_relative_eq!(path.t_out(), 0.5);
    }

    #[test]
    fn test_nearest_edge_wins() {
        let path = BoxPath::new([0.2, 0.9], [1.0, 1.0], [1.0, 1.0], UNIT_MIN, UNIT_MAX);
        assert_relative_eq!(path.t_out(), 0.1, epsilon = 1e-15);
        let exit = path.point(path.t_out());
        assert_relative_eq!(exit[0], 0.3, epsilon = 1e-15);
        assert_relative_eq!(exit[1], 1.0, epsilon = 1e-15);
    }

    #[test]
    fn test_diagonal_to_corner_reaches_corner_at_exit() {
        let origin = [0.3, 0.6];
        let end = [0.9, 0.0];
        let path = BoxPath::new(
            origin,
            [end[0] - origin[0], end[1] - origin[1]],
            end,
            [0.1, 0.0],
            [0.9, 2.0],
        );
        assert_relative_eq!(path.t_out(), 1.0, epsilon = 1e-14);
        let at_exit = path.point(path.t_out());
        assert_relative_eq!(at_exit[0], 0.9, epsilon = 1e-14);
        assert_relative_eq!(at_exit[1], 0.0, epsilon = 1e-14);
    }

    #[test]
    fn test_zero_direction_falls_back_to_end_point() {
        let path = BoxPath::new([0.25, 0.25], [0.0, 0.0], [0.0, 1.0], UNIT_MIN, UNIT_MAX);
        assert_eq!(path.direction(), [-0.25, 0.75]);
        assert_relative_eq!(path.t_out(), 1.0);
    }

    #[test]
    fn test_truncate_at_exit() {
        let mut path = BoxPath::new([0.5, 0.5], [0.0, 1.0], [1.0, 1.0], UNIT_MIN, UNIT_MAX);
        path.truncate_at_exit();
        assert_eq!(path.t_max(), path.t_out());
        assert_eq!(path.point(path.t_max()), [0.5, 1.0]);
    }

    #[test]
    fn test_path_stays_inside_box() {
        let path = BoxPath::new([0.4, 0.7], [0.3, -0.8], [0.0, 0.0], UNIT_MIN, UNIT_MAX);
        for i in 0..=20 {
            let t = path.t_max() * i as f64 / 20.0;
            let [s, c] = path.point(t);
            assert!((-1e-12..=1.0 + 1e-12).contains(&s));
            assert!((-1e-12..=1.0 + 1e-12).contains(&c));
        }
    }
}
