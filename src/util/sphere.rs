//! Spherical-surface kinematics for tanks and projectiles.
//!
//! Positions are angles on a sphere of radius R: `theta` is longitude in
//! [0, 2pi), `phi` is colatitude in [0, pi]. Headings are compass bearings in
//! radians: 0 = north (decreasing phi), pi/2 = east (increasing theta).
//!
//! Local tangent-frame offsets follow the flat-approximation used by the
//! collision tests: east = d_theta * sin(phi) * R, north = d_phi * R.

use serde::{Deserialize, Serialize};
use std::f32::consts::{PI, TAU};

use crate::util::vec2::Vec2;

/// Colatitude clamp so headings stay well-defined at the poles
const POLE_EPSILON: f32 = 1e-3;

/// A position on the planet surface
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SurfacePos {
    /// Longitude in [0, 2pi)
    pub theta: f32,
    /// Colatitude in [0, pi]
    pub phi: f32,
}

impl SurfacePos {
    pub fn new(theta: f32, phi: f32) -> Self {
        Self {
            theta: wrap_theta(theta),
            phi: clamp_phi(phi),
        }
    }

    /// Unit vector in world space (y-up): used for noise sampling and
    /// chord-length math
    pub fn to_unit(&self) -> [f32; 3] {
        let (st, ct) = (self.theta.sin(), self.theta.cos());
        let (sp, cp) = (self.phi.sin(), self.phi.cos());
        [sp * ct, cp, sp * st]
    }

    pub fn from_unit(v: [f32; 3]) -> Self {
        let phi = v[1].clamp(-1.0, 1.0).acos();
        let theta = v[2].atan2(v[0]);
        Self::new(theta, phi)
    }
}

/// Wrap longitude into [0, 2pi)
#[inline]
pub fn wrap_theta(theta: f32) -> f32 {
    let t = theta % TAU;
    if t < 0.0 {
        t + TAU
    } else {
        t
    }
}

/// Clamp colatitude away from the exact poles
#[inline]
pub fn clamp_phi(phi: f32) -> f32 {
    phi.clamp(POLE_EPSILON, PI - POLE_EPSILON)
}

/// Shortest signed longitude delta from `a` to `b`, in [-pi, pi]
#[inline]
pub fn theta_delta(a: f32, b: f32) -> f32 {
    let mut d = (b - a) % TAU;
    if d > PI {
        d -= TAU;
    } else if d < -PI {
        d += TAU;
    }
    d
}

/// Advance a position along a bearing by `dist` surface units on a sphere of
/// radius `r`. Flat tangent-step: accurate for the per-tick distances the
/// simulation uses (well under 1% of the planet circumference).
pub fn step(pos: SurfacePos, heading: f32, dist: f32, r: f32) -> SurfacePos {
    let north = heading.cos() * dist;
    let east = heading.sin() * dist;

    let phi = clamp_phi(pos.phi - north / r);
    // Use the midpoint colatitude so east steps near the poles do not
    // overshoot in longitude
    let sin_phi = ((pos.phi + phi) * 0.5).sin().max(POLE_EPSILON);
    let theta = wrap_theta(pos.theta + east / (r * sin_phi));

    SurfacePos { theta, phi }
}

/// Offset of `to` relative to `from` in the local tangent frame of `from`:
/// x = east, y = north, both in world units.
pub fn local_offset(from: SurfacePos, to: SurfacePos, r: f32) -> Vec2 {
    let east = theta_delta(from.theta, to.theta) * from.phi.sin() * r;
    let north = (from.phi - to.phi) * r;
    Vec2::new(east, north)
}

/// Compass bearing from `from` toward `to`
pub fn heading_to(from: SurfacePos, to: SurfacePos) -> f32 {
    let off = local_offset(from, to, 1.0);
    off.x.atan2(off.y)
}

/// Great-circle surface distance between two positions
pub fn surface_distance(a: SurfacePos, b: SurfacePos, r: f32) -> f32 {
    let dphi = a.phi - b.phi;
    let dtheta = theta_delta(a.theta, b.theta);
    // Haversine with colatitudes (sin phi plays the role of cos latitude)
    let h = (dphi * 0.5).sin().powi(2)
        + a.phi.sin() * b.phi.sin() * (dtheta * 0.5).sin().powi(2);
    2.0 * h.sqrt().clamp(-1.0, 1.0).asin() * r
}

/// Normalize an angle into [-pi, pi] (turret and heading comparisons)
#[inline]
pub fn wrap_angle(a: f32) -> f32 {
    let mut w = a % TAU;
    if w > PI {
        w -= TAU;
    } else if w < -PI {
        w += TAU;
    }
    w
}

#[cfg(test)]
mod tests {
    use super::*;

    const R: f32 = 200.0;

    #[test]
    fn test_wrap_theta() {
        assert!((wrap_theta(-0.1) - (TAU - 0.1)).abs() < 1e-6);
        assert!((wrap_theta(TAU + 0.5) - 0.5).abs() < 1e-6);
        assert_eq!(wrap_theta(1.0), 1.0);
    }

    #[test]
    fn test_theta_delta_wraps_short_way() {
        let d = theta_delta(0.1, TAU - 0.1);
        assert!((d + 0.2).abs() < 1e-5, "expected -0.2, got {}", d);
    }

    #[test]
    fn test_step_north_decreases_phi() {
        let p = SurfacePos::new(1.0, PI / 2.0);
        let q = step(p, 0.0, 10.0, R);
        assert!(q.phi < p.phi);
        assert!((q.theta - p.theta).abs() < 1e-5);
    }

    #[test]
    fn test_step_east_at_equator() {
        let p = SurfacePos::new(0.0, PI / 2.0);
        let q = step(p, PI / 2.0, 10.0, R);
        assert!((q.phi - p.phi).abs() < 1e-5);
        assert!((theta_delta(p.theta, q.theta) - 10.0 / R).abs() < 1e-5);
    }

    #[test]
    fn test_step_never_crosses_pole() {
        let p = SurfacePos::new(0.0, 0.01);
        let q = step(p, 0.0, 50.0, R);
        assert!(q.phi >= POLE_EPSILON);
    }

    #[test]
    fn test_local_offset_east() {
        let from = SurfacePos::new(1.0, PI / 2.0);
        let to = SurfacePos::new(1.0 + 10.0 / R, PI / 2.0);
        let off = local_offset(from, to, R);
        assert!((off.x - 10.0).abs() < 1e-3);
        assert!(off.y.abs() < 1e-3);
    }

    #[test]
    fn test_local_offset_wraps_seam() {
        let from = SurfacePos::new(0.05, PI / 2.0);
        let to = SurfacePos::new(TAU - 0.05, PI / 2.0);
        let off = local_offset(from, to, R);
        // Crossing the seam west, not the long way around
        assert!((off.x + 0.1 * R).abs() < 1e-2);
    }

    #[test]
    fn test_heading_to_cardinals() {
        let from = SurfacePos::new(1.0, PI / 2.0);
        let north = SurfacePos::new(1.0, PI / 2.0 - 0.05);
        let east = SurfacePos::new(1.05, PI / 2.0);
        assert!(heading_to(from, north).abs() < 1e-3);
        assert!((heading_to(from, east) - PI / 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_surface_distance_quarter_circle() {
        let a = SurfacePos::new(0.0, PI / 2.0);
        let b = SurfacePos::new(PI / 2.0, PI / 2.0);
        let d = surface_distance(a, b, R);
        assert!((d - (PI / 2.0) * R).abs() < 0.5);
    }

    #[test]
    fn test_step_matches_distance() {
        let p = SurfacePos::new(2.0, 1.2);
        let q = step(p, 0.7, 5.0, R);
        let d = surface_distance(p, q, R);
        assert!((d - 5.0).abs() < 0.05, "stepped {} expected 5.0", d);
    }

    #[test]
    fn test_unit_roundtrip() {
        let p = SurfacePos::new(2.5, 0.8);
        let q = SurfacePos::from_unit(p.to_unit());
        assert!((p.theta - q.theta).abs() < 1e-4);
        assert!((p.phi - q.phi).abs() < 1e-4);
    }
}
