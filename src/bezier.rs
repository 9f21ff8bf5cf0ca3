//! Quadratic Bézier arcs between zone centroids and the arrow glyphs that
//! mark their direction.

use geo_types::{Coord, LineString};

pub const DEFAULT_SAMPLES: usize = 50;

/// Curve parameters at which direction arrows are drawn.
pub const ARROW_POSITIONS: [f64; 3] = [0.4, 0.6, 0.8];

/// A direction marker on a sampled curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArrowMarker {
    pub position: Coord<f64>,
    /// Counter-clockwise from the +x axis, in degrees.
    pub angle_deg: f64,
}

/// Control point of the arc from `start` to `end`: the chord midpoint pushed
/// sideways by `height_factor` times the chord rotated a quarter turn.
pub fn control_point(start: Coord<f64>, end: Coord<f64>, height_factor: f64) -> Coord<f64> {
    let mid = Coord {
        x: (start.x + end.x) / 2.0,
        y: (start.y + end.y) / 2.0,
    };
    let d = end - start;
    Coord {
        x: mid.x - d.y * height_factor,
        y: mid.y + d.x * height_factor,
    }
}

/// Samples the arc at `samples` evenly spaced parameters in `[0, 1]`.
///
/// The first and last samples are exactly `start` and `end`. Fewer than two
/// samples are raised to two.
pub fn bezier_path(
    start: Coord<f64>,
    end: Coord<f64>,
    height_factor: f64,
    samples: usize,
) -> LineString<f64> {
    let samples = samples.max(2);
    let control = control_point(start, end, height_factor);
    let last = (samples - 1) as f64;

    (0..samples)
        .map(|i| {
            let t = i as f64 / last;
            let u = 1.0 - t;
            Coord {
                x: u * u * start.x + 2.0 * u * t * control.x + t * t * end.x,
                y: u * u * start.y + 2.0 * u * t * control.y + t * t * end.y,
            }
        })
        .collect()
}

/// Places an arrow at each parameter in `positions`, rotated along the local
/// tangent (central difference of the neighbouring samples). Positions that
/// land on either end of the path are skipped.
pub fn arrow_markers(path: &LineString<f64>, positions: &[f64]) -> Vec<ArrowMarker> {
    let pts = &path.0;
    if pts.len() < 3 {
        return Vec::new();
    }

    positions
        .iter()
        .filter_map(|&pos| {
            let idx = (pos * (pts.len() - 1) as f64).floor() as usize;
            if idx == 0 || idx >= pts.len() - 1 {
                return None;
            }
            let d = pts[idx + 1] - pts[idx - 1];
            Some(ArrowMarker {
                position: pts[idx],
                angle_deg: d.y.atan2(d.x).to_degrees(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn c(x: f64, y: f64) -> Coord<f64> {
        Coord { x, y }
    }

    #[test]
    fn test_endpoints_match_centroids() {
        let start = c(-73.98, 40.75);
        let end = c(-73.87, 40.77);
        for samples in [50, 100] {
            let path = bezier_path(start, end, 0.2, samples);
            assert_eq!(path.0.len(), samples);
            let first = path.0[0];
            let last = path.0[samples - 1];
            assert_abs_diff_eq!(first.x, start.x, epsilon = 1e-12);
            assert_abs_diff_eq!(first.y, start.y, epsilon = 1e-12);
            assert_abs_diff_eq!(last.x, end.x, epsilon = 1e-12);
            assert_abs_diff_eq!(last.y, end.y, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_control_point_is_perpendicular_offset() {
        let cp = control_point(c(0.0, 0.0), c(10.0, 0.0), 0.1);
        assert_relative_eq!(cp.x, 5.0);
        assert_relative_eq!(cp.y, 1.0);

        let cp = control_point(c(0.0, 0.0), c(0.0, 10.0), 0.2);
        assert_relative_eq!(cp.x, -2.0);
        assert_relative_eq!(cp.y, 5.0);
    }

    #[test]
    fn test_curve_midpoint_halfway_to_control() {
        let path = bezier_path(c(0.0, 0.0), c(10.0, 0.0), 0.1, 3);
        assert_relative_eq!(path.0[1].x, 5.0);
        assert_relative_eq!(path.0[1].y, 0.5);
    }

    #[test]
    fn test_reverse_arc_bulges_other_side() {
        let forward = bezier_path(c(0.0, 0.0), c(10.0, 0.0), 0.2, 51);
        let reverse = bezier_path(c(10.0, 0.0), c(0.0, 0.0), 0.2, 51);
        assert!(forward.0[25].y > 0.0);
        assert!(reverse.0[25].y < 0.0);
    }

    #[test]
    fn test_arrow_markers_follow_tangent() {
        let path = bezier_path(c(0.0, 0.0), c(10.0, 0.0), 0.0, 50);
        let arrows = arrow_markers(&path, &ARROW_POSITIONS);
        assert_eq!(arrows.len(), 3);
        for a in &arrows {
            assert_abs_diff_eq!(a.angle_deg, 0.0, epsilon = 1e-9);
        }
        // floor(0.4 * 49) = 19
        assert_eq!(arrows[0].position, path.0[19]);
        assert_eq!(arrows[2].position, path.0[39]);
    }

    #[test]
    fn test_arrow_angle_points_along_travel() {
        let path = bezier_path(c(0.0, 10.0), c(0.0, 0.0), 0.0, 50);
        let arrows = arrow_markers(&path, &[0.5]);
        assert_abs_diff_eq!(arrows[0].angle_deg, -90.0, epsilon = 1e-9);
    }

    #[test]
    fn test_arrow_markers_skip_endpoints() {
        let path = bezier_path(c(0.0, 0.0), c(1.0, 1.0), 0.1, 50);
        assert!(arrow_markers(&path, &[0.0, 1.0]).is_empty());
        let short = bezier_path(c(0.0, 0.0), c(1.0, 1.0), 0.1, 2);
        assert!(arrow_markers(&short, &ARROW_POSITIONS).is_empty());
    }
}
