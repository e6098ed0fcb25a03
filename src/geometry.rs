//! # Geometry Kernel
//!
//! Closed-form planar helpers used by group perception and the behaviour
//! library. Every function here is pure. Degenerate inputs (coincident
//! circles, zero-length vectors, parallel lines) are detected up front and
//! reported as `None` instead of letting NaN escape into agent velocities.
//!
//! Angles are in degrees throughout, counter-clockwise positive.

use crate::structs::{Line, Point, Vector2D};

const EPSILON: f64 = 1e-9;

/// Determinant of the 2x2 matrix whose rows are `v1` and `v2`.
pub fn det(v1: Vector2D, v2: Vector2D) -> f64 {
    v1.cross(&v2)
}

/// Unsigned angle between two vectors in `[0, 180]`.
///
/// Returns `0` when either vector has zero length.
pub fn angle_between(a: Vector2D, b: Vector2D) -> f64 {
    if a.is_zero() || b.is_zero() {
        return 0.0;
    }
    a.cross(&b).atan2(a.dot(&b)).abs().to_degrees()
}

/// Signed angle from `from` to `to` in `(-180, 180]`, positive when `to`
/// lies counter-clockwise of `from`.
pub fn signed_angle(from: Vector2D, to: Vector2D) -> f64 {
    if from.is_zero() || to.is_zero() {
        return 0.0;
    }
    from.cross(&to).atan2(from.dot(&to)).to_degrees()
}

/// Clockwise angle from `velocity` to `direction`, normalised to `[0, 360)`.
///
/// A bearing below 180 puts the target on the right-hand side.
pub fn bearing_angle(velocity: Vector2D, direction: Vector2D) -> f64 {
    wrap_degrees(-signed_angle(velocity, direction))
}

/// Normalises an angle to `[0, 360)`.
pub fn wrap_degrees(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Rotates `v` counter-clockwise by `degrees`.
pub fn rotate(v: Vector2D, degrees: f64) -> Vector2D {
    let (sin, cos) = degrees.to_radians().sin_cos();
    Vector2D::new(v.x * cos - v.y * sin, v.x * sin + v.y * cos)
}

/// Caps the magnitude of `v` at `max_magnitude`.
pub fn clamp_magnitude(v: Vector2D, max_magnitude: f64) -> Vector2D {
    if max_magnitude <= 0.0 {
        return Vector2D::ZERO;
    }
    let mag_sq = v.magnitude_squared();
    if mag_sq <= max_magnitude * max_magnitude {
        return v;
    }
    v * (max_magnitude / mag_sq.sqrt())
}

/// Closest point to `p` on the segment `[start, end]`.
pub fn closest_point_on_segment(start: Point, end: Point, p: Point) -> Point {
    let dot_a = (p - start).dot(&(end - start));
    if dot_a <= 0.0 {
        return start;
    }
    let dot_b = (p - end).dot(&(start - end));
    if dot_b <= 0.0 {
        return end;
    }
    let slope = dot_a / (dot_a + dot_b);
    start + (end - start) * slope
}

/// Foot of the perpendicular dropped from `p` onto `line`.
pub fn project_onto_line(line: &Line, p: Point) -> Option<Point> {
    let len_sq = line.direction.magnitude_squared();
    if len_sq <= EPSILON * EPSILON {
        return None;
    }
    let t = (p - line.point).dot(&line.direction) / len_sq;
    Some(line.point + line.direction * t)
}

/// Intersection of two infinite lines, `None` when they are parallel.
pub fn line_intersection(l1: &Line, l2: &Line) -> Option<Point> {
    let denom = det(l1.direction, l2.direction);
    let scale = l1.direction.magnitude() * l2.direction.magnitude();
    if scale <= EPSILON || denom.abs() <= EPSILON * scale {
        return None;
    }
    let t = det(l2.point - l1.point, l2.direction) / denom;
    let hit = l1.point + l1.direction * t;
    hit.is_finite().then_some(hit)
}

/// Intersection points of two circles.
///
/// `None` when the circles are apart, one contains the other, or they
/// coincide. Touching circles yield the same point twice.
pub fn circle_circle_intersections(
    c0: Point,
    radius0: f64,
    c1: Point,
    radius1: f64,
) -> Option<(Point, Point)> {
    let dist = c0.distance(&c1);

    if dist <= EPSILON {
        return None;
    }
    if dist > radius0 + radius1 + EPSILON {
        return None;
    }
    if dist < (radius0 - radius1).abs() - EPSILON {
        return None;
    }

    let a = (radius0 * radius0 - radius1 * radius1 + dist * dist) / (2.0 * dist);
    let h = (radius0 * radius0 - a * a).max(0.0).sqrt();

    let mid = c0 + (c1 - c0) * (a / dist);
    let offset = Vector2D::new((c1.y - c0.y) * h / dist, -(c1.x - c0.x) * h / dist);

    Some((mid + offset, mid - offset))
}

/// Tangent points on the circle (`center`, `radius`) as seen from
/// `external`. `None` when `external` lies inside the circle.
pub fn point_circle_tangents(center: Point, radius: f64, external: Point) -> Option<(Point, Point)> {
    let d_squared = center.distance_squared(&external);
    if d_squared < radius * radius {
        return None;
    }
    let tangent_length = (d_squared - radius * radius).sqrt();
    circle_circle_intersections(center, radius, external, tangent_length)
}

/// One outer tangent segment between two circles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TangentSegment {
    /// Touching point on the first circle.
    pub first: Point,
    /// Touching point on the second circle.
    pub second: Point,
}

impl TangentSegment {
    pub fn line(&self) -> Line {
        Line::through(self.first, self.second)
    }
}

/// The two outer tangents between circles (`c1`, `radius1`) and
/// (`c2`, `radius2`).
///
/// The larger circle is shrunk by the smaller radius so the problem becomes
/// tangents from a point, and the resulting lines are pushed back out along
/// their perpendiculars.
pub fn outer_tangents(
    c1: Point,
    radius1: f64,
    c2: Point,
    radius2: f64,
) -> Option<[TangentSegment; 2]> {
    if radius1 > radius2 {
        let [a, b] = outer_tangents(c2, radius2, c1, radius1)?;
        return Some([
            TangentSegment {
                first: a.second,
                second: a.first,
            },
            TangentSegment {
                first: b.second,
                second: b.first,
            },
        ]);
    }

    let (p1, p2) = point_circle_tangents(c2, radius2 - radius1, c1)?;

    let v1 = (p1 - c1).perpendicular();
    let v2 = -(p2 - c1).perpendicular();
    let (len1, len2) = (v1.magnitude(), v2.magnitude());
    if len1 <= EPSILON || len2 <= EPSILON {
        return None;
    }
    let v1 = v1 * (radius1 / len1);
    let v2 = v2 * (radius1 / len2);

    Some([
        TangentSegment {
            first: c1 + v1,
            second: p1 + v1,
        },
        TangentSegment {
            first: c1 + v2,
            second: p2 + v2,
        },
    ])
}

/// Perpendicular distance from `p` to `line`.
pub fn distance_to_line(line: &Line, p: Point) -> Option<f64> {
    project_onto_line(line, p).map(|foot| foot.distance(&p))
}
