//! Lattice geometry: positions, rectangles, and the eight duplication
//! directions.

use crate::error::SimulationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Integer position on the tissue lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: u32,
    pub y: u32,
}

impl Position {
    /// Construct a new position.
    #[must_use]
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Offset this position by a lattice delta, returning `None` when the
    /// result would leave the first quadrant.
    #[must_use]
    pub fn offset(self, dx: i64, dy: i64) -> Option<Self> {
        let x = i64::from(self.x) + dx;
        let y = i64::from(self.y) + dy;
        if x < 0 || y < 0 || x > i64::from(u32::MAX) || y > i64::from(u32::MAX) {
            return None;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let moved = Self::new(x as u32, y as u32);
        Some(moved)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Inclusive axis-aligned rectangle with `lower <= upper` on both axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rectangle {
    lower: Position,
    upper: Position,
}

impl Rectangle {
    /// Build a rectangle, rejecting corners with `lower > upper`.
    pub fn new(lower: Position, upper: Position) -> Result<Self, SimulationError> {
        if lower.x > upper.x || lower.y > upper.y {
            return Err(SimulationError::precondition(format!(
                "rectangle lower corner {lower} exceeds upper corner {upper}"
            )));
        }
        Ok(Self { lower, upper })
    }

    /// The lower (south-west) corner.
    #[must_use]
    pub const fn lower(&self) -> Position {
        self.lower
    }

    /// The upper (north-east) corner.
    #[must_use]
    pub const fn upper(&self) -> Position {
        self.upper
    }

    /// Width in slots (inclusive corners).
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.upper.x - self.lower.x + 1
    }

    /// Height in slots (inclusive corners).
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.upper.y - self.lower.y + 1
    }

    /// Returns true if `pos` lies inside the rectangle.
    #[must_use]
    pub fn contains(&self, pos: Position) -> bool {
        pos.x >= self.lower.x && pos.x <= self.upper.x && pos.y >= self.lower.y && pos.y <= self.upper.y
    }

    /// Intersect with another rectangle, `None` when disjoint.
    #[must_use]
    pub fn intersect(&self, other: &Rectangle) -> Option<Rectangle> {
        let lower = Position::new(self.lower.x.max(other.lower.x), self.lower.y.max(other.lower.y));
        let upper = Position::new(self.upper.x.min(other.upper.x), self.upper.y.min(other.upper.y));
        if lower.x > upper.x || lower.y > upper.y {
            return None;
        }
        Some(Rectangle { lower, upper })
    }

    /// Iterate positions in row-major order (rows bottom-up, columns
    /// left-to-right within a row). Deterministic ordering is load-bearing
    /// for reproducible sampling.
    pub fn positions(&self) -> impl Iterator<Item = Position> + '_ {
        let (lx, ux, ly, uy) = (self.lower.x, self.upper.x, self.lower.y, self.upper.y);
        (ly..=uy).flat_map(move |y| (lx..=ux).map(move |x| Position::new(x, y)))
    }
}

impl fmt::Display for Rectangle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.lower, self.upper)
    }
}

/// The eight lattice directions a duplication ray can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    NorthWest,
}

impl Direction {
    /// All directions, in a fixed order used for uniform draws.
    pub const ALL: [Direction; 8] = [
        Direction::North,
        Direction::NorthEast,
        Direction::East,
        Direction::SouthEast,
        Direction::South,
        Direction::SouthWest,
        Direction::West,
        Direction::NorthWest,
    ];

    /// The unit lattice offset of this direction.
    #[must_use]
    pub const fn delta(self) -> (i64, i64) {
        match self {
            Direction::North => (0, 1),
            Direction::NorthEast => (1, 1),
            Direction::East => (1, 0),
            Direction::SouthEast => (1, -1),
            Direction::South => (0, -1),
            Direction::SouthWest => (-1, -1),
            Direction::West => (-1, 0),
            Direction::NorthWest => (-1, 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rectangle_rejects_inverted_corners() {
        let err = Rectangle::new(Position::new(5, 1), Position::new(4, 9));
        assert!(matches!(err, Err(SimulationError::PreconditionViolation(_))));
        let err = Rectangle::new(Position::new(0, 3), Position::new(4, 2));
        assert!(matches!(err, Err(SimulationError::PreconditionViolation(_))));
    }

    #[test]
    fn positions_iterate_row_major() {
        let rect = Rectangle::new(Position::new(1, 1), Position::new(2, 2)).unwrap();
        let order: Vec<Position> = rect.positions().collect();
        assert_eq!(
            order,
            vec![
                Position::new(1, 1),
                Position::new(2, 1),
                Position::new(1, 2),
                Position::new(2, 2),
            ]
        );
        assert_eq!(rect.width(), 2);
        assert_eq!(rect.height(), 2);
    }

    #[test]
    fn intersection_clips_and_detects_disjoint() {
        let a = Rectangle::new(Position::new(0, 0), Position::new(10, 10)).unwrap();
        let b = Rectangle::new(Position::new(8, 9), Position::new(20, 20)).unwrap();
        let clipped = a.intersect(&b).unwrap();
        assert_eq!(clipped.lower(), Position::new(8, 9));
        assert_eq!(clipped.upper(), Position::new(10, 10));

        let far = Rectangle::new(Position::new(30, 30), Position::new(31, 31)).unwrap();
        assert!(a.intersect(&far).is_none());
    }

    #[test]
    fn offsets_stay_in_quadrant() {
        let origin = Position::new(0, 0);
        assert_eq!(origin.offset(-1, 0), None);
        assert_eq!(origin.offset(1, 1), Some(Position::new(1, 1)));
        let deltas: Vec<(i64, i64)> = Direction::ALL.iter().map(|d| d.delta()).collect();
        assert_eq!(deltas.len(), 8);
        assert!(deltas.iter().all(|&(dx, dy)| (dx, dy) != (0, 0)));
    }
}
