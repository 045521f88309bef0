//! The tissue grid: a fixed width×height array of cell slots.

use crate::cell::CellId;
use crate::error::SimulationError;
use crate::geometry::{Position, Rectangle};
use crate::species::SpeciesId;
use serde::{Deserialize, Serialize};

/// Occupant of one tissue slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TissueCell {
    pub id: CellId,
    pub species: SpeciesId,
}

/// Fixed-size 2D grid of slots; an empty slot is wild-type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tissue {
    name: String,
    width: u32,
    height: u32,
    slots: Vec<Option<TissueCell>>,
    occupied: u64,
}

impl Tissue {
    /// Allocate a tissue of `width × height` wild-type slots.
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Result<Self, SimulationError> {
        if width == 0 || height == 0 {
            return Err(SimulationError::precondition("tissue dimensions must be non-zero"));
        }
        Ok(Self {
            name: name.into(),
            width,
            height,
            slots: vec![None; (width as usize) * (height as usize)],
            occupied: 0,
        })
    }

    /// Display name of the tissue.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `(width, height)` of the grid.
    #[must_use]
    pub const fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Number of non-wild-type slots.
    #[must_use]
    pub const fn num_of_cells(&self) -> u64 {
        self.occupied
    }

    /// Returns true if `pos` lies inside the grid.
    #[must_use]
    pub const fn is_valid(&self, pos: Position) -> bool {
        pos.x < self.width && pos.y < self.height
    }

    #[inline]
    fn offset(&self, pos: Position) -> usize {
        (pos.y as usize) * (self.width as usize) + (pos.x as usize)
    }

    /// The cell at `pos`, `None` when wild-type or out of bounds.
    #[must_use]
    pub fn cell_at(&self, pos: Position) -> Option<TissueCell> {
        if !self.is_valid(pos) {
            return None;
        }
        self.slots[self.offset(pos)]
    }

    /// Place `cell` at `pos`; the slot must be inside the grid and
    /// wild-type.
    pub fn place(&mut self, cell: TissueCell, pos: Position) -> Result<(), SimulationError> {
        if !self.is_valid(pos) {
            return Err(SimulationError::precondition(format!(
                "position {pos} lies outside the {}x{} tissue",
                self.width, self.height
            )));
        }
        let slot = self.offset(pos);
        if self.slots[slot].is_some() {
            return Err(SimulationError::precondition(format!(
                "position {pos} is already occupied"
            )));
        }
        self.slots[slot] = Some(cell);
        self.occupied += 1;
        Ok(())
    }

    /// Clear `pos` back to wild-type, returning the removed cell.
    pub fn clear(&mut self, pos: Position) -> Option<TissueCell> {
        if !self.is_valid(pos) {
            return None;
        }
        let slot = self.offset(pos);
        let removed = self.slots[slot].take();
        if removed.is_some() {
            self.occupied -= 1;
        }
        removed
    }

    /// Rewrite the species of the cell at `pos` (epigenetic switch).
    pub fn replace_species(&mut self, pos: Position, species: SpeciesId) -> Result<(), SimulationError> {
        if !self.is_valid(pos) {
            return Err(SimulationError::internal(format!("switch at invalid position {pos}")));
        }
        let slot = self.offset(pos);
        match &mut self.slots[slot] {
            Some(cell) => {
                cell.species = species;
                Ok(())
            }
            None => Err(SimulationError::internal(format!("switch at wild-type position {pos}"))),
        }
    }

    /// Reallocate the grid; permitted only while no cell is placed.
    pub fn resize(&mut self, name: Option<&str>, width: u32, height: u32) -> Result<(), SimulationError> {
        if self.occupied > 0 {
            return Err(SimulationError::precondition(
                "the tissue cannot be resized after cells have been placed",
            ));
        }
        if width == 0 || height == 0 {
            return Err(SimulationError::precondition("tissue dimensions must be non-zero"));
        }
        if let Some(name) = name {
            self.name = name.to_string();
        }
        self.width = width;
        self.height = height;
        self.slots = vec![None; (width as usize) * (height as usize)];
        Ok(())
    }

    /// The rectangle spanning the whole grid.
    #[must_use]
    pub fn frame(&self) -> Rectangle {
        Rectangle::new(
            Position::new(0, 0),
            Position::new(self.width - 1, self.height - 1),
        )
        .expect("grid dimensions are non-zero")
    }

    /// Clip `rect` to the grid, `None` when fully outside.
    #[must_use]
    pub fn clip(&self, rect: &Rectangle) -> Option<Rectangle> {
        rect.intersect(&self.frame())
    }

    /// Returns true if the cell at `pos` has at least one wild-type
    /// 8-neighbour inside the grid.
    #[must_use]
    pub fn is_border(&self, pos: Position) -> bool {
        crate::geometry::Direction::ALL.iter().any(|direction| {
            let (dx, dy) = direction.delta();
            pos.offset(dx, dy)
                .is_some_and(|neighbour| self.is_valid(neighbour) && self.cell_at(neighbour).is_none())
        })
    }

    /// Bounding box of all non-wild-type cells, `None` on empty tissue.
    #[must_use]
    pub fn bounding_box(&self) -> Option<Rectangle> {
        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for pos in self.frame().positions() {
            if self.slots[self.offset(pos)].is_some() {
                bounds = Some(match bounds {
                    None => (pos.x, pos.x, pos.y, pos.y),
                    Some((min_x, max_x, min_y, max_y)) => (
                        min_x.min(pos.x),
                        max_x.max(pos.x),
                        min_y.min(pos.y),
                        max_y.max(pos.y),
                    ),
                });
            }
        }
        bounds.map(|(min_x, max_x, min_y, max_y)| {
            Rectangle::new(Position::new(min_x, min_y), Position::new(max_x, max_y))
                .expect("bounds are ordered")
        })
    }
}
