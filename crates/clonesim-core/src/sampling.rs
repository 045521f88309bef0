//! Tissue samples and the rectangle search used to plan them.

use crate::cell::CellId;
use crate::error::SimulationError;
use crate::geometry::{Position, Rectangle};
use crate::species::SpeciesId;
use crate::tissue::Tissue;
use serde::{Deserialize, Serialize};

/// A named, timestamped record of a drained rectangular region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TissueSample {
    pub name: String,
    pub time: f64,
    /// The rectangle as requested, before clipping to the tissue.
    pub region: Rectangle,
    /// Drained cells in row-major order.
    pub cell_ids: Vec<CellId>,
}

/// Walk the tiles of a `grid_width × grid_height` grid in an outward
/// spiral from the centre tile.
///
/// Tiles at Chebyshev distance `r` from the centre are visited ring by
/// ring; within a ring the perimeter is walked once around starting at
/// the ring's lower-left corner. The order is fully deterministic.
pub(crate) fn spiral_tiles(grid_width: u32, grid_height: u32) -> Vec<(u32, u32)> {
    if grid_width == 0 || grid_height == 0 {
        return Vec::new();
    }
    let centre_x = i64::from((grid_width - 1) / 2);
    let centre_y = i64::from((grid_height - 1) / 2);
    let max_ring = centre_x
        .max(i64::from(grid_width - 1) - centre_x)
        .max(centre_y)
        .max(i64::from(grid_height - 1) - centre_y);

    let in_grid = |x: i64, y: i64| x >= 0 && y >= 0 && x < i64::from(grid_width) && y < i64::from(grid_height);
    let mut tiles = Vec::with_capacity((grid_width as usize) * (grid_height as usize));
    let push = |x: i64, y: i64, tiles: &mut Vec<(u32, u32)>| {
        if in_grid(x, y) {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            tiles.push((x as u32, y as u32));
        }
    };

    push(centre_x, centre_y, &mut tiles);
    for ring in 1..=max_ring {
        let (lo_x, hi_x) = (centre_x - ring, centre_x + ring);
        let (lo_y, hi_y) = (centre_y - ring, centre_y + ring);
        for y in lo_y..hi_y {
            push(lo_x, y, &mut tiles);
        }
        for x in lo_x..hi_x {
            push(x, hi_y, &mut tiles);
        }
        for y in (lo_y + 1..=hi_y).rev() {
            push(hi_x, y, &mut tiles);
        }
        for x in (lo_x + 1..=hi_x).rev() {
            push(x, lo_y, &mut tiles);
        }
    }
    tiles
}

/// Find a `width × height` rectangle inside the tumour bounding box that
/// holds strictly more than `threshold` cells of the given species set.
///
/// The bounding box is tiled from its lower corner and the tiles are
/// scanned centre-outwards; the first satisfying tile wins.
pub(crate) fn search_rectangle(
    tissue: &Tissue,
    species: &[SpeciesId],
    threshold: u64,
    width: u32,
    height: u32,
) -> Result<Rectangle, SimulationError> {
    if width == 0 || height == 0 {
        return Err(SimulationError::precondition("sample dimensions must be non-zero"));
    }
    let bbox = tissue
        .bounding_box()
        .ok_or_else(|| SimulationError::not_found("the tissue does not contain any cell"))?;

    let grid_width = bbox.width().div_ceil(width);
    let grid_height = bbox.height().div_ceil(height);

    for (tile_x, tile_y) in spiral_tiles(grid_width, grid_height) {
        let lower = Position::new(bbox.lower().x + tile_x * width, bbox.lower().y + tile_y * height);
        let upper = Position::new(
            lower.x.saturating_add(width - 1),
            lower.y.saturating_add(height - 1),
        );
        let tile = Rectangle::new(lower, upper).expect("tile corners are ordered");
        let Some(clipped) = tissue.clip(&tile) else {
            continue;
        };
        let mut count = 0u64;
        for pos in clipped.positions() {
            if let Some(cell) = tissue.cell_at(pos) {
                if species.contains(&cell.species) {
                    count += 1;
                }
            }
        }
        if count > threshold {
            return Ok(clipped);
        }
    }

    Err(SimulationError::not_found(format!(
        "no {width}x{height} rectangle with more than {threshold} cells"
    )))
}
