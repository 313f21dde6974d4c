//! Partitioning of a source image into overlapping tiles.
//!
//! Tiles are laid out on a grid with stride `tile_size - overlap`; the last
//! row and column are clipped to the image rather than padded. The plan is
//! a pure function of its inputs and always yields tiles in row-major order.

use serde::Serialize;

use crate::core::buffer::Region;
use crate::core::scale::Scale;
use crate::error::TilingError;

/// One planned tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Tile {
    /// Position in row-major scan order.
    pub index: usize,
    pub row: u32,
    pub col: u32,
    /// Bounds on the source image.
    pub region: Region,
    /// Columns shared with the tile to the left (0 in the first column).
    pub left_overlap: u32,
    /// Rows shared with the tile above (0 in the first row).
    pub top_overlap: u32,
}

impl Tile {
    /// Bounds of this tile on the scaled output.
    ///
    /// Both edges are scaled, so destination regions of adjacent tiles meet
    /// exactly even for fractional scales.
    pub fn destination(&self, scale: Scale) -> Region {
        let r = self.region;
        let x0 = scale.apply(r.x);
        let y0 = scale.apply(r.y);
        Region::new(x0, y0, scale.apply(r.right()) - x0, scale.apply(r.bottom()) - y0)
    }

    /// Width of the left blend band on the output.
    pub fn left_band(&self, scale: Scale) -> u32 {
        let r = self.region;
        scale.apply(r.x + self.left_overlap) - scale.apply(r.x)
    }

    /// Height of the top blend band on the output.
    pub fn top_band(&self, scale: Scale) -> u32 {
        let r = self.region;
        scale.apply(r.y + self.top_overlap) - scale.apply(r.y)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TilePlan {
    pub image_width: u32,
    pub image_height: u32,
    pub tile_size: u32,
    pub overlap: u32,
    pub cols: u32,
    pub rows: u32,
    tiles: Vec<Tile>,
}

/// Start offsets along one axis: `0, stride, 2*stride, ...` while `< len`.
fn axis_starts(len: u32, stride: u32) -> Vec<u32> {
    (0..len).step_by(stride as usize).collect()
}

impl TilePlan {
    pub fn new(width: u32, height: u32, tile_size: u32, overlap: u32) -> Result<Self, TilingError> {
        if width == 0 || height == 0 {
            return Err(TilingError::invalid(format!(
                "image dimensions must be positive, got {width}x{height}"
            )));
        }
        if tile_size == 0 {
            return Err(TilingError::invalid("tile size must be positive"));
        }
        if overlap >= tile_size {
            return Err(TilingError::invalid(format!(
                "overlap {overlap} must be smaller than tile size {tile_size}"
            )));
        }

        if width <= tile_size && height <= tile_size {
            return Ok(Self {
                image_width: width,
                image_height: height,
                tile_size,
                overlap,
                cols: 1,
                rows: 1,
                tiles: vec![Tile {
                    index: 0,
                    row: 0,
                    col: 0,
                    region: Region::new(0, 0, width, height),
                    left_overlap: 0,
                    top_overlap: 0,
                }],
            });
        }

        let stride = tile_size - overlap;
        let xs = axis_starts(width, stride);
        let ys = axis_starts(height, stride);

        let mut tiles = Vec::with_capacity(xs.len() * ys.len());
        for (row, &y) in ys.iter().enumerate() {
            let h = tile_size.min(height - y);
            // rows of the tile above that reach into this one
            let top_overlap = match row {
                0 => 0,
                _ => {
                    let above = ys[row - 1];
                    let above_bottom = above + tile_size.min(height - above);
                    above_bottom.saturating_sub(y).min(h)
                }
            };
            for (col, &x) in xs.iter().enumerate() {
                let w = tile_size.min(width - x);
                let left_overlap = match col {
                    0 => 0,
                    _ => {
                        let left = xs[col - 1];
                        let left_right = left + tile_size.min(width - left);
                        left_right.saturating_sub(x).min(w)
                    }
                };
                tiles.push(Tile {
                    index: tiles.len(),
                    row: row as u32,
                    col: col as u32,
                    region: Region::new(x, y, w, h),
                    left_overlap,
                    top_overlap,
                });
            }
        }

        Ok(Self {
            image_width: width,
            image_height: height,
            tile_size,
            overlap,
            cols: xs.len() as u32,
            rows: ys.len() as u32,
            tiles,
        })
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn is_single(&self) -> bool {
        self.tiles.len() == 1
    }

    pub fn regions(&self) -> impl Iterator<Item = Region> + '_ {
        self.tiles.iter().map(|t| t.region)
    }

    /// Output dimensions for `scale`.
    pub fn output_size(&self, scale: Scale) -> (u32, u32) {
        (scale.apply(self.image_width), scale.apply(self.image_height))
    }
}

impl<'a> IntoIterator for &'a TilePlan {
    type Item = &'a Tile;
    type IntoIter = std::slice::Iter<'a, Tile>;

    fn into_iter(self) -> Self::IntoIter {
        self.tiles.iter()
    }
}
