//! Detection region masks.
//!
//! Regions are configured in full-resolution pixels but detection runs on
//! the lores stream, so each rectangle is scaled by `lores / full` per axis.
//! A mask is built once when monitoring (re)starts and is never edited in
//! place; a region change produces a new mask.

use stillwatch_common::config::Region;

/// A binary mask with the lores stream's dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionMask {
    width: u32,
    height: u32,
    cells: Vec<bool>,
}

impl RegionMask {
    /// An empty mask (no pixel selected).
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            cells: vec![false; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Whether `(x, y)` lies inside a configured region.
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height && self.cells[self.index(x, y)]
    }

    /// Row-major selection flags.
    pub fn cells(&self) -> &[bool] {
        &self.cells
    }

    /// Number of selected pixels.
    pub fn selected(&self) -> usize {
        self.cells.iter().filter(|&&c| c).count()
    }

    /// Select the half-open rectangle `[x0, x1) x [y0, y1)`, clipped to the mask.
    pub fn fill_rect(&mut self, x0: u32, y0: u32, x1: u32, y1: u32) {
        let (x1, y1) = (x1.min(self.width), y1.min(self.height));
        for y in y0..y1 {
            for x in x0..x1 {
                let i = self.index(x, y);
                self.cells[i] = true;
            }
        }
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }
}

/// Build the lores mask for a set of full-resolution regions.
///
/// Returns `None` (detect over the whole frame) when region filtering is
/// disabled or no regions are configured.
pub fn build_region_mask(
    regions: &[Region],
    use_regions: bool,
    full_size: (u32, u32),
    lores_size: (u32, u32),
) -> Option<RegionMask> {
    if !use_regions || regions.is_empty() {
        return None;
    }

    let (full_w, full_h) = (full_size.0.max(1) as u64, full_size.1.max(1) as u64);
    let (lores_w, lores_h) = (lores_size.0 as u64, lores_size.1 as u64);
    let mut mask = RegionMask::empty(lores_size.0, lores_size.1);

    for &[ax, ay, bx, by] in regions {
        let (x_lo, x_hi) = (ax.min(bx) as u64, ax.max(bx) as u64);
        let (y_lo, y_hi) = (ay.min(by) as u64, ay.max(by) as u64);

        // Floor the near edge and ceil the far edge so thin regions keep at
        // least one lores pixel.
        let x0 = (x_lo * lores_w / full_w).min(lores_w);
        let y0 = (y_lo * lores_h / full_h).min(lores_h);
        let x1 = (x_hi * lores_w).div_ceil(full_w).min(lores_w);
        let y1 = (y_hi * lores_h).div_ceil(full_h).min(lores_h);

        if x0 >= x1 || y0 >= y1 {
            tracing::warn!(region = ?[ax, ay, bx, by], "Detection region lies outside the frame");
            continue;
        }
        mask.fill_rect(x0 as u32, y0 as u32, x1 as u32, y1 as u32);
    }

    tracing::debug!(
        width = mask.width(),
        height = mask.height(),
        selected = mask.selected(),
        regions = regions.len(),
        "Built detection mask"
    );
    Some(mask)
}
