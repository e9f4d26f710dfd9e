//! The uniform bin grid used for density accounting: per-bin
//! non-place/instance/filler area accumulators, the auto bin-count
//! selection, and the overflow sums the Nesterov loop converges on.
//!
//! Bins live in an `Array2` indexed `(row, col) = (y, x)`.

use ndarray::Array2;
use placer_common::{Dbu, Rect};

use crate::nesterov_common::GCell;
use crate::placer_base::PlacerBaseCommon;

#[derive(Debug, Clone)]
pub struct Bin {
    pub x: usize,
    pub y: usize,
    pub lx: Dbu,
    pub ly: Dbu,
    pub ux: Dbu,
    pub uy: Dbu,
    /// Fixed/dummy overlap, macro-shaped by the bivariate-normal estimate
    /// and scaled by target density.
    pub non_place_area: i64,
    /// Same, but with the plain rectangular overlap.
    pub non_place_area_unscaled: i64,
    pub inst_placed_area: i64,
    pub filler_area: i64,
    pub density: f32,
    pub target_density: f32,
    pub electro_phi: f32,
    pub electro_force_x: f32,
    pub electro_force_y: f32,
}

impl Bin {
    fn new(x: usize, y: usize, lx: Dbu, ly: Dbu, ux: Dbu, uy: Dbu, target_density: f32) -> Self {
        Self {
            x,
            y,
            lx,
            ly,
            ux,
            uy,
            non_place_area: 0,
            non_place_area_unscaled: 0,
            inst_placed_area: 0,
            filler_area: 0,
            density: 0.0,
            target_density,
            electro_phi: 0.0,
            electro_force_x: 0.0,
            electro_force_y: 0.0,
        }
    }

    pub fn area(&self) -> i64 {
        (self.ux - self.lx) as i64 * (self.uy - self.ly) as i64
    }
}

pub struct BinGrid {
    pub lx: Dbu,
    pub ly: Dbu,
    pub ux: Dbu,
    pub uy: Dbu,
    bin_cnt_x: usize,
    bin_cnt_y: usize,
    bin_size_x: Dbu,
    bin_size_y: Dbu,
    target_density: f32,
    is_set_bin_cnt: bool,
    bins: Array2<Bin>,
    sum_overflow_area: f64,
    sum_overflow_area_unscaled: f64,
}

impl BinGrid {
    pub fn new(core: Rect, target_density: f32) -> Self {
        Self {
            lx: core.lx,
            ly: core.ly,
            ux: core.ux,
            uy: core.uy,
            bin_cnt_x: 0,
            bin_cnt_y: 0,
            bin_size_x: 0,
            bin_size_y: 0,
            target_density,
            is_set_bin_cnt: false,
            bins: Array2::from_shape_vec((0, 0), Vec::new()).unwrap(),
            sum_overflow_area: 0.0,
            sum_overflow_area_unscaled: 0.0,
        }
    }

    /// Explicit bin-count override (the `binGridCntX/Y` options).
    pub fn set_bin_cnt(&mut self, bin_cnt_x: usize, bin_cnt_y: usize) {
        self.bin_cnt_x = bin_cnt_x;
        self.bin_cnt_y = bin_cnt_y;
        self.is_set_bin_cnt = true;
    }

    pub fn set_target_density(&mut self, density: f32) {
        self.target_density = density;
        for bin in self.bins.iter_mut() {
            bin.target_density = density;
        }
    }

    /// Sizes the grid and allocates the bin array. Unless overridden, the
    /// bin count comes from the ideal bin area `avgPlaceInstArea /
    /// targetDensity`, snapped to the power-of-two family that best
    /// preserves the core aspect ratio.
    pub fn init_bins(&mut self, place_insts_area: i64, place_inst_cnt: usize) {
        let total_bin_area = (self.ux - self.lx) as i64 * (self.uy - self.ly) as i64;

        let average_place_inst_area = if place_inst_cnt > 0 {
            place_insts_area / place_inst_cnt as i64
        } else {
            log::warn!("no placed instances; defaulting to the minimum 2x2 grid");
            0
        };

        let ideal_bin_area = if self.target_density != 0.0 {
            (average_place_inst_area as f32 / self.target_density).round() as i64
        } else {
            0
        };
        let mut ideal_bin_cnt = if ideal_bin_area != 0 {
            total_bin_area / ideal_bin_area
        } else {
            0
        };
        // the smallest grid we allow is 2x2
        if ideal_bin_cnt < 4 {
            ideal_bin_cnt = 4;
        }

        log::debug!(
            "idealBinArea {ideal_bin_area}, idealBinCnt {ideal_bin_cnt}, totalBinArea {total_bin_area}"
        );

        if !self.is_set_bin_cnt {
            let width = self.ux - self.lx;
            let height = self.uy - self.ly;
            let ratio = round_down_to_power_of_two(
                (width.max(height) / width.min(height).max(1)) as u64,
            ) as i64;

            let mut found_bin_cnt: i64 = 2;
            // find the smallest power-of-two count with
            // #bins(cnt) <= idealBinCnt < #bins(cnt*2)
            while found_bin_cnt <= 1024 {
                if (found_bin_cnt == 2 || found_bin_cnt * (found_bin_cnt * ratio) <= ideal_bin_cnt)
                    && 4 * found_bin_cnt * (found_bin_cnt * ratio) > ideal_bin_cnt
                {
                    break;
                }
                found_bin_cnt *= 2;
            }

            if width > height {
                self.bin_cnt_x = (found_bin_cnt * ratio) as usize;
                self.bin_cnt_y = found_bin_cnt as usize;
            } else {
                self.bin_cnt_x = found_bin_cnt as usize;
                self.bin_cnt_y = (found_bin_cnt * ratio) as usize;
            }
        }

        self.bin_size_x = ((self.ux - self.lx) as f32 / self.bin_cnt_x as f32).ceil() as Dbu;
        self.bin_size_y = ((self.uy - self.ly) as f32 / self.bin_cnt_y as f32).ceil() as Dbu;

        log::info!(
            "binCnt {}x{}, binSize {}x{}",
            self.bin_cnt_x,
            self.bin_cnt_y,
            self.bin_size_x,
            self.bin_size_y
        );

        let target_density = self.target_density;
        let (lx, ly, ux, uy) = (self.lx, self.ly, self.ux, self.uy);
        let (bin_size_x, bin_size_y) = (self.bin_size_x, self.bin_size_y);
        self.bins = Array2::from_shape_fn((self.bin_cnt_y, self.bin_cnt_x), |(idx_y, idx_x)| {
            let x = lx + idx_x as Dbu * bin_size_x;
            let y = ly + idx_y as Dbu * bin_size_y;
            let size_x = (ux - x).min(bin_size_x);
            let size_y = (uy - y).min(bin_size_y);
            Bin::new(idx_x, idx_y, x, y, x + size_x, y + size_y, target_density)
        });
    }

    pub fn bin_cnt_x(&self) -> usize {
        self.bin_cnt_x
    }
    pub fn bin_cnt_y(&self) -> usize {
        self.bin_cnt_y
    }
    pub fn bin_size_x(&self) -> Dbu {
        self.bin_size_x
    }
    pub fn bin_size_y(&self) -> Dbu {
        self.bin_size_y
    }
    pub fn bins(&self) -> &Array2<Bin> {
        &self.bins
    }
    pub fn bins_mut(&mut self) -> &mut Array2<Bin> {
        &mut self.bins
    }

    pub fn overflow_area(&self) -> f64 {
        self.sum_overflow_area
    }
    pub fn overflow_area_unscaled(&self) -> f64 {
        self.sum_overflow_area_unscaled
    }

    /// Accumulates fixed/dummy instance overlap into `non_place_area`, once
    /// at init and again whenever the target density changes. The area is
    /// scaled by target density; macros additionally get the
    /// bivariate-normal shaping so movable cells drift off macro centers.
    pub fn update_bins_non_place_area(&mut self, pb: &PlacerBaseCommon) {
        for bin in self.bins.iter_mut() {
            bin.non_place_area = 0;
            bin.non_place_area_unscaled = 0;
        }

        for &id in &pb.non_place_insts {
            let inst = &pb.instances[id.0 as usize];
            let pair_x = self.min_max_idx_x(inst.lx, inst.ux);
            let pair_y = self.min_max_idx_y(inst.ly, inst.uy);
            for y in pair_y.0..pair_y.1 {
                for x in pair_x.0..pair_x.1 {
                    let bin = &mut self.bins[[y, x]];
                    let overlap = macro_shaped_overlap_area(bin, inst.lx, inst.ly, inst.ux, inst.uy, inst.is_macro);
                    let plain = rect_overlap_area(bin.lx, bin.ly, bin.ux, bin.uy, inst.lx, inst.ly, inst.ux, inst.uy);
                    bin.non_place_area += (overlap * bin.target_density as f64) as i64;
                    bin.non_place_area_unscaled += (plain * bin.target_density as f64) as i64;
                }
            }
        }
    }

    /// Re-bins every gcell's density bbox and recomputes per-bin density
    /// plus the two overflow sums.
    pub fn update_bins_gcell_density_area<'a>(&mut self, cells: impl Iterator<Item = &'a GCell>) {
        for bin in self.bins.iter_mut() {
            bin.inst_placed_area = 0;
            bin.filler_area = 0;
        }

        for cell in cells {
            let pair_x = self.density_min_max_idx_x(cell);
            let pair_y = self.density_min_max_idx_y(cell);

            if cell.is_instance() {
                // macros are scaled down by target density as well
                let extra = if cell.is_macro_instance() {
                    self.target_density
                } else {
                    1.0
                };
                for y in pair_y.0..pair_y.1 {
                    for x in pair_x.0..pair_x.1 {
                        let bin = &mut self.bins[[y, x]];
                        let scaled = overlap_density_area(bin, cell) * cell.density_scale * extra;
                        bin.inst_placed_area += scaled as i64;
                    }
                }
            } else {
                for y in pair_y.0..pair_y.1 {
                    for x in pair_x.0..pair_x.1 {
                        let bin = &mut self.bins[[y, x]];
                        let scaled = overlap_density_area(bin, cell) * cell.density_scale;
                        bin.filler_area += scaled as i64;
                    }
                }
            }
        }

        self.sum_overflow_area = 0.0;
        self.sum_overflow_area_unscaled = 0.0;
        for bin in self.bins.iter_mut() {
            let scaled_bin_area = bin.area() as f64 * bin.target_density as f64;
            bin.density = ((bin.inst_placed_area + bin.filler_area + bin.non_place_area) as f64
                / scaled_bin_area) as f32;

            self.sum_overflow_area += 0f64
                .max((bin.inst_placed_area + bin.non_place_area) as f64 - scaled_bin_area);
            self.sum_overflow_area_unscaled += 0f64
                .max((bin.inst_placed_area + bin.non_place_area_unscaled) as f64 - scaled_bin_area);
        }
    }

    /// Bin index span overlapped by a gcell's density bbox, clamped to the
    /// grid.
    pub fn density_min_max_idx_x(&self, cell: &GCell) -> (usize, usize) {
        self.min_max_idx_x(cell.d_lx, cell.d_ux)
    }

    pub fn density_min_max_idx_y(&self, cell: &GCell) -> (usize, usize) {
        self.min_max_idx_y(cell.d_ly, cell.d_uy)
    }

    fn min_max_idx_x(&self, lx: Dbu, ux: Dbu) -> (usize, usize) {
        let lower = (lx - self.lx) / self.bin_size_x;
        let upper = if (ux - self.lx) % self.bin_size_x == 0 {
            (ux - self.lx) / self.bin_size_x
        } else {
            (ux - self.lx) / self.bin_size_x + 1
        };
        (
            lower.max(0) as usize,
            (upper.max(0) as usize).min(self.bin_cnt_x),
        )
    }

    fn min_max_idx_y(&self, ly: Dbu, uy: Dbu) -> (usize, usize) {
        let lower = (ly - self.ly) / self.bin_size_y;
        let upper = if (uy - self.ly) % self.bin_size_y == 0 {
            (uy - self.ly) / self.bin_size_y
        } else {
            (uy - self.ly) / self.bin_size_y + 1
        };
        (
            lower.max(0) as usize,
            (upper.max(0) as usize).min(self.bin_cnt_y),
        )
    }
}

fn round_down_to_power_of_two(v: u64) -> u64 {
    if v == 0 {
        return 1;
    }
    1 << (63 - v.leading_zeros() as u64)
}

fn rect_overlap_area(
    a_lx: Dbu,
    a_ly: Dbu,
    a_ux: Dbu,
    a_uy: Dbu,
    b_lx: Dbu,
    b_ly: Dbu,
    b_ux: Dbu,
    b_uy: Dbu,
) -> f64 {
    let lx = a_lx.max(b_lx);
    let ly = a_ly.max(b_ly);
    let ux = a_ux.min(b_ux);
    let uy = a_uy.min(b_uy);
    if lx >= ux || ly >= uy {
        0.0
    } else {
        (ux - lx) as f64 * (uy - ly) as f64
    }
}

fn overlap_density_area(bin: &Bin, cell: &GCell) -> f32 {
    let lx = bin.lx.max(cell.d_lx);
    let ly = bin.ly.max(cell.d_ly);
    let ux = bin.ux.min(cell.d_ux);
    let uy = bin.uy.min(cell.d_uy);
    if lx >= ux || ly >= uy {
        0.0
    } else {
        (ux - lx) as f32 * (uy - ly) as f32
    }
}

/// Fixed-instance overlap, with the macro case weighted by a bivariate
/// normal CDF centered on the macro (sigma = mean/4), capped at 1.15x the
/// rectangular overlap and floored at the rectangular overlap.
fn macro_shaped_overlap_area(
    bin: &Bin,
    inst_lx: Dbu,
    inst_ly: Dbu,
    inst_ux: Dbu,
    inst_uy: Dbu,
    is_macro: bool,
) -> f64 {
    let lx = bin.lx.max(inst_lx);
    let ly = bin.ly.max(inst_ly);
    let ux = bin.ux.min(inst_ux);
    let uy = bin.uy.min(inst_uy);
    if lx >= ux || ly >= uy {
        return 0.0;
    }
    let original = (ux - lx) as f64 * (uy - ly) as f64;
    if !is_macro {
        return original;
    }

    let mean_x = (inst_ux - inst_lx) as f64 / 2.0;
    let mean_y = (inst_uy - inst_ly) as f64 / 2.0;
    let cdf = bivariate_normal_cdf(
        mean_x,
        mean_y,
        mean_x / 4.0,
        mean_y / 4.0,
        (lx - inst_lx) as f64,
        (ly - inst_ly) as f64,
        (ux - inst_lx) as f64,
        (uy - inst_ly) as f64,
    );
    let scaled = cdf
        * (inst_ux - inst_lx) as f64
        * (inst_uy - inst_ly) as f64;

    if scaled >= original {
        scaled.min(original * 1.15)
    } else {
        original
    }
}

/// Closed-form integral of an uncorrelated bivariate normal density over
/// `[lx,ux] x [ly,uy]`, expressed with the instance's lower-left corner as
/// the origin.
#[allow(clippy::too_many_arguments)]
fn bivariate_normal_cdf(
    mean_x: f64,
    mean_y: f64,
    sigma_x: f64,
    sigma_y: f64,
    lx: f64,
    ly: f64,
    ux: f64,
    uy: f64,
) -> f64 {
    let sqrt2 = std::f64::consts::SQRT_2;
    let x1 = (mean_x - lx) / (sqrt2 * sigma_x);
    let x2 = (mean_x - ux) / (sqrt2 * sigma_x);
    let y1 = (mean_y - ly) / (sqrt2 * sigma_y);
    let y2 = (mean_y - uy) / (sqrt2 * sigma_y);

    0.25 * (erf(x1) * erf(y1) + erf(x2) * erf(y2) - erf(x1) * erf(y2) - erf(x2) * erf(y1))
}

/// Abramowitz-Stegun 7.1.26 rational approximation, |error| < 1.5e-7.
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let t = 1.0 / (1.0 + 0.3275911 * x);
    let poly = t
        * (0.254829592 + t * (-0.284496736 + t * (1.421413741 + t * (-1.453152027 + t * 1.061405429))));
    sign * (1.0 - poly * (-x * x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_4x4() -> BinGrid {
        let mut grid = BinGrid::new(Rect::new(0, 0, 400, 400), 1.0);
        grid.set_bin_cnt(4, 4);
        grid.init_bins(0, 0);
        grid
    }

    #[test]
    fn auto_bin_count_splits_on_aspect_ratio() {
        // idealBinCnt = 10000 with a 2:1 core picks the 64-per-short-axis
        // family: the long axis gets 128 bins, the short axis 64.
        let mut grid = BinGrid::new(Rect::new(0, 0, 1000, 500), 0.8);
        // avg inst area 40 => ideal bin area 50 => ideal count 10000
        grid.init_bins(40 * 10_000, 10_000);
        assert_eq!(grid.bin_cnt_x(), 128);
        assert_eq!(grid.bin_cnt_y(), 64);
    }

    #[test]
    fn auto_bin_count_floors_at_2x2() {
        let mut grid = BinGrid::new(Rect::new(0, 0, 100, 100), 0.8);
        grid.init_bins(0, 0);
        assert_eq!(grid.bin_cnt_x(), 2);
        assert_eq!(grid.bin_cnt_y(), 2);
    }

    #[test]
    fn bins_tile_the_core_exactly() {
        let grid = grid_4x4();
        let total: i64 = grid.bins().iter().map(Bin::area).sum();
        assert_eq!(total, 400 * 400);
    }

    #[test]
    fn std_cell_density_area_lands_in_overlapped_bins() {
        let mut grid = grid_4x4();
        // one 100x100 cell exactly covering bin (1,1)
        let cell = GCell::new_filler(150, 150, 100, 100);
        grid.update_bins_gcell_density_area(std::iter::once(&cell));

        let bin = &grid.bins()[[1, 1]];
        assert_eq!(bin.filler_area, 100 * 100);
        assert!((bin.density - 1.0).abs() < 1e-6);
        let elsewhere: i64 = grid
            .bins()
            .iter()
            .filter(|b| !(b.x == 1 && b.y == 1))
            .map(|b| b.filler_area + b.inst_placed_area)
            .sum();
        assert_eq!(elsewhere, 0);
    }

    #[test]
    fn overflow_counts_only_over_target_bins() {
        let mut grid = grid_4x4();
        let mut cell = GCell::new_filler(150, 150, 100, 100);
        cell.kind = crate::nesterov_common::GCellKind::Instance(placer_common::InstanceId(0));
        // double-stack a second copy on the same bin to push it to 2x target
        let cell2 = cell.clone();
        grid.update_bins_gcell_density_area([&cell, &cell2].into_iter());
        // bin area 10000 at target 1.0; occupancy 20000 => overflow 10000
        assert!((grid.overflow_area() - 10_000.0).abs() < 1.0);
    }

    #[test]
    fn erf_matches_known_values() {
        assert!((erf(0.0)).abs() < 1e-7);
        assert!((erf(1.0) - 0.8427007).abs() < 1e-6);
        assert!((erf(-1.0) + 0.8427007).abs() < 1e-6);
        assert!((erf(3.0) - 0.9999779).abs() < 1e-6);
    }

    #[test]
    fn macro_overlap_is_between_floor_and_cap() {
        let bin = Bin::new(0, 0, 0, 0, 100, 100, 1.0);
        // center bin of a 300x300 macro: the CDF concentrates area at the
        // middle, so the shaped overlap must sit in (original, 1.15*original]
        let center = macro_shaped_overlap_area(
            &Bin::new(1, 1, 100, 100, 200, 200, 1.0),
            0,
            0,
            300,
            300,
            true,
        );
        assert!(center > 100.0 * 100.0);
        assert!(center <= 100.0 * 100.0 * 1.15 + 1e-6);
        // corner bin: the CDF estimate falls below the rectangle, so the
        // raw overlap floor applies
        let corner = macro_shaped_overlap_area(&bin, 0, 0, 300, 300, true);
        assert_eq!(corner, 100.0 * 100.0);
    }
}
