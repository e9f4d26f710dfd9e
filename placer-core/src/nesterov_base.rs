//! Per-region Nesterov state: filler cells, the bin grid and FFT it
//! feeds, the density gradient and preconditioner, the penalty and
//! step-length schedules, and the SLP state vectors the outer driver in
//! `nesterov_place.rs` advances.
//!
//! A `NesterovBase` owns nothing from the common G-graph; it holds
//! `GCellRef` indices into `NesterovBaseCommon` plus its own filler
//! storage, so the common arenas are never duplicated per region.

use placer_common::{Dbu, DivergeKind, Fft2D, FloatPoint, PlaceError, Rect};

use crate::bin_grid::BinGrid;
use crate::fft::Fft;
use crate::nesterov_common::{GCell, NesterovBaseCommon};
use crate::nesterov_place::NesterovPlaceOptions;
use crate::placer_base::PlacerBaseCommon;

const SQRT2: f32 = std::f32::consts::SQRT_2;

/// Seed for the per-instance jitter applied before the first iteration.
const INIT_JITTER_SEED: u64 = 42;
/// Seed for the filler scatter.
const FILLER_SEED: u64 = 98765;

/// A cell owned by this region: either an index into the common gcell
/// arena or into the region's own filler storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GCellRef {
    Common(usize),
    Filler(usize),
}

#[derive(Debug, Clone)]
pub struct NesterovBaseOptions {
    pub target_density: f32,
    pub uniform_target_density_mode: bool,
    /// Explicit bin-count override; auto-selected when `None`.
    pub bin_cnt: Option<(usize, usize)>,
}

impl Default for NesterovBaseOptions {
    fn default() -> Self {
        Self {
            target_density: 0.7,
            uniform_target_density_mode: false,
            bin_cnt: None,
        }
    }
}

/// Which SLP gradient set `update_gradients` fills.
#[derive(Debug, Clone, Copy)]
pub enum SlpSet {
    Prev,
    Cur,
    Next,
}

/// xorshift64*; deterministic across platforms, which keeps filler scatter
/// and jitter reproducible run to run.
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self {
            state: seed.max(1),
        }
    }

    fn next(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x.wrapping_mul(0x2545_f491_4f6c_dd1d)
    }
}

pub struct NesterovBase {
    opts: NesterovBaseOptions,
    np: NesterovPlaceOptions,

    pub cells: Vec<GCellRef>,
    fillers: Vec<GCell>,
    bin_grid: BinGrid,
    fft: Fft,
    fft_solver: Box<dyn Fft2D>,

    core: Rect,
    target_density: f32,
    uniform_target_density: f32,
    white_space_area: i64,
    movable_area: i64,
    total_filler_area: i64,
    std_insts_area: i64,
    macro_insts_area: i64,
    non_place_insts_area: i64,
    filler_dx: Dbu,
    filler_dy: Dbu,

    // SLP state vectors, all sized |cells|
    cur_slp_coordi: Vec<FloatPoint>,
    cur_slp_wirelength_grads: Vec<FloatPoint>,
    cur_slp_density_grads: Vec<FloatPoint>,
    cur_slp_sum_grads: Vec<FloatPoint>,
    next_slp_coordi: Vec<FloatPoint>,
    next_slp_wirelength_grads: Vec<FloatPoint>,
    next_slp_density_grads: Vec<FloatPoint>,
    next_slp_sum_grads: Vec<FloatPoint>,
    prev_slp_coordi: Vec<FloatPoint>,
    prev_slp_wirelength_grads: Vec<FloatPoint>,
    prev_slp_density_grads: Vec<FloatPoint>,
    prev_slp_sum_grads: Vec<FloatPoint>,
    cur_coordi: Vec<FloatPoint>,
    next_coordi: Vec<FloatPoint>,
    init_coordi: Vec<FloatPoint>,

    snapshot_coordi: Vec<FloatPoint>,
    snapshot_slp_coordi: Vec<FloatPoint>,
    snapshot_slp_sum_grads: Vec<FloatPoint>,
    snapshot_density_penalty: f32,
    snapshot_step_length: f32,

    wirelength_grad_sum: f32,
    density_grad_sum: f32,
    pub density_penalty: f32,
    base_wirelength_coef: f32,
    pub step_length: f32,

    sum_phi: f64,
    pub sum_overflow: f32,
    pub sum_overflow_unscaled: f32,
    min_sum_overflow: f32,
    hpwl_with_min_sum_overflow: i64,
    prev_hpwl: i64,

    pub is_diverged: bool,
    pub is_converged: bool,
    pub diverge_kind: Option<DivergeKind>,
    pub diverge_msg: String,
    is_max_phi_coef_changed: bool,
}

impl NesterovBase {
    /// Builds the region: fillers, jittered start locations, the bin grid,
    /// and the FFT workspace. `common` gcell locations are perturbed in
    /// place; pin locations are refreshed afterwards.
    pub fn new(
        opts: NesterovBaseOptions,
        np: NesterovPlaceOptions,
        common: &mut NesterovBaseCommon,
        pb: &PlacerBaseCommon,
        fft_solver: Box<dyn Fft2D>,
    ) -> Result<Self, PlaceError> {
        let _span = tracing::info_span!("nesterov_base_build").entered();

        let core = pb.die.core();
        let mut base = Self {
            target_density: opts.target_density,
            opts,
            np,
            cells: Vec::new(),
            fillers: Vec::new(),
            bin_grid: BinGrid::new(core, 0.0),
            fft: Fft::new(1, 1, 1, 1),
            fft_solver,
            core,
            uniform_target_density: 0.0,
            white_space_area: 0,
            movable_area: 0,
            total_filler_area: 0,
            std_insts_area: pb.std_insts_area,
            macro_insts_area: pb.macro_insts_area,
            non_place_insts_area: pb.non_place_insts_area,
            filler_dx: 0,
            filler_dy: 0,
            cur_slp_coordi: Vec::new(),
            cur_slp_wirelength_grads: Vec::new(),
            cur_slp_density_grads: Vec::new(),
            cur_slp_sum_grads: Vec::new(),
            next_slp_coordi: Vec::new(),
            next_slp_wirelength_grads: Vec::new(),
            next_slp_density_grads: Vec::new(),
            next_slp_sum_grads: Vec::new(),
            prev_slp_coordi: Vec::new(),
            prev_slp_wirelength_grads: Vec::new(),
            prev_slp_density_grads: Vec::new(),
            prev_slp_sum_grads: Vec::new(),
            cur_coordi: Vec::new(),
            next_coordi: Vec::new(),
            init_coordi: Vec::new(),
            snapshot_coordi: Vec::new(),
            snapshot_slp_coordi: Vec::new(),
            snapshot_slp_sum_grads: Vec::new(),
            snapshot_density_penalty: 0.0,
            snapshot_step_length: 0.0,
            wirelength_grad_sum: 0.0,
            density_grad_sum: 0.0,
            density_penalty: 0.0,
            base_wirelength_coef: 0.0,
            step_length: 0.0,
            sum_phi: 0.0,
            sum_overflow: 0.0,
            sum_overflow_unscaled: 0.0,
            min_sum_overflow: f32::MAX,
            hpwl_with_min_sum_overflow: i64::MAX,
            prev_hpwl: 0,
            is_diverged: false,
            is_converged: false,
            diverge_kind: None,
            diverge_msg: String::new(),
            is_max_phi_coef_changed: false,
        };

        base.init_filler_gcells(pb)?;

        // Jitter each movable cell off its seed location so exactly
        // coincident cells do not share a zero-distance gradient.
        let mut rng = XorShift64::new(INIT_JITTER_SEED);
        let jitter_x = pb.site_size_x.max(1) as u64;
        let jitter_y = pb.site_size_y.max(1) as u64;
        for idx in 0..common.gcells.len() {
            let x_offset = (rng.next() % (2 * jitter_x)) as Dbu - jitter_x as Dbu;
            let y_offset = (rng.next() % (2 * jitter_y)) as Dbu - jitter_y as Dbu;
            let gcell = &mut common.gcells[idx];
            let (cx, cy) = (gcell.cx() + x_offset, gcell.cy() + y_offset);
            gcell.set_center_location(cx, cy);
            base.cells.push(GCellRef::Common(idx));
        }
        common.update_pin_locations();

        for i in 0..base.fillers.len() {
            base.cells.push(GCellRef::Filler(i));
        }

        log::info!(
            "region gcells: {} ({} instances + {} fillers)",
            base.cells.len(),
            common.gcells.len(),
            base.fillers.len()
        );

        base.bin_grid = BinGrid::new(core, base.target_density);
        if let Some((x, y)) = base.opts.bin_cnt {
            base.bin_grid.set_bin_cnt(x, y);
        }
        base.bin_grid
            .init_bins(pb.place_insts_area, pb.place_insts.len());
        base.bin_grid.update_bins_non_place_area(pb);

        base.fft = Fft::new(
            base.bin_grid.bin_cnt_x(),
            base.bin_grid.bin_cnt_y(),
            base.bin_grid.bin_size_x(),
            base.bin_grid.bin_size_y(),
        );

        base.update_density_size(common);

        Ok(base)
    }

    /// Filler size is the 5%-95% trimmed mean of movable-cell dimensions;
    /// filler count soaks `movableArea - nesterovInstsArea`.
    fn init_filler_gcells(&mut self, pb: &PlacerBaseCommon) -> Result<(), PlaceError> {
        let mut dx_stor: Vec<Dbu> = Vec::with_capacity(pb.place_insts.len());
        let mut dy_stor: Vec<Dbu> = Vec::with_capacity(pb.place_insts.len());
        for &id in &pb.place_insts {
            let inst = &pb.instances[id.0 as usize];
            dx_stor.push(inst.dx());
            dy_stor.push(inst.dy());
        }
        if dx_stor.is_empty() {
            return Ok(());
        }
        dx_stor.sort_unstable();
        dy_stor.sort_unstable();

        let mut min_idx = (dx_stor.len() as f64 * 0.05) as usize;
        let mut max_idx = (dx_stor.len() as f64 * 0.95) as usize;
        if min_idx == max_idx {
            min_idx = 0;
            max_idx = dx_stor.len();
        }
        let dx_sum: i64 = dx_stor[min_idx..max_idx].iter().map(|&v| v as i64).sum();
        let dy_sum: i64 = dy_stor[min_idx..max_idx].iter().map(|&v| v as i64).sum();
        self.filler_dx = (dx_sum / (max_idx - min_idx) as i64) as Dbu;
        self.filler_dy = (dy_sum / (max_idx - min_idx) as i64) as Dbu;

        let core_area = self.core.area();
        self.white_space_area = core_area - pb.non_place_insts_area;

        if self.opts.uniform_target_density_mode {
            self.target_density = self.std_insts_area as f32
                / (self.white_space_area - self.macro_insts_area) as f32
                + 0.01;
        }

        let nesterov_instance_area = self.nesterov_insts_area();
        self.movable_area = (self.white_space_area as f64 * self.target_density as f64) as i64;
        self.total_filler_area = self.movable_area - nesterov_instance_area;
        self.uniform_target_density =
            nesterov_instance_area as f32 / self.white_space_area as f32;

        if self.total_filler_area < 0 {
            self.uniform_target_density = (self.uniform_target_density * 100.0).ceil() / 100.0;
            return Err(PlaceError::input_invariant(format!(
                "use a higher target density or re-floorplan with a larger core area \
                 (given: {:.2}, suggested: {:.2})",
                self.target_density, self.uniform_target_density
            )));
        }

        // Cap the filler count at ~10x the instance count equivalent by
        // growing the filler size, bounded by 1024 fillers per core edge.
        let limit_filler_ratio = 10.0f64;
        let filler_scale_factor = (self.total_filler_area as f64
            / (limit_filler_ratio * nesterov_instance_area.max(1) as f64))
            .sqrt();
        if filler_scale_factor > 1.0 {
            let max_edge_fillers = 1024;
            let max_filler_x = (self.core.width() / max_edge_fillers).max(self.filler_dx);
            let max_filler_y = (self.core.height() / max_edge_fillers).max(self.filler_dy);

            self.filler_dx = ((self.filler_dx as f64 * filler_scale_factor) as Dbu).min(max_filler_x);
            self.filler_dy = ((self.filler_dy as f64 * filler_scale_factor) as Dbu).min(max_filler_y);
        }

        let filler_cnt = if self.filler_dx > 0 && self.filler_dy > 0 {
            (self.total_filler_area / (self.filler_dx as i64 * self.filler_dy as i64)) as usize
        } else {
            0
        };

        log::debug!(
            "fillerInit: whiteSpace {}, movable {}, totalFiller {}, cnt {} at {}x{}",
            self.white_space_area,
            self.movable_area,
            self.total_filler_area,
            filler_cnt,
            self.filler_dx,
            self.filler_dy
        );

        let mut rng = XorShift64::new(FILLER_SEED);
        self.fillers.reserve(filler_cnt);
        for _ in 0..filler_cnt {
            let rand_x = rng.next();
            let rand_y = rng.next();
            let cx = (rand_x % self.core.width().max(1) as u64) as Dbu + self.core.lx;
            let cy = (rand_y % self.core.height().max(1) as u64) as Dbu + self.core.ly;
            self.fillers
                .push(GCell::new_filler(cx, cy, self.filler_dx, self.filler_dy));
        }

        Ok(())
    }

    pub fn cell<'a>(&'a self, common: &'a NesterovBaseCommon, r: GCellRef) -> &'a GCell {
        match r {
            GCellRef::Common(i) => &common.gcells[i],
            GCellRef::Filler(i) => &self.fillers[i],
        }
    }

    fn cell_mut<'a>(
        fillers: &'a mut [GCell],
        common: &'a mut NesterovBaseCommon,
        r: GCellRef,
    ) -> &'a mut GCell {
        match r {
            GCellRef::Common(i) => &mut common.gcells[i],
            GCellRef::Filler(i) => &mut fillers[i],
        }
    }

    /// The driver re-seeds these when it retries init with a larger
    /// `initialPrevCoordiUpdateCoef`.
    pub fn set_np_vars(&mut self, np: NesterovPlaceOptions) {
        self.np = np;
    }

    pub fn fillers(&self) -> &[GCell] {
        &self.fillers
    }

    pub fn bin_grid(&self) -> &BinGrid {
        &self.bin_grid
    }

    pub fn target_density(&self) -> f32 {
        self.target_density
    }

    pub fn get_uniform_target_density(&self) -> f32 {
        self.uniform_target_density
    }

    pub fn white_space_area(&self) -> i64 {
        self.white_space_area
    }

    pub fn total_filler_area(&self) -> i64 {
        self.total_filler_area
    }

    pub fn filler_dim(&self) -> (Dbu, Dbu) {
        (self.filler_dx, self.filler_dy)
    }

    /// `stdArea + round(macroArea * targetDensity)`.
    pub fn nesterov_insts_area(&self) -> i64 {
        self.std_insts_area
            + (self.macro_insts_area as f64 * self.target_density as f64).round() as i64
    }

    pub fn wirelength_grad_sum(&self) -> f32 {
        self.wirelength_grad_sum
    }

    pub fn density_grad_sum(&self) -> f32 {
        self.density_grad_sum
    }

    pub fn base_wirelength_coef(&self) -> f32 {
        self.base_wirelength_coef
    }

    pub fn prev_hpwl(&self) -> i64 {
        self.prev_hpwl
    }

    /// Total electrostatic energy of the last field solve.
    pub fn sum_phi(&self) -> f64 {
        self.sum_phi
    }

    pub fn init_coordi(&self) -> &[FloatPoint] {
        &self.init_coordi
    }

    pub fn snapshot_coordi(&self) -> &[FloatPoint] {
        &self.snapshot_coordi
    }

    pub fn cur_coordi(&self) -> &[FloatPoint] {
        &self.cur_coordi
    }

    /// Per-cell sqrt(2)-bin density expansion and scale.
    pub fn update_density_size(&mut self, common: &mut NesterovBaseCommon) {
        let bin_x = self.bin_grid.bin_size_x() as f32;
        let bin_y = self.bin_grid.bin_size_y() as f32;
        for &r in &self.cells {
            let cell = Self::cell_mut(&mut self.fillers, common, r);
            let (scale_x, size_x) = if (cell.dx() as f32) < SQRT2 * bin_x {
                (cell.dx() as f32 / (SQRT2 * bin_x), SQRT2 * bin_x)
            } else {
                (1.0, cell.dx() as f32)
            };
            let (scale_y, size_y) = if (cell.dy() as f32) < SQRT2 * bin_y {
                (cell.dy() as f32 / (SQRT2 * bin_y), SQRT2 * bin_y)
            } else {
                (1.0, cell.dy() as f32)
            };
            cell.set_density_size(size_x as Dbu, size_y as Dbu);
            cell.density_scale = scale_x * scale_y;
        }
    }

    /// Moves real centers (footprint + density bbox together).
    pub fn update_gcell_center_location(
        &mut self,
        common: &mut NesterovBaseCommon,
        coordis: &[FloatPoint],
    ) {
        for (idx, coordi) in coordis.iter().enumerate() {
            let r = self.cells[idx];
            Self::cell_mut(&mut self.fillers, common, r)
                .set_center_location(coordi.x as Dbu, coordi.y as Dbu);
        }
        common.update_pin_locations();
    }

    /// Moves density centers (pins follow them) and re-bins everything.
    pub fn update_gcell_density_center_location(
        &mut self,
        common: &mut NesterovBaseCommon,
        coordis: &[FloatPoint],
    ) {
        for (idx, coordi) in coordis.iter().enumerate() {
            let r = self.cells[idx];
            Self::cell_mut(&mut self.fillers, common, r)
                .set_density_center_location(coordi.x as Dbu, coordi.y as Dbu);
        }
        common.update_pin_density_locations();
        let fillers = &self.fillers;
        let cells = &self.cells;
        self.bin_grid
            .update_bins_gcell_density_area(cells.iter().map(|r| match *r {
                GCellRef::Common(i) => &common.gcells[i],
                GCellRef::Filler(i) => &fillers[i],
            }));
    }

    /// Runs the Poisson solve on the current bin densities and stores
    /// phi/field per bin; also accumulates `sumPhi` for reporting.
    pub fn update_density_force_bin(&mut self) {
        let _span = tracing::debug_span!("update_density_force_bin").entered();

        for bin in self.bin_grid.bins() {
            self.fft.update_density(bin.x, bin.y, bin.density);
        }

        self.fft.do_fft(self.fft_solver.as_ref());

        self.sum_phi = 0.0;
        for bin in self.bin_grid.bins_mut() {
            let (ex, ey) = self.fft.electro_force(bin.x, bin.y);
            bin.electro_force_x = ex;
            bin.electro_force_y = ey;
            let phi = self.fft.electro_phi(bin.x, bin.y);
            bin.electro_phi = phi;
            self.sum_phi += phi as f64
                * (bin.non_place_area + bin.inst_placed_area + bin.filler_area) as f64;
        }
    }

    /// Density gradient of one cell: overlap-weighted field over every bin
    /// the density bbox touches.
    pub fn density_gradient(&self, cell: &GCell) -> FloatPoint {
        let (x0, x1) = self.bin_grid.density_min_max_idx_x(cell);
        let (y0, y1) = self.bin_grid.density_min_max_idx_y(cell);

        let mut force = FloatPoint::default();
        for y in y0..y1 {
            for x in x0..x1 {
                let bin = &self.bin_grid.bins()[[y, x]];
                let lx = bin.lx.max(cell.d_lx);
                let ly = bin.ly.max(cell.d_ly);
                let ux = bin.ux.min(cell.d_ux);
                let uy = bin.uy.min(cell.d_uy);
                if lx >= ux || ly >= uy {
                    continue;
                }
                let overlap = (ux - lx) as f32 * (uy - ly) as f32 * cell.density_scale;
                force.x += overlap * bin.electro_force_x;
                force.y += overlap * bin.electro_force_y;
            }
        }
        force
    }

    /// Density preconditioner: cell area on both axes.
    pub fn density_preconditioner(&self, cell: &GCell) -> FloatPoint {
        let area = cell.dx() as f32 * cell.dy() as f32;
        FloatPoint::new(area, area)
    }

    fn density_coordi_layout_inside_x(&self, cell: &GCell, cx: f32) -> f32 {
        let mut adj = cx;
        let half = cell.d_dx() as f32 / 2.0;
        if cx - half < self.core.lx as f32 {
            adj = self.core.lx as f32 + half;
        }
        if cx + half > self.core.ux as f32 {
            adj = self.core.ux as f32 - half;
        }
        adj
    }

    fn density_coordi_layout_inside_y(&self, cell: &GCell, cy: f32) -> f32 {
        let mut adj = cy;
        let half = cell.d_dy() as f32 / 2.0;
        if cy - half < self.core.ly as f32 {
            adj = self.core.ly as f32 + half;
        }
        if cy + half > self.core.uy as f32 {
            adj = self.core.uy as f32 - half;
        }
        adj
    }

    /// First half of init: allocate state vectors, clamp every cell inside
    /// the core, seed all coordinate sets from current centers, and run the
    /// first density/FFT pass.
    pub fn init_density1(&mut self, common: &mut NesterovBaseCommon) {
        let n = self.cells.len();
        let zero = FloatPoint::default();
        self.cur_slp_coordi = vec![zero; n];
        self.cur_slp_wirelength_grads = vec![zero; n];
        self.cur_slp_density_grads = vec![zero; n];
        self.cur_slp_sum_grads = vec![zero; n];
        self.next_slp_coordi = vec![zero; n];
        self.next_slp_wirelength_grads = vec![zero; n];
        self.next_slp_density_grads = vec![zero; n];
        self.next_slp_sum_grads = vec![zero; n];
        self.prev_slp_coordi = vec![zero; n];
        self.prev_slp_wirelength_grads = vec![zero; n];
        self.prev_slp_density_grads = vec![zero; n];
        self.prev_slp_sum_grads = vec![zero; n];
        self.cur_coordi = vec![zero; n];
        self.next_coordi = vec![zero; n];
        self.init_coordi = vec![zero; n];

        for idx in 0..n {
            let r = self.cells[idx];
            // clamp the density bbox into the core first
            let (lx, ly) = {
                let cell = self.cell(common, r);
                let mut target_lx = cell.d_lx as f32;
                let mut target_ly = cell.d_ly as f32;
                if target_lx < self.core.lx as f32 {
                    target_lx = self.core.lx as f32;
                }
                if target_ly < self.core.ly as f32 {
                    target_ly = self.core.ly as f32;
                }
                if target_lx + cell.d_dx() as f32 > self.core.ux as f32 {
                    target_lx = (self.core.ux - cell.d_dx()) as f32;
                }
                if target_ly + cell.d_dy() as f32 > self.core.uy as f32 {
                    target_ly = (self.core.uy - cell.d_dy()) as f32;
                }
                (target_lx as Dbu, target_ly as Dbu)
            };
            let cell = Self::cell_mut(&mut self.fillers, common, r);
            cell.set_density_location(lx, ly);

            let coordi = FloatPoint::new(cell.d_cx() as f32, cell.d_cy() as f32);
            self.cur_slp_coordi[idx] = coordi;
            self.prev_slp_coordi[idx] = coordi;
            self.cur_coordi[idx] = coordi;
            self.init_coordi[idx] = coordi;
        }

        let coordi = self.cur_slp_coordi.clone();
        self.update_gcell_density_center_location(common, &coordi);

        self.prev_hpwl = common.hpwl();

        self.update_density_force_bin();

        self.base_wirelength_coef = self.np.init_wirelength_coef
            / ((self.bin_grid.bin_size_x() + self.bin_grid.bin_size_y()) as f32 * 0.5);

        let denom = self.nesterov_insts_area() as f64;
        self.sum_overflow = (self.bin_grid.overflow_area() / denom) as f32;
        self.sum_overflow_unscaled = (self.bin_grid.overflow_area_unscaled() / denom) as f32;
    }

    /// Second half of init: derive the initial density penalty from the
    /// gradient-sum ratio and predict the first step length.
    pub fn init_density2(
        &mut self,
        common: &NesterovBaseCommon,
        wl_coef_x: f32,
        wl_coef_y: f32,
    ) -> f32 {
        if self.wirelength_grad_sum == 0.0 {
            self.density_penalty = self.np.init_density_penalty;
            self.update_gradients(SlpSet::Prev, common, wl_coef_x, wl_coef_y);
        }

        if self.wirelength_grad_sum != 0.0 {
            self.density_penalty = (self.wirelength_grad_sum / self.density_grad_sum)
                * self.np.init_density_penalty;
        }

        let denom = self.nesterov_insts_area() as f64;
        self.sum_overflow = (self.bin_grid.overflow_area() / denom) as f32;
        self.sum_overflow_unscaled = (self.bin_grid.overflow_area_unscaled() / denom) as f32;

        self.step_length = Self::get_step_length(
            &self.prev_slp_coordi,
            &self.prev_slp_sum_grads,
            &self.cur_slp_coordi,
            &self.cur_slp_sum_grads,
        );
        self.step_length
    }

    /// `alpha = ||x_cur - x_prev|| / ||g_cur - g_prev||`, RMS 2-norm over
    /// all cells and both axes.
    pub fn get_step_length(
        prev_coordi: &[FloatPoint],
        prev_grads: &[FloatPoint],
        cur_coordi: &[FloatPoint],
        cur_grads: &[FloatPoint],
    ) -> f32 {
        let coordi_distance = get_distance(prev_coordi, cur_coordi);
        let grad_distance = get_distance(prev_grads, cur_grads);
        coordi_distance / grad_distance
    }

    /// Recomputes the wirelength/density/combined gradients for one SLP set
    /// at the current pin and bin state, dividing by the preconditioner.
    pub fn update_gradients(
        &mut self,
        which: SlpSet,
        common: &NesterovBaseCommon,
        wl_coef_x: f32,
        wl_coef_y: f32,
    ) {
        if self.is_converged {
            return;
        }

        let n = self.cells.len();
        let mut wirelength_grads = vec![FloatPoint::default(); n];
        let mut density_grads = vec![FloatPoint::default(); n];
        let mut sum_grads = vec![FloatPoint::default(); n];
        let mut wirelength_grad_sum = 0.0f32;
        let mut density_grad_sum = 0.0f32;

        for idx in 0..n {
            let cell = self.cell(common, self.cells[idx]);
            wirelength_grads[idx] = common.wirelength_gradient_wa(cell, wl_coef_x, wl_coef_y);
            density_grads[idx] = self.density_gradient(cell);

            wirelength_grad_sum += wirelength_grads[idx].x.abs();
            wirelength_grad_sum += wirelength_grads[idx].y.abs();
            density_grad_sum += density_grads[idx].x.abs();
            density_grad_sum += density_grads[idx].y.abs();

            sum_grads[idx].x = wirelength_grads[idx].x + self.density_penalty * density_grads[idx].x;
            sum_grads[idx].y = wirelength_grads[idx].y + self.density_penalty * density_grads[idx].y;

            let wl_precond = common.wirelength_preconditioner(cell);
            let density_precond = self.density_preconditioner(cell);
            let precond_x = (wl_precond.x + self.density_penalty * density_precond.x)
                .max(self.np.min_preconditioner);
            let precond_y = (wl_precond.y + self.density_penalty * density_precond.y)
                .max(self.np.min_preconditioner);

            sum_grads[idx].x /= precond_x;
            sum_grads[idx].y /= precond_y;
        }

        self.wirelength_grad_sum = wirelength_grad_sum;
        self.density_grad_sum = density_grad_sum;

        let (slp_wl, slp_density, slp_sum) = match which {
            SlpSet::Prev => (
                &mut self.prev_slp_wirelength_grads,
                &mut self.prev_slp_density_grads,
                &mut self.prev_slp_sum_grads,
            ),
            SlpSet::Cur => (
                &mut self.cur_slp_wirelength_grads,
                &mut self.cur_slp_density_grads,
                &mut self.cur_slp_sum_grads,
            ),
            SlpSet::Next => (
                &mut self.next_slp_wirelength_grads,
                &mut self.next_slp_density_grads,
                &mut self.next_slp_sum_grads,
            ),
        };
        *slp_wl = wirelength_grads;
        *slp_density = density_grads;
        *slp_sum = sum_grads;
    }

    /// Back-extrapolates `prevSLPCoordi` from the current gradient so the
    /// first step-length prediction has two distinct points.
    pub fn update_initial_prev_slp_coordi(&mut self, common: &NesterovBaseCommon) {
        for idx in 0..self.cells.len() {
            let clamped = {
                let cell = self.cell(common, self.cells[idx]);
                let prev_x = self.cur_slp_coordi[idx].x
                    - self.np.initial_prev_coordi_update_coef * self.cur_slp_sum_grads[idx].x;
                let prev_y = self.cur_slp_coordi[idx].y
                    - self.np.initial_prev_coordi_update_coef * self.cur_slp_sum_grads[idx].y;
                FloatPoint::new(
                    self.density_coordi_layout_inside_x(cell, prev_x),
                    self.density_coordi_layout_inside_y(cell, prev_y),
                )
            };
            self.prev_slp_coordi[idx] = clamped;
        }
    }

    pub fn update_density_center_cur(&mut self, common: &mut NesterovBaseCommon) {
        let coordi = self.cur_coordi.clone();
        self.update_gcell_density_center_location(common, &coordi);
    }

    pub fn update_density_center_prev_slp(&mut self, common: &mut NesterovBaseCommon) {
        let coordi = self.prev_slp_coordi.clone();
        self.update_gcell_density_center_location(common, &coordi);
    }

    pub fn reset_min_sum_overflow(&mut self) {
        self.min_sum_overflow = f32::MAX;
        self.hpwl_with_min_sum_overflow = i64::MAX;
    }

    /// `phiCoef = max(minPhiCoef, maxPhiCoef^(-deltaHpwl/refHpwl))`, with
    /// the full `maxPhiCoef` whenever HPWL improved.
    pub fn get_phi_coef(&self, scaled_diff_hpwl: f32) -> f32 {
        let coef = if scaled_diff_hpwl < 0.0 {
            self.np.max_phi_coef
        } else {
            self.np.max_phi_coef * self.np.max_phi_coef.powf(-scaled_diff_hpwl)
        };
        coef.max(self.np.min_phi_coef)
    }

    /// End-of-iteration bookkeeping: swap prev/cur/next (freezing locked
    /// instances), recompute overflow, and decay the density penalty by the
    /// phi coefficient.
    pub fn update_next_iter(
        &mut self,
        iter: usize,
        common: &mut NesterovBaseCommon,
        pb: &PlacerBaseCommon,
    ) {
        if self.is_converged {
            return;
        }

        std::mem::swap(&mut self.prev_slp_coordi, &mut self.cur_slp_coordi);
        std::mem::swap(
            &mut self.prev_slp_wirelength_grads,
            &mut self.cur_slp_wirelength_grads,
        );
        std::mem::swap(
            &mut self.prev_slp_density_grads,
            &mut self.cur_slp_density_grads,
        );
        std::mem::swap(&mut self.prev_slp_sum_grads, &mut self.cur_slp_sum_grads);

        // locked instances are frozen by copying cur into the next slot
        // before the swap lands
        for idx in 0..self.cells.len() {
            let r = self.cells[idx];
            if let GCellRef::Common(gc) = r {
                if let Some(id) = common.gcells[gc].instance_id() {
                    if pb.instances[id.0 as usize].locked {
                        self.next_slp_coordi[idx] = self.cur_slp_coordi[idx];
                        self.next_slp_wirelength_grads[idx] = self.cur_slp_wirelength_grads[idx];
                        self.next_slp_density_grads[idx] = self.cur_slp_density_grads[idx];
                        self.next_slp_sum_grads[idx] = self.cur_slp_sum_grads[idx];
                        self.next_coordi[idx] = self.cur_coordi[idx];
                    }
                }
            }
        }

        std::mem::swap(&mut self.cur_slp_coordi, &mut self.next_slp_coordi);
        std::mem::swap(
            &mut self.cur_slp_wirelength_grads,
            &mut self.next_slp_wirelength_grads,
        );
        std::mem::swap(
            &mut self.cur_slp_density_grads,
            &mut self.next_slp_density_grads,
        );
        std::mem::swap(&mut self.cur_slp_sum_grads, &mut self.next_slp_sum_grads);
        std::mem::swap(&mut self.cur_coordi, &mut self.next_coordi);

        // In macro-dominated floorplans the movable-area denominator can be
        // tiny; ramp in a fixed-area floor so overflow can still converge.
        let fraction_of_max_iters = iter as f32 / self.np.max_nesterov_iter as f32;
        let overflow_denominator = (self.nesterov_insts_area() as f32)
            .max(fraction_of_max_iters * self.non_place_insts_area as f32 * 0.05);

        self.sum_overflow = self.bin_grid.overflow_area() as f32 / overflow_denominator;
        self.sum_overflow_unscaled =
            self.bin_grid.overflow_area_unscaled() as f32 / overflow_denominator;

        let hpwl = common.hpwl();
        let phi_coef =
            self.get_phi_coef((hpwl - self.prev_hpwl) as f32 / self.np.reference_hpwl);
        self.prev_hpwl = hpwl;
        self.density_penalty *= phi_coef;

        if iter == 0 || (iter + 1) % 10 == 0 {
            log::info!(
                "[NesterovSolve] iter: {:4} overflow: {:.3} HPWL: {}",
                iter + 1,
                self.sum_overflow_unscaled,
                self.prev_hpwl
            );
        }

        if iter > 50 && self.min_sum_overflow > self.sum_overflow_unscaled {
            self.min_sum_overflow = self.sum_overflow_unscaled;
            self.hpwl_with_min_sum_overflow = self.prev_hpwl;
        }
    }

    /// Predicts the next step length from the cur/next SLP pair. Returns
    /// `true` while the backtracking loop should keep shrinking the step;
    /// `false` once the new step is within 5% of the old one (accept) or
    /// pinned at the 0.01 floor.
    pub fn nesterov_update_step_length(&mut self) -> bool {
        if self.is_converged {
            return true;
        }

        let new_step_length = Self::get_step_length(
            &self.cur_slp_coordi,
            &self.cur_slp_sum_grads,
            &self.next_slp_coordi,
            &self.next_slp_sum_grads,
        );

        if new_step_length.is_nan() || new_step_length.is_infinite() {
            self.is_diverged = true;
            self.diverge_kind = Some(DivergeKind::NumericStep);
            self.diverge_msg = "diverged at newStepLength".to_string();
            return false;
        }

        if new_step_length > self.step_length * 0.95 {
            self.step_length = new_step_length;
            return false;
        }
        // continue with a tiny fixed step rather than stalling; matches the
        // legacy HPWL curves on old benchmarks
        if new_step_length < 0.01 {
            self.step_length = 0.01;
            return false;
        }

        self.step_length = new_step_length;
        true
    }

    /// One ascent step: `next = curSLP + alpha*g`, then the Nesterov
    /// extrapolation `nextSLP = next + coeff*(next - cur)`, both clamped
    /// into the core; re-bins and re-solves the field at nextSLP.
    pub fn nesterov_update_coordinates(&mut self, common: &mut NesterovBaseCommon, coeff: f32) {
        if self.is_converged {
            return;
        }

        for idx in 0..self.cells.len() {
            let (next, next_slp) = {
                let cell = self.cell(common, self.cells[idx]);
                let next_x =
                    self.cur_slp_coordi[idx].x + self.step_length * self.cur_slp_sum_grads[idx].x;
                let next_y =
                    self.cur_slp_coordi[idx].y + self.step_length * self.cur_slp_sum_grads[idx].y;
                let next_slp_x = next_x + coeff * (next_x - self.cur_coordi[idx].x);
                let next_slp_y = next_y + coeff * (next_y - self.cur_coordi[idx].y);
                (
                    FloatPoint::new(
                        self.density_coordi_layout_inside_x(cell, next_x),
                        self.density_coordi_layout_inside_y(cell, next_y),
                    ),
                    FloatPoint::new(
                        self.density_coordi_layout_inside_x(cell, next_slp_x),
                        self.density_coordi_layout_inside_y(cell, next_slp_y),
                    ),
                )
            };
            self.next_coordi[idx] = next;
            self.next_slp_coordi[idx] = next_slp;
        }

        let coordi = self.next_slp_coordi.clone();
        self.update_gcell_density_center_location(common, &coordi);
        self.update_density_force_bin();
    }

    /// One-shot shrink of `maxPhiCoef` once overflow first drops below
    /// 0.35, which keeps very large designs from oscillating.
    pub fn nesterov_adjust_phi(&mut self) {
        if self.is_converged {
            return;
        }
        if !self.is_max_phi_coef_changed && self.sum_overflow_unscaled < 0.35 {
            self.is_max_phi_coef_changed = true;
            self.np.max_phi_coef *= 0.99;
        }
    }

    /// Saves the routability-revert state.
    pub fn snapshot(&mut self) {
        if self.is_converged {
            return;
        }
        self.snapshot_coordi = self.cur_coordi.clone();
        self.snapshot_slp_coordi = self.cur_slp_coordi.clone();
        self.snapshot_slp_sum_grads = self.cur_slp_sum_grads.clone();
        self.snapshot_density_penalty = self.density_penalty;
        self.snapshot_step_length = self.step_length;
    }

    /// Converged when unscaled overflow reaches the target; locks every
    /// instance in this region so later regions cannot move them.
    pub fn check_convergence(
        &mut self,
        common: &NesterovBaseCommon,
        pb: &mut PlacerBaseCommon,
    ) -> bool {
        if self.is_converged {
            return true;
        }
        if self.sum_overflow_unscaled <= self.np.target_overflow {
            log::info!(
                "[NesterovSolve] finished with overflow {:.6}",
                self.sum_overflow_unscaled
            );
            for &r in &self.cells {
                if let GCellRef::Common(gc) = r {
                    if let Some(id) = common.gcells[gc].instance_id() {
                        pb.instances[id.0 as usize].locked = true;
                    }
                }
            }
            self.is_converged = true;
            return true;
        }
        false
    }

    /// Code-307 detector: overflow bounced back above its best while HPWL
    /// also regressed 20%.
    pub fn check_divergence(&mut self) -> bool {
        if self.sum_overflow_unscaled < 0.2
            && self.sum_overflow_unscaled - self.min_sum_overflow >= 0.02
            && self.hpwl_with_min_sum_overflow as f32 * 1.2 < self.prev_hpwl as f32
        {
            self.diverge_msg =
                "divergence detected; re-run with a smaller maxPhiCoef".to_string();
            self.diverge_kind = Some(DivergeKind::Overflow);
            self.is_diverged = true;
        }
        self.is_diverged
    }

    /// Restores the snapshot state and clears the divergence flags
    /// ("revert-then-fatal", first half).
    pub fn revert_divergence(&mut self, common: &mut NesterovBaseCommon) {
        if self.is_converged {
            return;
        }
        self.cur_coordi = self.snapshot_coordi.clone();
        self.cur_slp_coordi = self.snapshot_slp_coordi.clone();
        self.cur_slp_sum_grads = self.snapshot_slp_sum_grads.clone();
        self.density_penalty = self.snapshot_density_penalty;
        self.step_length = self.snapshot_step_length;

        let coordi = self.cur_coordi.clone();
        self.update_gcell_density_center_location(common, &coordi);
        self.update_density_force_bin();

        self.is_diverged = false;
        self.diverge_kind = None;
        self.diverge_msg.clear();
    }

    /// Re-derives the area totals after the routability bloat resized std
    /// cells; fails with the code-303 kind when no filler room is left.
    pub fn update_areas(&mut self, common: &NesterovBaseCommon) -> Result<(), PlaceError> {
        let mut std_area = 0i64;
        let mut macro_area = 0i64;
        for &r in &self.cells {
            let cell = self.cell(common, r);
            if cell.is_macro_instance() {
                macro_area += cell.area();
            } else if cell.is_std_instance() {
                std_area += cell.area();
            }
        }
        self.std_insts_area = std_area;
        self.macro_insts_area = macro_area;

        self.white_space_area = self.core.area() - self.non_place_insts_area;
        self.movable_area = (self.white_space_area as f64 * self.target_density as f64) as i64;
        self.total_filler_area = self.movable_area - self.nesterov_insts_area();
        self.uniform_target_density =
            self.nesterov_insts_area() as f32 / self.white_space_area as f32;

        if self.total_filler_area < 0 {
            return Err(PlaceError::RoutabilityUnsolvable(format!(
                "no filler room after bloat; use a higher target density (given: {:.2}, \
                 suggested: {:.2})",
                self.target_density, self.uniform_target_density
            )));
        }
        Ok(())
    }

    /// Propagates a new target density to the bins and re-derives the
    /// fixed-overlap areas.
    pub fn set_target_density(&mut self, density: f32, pb: &PlacerBaseCommon) {
        self.target_density = density;
        self.bin_grid.set_target_density(density);
        self.bin_grid.update_bins_non_place_area(pb);
    }
}

/// RMS 2-norm distance over both axes of two equally sized vectors.
fn get_distance(a: &[FloatPoint], b: &[FloatPoint]) -> f32 {
    let mut sum = 0.0f64;
    for (pa, pb) in a.iter().zip(b) {
        sum += (pa.x as f64 - pb.x as f64).powi(2);
        sum += (pa.y as f64 - pb.y as f64).powi(2);
    }
    ((sum / (2.0 * a.len() as f64)) as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fft::NaiveDctSolver;
    use crate::nesterov_place::NesterovPlaceOptions;
    use placer_common::{
        Die, NetlistSource, RawInstance, RawNet, RawPin, RawRow, RawSignalType,
    };

    struct GridNetlist {
        insts: usize,
    }

    impl NetlistSource for GridNetlist {
        fn die(&self) -> anyhow::Result<Die> {
            Ok(Die::new(Rect::new(0, 0, 2000, 2000), Rect::new(0, 0, 2000, 2000)).unwrap())
        }
        fn instances(&self) -> anyhow::Result<Vec<RawInstance>> {
            Ok((0..self.insts)
                .map(|i| RawInstance {
                    handle: i as u64 + 1,
                    lx: (i as Dbu % 10) * 40,
                    ly: (i as Dbu / 10) * 40,
                    ux: (i as Dbu % 10) * 40 + 20,
                    uy: (i as Dbu / 10) * 40 + 20,
                    fixed: false,
                    is_macro: false,
                    region: None,
                })
                .collect())
        }
        fn pins(&self) -> anyhow::Result<Vec<RawPin>> {
            Ok((0..self.insts)
                .map(|i| RawPin {
                    instance: Some(i as u64 + 1),
                    net: 1 + (i as u64 / 2),
                    offset_cx: 0,
                    offset_cy: 0,
                    cx: 0,
                    cy: 0,
                })
                .collect())
        }
        fn nets(&self) -> anyhow::Result<Vec<RawNet>> {
            Ok((0..self.insts as u64 / 2 + 1)
                .map(|i| RawNet {
                    handle: 1 + i,
                    signal_type: RawSignalType::Signal,
                })
                .collect())
        }
        fn rows(&self) -> anyhow::Result<Vec<RawRow>> {
            Ok((0..100)
                .map(|i| RawRow {
                    lx: 0,
                    ly: i * 20,
                    site_width: 20,
                    site_height: 20,
                    num_sites: 100,
                })
                .collect())
        }
        fn blockages(&self) -> anyhow::Result<Vec<placer_common::RawBlockage>> {
            Ok(vec![])
        }
        fn regions(&self) -> anyhow::Result<Vec<placer_common::RawRegion>> {
            Ok(vec![])
        }
    }

    fn build_region(
        target_density: f32,
    ) -> (NesterovBase, NesterovBaseCommon, PlacerBaseCommon) {
        let pb = PlacerBaseCommon::from_netlist(&GridNetlist { insts: 40 }, 0, 0, false).unwrap();
        let mut common = NesterovBaseCommon::build(&pb);
        let nb = NesterovBase::new(
            NesterovBaseOptions {
                target_density,
                ..Default::default()
            },
            NesterovPlaceOptions::default(),
            &mut common,
            &pb,
            Box::new(NaiveDctSolver),
        )
        .unwrap();
        (nb, common, pb)
    }

    #[test]
    fn filler_area_identity_holds() {
        let (nb, _, _) = build_region(0.7);
        let (fx, fy) = nb.filler_dim();
        let filler_area = nb.fillers().len() as i64 * fx as i64 * fy as i64;
        let total = nb.total_filler_area();
        assert!(total > 0);
        let rel_err = (filler_area - total).abs() as f64 / total as f64;
        assert!(rel_err <= 0.05, "rel_err = {rel_err}");
    }

    #[test]
    fn fillers_start_inside_the_core() {
        let (nb, _, _) = build_region(0.7);
        for filler in nb.fillers() {
            assert!(filler.cx() >= 0 && filler.cx() <= 2000);
            assert!(filler.cy() >= 0 && filler.cy() <= 2000);
        }
    }

    #[test]
    fn too_low_target_density_is_rejected() {
        let pb = PlacerBaseCommon::from_netlist(&GridNetlist { insts: 40 }, 0, 0, false).unwrap();
        let mut common = NesterovBaseCommon::build(&pb);
        let result = NesterovBase::new(
            NesterovBaseOptions {
                // 40 cells of 400 each = 16000 over a 4M core; density
                // 1e-4 leaves negative filler area
                target_density: 0.000_1,
                ..Default::default()
            },
            NesterovPlaceOptions::default(),
            &mut common,
            &pb,
            Box::new(NaiveDctSolver),
        );
        assert!(result.is_err());
    }

    #[test]
    fn density_size_expands_small_cells() {
        let (mut nb, mut common, _) = build_region(0.7);
        nb.update_density_size(&mut common);
        let bin_x = nb.bin_grid().bin_size_x() as f32;
        for &r in &nb.cells {
            let cell = nb.cell(&common, r);
            if (cell.dx() as f32) < SQRT2 * bin_x {
                assert!(cell.density_scale < 1.0);
                assert!(cell.d_dx() >= cell.dx());
            }
        }
    }

    #[test]
    fn init_density_keeps_cells_inside_core_and_overflow_positive() {
        let (mut nb, mut common, _) = build_region(0.7);
        nb.init_density1(&mut common);
        for &r in &nb.cells {
            let cell = nb.cell(&common, r);
            assert!(cell.d_lx >= 0 && cell.d_ux <= 2000, "{:?}", cell.kind);
            assert!(cell.d_ly >= 0 && cell.d_uy <= 2000);
        }
        assert!(nb.sum_overflow >= 0.0);
    }

    #[test]
    fn phi_coef_respects_bounds() {
        let (nb, _, _) = build_region(0.7);
        // improving HPWL gets the max coefficient
        assert_eq!(nb.get_phi_coef(-0.5), nb.np.max_phi_coef);
        // heavy regression decays toward the min coefficient
        assert_eq!(nb.get_phi_coef(1e3), nb.np.min_phi_coef);
        let mid = nb.get_phi_coef(0.5);
        assert!(mid > nb.np.min_phi_coef && mid <= nb.np.max_phi_coef);
    }

    #[test]
    fn step_length_is_distance_ratio() {
        let a = vec![FloatPoint::new(0.0, 0.0), FloatPoint::new(1.0, 1.0)];
        let b = vec![FloatPoint::new(2.0, 0.0), FloatPoint::new(3.0, 1.0)];
        let ga = vec![FloatPoint::new(0.0, 0.0); 2];
        let gb = vec![FloatPoint::new(1.0, 0.0); 2];
        let step = NesterovBase::get_step_length(&a, &ga, &b, &gb);
        // coordi distance 2/sqrt(2)... both RMS over 4 components: sqrt(8/4)
        // grad distance sqrt(2/4)
        assert!((step - 2.0).abs() < 1e-6, "step = {step}");
    }

    #[test]
    fn snapshot_and_revert_restore_coordinates_bit_exactly() {
        let (mut nb, mut common, _) = build_region(0.7);
        nb.init_density1(&mut common);
        common.update_wirelength_force_wa(1e-4, 1e-4);
        nb.update_gradients(SlpSet::Cur, &common, 1e-4, 1e-4);
        nb.snapshot();
        let saved = nb.snapshot_coordi().to_vec();

        // wander off
        let moved: Vec<FloatPoint> = saved
            .iter()
            .map(|p| FloatPoint::new(p.x + 100.0, p.y + 50.0))
            .collect();
        nb.cur_coordi = moved;
        nb.revert_divergence(&mut common);

        assert_eq!(nb.cur_coordi(), saved.as_slice());
        assert!(!nb.is_diverged);
    }

    #[test]
    fn check_divergence_trips_on_overflow_regression() {
        let (mut nb, _, _) = build_region(0.7);
        nb.min_sum_overflow = 0.1;
        nb.hpwl_with_min_sum_overflow = 1_000_000;
        nb.sum_overflow_unscaled = 0.15;
        nb.prev_hpwl = 2_000_000;
        assert!(nb.check_divergence());
        assert_eq!(nb.diverge_kind, Some(DivergeKind::Overflow));
    }

    #[test]
    fn convergence_locks_instances() {
        let (mut nb, common, mut pb) = build_region(0.7);
        nb.sum_overflow_unscaled = 0.05;
        assert!(nb.check_convergence(&common, &mut pb));
        assert!(nb.is_converged);
        for &id in &pb.place_insts {
            assert!(pb.instances[id.0 as usize].locked);
        }
    }
}
