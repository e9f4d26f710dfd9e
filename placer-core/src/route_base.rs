//! Routability-driven cell bloating: one router congestion pass per
//! call, per-tile inflation ratios from edge usage/capacity, std-cell
//! bloat by sqrt(inflatedRatio), and the min-RC snapshot that everything
//! reverts to when bloating stops helping.

use placer_common::{Dbu, GlobalRouter, PlaceError, RouteLayerUsage, RouteUsageGrid};

use crate::nesterov_base::NesterovBase;
use crate::nesterov_common::NesterovBaseCommon;
use crate::placer_base::PlacerBaseCommon;

#[derive(Debug, Clone, Copy)]
pub struct RouteBaseOptions {
    pub inflation_ratio_coef: f32,
    pub max_inflation_ratio: f32,
    pub max_density: f32,
    pub target_rc: f32,
    pub ignore_edge_ratio: f32,
    pub min_inflation_ratio: f32,
    /// RC metric blend weights for the top 0.5% / 1% / 2% / 5% congested
    /// edges.
    pub rc_k1: f32,
    pub rc_k2: f32,
    pub rc_k3: f32,
    pub rc_k4: f32,
    pub max_bloat_iter: u32,
    pub max_inflation_iter: u32,
}

impl Default for RouteBaseOptions {
    fn default() -> Self {
        Self {
            inflation_ratio_coef: 2.5,
            max_inflation_ratio: 2.5,
            max_density: 0.90,
            target_rc: 1.25,
            ignore_edge_ratio: 0.8,
            min_inflation_ratio: 1.01,
            rc_k1: 1.0,
            rc_k2: 1.0,
            rc_k3: 0.0,
            rc_k4: 0.0,
            max_bloat_iter: 1,
            max_inflation_iter: 4,
        }
    }
}

pub struct RouteBase {
    opts: RouteBaseOptions,
    num_call: u32,
    inflation_iter_cnt: u32,
    bloat_iter_cnt: u32,

    min_rc: f32,
    min_rc_target_density: f32,
    min_rc_violated_cnt: u32,
    /// Std-cell (dx,dy) captured at the lowest-RC call, per common gcell.
    min_rc_cell_size: Vec<(Dbu, Dbu)>,

    inflated_area_delta: i64,
}

impl RouteBase {
    pub fn new(opts: RouteBaseOptions, common: &NesterovBaseCommon) -> Self {
        let min_rc_cell_size = common.gcells.iter().map(|g| (g.dx(), g.dy())).collect();
        Self {
            opts,
            num_call: 0,
            inflation_iter_cnt: 0,
            bloat_iter_cnt: 0,
            min_rc: f32::MAX,
            min_rc_target_density: 0.0,
            min_rc_violated_cnt: 0,
            min_rc_cell_size,
            inflated_area_delta: 0,
        }
    }

    pub fn num_call(&self) -> u32 {
        self.num_call
    }

    pub fn inflated_area_delta(&self) -> i64 {
        self.inflated_area_delta
    }

    fn increase_counter(&mut self) {
        self.num_call += 1;
        self.inflation_iter_cnt += 1;
        if self.inflation_iter_cnt > self.opts.max_inflation_iter {
            self.inflation_iter_cnt = 0;
            self.bloat_iter_cnt += 1;
        }
        log::info!(
            "routability numCall: {} inflationIterCnt: {} bloatIterCnt: {}",
            self.num_call,
            self.inflation_iter_cnt,
            self.bloat_iter_cnt
        );
    }

    /// One routability pass. Returns `(is_routability_need,
    /// is_revert_init_needed)`: the driver restores its snapshot whenever
    /// either is true, and permanently stops calling when the first is
    /// false.
    pub fn routability(
        &mut self,
        common: &mut NesterovBaseCommon,
        nb: &mut NesterovBase,
        pb: &PlacerBaseCommon,
        router: &mut dyn GlobalRouter,
    ) -> Result<(bool, bool), PlaceError> {
        let _span = tracing::info_span!("routability").entered();
        self.increase_counter();

        let grid = router
            .route_congestion_pass()
            .map_err(|e| PlaceError::input_invariant(format!("global router failed: {e}")))?;

        let cur_rc = self.get_rc(&grid);

        if cur_rc < self.opts.target_rc {
            log::info!("FinalRC {cur_rc:.4} below target {:.4}; no routability needed", self.opts.target_rc);
            return Ok((false, false));
        }

        if self.min_rc > cur_rc {
            self.min_rc = cur_rc;
            self.min_rc_target_density = nb.target_density();
            self.min_rc_violated_cnt = 0;
            for (i, gcell) in common.gcells.iter().enumerate() {
                if gcell.is_std_instance() {
                    self.min_rc_cell_size[i] = (gcell.dx(), gcell.dy());
                }
            }
        } else {
            self.min_rc_violated_cnt += 1;
        }

        let inflation = self.tile_inflation(&grid);

        self.inflated_area_delta = 0;
        let tile_cnt_x = grid.tile_cnt_x;
        for gcell in common.gcells.iter_mut() {
            if !gcell.is_std_instance() {
                continue;
            }
            let idx_x = (((gcell.d_cx() - grid.lx) / grid.tile_size_x.max(1)) as usize)
                .min(grid.tile_cnt_x.saturating_sub(1));
            let idx_y = (((gcell.d_cy() - grid.ly) / grid.tile_size_y.max(1)) as usize)
                .min(grid.tile_cnt_y.saturating_sub(1));
            let inflated_ratio = inflation[idx_y * tile_cnt_x + idx_x];
            if inflated_ratio <= 1.0 {
                continue;
            }

            let prev_cell_area = gcell.area();
            let new_dx = (gcell.dx() as f32 * inflated_ratio.sqrt()).round() as Dbu;
            let new_dy = (gcell.dy() as f32 * inflated_ratio.sqrt()).round() as Dbu;
            gcell.set_size(new_dx, new_dy);
            self.inflated_area_delta += gcell.area() - prev_cell_area;
        }

        log::info!(
            "inflatedAreaDelta: {} (rc {cur_rc:.4}, minRc {:.4})",
            self.inflated_area_delta,
            self.min_rc
        );

        let total_gcell_area =
            self.inflated_area_delta + nb.nesterov_insts_area() + nb.total_filler_area();
        nb.set_target_density(
            total_gcell_area as f32 / nb.white_space_area() as f32,
            pb,
        );

        // max-density breach or no RC improvement 3 calls in a row: give
        // back the bloat and ask the driver to restore its snapshot
        if nb.target_density() > self.opts.max_density || self.min_rc_violated_cnt >= 3 {
            log::info!(
                "reverting routability (savedMinRC {:.4}, savedTargetDensity {:.4})",
                self.min_rc,
                self.min_rc_target_density
            );
            nb.set_target_density(self.min_rc_target_density, pb);
            self.revert_gcell_size_to_min_rc(common);
            nb.update_density_size(common);
            self.inflated_area_delta = 0;
            return Ok((false, true));
        }

        nb.update_areas(common)?;
        log::info!("newTargetDensity: {:.4}", nb.target_density());
        nb.update_density_size(common);
        self.inflated_area_delta = 0;

        Ok((true, true))
    }

    /// Restores every std cell to the size it had at the lowest-RC call.
    pub fn revert_gcell_size_to_min_rc(&self, common: &mut NesterovBaseCommon) {
        for (i, gcell) in common.gcells.iter_mut().enumerate() {
            if gcell.is_std_instance() {
                let (dx, dy) = self.min_rc_cell_size[i];
                gcell.set_size(dx, dy);
            }
        }
    }

    /// Per-tile inflated ratio: the worst usage/capacity ratio across
    /// layers (direction-aware neighbor edges folded in), raised to
    /// `inflationRatioCoef` and capped, 1.0 where below the threshold.
    fn tile_inflation(&self, grid: &RouteUsageGrid) -> Vec<f32> {
        let mut inflation = vec![1.0f32; grid.tile_count()];
        for y in 0..grid.tile_cnt_y {
            for x in 0..grid.tile_cnt_x {
                let idx = y * grid.tile_cnt_x + x;
                let mut max_ratio = 0.0f32;
                for layer in &grid.layers {
                    let mut ratio = usage_capacity_ratio(layer, idx, self.opts.ignore_edge_ratio);
                    // a horizontal layer's left edge belongs to the left
                    // neighbor; a vertical layer's bottom edge to the lower
                    if layer.horizontal && x >= 1 {
                        ratio = ratio.max(usage_capacity_ratio(
                            layer,
                            idx - 1,
                            self.opts.ignore_edge_ratio,
                        ));
                    }
                    if !layer.horizontal && y >= 1 {
                        ratio = ratio.max(usage_capacity_ratio(
                            layer,
                            idx - grid.tile_cnt_x,
                            self.opts.ignore_edge_ratio,
                        ));
                    }
                    max_ratio = max_ratio.max(ratio.max(0.0));
                }
                if max_ratio >= self.opts.min_inflation_ratio {
                    inflation[idx] = max_ratio
                        .powf(self.opts.inflation_ratio_coef)
                        .min(self.opts.max_inflation_ratio);
                }
            }
        }
        inflation
    }

    /// The RC metric: the rcK-weighted blend of the average of the top
    /// 0.5% / 1% / 2% / 5% congested edges, worse axis per percentile.
    fn get_rc(&self, grid: &RouteUsageGrid) -> f32 {
        let mut hor: Vec<f32> = Vec::new();
        let mut ver: Vec<f32> = Vec::new();

        for layer in &grid.layers {
            for idx in 0..grid.tile_count() {
                let ratio = usage_capacity_ratio(layer, idx, self.opts.ignore_edge_ratio);
                if ratio >= 0.0 {
                    if layer.horizontal {
                        hor.push(ratio);
                    } else {
                        ver.push(ratio);
                    }
                }
            }
        }

        hor.sort_unstable_by(|a, b| b.partial_cmp(a).unwrap());
        ver.sort_unstable_by(|a, b| b.partial_cmp(a).unwrap());

        let top_avg = |arr: &[f32], fraction: f64| -> f32 {
            if arr.is_empty() {
                return 0.0;
            }
            let take = (fraction * arr.len() as f64).ceil().max(1.0) as usize;
            let take = take.min(arr.len());
            arr[..take].iter().sum::<f32>() / take as f32
        };

        let k_sum = self.opts.rc_k1 + self.opts.rc_k2 + self.opts.rc_k3 + self.opts.rc_k4;
        let final_rc = (self.opts.rc_k1 * top_avg(&hor, 0.005).max(top_avg(&ver, 0.005))
            + self.opts.rc_k2 * top_avg(&hor, 0.01).max(top_avg(&ver, 0.01))
            + self.opts.rc_k3 * top_avg(&hor, 0.02).max(top_avg(&ver, 0.02))
            + self.opts.rc_k4 * top_avg(&hor, 0.05).max(top_avg(&ver, 0.05)))
            / k_sum;

        log::info!("finalRC: {final_rc:.4}");
        final_rc
    }
}

/// Edge usage over effective capacity; tiles with no capacity or with a
/// blockage share past `ignoreEdgeRatio` are hidden (negative sentinel).
fn usage_capacity_ratio(layer: &RouteLayerUsage, idx: usize, ignore_edge_ratio: f32) -> f32 {
    let capacity = layer.capacity[idx];
    if capacity == 0 {
        return f32::MIN;
    }
    let blockage_ratio = layer.blockage[idx] as f32 / capacity as f32;
    if blockage_ratio >= ignore_edge_ratio {
        return f32::MIN;
    }
    layer.usage[idx] as f32 / capacity as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform_grid(usage: u32, capacity: u32) -> RouteUsageGrid {
        RouteUsageGrid {
            lx: 0,
            ly: 0,
            tile_size_x: 1000,
            tile_size_y: 1000,
            tile_cnt_x: 2,
            tile_cnt_y: 2,
            layers: vec![RouteLayerUsage {
                horizontal: true,
                capacity: vec![capacity; 4],
                usage: vec![usage; 4],
                blockage: vec![0; 4],
            }],
        }
    }

    struct FakeRouter {
        grid: RouteUsageGrid,
        calls: u32,
    }

    impl GlobalRouter for FakeRouter {
        fn route_congestion_pass(&mut self) -> anyhow::Result<RouteUsageGrid> {
            self.calls += 1;
            Ok(self.grid.clone())
        }
    }

    fn empty_common() -> NesterovBaseCommon {
        NesterovBaseCommon {
            gcells: vec![],
            gpins: vec![],
            gnets: vec![],
            inst_to_gcell: std::collections::HashMap::new(),
        }
    }

    #[test]
    fn rc_metric_blends_top_percentiles() {
        let rb = RouteBase::new(RouteBaseOptions::default(), &empty_common());
        // all edges at ratio 1.5: every percentile average is 1.5
        let rc = rb.get_rc(&uniform_grid(15, 10));
        assert!((rc - 1.5).abs() < 1e-6, "rc = {rc}");
    }

    #[test]
    fn blocked_edges_are_hidden_from_the_metric() {
        let rb = RouteBase::new(RouteBaseOptions::default(), &empty_common());
        let mut grid = uniform_grid(15, 10);
        grid.layers[0].blockage = vec![9; 4];
        // blockage ratio 0.9 >= ignoreEdgeRatio 0.8 hides every edge
        let rc = rb.get_rc(&grid);
        assert_eq!(rc, 0.0);
    }

    #[test]
    fn inflation_caps_at_max_ratio() {
        let rb = RouteBase::new(RouteBaseOptions::default(), &empty_common());
        let inflation = rb.tile_inflation(&uniform_grid(30, 10));
        // ratio 3.0^2.5 well above the 2.5 cap
        for v in inflation {
            assert!((v - 2.5).abs() < 1e-6);
        }
    }

    #[test]
    fn below_threshold_tiles_do_not_inflate() {
        let rb = RouteBase::new(RouteBaseOptions::default(), &empty_common());
        let inflation = rb.tile_inflation(&uniform_grid(9, 10));
        for v in inflation {
            assert_eq!(v, 1.0);
        }
    }

    mod with_region {
        use super::*;
        use crate::fft::NaiveDctSolver;
        use crate::nesterov_base::{NesterovBase, NesterovBaseOptions};
        use crate::nesterov_place::NesterovPlaceOptions;
        use crate::placer_base::PlacerBaseCommon;
        use placer_common::{
            Die, NetlistSource, RawInstance, RawNet, RawPin, RawRow, RawSignalType, Rect,
        };

        struct CellRow;

        impl NetlistSource for CellRow {
            fn die(&self) -> anyhow::Result<Die> {
                Ok(Die::new(Rect::new(0, 0, 2000, 2000), Rect::new(0, 0, 2000, 2000)).unwrap())
            }
            fn instances(&self) -> anyhow::Result<Vec<RawInstance>> {
                Ok((0..8)
                    .map(|i| RawInstance {
                        handle: i + 1,
                        lx: (i as i32) * 200,
                        ly: 500,
                        ux: (i as i32) * 200 + 20,
                        uy: 520,
                        fixed: false,
                        is_macro: false,
                        region: None,
                    })
                    .collect())
            }
            fn pins(&self) -> anyhow::Result<Vec<RawPin>> {
                Ok((0..8)
                    .map(|i| RawPin {
                        instance: Some(i + 1),
                        net: 1,
                        offset_cx: 0,
                        offset_cy: 0,
                        cx: 0,
                        cy: 0,
                    })
                    .collect())
            }
            fn nets(&self) -> anyhow::Result<Vec<RawNet>> {
                Ok(vec![RawNet {
                    handle: 1,
                    signal_type: RawSignalType::Signal,
                }])
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

        #[test]
        fn three_calls_without_improvement_revert_to_min_rc_sizes() {
            let pb = PlacerBaseCommon::from_netlist(&CellRow, 0, 0, false).unwrap();
            let mut common = crate::nesterov_common::NesterovBaseCommon::build(&pb);
            let mut nb = NesterovBase::new(
                NesterovBaseOptions::default(),
                NesterovPlaceOptions::default(),
                &mut common,
                &pb,
                Box::new(NaiveDctSolver),
            )
            .unwrap();

            let original_sizes: Vec<_> = common.gcells.iter().map(|g| (g.dx(), g.dy())).collect();

            let mut rb = RouteBase::new(
                RouteBaseOptions {
                    // high ceiling so only the 3-strikes rule can trigger
                    max_density: 10.0,
                    ..Default::default()
                },
                &common,
            );
            let mut router = FakeRouter {
                grid: uniform_grid(15, 10),
                calls: 0,
            };

            // call 1 snapshots the pre-bloat sizes, calls 2-4 see the same
            // RC and the fourth strikes out
            for call in 0..3 {
                let (need, revert) = rb
                    .routability(&mut common, &mut nb, &pb, &mut router)
                    .unwrap();
                assert!(need, "call {call} should keep asking for bloat");
                assert!(revert);
            }
            assert!(common.gcells.iter().zip(&original_sizes).any(|(g, &(dx, _))| g.dx() > dx));

            let (need, revert_init) = rb
                .routability(&mut common, &mut nb, &pb, &mut router)
                .unwrap();
            assert!(!need);
            assert!(revert_init);
            assert_eq!(router.calls, 4);

            // S6: std-cell sizes restored to the min-RC snapshot exactly
            for (gcell, &(dx, dy)) in common.gcells.iter().zip(&original_sizes) {
                assert_eq!(gcell.dx(), dx);
                assert_eq!(gcell.dy(), dy);
            }
        }
    }
}
