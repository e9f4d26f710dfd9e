//! The Nesterov outer driver: bounded-retry initialization, the
//! accelerated-gradient iteration with backtracking, the wirelength
//! coefficient schedule, snapshot/revert on divergence, and the in-loop
//! hand-offs to `RouteBase` and `TimingBase`.

use placer_common::{
    DivergeKind, GlobalRouter, GraphicsSink, NetlistSink, PlaceError, Resizer,
};

use crate::nesterov_base::{NesterovBase, SlpSet};
use crate::nesterov_common::NesterovBaseCommon;
use crate::placer_base::PlacerBaseCommon;
use crate::route_base::RouteBase;
use crate::timing_base::TimingBase;

pub const MAX_RECURSION_WL_COEF: u32 = 10;
pub const MAX_RECURSION_INIT_SLP_COEF: u32 = 10;

#[derive(Debug, Clone, Copy)]
pub struct NesterovPlaceOptions {
    pub max_nesterov_iter: usize,
    pub max_back_track: usize,
    pub init_density_penalty: f32,
    pub init_wirelength_coef: f32,
    pub target_overflow: f32,
    pub min_phi_coef: f32,
    pub max_phi_coef: f32,
    pub min_preconditioner: f32,
    pub initial_prev_coordi_update_coef: f32,
    pub reference_hpwl: f32,
    pub routability_check_overflow: f32,
    pub timing_driven_mode: bool,
    pub routability_driven_mode: bool,
}

impl Default for NesterovPlaceOptions {
    fn default() -> Self {
        Self {
            max_nesterov_iter: 5000,
            max_back_track: 10,
            init_density_penalty: 0.000_08,
            init_wirelength_coef: 0.25,
            target_overflow: 0.1,
            min_phi_coef: 0.95,
            max_phi_coef: 1.05,
            min_preconditioner: 1.0,
            initial_prev_coordi_update_coef: 100.0,
            reference_hpwl: 446_000_000.0,
            routability_check_overflow: 0.2,
            timing_driven_mode: false,
            routability_driven_mode: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NesterovPlaceResult {
    pub iterations: usize,
    pub final_hpwl: i64,
    pub final_overflow: f32,
    pub reverted: bool,
}

/// External collaborators the driver may call mid-loop. All optional; a
/// missing router/resizer simply disables that mode.
pub struct Collaborators<'a, 'b> {
    pub sink: &'a mut dyn NetlistSink,
    pub graphics: &'a mut dyn GraphicsSink,
    pub router: Option<&'a mut dyn GlobalRouter>,
    pub resizer: Option<&'a mut dyn Resizer>,
    pub route_base: Option<&'b mut RouteBase>,
    pub timing_base: Option<&'b mut TimingBase>,
}

pub struct NesterovPlace {
    np: NesterovPlaceOptions,
    wirelength_coef_x: f32,
    wirelength_coef_y: f32,
    base_wirelength_coef: f32,
    total_sum_overflow: f32,
    average_overflow: f32,
    total_sum_overflow_unscaled: f32,
    average_overflow_unscaled: f32,
    recursion_cnt_wl_coef: u32,
    recursion_cnt_init_slp_coef: u32,
    is_diverged: bool,
    diverge_kind: Option<DivergeKind>,
    diverge_msg: String,
    is_routability_need: bool,
}

impl NesterovPlace {
    pub fn new(np: NesterovPlaceOptions) -> Self {
        Self {
            np,
            wirelength_coef_x: 0.0,
            wirelength_coef_y: 0.0,
            base_wirelength_coef: 0.0,
            total_sum_overflow: 0.0,
            average_overflow: 0.0,
            total_sum_overflow_unscaled: 0.0,
            average_overflow_unscaled: 0.0,
            recursion_cnt_wl_coef: 0,
            recursion_cnt_init_slp_coef: 0,
            is_diverged: false,
            diverge_kind: None,
            diverge_msg: String::new(),
            is_routability_need: true,
        }
    }

    /// Wirelength coefficient schedule: `gamma = base * f(overflow)`
    /// with `f` clamped to [0.1, 10] across the overflow range.
    fn update_wirelength_coef(&mut self, overflow: f32) {
        let coef = if overflow > 1.0 {
            0.1
        } else if overflow < 0.1 {
            10.0
        } else {
            1.0 / 10.0f32.powf((overflow - 0.1) * 20.0 / 9.0 - 1.0)
        };
        self.wirelength_coef_x = coef * self.base_wirelength_coef;
        self.wirelength_coef_y = coef * self.base_wirelength_coef;
    }

    /// Recomputes one gradient set, halving the wirelength coefficient and
    /// retrying (bounded) whenever the WA force vanished entirely; flags a
    /// code-306 divergence on non-finite sums.
    fn update_gradients_with_retry(
        &mut self,
        which: SlpSet,
        common: &mut NesterovBaseCommon,
        nb: &mut NesterovBase,
    ) {
        loop {
            nb.update_gradients(which, common, self.wirelength_coef_x, self.wirelength_coef_y);

            if nb.wirelength_grad_sum() == 0.0
                && self.recursion_cnt_wl_coef < MAX_RECURSION_WL_COEF
            {
                self.wirelength_coef_x *= 0.5;
                self.wirelength_coef_y *= 0.5;
                self.base_wirelength_coef *= 0.5;
                log::debug!(
                    "sum(WL gradient) = 0; retrying with wlCoef {:.3e}",
                    self.wirelength_coef_x
                );
                common.update_wirelength_force_wa(self.wirelength_coef_x, self.wirelength_coef_y);
                self.recursion_cnt_wl_coef += 1;
                continue;
            }
            break;
        }

        if !nb.wirelength_grad_sum().is_finite() || !nb.density_grad_sum().is_finite() {
            self.is_diverged = true;
            self.diverge_kind = Some(DivergeKind::Gradient);
            self.diverge_msg = "diverged at wirelength/density gradient sum".to_string();
        }
    }

    fn diverge_error(&self, reverted: bool) -> PlaceError {
        PlaceError::diverged(
            self.diverge_kind.unwrap_or(DivergeKind::Gradient),
            self.diverge_msg.clone(),
            reverted,
        )
    }

    /// Init sequence, with the bounded
    /// `initialPrevCoordiUpdateCoef` retry on a non-finite first step.
    pub fn init(
        &mut self,
        common: &mut NesterovBaseCommon,
        nbs: &mut [NesterovBase],
    ) -> Result<(), PlaceError> {
        let _span = tracing::info_span!("nesterov_init").entered();

        loop {
            self.total_sum_overflow = 0.0;
            let mut total_base_wirelength_coef = 0.0f32;

            for nb in nbs.iter_mut() {
                nb.set_np_vars(self.np);
                nb.init_density1(common);
                self.total_sum_overflow += nb.sum_overflow;
                total_base_wirelength_coef += nb.base_wirelength_coef();
            }
            self.average_overflow = self.total_sum_overflow / nbs.len() as f32;
            self.base_wirelength_coef = total_base_wirelength_coef / nbs.len() as f32;
            self.update_wirelength_coef(self.average_overflow);

            common.update_wirelength_force_wa(self.wirelength_coef_x, self.wirelength_coef_y);

            for i in 0..nbs.len() {
                self.update_gradients_with_retry(SlpSet::Cur, common, &mut nbs[i]);
                nbs[i].update_initial_prev_slp_coordi(common);
                nbs[i].update_density_center_prev_slp(common);
                nbs[i].update_density_force_bin();
            }

            // pins moved to prevSLP; rebuild the WA state there
            common.update_wirelength_force_wa(self.wirelength_coef_x, self.wirelength_coef_y);

            for i in 0..nbs.len() {
                self.update_gradients_with_retry(SlpSet::Prev, common, &mut nbs[i]);
            }

            if self.is_diverged {
                return Err(self.diverge_error(false));
            }

            let mut needs_retry = false;
            for nb in nbs.iter_mut() {
                let step =
                    nb.init_density2(common, self.wirelength_coef_x, self.wirelength_coef_y);
                if step.is_nan() || step.is_infinite() {
                    if self.recursion_cnt_init_slp_coef < MAX_RECURSION_INIT_SLP_COEF {
                        self.np.initial_prev_coordi_update_coef *= 10.0;
                        log::debug!(
                            "initial step length non-finite; retrying init with initPrevSLPCoef {}",
                            self.np.initial_prev_coordi_update_coef
                        );
                        self.recursion_cnt_init_slp_coef += 1;
                        needs_retry = true;
                        break;
                    }
                    return Err(PlaceError::diverged(
                        DivergeKind::InitStep,
                        "initial step length stayed non-finite after the bounded retry budget; \
                         re-run with a smaller initDensityPenalty",
                        false,
                    ));
                }
            }
            if !needs_retry {
                break;
            }
        }
        Ok(())
    }

    fn update_next_iter(
        &mut self,
        iter: usize,
        common: &mut NesterovBaseCommon,
        nbs: &mut [NesterovBase],
        pb: &PlacerBaseCommon,
    ) {
        self.total_sum_overflow = 0.0;
        self.total_sum_overflow_unscaled = 0.0;
        for nb in nbs.iter_mut() {
            nb.update_next_iter(iter, common, pb);
            self.total_sum_overflow += nb.sum_overflow;
            self.total_sum_overflow_unscaled += nb.sum_overflow_unscaled;
        }
        self.average_overflow = self.total_sum_overflow / nbs.len() as f32;
        self.average_overflow_unscaled = self.total_sum_overflow_unscaled / nbs.len() as f32;

        self.update_wirelength_coef(self.average_overflow);
    }

    fn update_db(
        common: &NesterovBaseCommon,
        pb: &mut PlacerBaseCommon,
        sink: &mut dyn NetlistSink,
    ) -> Result<(), PlaceError> {
        common.write_back(pb);
        for &id in &pb.place_insts {
            let inst = &pb.instances[id.0 as usize];
            if let Some(handle) = inst.external_handle {
                sink.set_instance_location(handle, inst.lx, inst.ly)
                    .map_err(|e| PlaceError::input_invariant(e.to_string()))?;
            }
        }
        Ok(())
    }

    /// The core Nesterov loop. Always writes the final
    /// coordinates back through the sink, diverged or not.
    pub fn do_nesterov_place(
        &mut self,
        common: &mut NesterovBaseCommon,
        nbs: &mut [NesterovBase],
        pb: &mut PlacerBaseCommon,
        collab: &mut Collaborators<'_, '_>,
    ) -> Result<NesterovPlaceResult, PlaceError> {
        let _span = tracing::info_span!("nesterov_place").entered();

        // snapshot scalars for the routability/divergence revert
        let mut is_snapshot_saved = false;
        let mut snapshot_a = 0.0f32;
        let mut snapshot_wl_coef_x = 0.0f32;
        let mut snapshot_wl_coef_y = 0.0f32;
        let mut is_diverge_tried_revert = false;

        let mut cur_a = 1.0f32;

        for nb in nbs.iter_mut() {
            nb.reset_min_sum_overflow();
        }

        let mut iter = 0usize;
        while iter < self.np.max_nesterov_iter {
            let prev_a = cur_a;
            // Nesterov sequence: a_(k+1) = (1 + sqrt(4 a_k^2 + 1)) / 2
            cur_a = (1.0 + (4.0 * prev_a * prev_a + 1.0).sqrt()) * 0.5;
            let coeff = (prev_a - 1.0) / cur_a;

            // backtracking loop
            let mut num_back_trak = 0usize;
            while num_back_trak < self.np.max_back_track {
                for nb in nbs.iter_mut() {
                    nb.nesterov_update_coordinates(common, coeff);
                }

                common.update_wirelength_force_wa(self.wirelength_coef_x, self.wirelength_coef_y);

                let mut num_diverge = 0usize;
                for i in 0..nbs.len() {
                    self.update_gradients_with_retry(SlpSet::Next, common, &mut nbs[i]);
                    num_diverge += nbs[i].is_diverged as usize;
                }

                if num_diverge > 0 || self.is_diverged {
                    self.is_diverged = true;
                    self.diverge_kind = Some(DivergeKind::Gradient);
                    self.diverge_msg =
                        "diverged at wirelength/density gradient sum".to_string();
                    break;
                }

                let mut step_length_limit_ok = 0usize;
                num_diverge = 0;
                for nb in nbs.iter_mut() {
                    step_length_limit_ok += nb.nesterov_update_step_length() as usize;
                    num_diverge += nb.is_diverged as usize;
                }

                if num_diverge > 0 {
                    self.is_diverged = true;
                    self.diverge_kind = Some(DivergeKind::NumericStep);
                    self.diverge_msg = "diverged at new step length".to_string();
                    break;
                }

                if step_length_limit_ok != nbs.len() {
                    break;
                }
                num_back_trak += 1;
            }

            for nb in nbs.iter_mut() {
                nb.nesterov_adjust_phi();
            }

            if num_back_trak == self.np.max_back_track {
                log::debug!("backtracking limit reached; taking a small step");
            }

            if self.is_diverged {
                break;
            }

            self.update_next_iter(iter, common, nbs, pb);

            collab.graphics.on_iteration(
                iter,
                nbs.iter().map(|nb| nb.prev_hpwl()).sum::<i64>(),
                self.average_overflow_unscaled,
            );

            // timing-driven reweight at each trigger overflow
            if self.np.timing_driven_mode {
                if let (Some(tb), Some(resizer)) =
                    (collab.timing_base.as_deref_mut(), collab.resizer.as_deref_mut())
                {
                    if tb.is_timing_net_weight_overflow(self.average_overflow) {
                        Self::update_db(common, pb, collab.sink)?;
                        log::info!("timing-driven: executing resizer for reweighting nets");
                        if !tb.update_net_weights(common, pb, resizer) {
                            self.np.timing_driven_mode = false;
                        }
                    }
                }
            }

            // code-307 detection, with one revert opportunity
            let mut num_diverge = 0usize;
            for nb in nbs.iter_mut() {
                num_diverge += nb.check_divergence() as usize;
            }
            if num_diverge > 0 {
                self.is_diverged = true;
                self.diverge_kind = Some(DivergeKind::Overflow);
                self.diverge_msg =
                    "divergence detected; re-run with a smaller maxPhiCoef".to_string();

                let rb_called = collab
                    .route_base
                    .as_deref()
                    .map(|rb| rb.num_call() >= 1)
                    .unwrap_or(false);
                if !is_diverge_tried_revert && rb_called && is_snapshot_saved {
                    if let Some(rb) = collab.route_base.as_deref_mut() {
                        rb.revert_gcell_size_to_min_rc(common);
                    }
                    cur_a = snapshot_a;
                    self.wirelength_coef_x = snapshot_wl_coef_x;
                    self.wirelength_coef_y = snapshot_wl_coef_y;
                    common.update_wirelength_force_wa(
                        self.wirelength_coef_x,
                        self.wirelength_coef_y,
                    );
                    for nb in nbs.iter_mut() {
                        nb.revert_divergence(common);
                    }
                    self.is_diverged = false;
                    self.diverge_kind = None;
                    self.diverge_msg.clear();
                    is_diverge_tried_revert = true;
                    // a second divergence is fatal; stop inflating as well
                    self.is_routability_need = false;
                } else {
                    break;
                }
            }

            // one snapshot, taken when overflow first reaches 0.6
            if !is_snapshot_saved
                && self.np.routability_driven_mode
                && self.average_overflow_unscaled <= 0.6
            {
                snapshot_wl_coef_x = self.wirelength_coef_x;
                snapshot_wl_coef_y = self.wirelength_coef_y;
                snapshot_a = cur_a;
                is_snapshot_saved = true;
                for nb in nbs.iter_mut() {
                    nb.snapshot();
                }
                log::info!("[NesterovSolve] snapshot saved at iter = {iter}");
            }

            // routability bloat
            if self.np.routability_driven_mode
                && self.is_routability_need
                && self.np.routability_check_overflow >= self.average_overflow_unscaled
            {
                if let (Some(rb), Some(router)) =
                    (collab.route_base.as_deref_mut(), collab.router.as_deref_mut())
                {
                    Self::update_db(common, pb, collab.sink)?;
                    let (need, revert_init) =
                        rb.routability(common, &mut nbs[0], pb, router)?;
                    self.is_routability_need = need;
                    if need || revert_init {
                        cur_a = snapshot_a;
                        self.wirelength_coef_x = snapshot_wl_coef_x;
                        self.wirelength_coef_y = snapshot_wl_coef_y;
                        common.update_wirelength_force_wa(
                            self.wirelength_coef_x,
                            self.wirelength_coef_y,
                        );
                        for nb in nbs.iter_mut() {
                            nb.revert_divergence(common);
                            nb.reset_min_sum_overflow();
                        }
                        log::info!("[NesterovSolve] revert back to snapshot coordinates");
                    }
                }
            }

            let mut num_converge = 0usize;
            for i in 0..nbs.len() {
                num_converge += nbs[i].check_convergence(common, pb) as usize;
            }
            if num_converge == nbs.len() {
                iter += 1;
                break;
            }

            iter += 1;
        }

        // the database is updated in every case, diverged included
        Self::update_db(common, pb, collab.sink)?;

        if self.is_diverged {
            return Err(self.diverge_error(is_diverge_tried_revert));
        }

        Ok(NesterovPlaceResult {
            iterations: iter,
            final_hpwl: common.hpwl(),
            final_overflow: self.average_overflow_unscaled,
            reverted: is_diverge_tried_revert,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wirelength_coef_schedule_clamps_and_interpolates() {
        let mut np = NesterovPlace::new(NesterovPlaceOptions::default());
        np.base_wirelength_coef = 1.0;

        np.update_wirelength_coef(2.0);
        assert!((np.wirelength_coef_x - 0.1).abs() < 1e-6);

        np.update_wirelength_coef(0.05);
        assert!((np.wirelength_coef_x - 10.0).abs() < 1e-6);

        // at overflow 0.55 the exponent is exactly 0: f = 1
        np.update_wirelength_coef(0.55);
        assert!((np.wirelength_coef_x - 1.0).abs() < 1e-5);

        // monotone decreasing in overflow
        np.update_wirelength_coef(0.3);
        let low = np.wirelength_coef_x;
        np.update_wirelength_coef(0.8);
        let high = np.wirelength_coef_x;
        assert!(low > high);
    }

    #[test]
    fn nesterov_sequence_coefficients_grow_toward_one() {
        let mut cur_a = 1.0f32;
        let mut prev_coeff = 0.0f32;
        for _ in 0..50 {
            let prev_a = cur_a;
            cur_a = (1.0 + (4.0 * prev_a * prev_a + 1.0).sqrt()) * 0.5;
            let coeff = (prev_a - 1.0) / cur_a;
            assert!(coeff >= prev_coeff);
            assert!(coeff < 1.0);
            prev_coeff = coeff;
        }
        assert!(prev_coeff > 0.9);
    }
}
