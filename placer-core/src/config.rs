//! Run-wide options: one struct collecting every knob the public
//! `place()` entry point exposes, validated up front before the netlist is
//! touched.

use placer_common::{Dbu, PlaceError};

use crate::initial_place::InitialPlaceOptions;
use crate::nesterov_place::NesterovPlaceOptions;
use crate::route_base::RouteBaseOptions;
use crate::timing_base::TimingBaseOptions;

#[derive(Debug, Clone)]
pub struct PlaceOptions {
    /// Skip the B2B initial placement and seed Nesterov from the current
    /// instance locations.
    pub incremental: bool,
    pub do_nesterov_place: bool,
    /// Drop boundary ports from the net model entirely.
    pub skip_io_mode: bool,
    /// Std-cell padding in site counts, applied left/right of every
    /// movable cell's footprint.
    pub pad_left: Dbu,
    pub pad_right: Dbu,
    pub target_density: f32,
    pub uniform_target_density_mode: bool,
    pub bin_grid_cnt_x: Option<usize>,
    pub bin_grid_cnt_y: Option<usize>,

    pub initial_place: InitialPlaceOptions,
    pub nesterov: NesterovPlaceOptions,
    pub route: RouteBaseOptions,
    pub timing: TimingBaseOptions,
}

impl Default for PlaceOptions {
    fn default() -> Self {
        Self {
            incremental: false,
            do_nesterov_place: true,
            skip_io_mode: false,
            pad_left: 0,
            pad_right: 0,
            target_density: 0.7,
            uniform_target_density_mode: false,
            bin_grid_cnt_x: None,
            bin_grid_cnt_y: None,
            initial_place: InitialPlaceOptions::default(),
            nesterov: NesterovPlaceOptions::default(),
            route: RouteBaseOptions::default(),
            timing: TimingBaseOptions::default(),
        }
    }
}

impl PlaceOptions {
    /// Range checks for every exposed knob; any failure is a hard error
    /// before a single instance is read.
    pub fn validate(&self) -> Result<(), PlaceError> {
        if !(0.0..=1.0).contains(&self.target_density) {
            return Err(PlaceError::input_invariant(format!(
                "targetDensity must be in [0,1], got {}",
                self.target_density
            )));
        }
        if self.pad_left < 0 || self.pad_right < 0 {
            return Err(PlaceError::input_invariant(
                "padLeft/padRight must be non-negative",
            ));
        }
        if self.nesterov.min_phi_coef <= 0.0 || self.nesterov.max_phi_coef <= 0.0 {
            return Err(PlaceError::input_invariant(
                "minPhiCoef/maxPhiCoef must be positive",
            ));
        }
        if self.nesterov.min_phi_coef > self.nesterov.max_phi_coef {
            return Err(PlaceError::input_invariant(
                "minPhiCoef must be <= maxPhiCoef",
            ));
        }
        if !(0.0..=1.0).contains(&self.nesterov.target_overflow) {
            return Err(PlaceError::input_invariant(
                "overflow target must be in [0,1]",
            ));
        }
        if self.nesterov.init_density_penalty <= 0.0 {
            return Err(PlaceError::input_invariant(
                "initDensityPenalty must be positive",
            ));
        }
        if self.nesterov.init_wirelength_coef <= 0.0 {
            return Err(PlaceError::input_invariant(
                "initWireLengthCoef must be positive",
            ));
        }
        if self.initial_place.net_weight_scale <= 0.0 {
            return Err(PlaceError::input_invariant(
                "initialPlaceNetWeightScale must be positive",
            ));
        }
        if self.initial_place.min_diff_length <= 0 {
            return Err(PlaceError::input_invariant(
                "initialPlaceMinDiffLength must be positive",
            ));
        }
        if self.initial_place.max_fanout < 2 {
            return Err(PlaceError::input_invariant(
                "initialPlaceMaxFanout must be at least 2",
            ));
        }
        if self.route.target_rc <= 0.0 {
            return Err(PlaceError::input_invariant(
                "routabilityTargetRcMetric must be positive",
            ));
        }
        if self.route.max_inflation_ratio < 1.0 {
            return Err(PlaceError::input_invariant(
                "routabilityMaxInflationRatio must be >= 1",
            ));
        }
        if self.route.rc_k1 < 0.0
            || self.route.rc_k2 < 0.0
            || self.route.rc_k3 < 0.0
            || self.route.rc_k4 < 0.0
            || self.route.rc_k1 + self.route.rc_k2 + self.route.rc_k3 + self.route.rc_k4 <= 0.0
        {
            return Err(PlaceError::input_invariant(
                "routabilityRcK1..K4 must be non-negative with a positive sum",
            ));
        }
        if self.timing.net_weight_max < 1.0 {
            return Err(PlaceError::input_invariant(
                "timingNetWeightMax must be >= 1",
            ));
        }
        if let (Some(x), Some(y)) = (self.bin_grid_cnt_x, self.bin_grid_cnt_y) {
            if x < 2 || y < 2 {
                return Err(PlaceError::input_invariant(
                    "binGridCntX/Y must be at least 2 when set explicitly",
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_are_valid() {
        assert!(PlaceOptions::default().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_target_density() {
        let mut opts = PlaceOptions::default();
        opts.target_density = 1.5;
        assert!(opts.validate().is_err());
    }

    #[test]
    fn rejects_inverted_phi_coefs() {
        let mut opts = PlaceOptions::default();
        opts.nesterov.min_phi_coef = 1.2;
        opts.nesterov.max_phi_coef = 1.0;
        assert!(opts.validate().is_err());
    }

    #[test]
    fn rejects_degenerate_bin_override() {
        let mut opts = PlaceOptions::default();
        opts.bin_grid_cnt_x = Some(1);
        opts.bin_grid_cnt_y = Some(64);
        assert!(opts.validate().is_err());
    }

    #[test]
    fn rejects_zero_rc_weights() {
        let mut opts = PlaceOptions::default();
        opts.route.rc_k1 = 0.0;
        opts.route.rc_k2 = 0.0;
        opts.route.rc_k3 = 0.0;
        opts.route.rc_k4 = 0.0;
        assert!(opts.validate().is_err());
    }
}
