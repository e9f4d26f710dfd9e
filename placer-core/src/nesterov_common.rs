//! The G-graph: `GCell`/`GPin`/`GNet` arenas mirroring the
//! `Instance`/`Pin`/`Net` arenas, plus the weighted-average (WA)
//! wirelength model. `NesterovBaseCommon` owns all three arenas; the
//! per-region `NesterovBase` (see `nesterov_base.rs`) holds non-owning
//! indices into them plus its own filler storage.

use std::collections::HashMap;

use placer_common::{Dbu, FloatPoint, Instance, InstanceId, NetId, PinId, PinOwner};

use crate::placer_base::PlacerBaseCommon;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GCellKind {
    Instance(InstanceId),
    Filler,
}

/// One optimization variable: a movable instance or a virtual filler block.
/// Storage coordinates are integer DBU even though the solver moves centers
/// in continuous space; the density bbox (`d_*`) is a possibly-enlarged
/// copy of the footprint used by the density engine.
#[derive(Debug, Clone)]
pub struct GCell {
    pub kind: GCellKind,
    pub is_macro: bool,
    pub lx: Dbu,
    pub ly: Dbu,
    pub ux: Dbu,
    pub uy: Dbu,
    pub d_lx: Dbu,
    pub d_ly: Dbu,
    pub d_ux: Dbu,
    pub d_uy: Dbu,
    pub density_scale: f32,
    pub gpins: Vec<usize>,
}

impl GCell {
    pub fn from_instance(id: InstanceId, inst: &Instance) -> Self {
        Self {
            kind: GCellKind::Instance(id),
            is_macro: inst.is_macro,
            lx: inst.lx,
            ly: inst.ly,
            ux: inst.ux,
            uy: inst.uy,
            d_lx: inst.lx,
            d_ly: inst.ly,
            d_ux: inst.ux,
            d_uy: inst.uy,
            density_scale: 1.0,
            gpins: Vec::new(),
        }
    }

    pub fn new_filler(cx: Dbu, cy: Dbu, dx: Dbu, dy: Dbu) -> Self {
        Self {
            kind: GCellKind::Filler,
            is_macro: false,
            lx: cx - dx / 2,
            ly: cy - dy / 2,
            ux: cx + dx / 2,
            uy: cy + dy / 2,
            d_lx: cx - dx / 2,
            d_ly: cy - dy / 2,
            d_ux: cx + dx / 2,
            d_uy: cy + dy / 2,
            density_scale: 1.0,
            gpins: Vec::new(),
        }
    }

    pub fn is_instance(&self) -> bool {
        matches!(self.kind, GCellKind::Instance(_))
    }

    pub fn is_filler(&self) -> bool {
        self.kind == GCellKind::Filler
    }

    pub fn is_std_instance(&self) -> bool {
        self.is_instance() && !self.is_macro
    }

    pub fn is_macro_instance(&self) -> bool {
        self.is_instance() && self.is_macro
    }

    pub fn instance_id(&self) -> Option<InstanceId> {
        match self.kind {
            GCellKind::Instance(id) => Some(id),
            GCellKind::Filler => None,
        }
    }

    pub fn dx(&self) -> Dbu {
        self.ux - self.lx
    }
    pub fn dy(&self) -> Dbu {
        self.uy - self.ly
    }
    pub fn cx(&self) -> Dbu {
        (self.lx + self.ux) / 2
    }
    pub fn cy(&self) -> Dbu {
        (self.ly + self.uy) / 2
    }

    pub fn d_dx(&self) -> Dbu {
        self.d_ux - self.d_lx
    }
    pub fn d_dy(&self) -> Dbu {
        self.d_uy - self.d_ly
    }
    pub fn d_cx(&self) -> Dbu {
        (self.d_lx + self.d_ux) / 2
    }
    pub fn d_cy(&self) -> Dbu {
        (self.d_ly + self.d_uy) / 2
    }

    pub fn area(&self) -> i64 {
        self.dx() as i64 * self.dy() as i64
    }

    /// Moves both the footprint and the density bbox to a new center.
    pub fn set_center_location(&mut self, cx: Dbu, cy: Dbu) {
        let half_x = self.dx() / 2;
        let half_y = self.dy() / 2;
        let half_dx = self.d_dx() / 2;
        let half_dy = self.d_dy() / 2;
        self.lx = cx - half_x;
        self.ly = cy - half_y;
        self.ux = cx + half_x;
        self.uy = cy + half_y;
        self.d_lx = cx - half_dx;
        self.d_ly = cy - half_dy;
        self.d_ux = cx + half_dx;
        self.d_uy = cy + half_dy;
    }

    /// Moves only the density bbox.
    pub fn set_density_center_location(&mut self, d_cx: Dbu, d_cy: Dbu) {
        let half_dx = self.d_dx() / 2;
        let half_dy = self.d_dy() / 2;
        self.d_lx = d_cx - half_dx;
        self.d_ly = d_cy - half_dy;
        self.d_ux = d_cx + half_dx;
        self.d_uy = d_cy + half_dy;
    }

    pub fn set_density_location(&mut self, d_lx: Dbu, d_ly: Dbu) {
        let d_dx = self.d_dx();
        let d_dy = self.d_dy();
        self.d_lx = d_lx;
        self.d_ly = d_ly;
        self.d_ux = d_lx + d_dx;
        self.d_uy = d_ly + d_dy;
    }

    /// Resizes the density bbox about its current center (the sqrt(2)-bin
    /// expansion applied to small cells).
    pub fn set_density_size(&mut self, d_dx: Dbu, d_dy: Dbu) {
        let cx = self.d_cx();
        let cy = self.d_cy();
        self.d_lx = cx - d_dx / 2;
        self.d_ly = cy - d_dy / 2;
        self.d_ux = cx + d_dx / 2;
        self.d_uy = cy + d_dy / 2;
    }

    /// Resizes the footprint about its center; used by the routability
    /// bloat. The density bbox is refreshed separately.
    pub fn set_size(&mut self, dx: Dbu, dy: Dbu) {
        let cx = self.cx();
        let cy = self.cy();
        self.lx = cx - dx / 2;
        self.ly = cy - dy / 2;
        self.ux = cx + dx / 2;
        self.uy = cy + dy / 2;
    }
}

/// Mirror of one `Pin`. The WA accumulators are per-pin exponent terms;
/// `None` marks a term whose exponent fell below the force bar and is
/// excluded from the gradient.
#[derive(Debug, Clone)]
pub struct GPin {
    pub pin: PinId,
    /// Owning gcell, `None` for boundary ports and fixed-instance pins.
    pub gcell: Option<usize>,
    pub gnet: usize,
    pub offset_cx: Dbu,
    pub offset_cy: Dbu,
    pub cx: Dbu,
    pub cy: Dbu,
    pub min_exp_sum_x: Option<f32>,
    pub max_exp_sum_x: Option<f32>,
    pub min_exp_sum_y: Option<f32>,
    pub max_exp_sum_y: Option<f32>,
}

impl GPin {
    fn clear_wa_vars(&mut self) {
        self.min_exp_sum_x = None;
        self.max_exp_sum_x = None;
        self.min_exp_sum_y = None;
        self.max_exp_sum_y = None;
    }
}

/// Mirror of one `Net`, carrying the WA running sums and a pin-center bbox.
#[derive(Debug, Clone)]
pub struct GNet {
    pub net: NetId,
    pub gpins: Vec<usize>,
    pub lx: Dbu,
    pub ly: Dbu,
    pub ux: Dbu,
    pub uy: Dbu,
    pub timing_weight: f32,
    pub custom_weight: f32,
    pub wa_exp_min_sum_x: f32,
    pub wa_x_exp_min_sum_x: f32,
    pub wa_exp_max_sum_x: f32,
    pub wa_x_exp_max_sum_x: f32,
    pub wa_exp_min_sum_y: f32,
    pub wa_y_exp_min_sum_y: f32,
    pub wa_exp_max_sum_y: f32,
    pub wa_y_exp_max_sum_y: f32,
}

impl GNet {
    fn new(net: NetId, timing_weight: f32, custom_weight: f32) -> Self {
        Self {
            net,
            gpins: Vec::new(),
            lx: Dbu::MAX,
            ly: Dbu::MAX,
            ux: Dbu::MIN,
            uy: Dbu::MIN,
            timing_weight,
            custom_weight,
            wa_exp_min_sum_x: 0.0,
            wa_x_exp_min_sum_x: 0.0,
            wa_exp_max_sum_x: 0.0,
            wa_x_exp_max_sum_x: 0.0,
            wa_exp_min_sum_y: 0.0,
            wa_y_exp_min_sum_y: 0.0,
            wa_exp_max_sum_y: 0.0,
            wa_y_exp_max_sum_y: 0.0,
        }
    }

    pub fn total_weight(&self) -> f32 {
        self.timing_weight * self.custom_weight
    }

    pub fn hpwl(&self) -> i64 {
        let w = (self.ux as i64 - self.lx as i64).max(0);
        let h = (self.uy as i64 - self.ly as i64).max(0);
        w + h
    }

    fn clear_wa_vars(&mut self) {
        self.wa_exp_min_sum_x = 0.0;
        self.wa_x_exp_min_sum_x = 0.0;
        self.wa_exp_max_sum_x = 0.0;
        self.wa_x_exp_max_sum_x = 0.0;
        self.wa_exp_min_sum_y = 0.0;
        self.wa_y_exp_min_sum_y = 0.0;
        self.wa_exp_max_sum_y = 0.0;
        self.wa_y_exp_max_sum_y = 0.0;
    }
}

/// The exponent floor below which a pin's WA term is dropped (after the
/// shift-invariant reformulation every exponent is <= 0, so this only
/// filters terms too small to matter while guarding against underflow).
pub const MIN_WIRELENGTH_FORCE_BAR: f32 = -300.0;

/// `(1 + x/1024)^1024`, the cheap e^x approximation the wirelength force
/// uses. Accurate to ~1e-4 over the exponent range the force bar admits.
pub fn fast_exp(x: f32) -> f32 {
    let mut e = 1.0 + x / 1024.0;
    for _ in 0..10 {
        e *= e;
    }
    e
}

/// Owns the three G-graph arenas. Built once per run from `PlacerBaseCommon`
/// and kept index-coherent through `fix_pointers`.
pub struct NesterovBaseCommon {
    pub gcells: Vec<GCell>,
    pub gpins: Vec<GPin>,
    pub gnets: Vec<GNet>,
    /// Instance arena index -> gcell index, for movable instances only.
    pub inst_to_gcell: HashMap<InstanceId, usize>,
}

impl NesterovBaseCommon {
    /// Builds gcells for every movable (place) instance, gpins for every
    /// signal-net pin, and gnets for every signal net. Fixed instances do
    /// not become gcells; their pins anchor nets at fixed coordinates.
    pub fn build(pb: &PlacerBaseCommon) -> Self {
        let mut gcells = Vec::new();
        let mut inst_to_gcell = HashMap::new();

        // std-cell padding widens every movable footprint; the write-back
        // undoes the left share
        let pad_l = pb.pad_left * pb.site_size_x;
        let pad_r = pb.pad_right * pb.site_size_x;
        for &inst_id in &pb.place_insts {
            let inst = &pb.instances[inst_id.0 as usize];
            inst_to_gcell.insert(inst_id, gcells.len());
            let mut gcell = GCell::from_instance(inst_id, inst);
            if pad_l != 0 || pad_r != 0 {
                gcell.lx -= pad_l;
                gcell.ux += pad_r;
                gcell.d_lx -= pad_l;
                gcell.d_ux += pad_r;
            }
            gcells.push(gcell);
        }

        let mut gnets: Vec<GNet> = pb
            .nets
            .iter()
            .enumerate()
            .map(|(i, net)| GNet::new(NetId(i as u32), net.timing_weight, net.custom_weight))
            .collect();

        let mut gpins = Vec::with_capacity(pb.pins.len());
        for (pin_idx, pin) in pb.pins.iter().enumerate() {
            let gcell = match pin.owner {
                PinOwner::Instance(id) => inst_to_gcell.get(&id).copied(),
                PinOwner::Boundary => None,
            };
            let gpin_idx = gpins.len();
            gpins.push(GPin {
                pin: PinId(pin_idx as u32),
                gcell,
                gnet: pin.net.0 as usize,
                offset_cx: pin.offset_cx,
                offset_cy: pin.offset_cy,
                cx: pin.cx,
                cy: pin.cy,
                min_exp_sum_x: None,
                max_exp_sum_x: None,
                min_exp_sum_y: None,
                max_exp_sum_y: None,
            });
            gnets[pin.net.0 as usize].gpins.push(gpin_idx);
            if let Some(gc) = gcell {
                gcells[gc].gpins.push(gpin_idx);
            }
        }

        Self {
            gcells,
            gpins,
            gnets,
            inst_to_gcell,
        }
    }

    /// Rebuilds every back-reference (gcell->gpin, gnet->gpin) and cached
    /// pin location from the gpins' own stable indices. Must run after any
    /// bulk mutation of the arenas; calling it twice is a no-op.
    pub fn fix_pointers(&mut self) {
        for gcell in self.gcells.iter_mut() {
            gcell.gpins.clear();
        }
        for gnet in self.gnets.iter_mut() {
            gnet.gpins.clear();
        }
        for idx in 0..self.gpins.len() {
            let (gcell, gnet) = (self.gpins[idx].gcell, self.gpins[idx].gnet);
            if let Some(gc) = gcell {
                self.gcells[gc].gpins.push(idx);
            }
            self.gnets[gnet].gpins.push(idx);
        }
        self.update_pin_locations();
    }

    /// Re-derives every owned gpin's absolute center from its gcell's real
    /// footprint center.
    pub fn update_pin_locations(&mut self) {
        for idx in 0..self.gpins.len() {
            if let Some(gc) = self.gpins[idx].gcell {
                let (cx, cy) = (self.gcells[gc].cx(), self.gcells[gc].cy());
                let gpin = &mut self.gpins[idx];
                gpin.cx = cx + gpin.offset_cx;
                gpin.cy = cy + gpin.offset_cy;
            }
        }
    }

    /// Same, but from the density center; the Nesterov loop moves density
    /// centers, and the WA model follows them.
    pub fn update_pin_density_locations(&mut self) {
        for idx in 0..self.gpins.len() {
            if let Some(gc) = self.gpins[idx].gcell {
                let (cx, cy) = (self.gcells[gc].d_cx(), self.gcells[gc].d_cy());
                let gpin = &mut self.gpins[idx];
                gpin.cx = cx + gpin.offset_cx;
                gpin.cy = cy + gpin.offset_cy;
            }
        }
    }

    fn update_net_boxes(&mut self) {
        for gnet in self.gnets.iter_mut() {
            gnet.lx = Dbu::MAX;
            gnet.ly = Dbu::MAX;
            gnet.ux = Dbu::MIN;
            gnet.uy = Dbu::MIN;
            for &p in &gnet.gpins {
                let pin = &self.gpins[p];
                gnet.lx = gnet.lx.min(pin.cx);
                gnet.ly = gnet.ly.min(pin.cy);
                gnet.ux = gnet.ux.max(pin.cx);
                gnet.uy = gnet.uy.max(pin.cy);
            }
        }
    }

    /// Recomputes the WA accumulators for every net and pin at the current
    /// pin locations. The exponents are shifted by the net bbox
    /// extreme so the largest is exactly zero.
    pub fn update_wirelength_force_wa(&mut self, wl_coef_x: f32, wl_coef_y: f32) {
        let _span = tracing::debug_span!("update_wirelength_force_wa").entered();

        for gpin in self.gpins.iter_mut() {
            gpin.clear_wa_vars();
        }
        for gnet in self.gnets.iter_mut() {
            gnet.clear_wa_vars();
        }
        self.update_net_boxes();

        for gnet_idx in 0..self.gnets.len() {
            let gpin_indices = self.gnets[gnet_idx].gpins.clone();
            let (net_lx, net_ly, net_ux, net_uy) = {
                let n = &self.gnets[gnet_idx];
                (n.lx, n.ly, n.ux, n.uy)
            };
            for p in gpin_indices {
                let (cx, cy) = (self.gpins[p].cx, self.gpins[p].cy);

                let exp_min_x = (net_lx - cx) as f32 * wl_coef_x;
                let exp_max_x = (cx - net_ux) as f32 * wl_coef_x;
                let exp_min_y = (net_ly - cy) as f32 * wl_coef_y;
                let exp_max_y = (cy - net_uy) as f32 * wl_coef_y;

                let gnet = &mut self.gnets[gnet_idx];
                let gpin = &mut self.gpins[p];
                if exp_min_x > MIN_WIRELENGTH_FORCE_BAR {
                    let e = fast_exp(exp_min_x);
                    gpin.min_exp_sum_x = Some(e);
                    gnet.wa_exp_min_sum_x += e;
                    gnet.wa_x_exp_min_sum_x += cx as f32 * e;
                }
                if exp_max_x > MIN_WIRELENGTH_FORCE_BAR {
                    let e = fast_exp(exp_max_x);
                    gpin.max_exp_sum_x = Some(e);
                    gnet.wa_exp_max_sum_x += e;
                    gnet.wa_x_exp_max_sum_x += cx as f32 * e;
                }
                if exp_min_y > MIN_WIRELENGTH_FORCE_BAR {
                    let e = fast_exp(exp_min_y);
                    gpin.min_exp_sum_y = Some(e);
                    gnet.wa_exp_min_sum_y += e;
                    gnet.wa_y_exp_min_sum_y += cy as f32 * e;
                }
                if exp_max_y > MIN_WIRELENGTH_FORCE_BAR {
                    let e = fast_exp(exp_max_y);
                    gpin.max_exp_sum_y = Some(e);
                    gnet.wa_exp_max_sum_y += e;
                    gnet.wa_y_exp_max_sum_y += cy as f32 * e;
                }
            }
        }
    }

    /// One pin's WA wirelength gradient, the quotient-rule expansion of the
    /// weighted-average min/max surrogates.
    pub fn wirelength_gradient_pin_wa(
        &self,
        gpin_idx: usize,
        wl_coef_x: f32,
        wl_coef_y: f32,
    ) -> FloatPoint {
        let gpin = &self.gpins[gpin_idx];
        let gnet = &self.gnets[gpin.gnet];

        let mut grad_min_x = 0.0f32;
        let mut grad_max_x = 0.0f32;
        let mut grad_min_y = 0.0f32;
        let mut grad_max_y = 0.0f32;

        if let Some(min_exp) = gpin.min_exp_sum_x {
            let sum = gnet.wa_exp_min_sum_x;
            let x_sum = gnet.wa_x_exp_min_sum_x;
            grad_min_x = (sum * (min_exp * (1.0 - wl_coef_x * gpin.cx as f32))
                + wl_coef_x * min_exp * x_sum)
                / (sum * sum);
        }
        if let Some(max_exp) = gpin.max_exp_sum_x {
            let sum = gnet.wa_exp_max_sum_x;
            let x_sum = gnet.wa_x_exp_max_sum_x;
            grad_max_x = (sum * (max_exp * (1.0 + wl_coef_x * gpin.cx as f32))
                - wl_coef_x * max_exp * x_sum)
                / (sum * sum);
        }
        if let Some(min_exp) = gpin.min_exp_sum_y {
            let sum = gnet.wa_exp_min_sum_y;
            let y_sum = gnet.wa_y_exp_min_sum_y;
            grad_min_y = (sum * (min_exp * (1.0 - wl_coef_y * gpin.cy as f32))
                + wl_coef_y * min_exp * y_sum)
                / (sum * sum);
        }
        if let Some(max_exp) = gpin.max_exp_sum_y {
            let sum = gnet.wa_exp_max_sum_y;
            let y_sum = gnet.wa_y_exp_max_sum_y;
            grad_max_y = (sum * (max_exp * (1.0 + wl_coef_y * gpin.cy as f32))
                - wl_coef_y * max_exp * y_sum)
                / (sum * sum);
        }

        FloatPoint::new(grad_min_x - grad_max_x, grad_min_y - grad_max_y)
    }

    /// A gcell's WA gradient: the sum of its pins' gradients, each scaled
    /// by the owning net's total (timing x custom) weight.
    pub fn wirelength_gradient_wa(
        &self,
        gcell: &GCell,
        wl_coef_x: f32,
        wl_coef_y: f32,
    ) -> FloatPoint {
        let mut grad = FloatPoint::default();
        for &p in &gcell.gpins {
            let pair = self.wirelength_gradient_pin_wa(p, wl_coef_x, wl_coef_y);
            let weight = self.gnets[self.gpins[p].gnet].total_weight();
            grad.x += pair.x * weight;
            grad.y += pair.y * weight;
        }
        grad
    }

    /// Wirelength preconditioner: pin count on both axes.
    pub fn wirelength_preconditioner(&self, gcell: &GCell) -> FloatPoint {
        let pins = gcell.gpins.len() as f32;
        FloatPoint::new(pins, pins)
    }

    /// Plain HPWL over all nets at the current pin locations.
    pub fn hpwl(&mut self) -> i64 {
        self.update_net_boxes();
        self.gnets.iter().map(GNet::hpwl).sum()
    }

    /// `updateDbGCells`: pushes every instance gcell's density
    /// center back into the instance arena, undoing the left-pad offset.
    /// Locked (converged-region) instances keep their current location.
    pub fn write_back(&self, pb: &mut PlacerBaseCommon) {
        let pad_offset = pb.site_size_x * pb.pad_left;
        for gcell in &self.gcells {
            if let Some(id) = gcell.instance_id() {
                let inst = &mut pb.instances[id.0 as usize];
                if inst.locked {
                    continue;
                }
                inst.set_location(gcell.d_cx() - gcell.dx() / 2 + pad_offset, gcell.d_cy() - gcell.dy() / 2);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn two_pin_graph(x1: Dbu, x2: Dbu) -> NesterovBaseCommon {
        let mut gcells = vec![
            GCell::new_filler(x1, 100, 10, 10),
            GCell::new_filler(x2, 100, 10, 10),
        ];
        gcells[0].kind = GCellKind::Instance(InstanceId(0));
        gcells[1].kind = GCellKind::Instance(InstanceId(1));
        gcells[0].gpins = vec![0];
        gcells[1].gpins = vec![1];
        let gpins = vec![
            GPin {
                pin: PinId(0),
                gcell: Some(0),
                gnet: 0,
                offset_cx: 0,
                offset_cy: 0,
                cx: x1,
                cy: 100,
                min_exp_sum_x: None,
                max_exp_sum_x: None,
                min_exp_sum_y: None,
                max_exp_sum_y: None,
            },
            GPin {
                pin: PinId(1),
                gcell: Some(1),
                gnet: 0,
                offset_cx: 0,
                offset_cy: 0,
                cx: x2,
                cy: 100,
                min_exp_sum_x: None,
                max_exp_sum_x: None,
                min_exp_sum_y: None,
                max_exp_sum_y: None,
            },
        ];
        let mut gnet = GNet::new(NetId(0), 1.0, 1.0);
        gnet.gpins = vec![0, 1];
        NesterovBaseCommon {
            gcells,
            gpins,
            gnets: vec![gnet],
            inst_to_gcell: HashMap::new(),
        }
    }

    #[test]
    fn fast_exp_tracks_exp_for_small_arguments() {
        for &x in &[-0.001f32, -0.5, -2.0, -10.0] {
            assert_relative_eq!(fast_exp(x), x.exp(), max_relative = 2e-2);
        }
    }

    #[test]
    fn two_pin_net_gradients_cancel() {
        // Shift invariance of the WA surrogate: the x gradients of the two
        // pins of a two-pin net must sum to zero.
        let mut base = two_pin_graph(1000, 5000);
        base.update_wirelength_force_wa(1e-3, 1e-3);

        let g1 = base.wirelength_gradient_pin_wa(0, 1e-3, 1e-3);
        let g2 = base.wirelength_gradient_pin_wa(1, 1e-3, 1e-3);
        assert!((g1.x + g2.x).abs() < 1e-5, "sum = {}", g1.x + g2.x);
        // The left pin is the min pin: its gradient points left (negative),
        // the right pin's right.
        assert!(g1.x < 0.0);
        assert!(g2.x > 0.0);
    }

    #[test]
    fn net_weight_scales_cell_gradient() {
        let mut base = two_pin_graph(1000, 5000);
        base.update_wirelength_force_wa(1e-3, 1e-3);
        let unweighted = base.wirelength_gradient_wa(&base.gcells[0], 1e-3, 1e-3);

        base.gnets[0].timing_weight = 2.5;
        let weighted = base.wirelength_gradient_wa(&base.gcells[0], 1e-3, 1e-3);
        assert_relative_eq!(weighted.x, unweighted.x * 2.5, max_relative = 1e-6);
    }

    #[test]
    fn hpwl_matches_pin_spread() {
        let mut base = two_pin_graph(1000, 5000);
        assert_eq!(base.hpwl(), 4000);
    }

    #[test]
    fn fix_pointers_is_idempotent() {
        let mut base = two_pin_graph(0, 300);
        base.fix_pointers();
        let gcell_pins: Vec<_> = base.gcells.iter().map(|g| g.gpins.clone()).collect();
        let gnet_pins: Vec<_> = base.gnets.iter().map(|n| n.gpins.clone()).collect();
        base.fix_pointers();
        assert_eq!(
            gcell_pins,
            base.gcells.iter().map(|g| g.gpins.clone()).collect::<Vec<_>>()
        );
        assert_eq!(
            gnet_pins,
            base.gnets.iter().map(|n| n.gpins.clone()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn wirelength_preconditioner_is_pin_count() {
        let base = two_pin_graph(0, 300);
        let precond = base.wirelength_preconditioner(&base.gcells[0]);
        assert_eq!(precond.x, 1.0);
        assert_eq!(precond.y, 1.0);
    }
}
