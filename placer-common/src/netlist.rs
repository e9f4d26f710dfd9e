//! Core placement entities: `Die`, `Instance`, `Pin`, `Net`. These are
//! plain value types owned by `placer-core`'s arenas (`PlacerBaseCommon`);
//! this module only defines their shape and invariants, not their storage.

use crate::error::PlaceError;
use crate::geom::{Dbu, Rect};

/// Dense index into the instance arena. Stable across a run; cached
/// back-references are rebuilt from these after any bulk mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PinId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NetId(pub u32);

/// Outer die box and inner placeable core box. Invariant: die contains core.
#[derive(Debug, Clone, Copy)]
pub struct Die {
    die: Rect,
    core: Rect,
}

impl Die {
    pub fn new(die: Rect, core: Rect) -> Result<Self, PlaceError> {
        if !die.contains(&core) {
            return Err(PlaceError::input_invariant(format!(
                "core {core:?} is not contained in die {die:?}"
            )));
        }
        Ok(Self { die, core })
    }

    pub fn die(&self) -> Rect {
        self.die
    }

    pub fn core(&self) -> Rect {
        self.core
    }

    pub fn core_area(&self) -> i64 {
        self.core.area()
    }
}

/// A pin belongs to exactly one instance (an ITerm) or is a boundary port
/// (a BTerm, `owner = Boundary`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinOwner {
    Instance(InstanceId),
    Boundary,
}

/// A single pin: an offset from its owning instance's master center, plus a
/// cached absolute location kept coherent by whoever moves the instance.
#[derive(Debug, Clone)]
pub struct Pin {
    pub owner: PinOwner,
    pub net: NetId,
    /// Offset from the owning instance's master center. Zero for boundary ports.
    pub offset_cx: Dbu,
    pub offset_cy: Dbu,
    /// Cached absolute pin center, recomputed whenever the owning instance moves.
    pub cx: Dbu,
    pub cy: Dbu,
    /// Flags used by the B2B builder to pick out the net's extremal pins.
    pub is_min_pin_x: bool,
    pub is_max_pin_x: bool,
    pub is_min_pin_y: bool,
    pub is_max_pin_y: bool,
}

impl Pin {
    pub fn new_iterm(owner: InstanceId, net: NetId, offset_cx: Dbu, offset_cy: Dbu) -> Self {
        Self {
            owner: PinOwner::Instance(owner),
            net,
            offset_cx,
            offset_cy,
            cx: 0,
            cy: 0,
            is_min_pin_x: false,
            is_max_pin_x: false,
            is_min_pin_y: false,
            is_max_pin_y: false,
        }
    }

    pub fn new_bterm(net: NetId, cx: Dbu, cy: Dbu) -> Self {
        Self {
            owner: PinOwner::Boundary,
            net,
            offset_cx: 0,
            offset_cy: 0,
            cx,
            cy,
            is_min_pin_x: false,
            is_max_pin_x: false,
            is_min_pin_y: false,
            is_max_pin_y: false,
        }
    }
}

/// A movable, fixed, or dummy placement instance.
#[derive(Debug, Clone)]
pub struct Instance {
    pub lx: Dbu,
    pub ly: Dbu,
    pub ux: Dbu,
    pub uy: Dbu,
    pub fixed: bool,
    /// True when cell height exceeds 6 site rows, or the netlist marks it a block.
    pub is_macro: bool,
    /// Movable but temporarily pinned (e.g. after convergence locks a region).
    pub locked: bool,
    /// A dummy instance marks an unplaceable site and has no netlist handle.
    pub is_dummy: bool,
    /// Dense row index used by sparse matrix assembly; `None` until assigned.
    pub ext_id: Option<u32>,
    /// Opaque back-reference to the external netlist's own instance handle.
    pub external_handle: Option<u64>,
    pub pins: Vec<PinId>,
}

impl Instance {
    pub fn new_dummy(lx: Dbu, ly: Dbu, ux: Dbu, uy: Dbu) -> Self {
        Self {
            lx,
            ly,
            ux,
            uy,
            fixed: true,
            is_macro: false,
            locked: true,
            is_dummy: true,
            ext_id: None,
            external_handle: None,
            pins: Vec::new(),
        }
    }

    pub fn new_real(
        lx: Dbu,
        ly: Dbu,
        ux: Dbu,
        uy: Dbu,
        fixed: bool,
        is_macro: bool,
        external_handle: u64,
    ) -> Self {
        Self {
            lx,
            ly,
            ux,
            uy,
            fixed,
            is_macro,
            locked: fixed,
            is_dummy: false,
            ext_id: None,
            external_handle: Some(external_handle),
            pins: Vec::new(),
        }
    }

    pub fn bbox(&self) -> Rect {
        Rect::new(self.lx, self.ly, self.ux, self.uy)
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

    pub fn area(&self) -> i64 {
        self.bbox().area()
    }

    /// Movable means: not fixed, not a dummy, not currently locked.
    pub fn is_movable(&self) -> bool {
        !self.fixed && !self.locked
    }

    pub fn set_location(&mut self, lx: Dbu, ly: Dbu) {
        let dx = self.dx();
        let dy = self.dy();
        self.lx = lx;
        self.ly = ly;
        self.ux = lx + dx;
        self.uy = ly + dy;
    }

    pub fn set_center_location(&mut self, cx: Dbu, cy: Dbu) {
        let dx = self.dx();
        let dy = self.dy();
        self.set_location(cx - dx / 2, cy - dy / 2);
    }

    /// Snap a *fixed* instance outward to the nearest site multiple from the
    /// core origin, because a partially used site is unusable.
    pub fn snap_outward(&mut self, origin_x: Dbu, origin_y: Dbu, step_x: Dbu, step_y: Dbu) {
        debug_assert!(self.fixed);
        self.lx = floor_to_step(self.lx - origin_x, step_x) + origin_x;
        self.ly = floor_to_step(self.ly - origin_y, step_y) + origin_y;
        self.ux = ceil_to_step(self.ux - origin_x, step_x) + origin_x;
        self.uy = ceil_to_step(self.uy - origin_y, step_y) + origin_y;
    }
}

fn floor_to_step(v: Dbu, step: Dbu) -> Dbu {
    if step <= 0 {
        return v;
    }
    v.div_euclid(step) * step
}

fn ceil_to_step(v: Dbu, step: Dbu) -> Dbu {
    if step <= 0 {
        return v;
    }
    let floor = floor_to_step(v, step);
    if floor == v {
        floor
    } else {
        floor + step
    }
}

/// Power/ground/reset nets are filtered at ingest; only `Signal` nets reach
/// the G-graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalType {
    Signal,
    Power,
    Ground,
    Reset,
}

impl SignalType {
    pub fn is_routable_signal(self) -> bool {
        matches!(self, SignalType::Signal)
    }
}

/// A net: a set of pins plus bookkeeping used by the wirelength models.
#[derive(Debug, Clone)]
pub struct Net {
    pub pins: Vec<PinId>,
    pub lx: Dbu,
    pub ly: Dbu,
    pub ux: Dbu,
    pub uy: Dbu,
    pub timing_weight: f32,
    pub custom_weight: f32,
}

impl Net {
    pub fn new() -> Self {
        Self {
            pins: Vec::new(),
            lx: Dbu::MAX,
            ly: Dbu::MAX,
            ux: Dbu::MIN,
            uy: Dbu::MIN,
            timing_weight: 1.0,
            custom_weight: 1.0,
        }
    }

    /// HPWL = (ux-lx)+(uy-ly), clamped to 0 when the bbox is inverted (i.e.
    /// the net has not yet had its bbox updated from any pin).
    pub fn hpwl(&self) -> i64 {
        let w = (self.ux as i64 - self.lx as i64).max(0);
        let h = (self.uy as i64 - self.ly as i64).max(0);
        w + h
    }

    pub fn weight(&self) -> f32 {
        self.timing_weight * self.custom_weight
    }

    pub fn update_bbox(&mut self, cx: Dbu, cy: Dbu) {
        self.lx = self.lx.min(cx);
        self.ux = self.ux.max(cx);
        self.ly = self.ly.min(cy);
        self.uy = self.uy.max(cy);
    }

    pub fn reset_bbox(&mut self) {
        self.lx = Dbu::MAX;
        self.ly = Dbu::MAX;
        self.ux = Dbu::MIN;
        self.uy = Dbu::MIN;
    }
}

impl Default for Net {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn die_rejects_core_outside_die() {
        let die = Rect::new(0, 0, 100, 100);
        let core = Rect::new(-5, 0, 50, 50);
        assert!(Die::new(die, core).is_err());
    }

    #[test]
    fn die_accepts_nested_core() {
        let die = Rect::new(0, 0, 100, 100);
        let core = Rect::new(5, 5, 95, 95);
        assert!(Die::new(die, core).is_ok());
    }

    #[test]
    fn snap_outward_floors_and_ceils() {
        let mut inst = Instance::new_real(3, 7, 13, 22, true, false, 0);
        inst.snap_outward(0, 0, 10, 10);
        assert_eq!((inst.lx, inst.ly, inst.ux, inst.uy), (0, 0, 20, 30));
    }

    #[test]
    fn net_hpwl_clamped_to_zero_when_unset() {
        let net = Net::new();
        assert_eq!(net.hpwl(), 0);
    }

    #[test]
    fn net_hpwl_after_updates() {
        let mut net = Net::new();
        net.update_bbox(0, 0);
        net.update_bbox(10, 4);
        assert_eq!(net.hpwl(), 14);
    }

    #[test]
    fn movable_classification() {
        let mut inst = Instance::new_real(0, 0, 10, 10, false, false, 1);
        assert!(inst.is_movable());
        inst.locked = true;
        assert!(!inst.is_movable());
    }
}
