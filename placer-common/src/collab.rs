//! External collaborator interfaces. The engine never parses a
//! database or drives a router/resizer directly; it only calls through
//! these traits, so the embedding application supplies the LEF/DEF (or
//! equivalent) backing store, the global router, and the timing engine.
//!
//! `GraphicsSink` and `Fft2D` are the two "capability interfaces" called
//! out in the design notes: a debug-draw sink defaulting to a no-op, and an
//! abstraction over the 2-D DCT/DCST family so the density engine is not
//! wedded to one FFT implementation.

use crate::geom::{Dbu, Rect};
use crate::netlist::Die;

/// One instance as reported by the external netlist, before classification
/// into movable/fixed/dummy by `PlacerBase`.
#[derive(Debug, Clone)]
pub struct RawInstance {
    pub handle: u64,
    pub lx: Dbu,
    pub ly: Dbu,
    pub ux: Dbu,
    pub uy: Dbu,
    pub fixed: bool,
    pub is_macro: bool,
    /// Name of the power-domain region this instance belongs to, if any.
    pub region: Option<String>,
}

/// One pin as reported by the external netlist. `instance = None` marks a
/// boundary port (BTerm).
#[derive(Debug, Clone)]
pub struct RawPin {
    pub instance: Option<u64>,
    pub net: u64,
    pub offset_cx: Dbu,
    pub offset_cy: Dbu,
    pub cx: Dbu,
    pub cy: Dbu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawSignalType {
    Signal,
    Power,
    Ground,
    Reset,
}

#[derive(Debug, Clone)]
pub struct RawNet {
    pub handle: u64,
    pub signal_type: RawSignalType,
}

/// One contiguous row of placement sites.
#[derive(Debug, Clone, Copy)]
pub struct RawRow {
    pub lx: Dbu,
    pub ly: Dbu,
    pub site_width: Dbu,
    pub site_height: Dbu,
    pub num_sites: u32,
}

/// A placement blockage, optionally with a partial fill allowance.
#[derive(Debug, Clone, Copy)]
pub struct RawBlockage {
    pub rect: Rect,
    /// Percent (0-100) of the blocked area still usable for placement.
    pub max_density: f32,
}

/// A named power-domain region constraining a subset of instances.
#[derive(Debug, Clone)]
pub struct RawRegion {
    pub name: String,
    pub rect: Rect,
}

pub use crate::netlist::SignalType;

impl From<RawSignalType> for SignalType {
    fn from(v: RawSignalType) -> Self {
        match v {
            RawSignalType::Signal => SignalType::Signal,
            RawSignalType::Power => SignalType::Power,
            RawSignalType::Ground => SignalType::Ground,
            RawSignalType::Reset => SignalType::Reset,
        }
    }
}

/// Read-only view of the external netlist database.
pub trait NetlistSource {
    fn die(&self) -> anyhow::Result<Die>;
    fn instances(&self) -> anyhow::Result<Vec<RawInstance>>;
    fn pins(&self) -> anyhow::Result<Vec<RawPin>>;
    fn nets(&self) -> anyhow::Result<Vec<RawNet>>;
    fn rows(&self) -> anyhow::Result<Vec<RawRow>>;
    fn blockages(&self) -> anyhow::Result<Vec<RawBlockage>>;
    fn regions(&self) -> anyhow::Result<Vec<RawRegion>>;
}

/// Write-only view of the external netlist database.
/// The engine only ever calls this during `updateDbGCells`-equivalent
/// write-back passes and the timing/routing hand-offs; the implementation
/// is expected to also mark the instance PLACED.
pub trait NetlistSink {
    fn set_instance_location(&mut self, handle: u64, lx: Dbu, ly: Dbu) -> anyhow::Result<()>;
}

/// Per-layer usage data for one congestion-grid pass. All three vectors are
/// tile-major (`y * tile_cnt_x + x`) and the same length.
#[derive(Debug, Clone)]
pub struct RouteLayerUsage {
    /// True for horizontal routing layers (the left neighbor's right edge is
    /// shared); false for vertical (the lower neighbor's top edge is).
    pub horizontal: bool,
    pub capacity: Vec<u32>,
    pub usage: Vec<u32>,
    pub blockage: Vec<u32>,
}

/// The coarse congestion grid returned by one global-router pass.
#[derive(Debug, Clone)]
pub struct RouteUsageGrid {
    pub lx: Dbu,
    pub ly: Dbu,
    pub tile_size_x: Dbu,
    pub tile_size_y: Dbu,
    pub tile_cnt_x: usize,
    pub tile_cnt_y: usize,
    pub layers: Vec<RouteLayerUsage>,
}

impl RouteUsageGrid {
    pub fn tile_count(&self) -> usize {
        self.tile_cnt_x * self.tile_cnt_y
    }
}

/// The global router collaborator. One call runs a single
/// `allowCongestion=true, overflowIterations=1` route pass against the
/// locations most recently written through `NetlistSink`.
pub trait GlobalRouter {
    fn route_congestion_pass(&mut self) -> anyhow::Result<RouteUsageGrid>;
}

/// The timing/resizer collaborator. `find_resize_slacks` runs
/// the resizer's estimation against the most recently written placement;
/// the two query methods then read the cached result.
pub trait Resizer {
    fn find_resize_slacks(&mut self) -> anyhow::Result<()>;
    /// Net handles sorted ascending by slack (worst first). Empty means the
    /// resizer found no slack data at all.
    fn worst_slack_nets(&self) -> Vec<u64>;
    /// Slack of one net, if the resizer has data for it.
    fn net_slack(&self, net: u64) -> Option<f32>;
}

/// No-op debug-draw sink; the default per the design notes. Embedding
/// applications that want visualization implement this themselves.
pub trait GraphicsSink {
    fn on_initial_place(&mut self, _iter: usize, _hpwl: i64) {}
    fn on_iteration(&mut self, _iter: usize, _hpwl: i64, _overflow: f32) {}
    fn on_bloat(&mut self, _inflated_area_delta: i64) {}
}

pub struct NullGraphicsSink;

impl GraphicsSink for NullGraphicsSink {}

/// Capability interface over the 2-D DCT/DCST transform family used by the
/// density engine's Poisson solve. `data` is x-major with `n2`
/// entries per x index (`data[x * n2 + y]`), matching the density grid's
/// own layout. `dsct2d_inverse` runs the sine transform along x and cosine
/// along y; `dcst2d_inverse` the opposite.
pub trait Fft2D {
    fn dct2d_forward(&self, data: &mut [f32], n1: usize, n2: usize);
    fn dct2d_inverse(&self, data: &mut [f32], n1: usize, n2: usize);
    fn dsct2d_inverse(&self, data: &mut [f32], n1: usize, n2: usize);
    fn dcst2d_inverse(&self, data: &mut [f32], n1: usize, n2: usize);
}
