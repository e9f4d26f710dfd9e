//! PlacerBase: classifies instances into movable/fixed/dummy,
//! builds the dummy-instance fill for unusable sites, and accumulates the
//! area totals the rest of the pipeline needs. Owns the Instance/Pin/Net
//! arenas for one run.

use anyhow::{anyhow, Context, Result};
use itertools::Itertools;
use std::collections::HashMap;

use placer_common::{
    Dbu, Die, Instance, InstanceId, Net, NetId, NetlistSource, Pin, PinId, PinOwner, RawSignalType,
    Rect,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SiteState {
    Empty,
    Row,
    FixedInst,
}

pub struct PlacerBaseCommon {
    pub die: Die,
    pub instances: Vec<Instance>,
    pub pins: Vec<Pin>,
    pub nets: Vec<Net>,
    /// External net handle per net, same order as `nets`.
    pub net_handles: Vec<u64>,

    /// Movable, non-dummy instances in arena order; their position in this
    /// list is the `extId` used by the B2B matrix rows.
    pub place_insts: Vec<InstanceId>,
    /// Fixed and dummy instances; these paint `nonPlace` bin area.
    pub non_place_insts: Vec<InstanceId>,

    pub handle_to_instance: HashMap<u64, InstanceId>,
    pub handle_to_net: HashMap<u64, NetId>,

    pub site_size_x: Dbu,
    pub site_size_y: Dbu,
    /// Std-cell padding, in site counts.
    pub pad_left: Dbu,
    pub pad_right: Dbu,

    pub place_insts_area: i64,
    pub non_place_insts_area: i64,
    pub macro_insts_area: i64,
    pub std_insts_area: i64,
}

impl PlacerBaseCommon {
    /// Builds the placer's internal arenas from an external netlist. Errors
    /// out when any instance is taller/wider than the core, or overall
    /// utilization exceeds 100%.
    pub fn from_netlist(
        src: &dyn NetlistSource,
        pad_left: Dbu,
        pad_right: Dbu,
        skip_io_mode: bool,
    ) -> Result<Self> {
        let _span = tracing::info_span!("placer_base_build").entered();

        let die = src.die().context("reading die/core geometry")?;
        let rows = src.rows().context("reading placement rows")?;
        let raw_insts = src.instances().context("reading instances")?;
        let raw_pins = src.pins().context("reading pins")?;
        let raw_nets = src.nets().context("reading nets")?;
        let blockages = src.blockages().context("reading blockages")?;
        let regions = src.regions().context("reading power-domain regions")?;

        let (site_size_x, site_size_y) = rows
            .first()
            .map(|r| (r.site_width, r.site_height))
            .unwrap_or((1, 1));

        let mut instances = Vec::with_capacity(raw_insts.len());
        let mut handle_to_instance = HashMap::with_capacity(raw_insts.len());
        let mut place_insts = Vec::new();
        let mut non_place_insts = Vec::new();

        let mut place_insts_area = 0i64;
        let mut non_place_insts_area = 0i64;
        let mut macro_insts_area = 0i64;
        let mut std_insts_area = 0i64;

        // Masters more than 6 site rows tall are treated as macros even
        // when the netlist does not mark them as blocks.
        let macro_height_threshold = site_size_y.max(1) * 6;

        for raw in &raw_insts {
            if raw.uy - raw.ly > die.core().height() || raw.ux - raw.lx > die.core().width() {
                return Err(anyhow!(
                    "instance {} ({}x{}) does not fit inside the core ({}x{})",
                    raw.handle,
                    raw.ux - raw.lx,
                    raw.uy - raw.ly,
                    die.core().width(),
                    die.core().height()
                ));
            }

            let is_macro = raw.is_macro || (raw.uy - raw.ly) > macro_height_threshold;
            if !raw.is_macro && is_macro {
                log::warn!(
                    "instance {} is more than 6 rows tall but not marked as a block; treating it as a macro",
                    raw.handle
                );
            }
            let mut inst =
                Instance::new_real(raw.lx, raw.ly, raw.ux, raw.uy, raw.fixed, is_macro, raw.handle);

            let id = InstanceId(instances.len() as u32);
            if raw.fixed {
                // A partially used site is unusable, so snap outward.
                inst.snap_outward(die.core().lx, die.core().ly, site_size_x, site_size_y);
                non_place_insts_area += inst.area();
                non_place_insts.push(id);
            } else {
                place_insts_area += inst.area();
                if is_macro {
                    macro_insts_area += inst.area();
                } else {
                    std_insts_area += inst.area();
                }
                place_insts.push(id);
            }

            handle_to_instance.insert(raw.handle, id);
            instances.push(inst);
        }

        // Dummy instances fill every site no row covers (or a blockage
        // partially withholds), so the density engine sees them as blocked.
        let region_rects: Vec<Rect> = regions.iter().map(|r| r.rect).collect();
        for rect in build_dummy_fill(
            die.core(),
            site_size_x,
            site_size_y,
            &rows,
            &instances,
            &blockages,
            &region_rects,
        ) {
            let id = InstanceId(instances.len() as u32);
            let dummy = Instance::new_dummy(rect.lx, rect.ly, rect.ux, rect.uy);
            non_place_insts_area += dummy.area();
            non_place_insts.push(id);
            instances.push(dummy);
        }

        let white_space_area = die.core_area() - non_place_insts_area;
        if place_insts_area > white_space_area {
            return Err(anyhow!(
                "utilization exceeds 100%: placeable area {place_insts_area} > white space {white_space_area}"
            ));
        }

        // --- pins & nets ---
        let mut nets = Vec::new();
        let mut net_handles = Vec::new();
        let mut handle_to_net = HashMap::with_capacity(raw_nets.len());
        for raw_net in &raw_nets {
            // supply/reset nets never reach the G-graph
            if raw_net.signal_type != RawSignalType::Signal {
                continue;
            }
            handle_to_net.insert(raw_net.handle, NetId(nets.len() as u32));
            net_handles.push(raw_net.handle);
            nets.push(Net::new());
        }

        let mut pins = Vec::with_capacity(raw_pins.len());
        for raw_pin in &raw_pins {
            let Some(&net_id) = handle_to_net.get(&raw_pin.net) else {
                continue;
            };

            if skip_io_mode && raw_pin.instance.is_none() {
                continue;
            }

            let pin_id = PinId(pins.len() as u32);
            let pin = match raw_pin.instance {
                Some(handle) => {
                    let Some(&owner) = handle_to_instance.get(&handle) else {
                        continue;
                    };
                    let mut p = Pin::new_iterm(owner, net_id, raw_pin.offset_cx, raw_pin.offset_cy);
                    let inst = &instances[owner.0 as usize];
                    p.cx = inst.cx() + raw_pin.offset_cx;
                    p.cy = inst.cy() + raw_pin.offset_cy;
                    instances[owner.0 as usize].pins.push(pin_id);
                    p
                }
                None => Pin::new_bterm(net_id, raw_pin.cx, raw_pin.cy),
            };

            nets[net_id.0 as usize].pins.push(pin_id);
            pins.push(pin);
        }

        let mut base = Self {
            die,
            instances,
            pins,
            nets,
            net_handles,
            place_insts,
            non_place_insts,
            handle_to_instance,
            handle_to_net,
            site_size_x,
            site_size_y,
            pad_left,
            pad_right,
            place_insts_area,
            non_place_insts_area,
            macro_insts_area,
            std_insts_area,
        };
        base.refresh_geometry();

        log::info!(
            "placer base: {} place / {} non-place instances, {} nets, {} pins",
            base.place_insts.len(),
            base.non_place_insts.len(),
            base.nets.len(),
            base.pins.len()
        );

        Ok(base)
    }

    /// The uniform minimum feasible density.
    pub fn uniform_target_density(&self) -> f64 {
        let white_space_area = self.die.core_area() - self.non_place_insts_area;
        if white_space_area <= 0 {
            return 1.0;
        }
        (self.std_insts_area + self.macro_insts_area) as f64 / white_space_area as f64
    }

    pub fn white_space_area(&self) -> i64 {
        self.die.core_area() - self.non_place_insts_area
    }

    /// Re-derives every pin's absolute (cx,cy), every net bbox, and the
    /// per-net extreme-pin flags from current instance locations. Must run
    /// before anything reads net geometry after instances move.
    pub fn refresh_geometry(&mut self) {
        for net in &mut self.nets {
            net.reset_bbox();
        }
        for pin_idx in 0..self.pins.len() {
            if let PinOwner::Instance(owner) = self.pins[pin_idx].owner {
                let inst = &self.instances[owner.0 as usize];
                self.pins[pin_idx].cx = inst.cx() + self.pins[pin_idx].offset_cx;
                self.pins[pin_idx].cy = inst.cy() + self.pins[pin_idx].offset_cy;
            }
            let (net, cx, cy) = (
                self.pins[pin_idx].net,
                self.pins[pin_idx].cx,
                self.pins[pin_idx].cy,
            );
            self.nets[net.0 as usize].update_bbox(cx, cy);
        }
        self.refresh_extreme_pin_flags();
    }

    fn refresh_extreme_pin_flags(&mut self) {
        for pin in self.pins.iter_mut() {
            pin.is_min_pin_x = false;
            pin.is_max_pin_x = false;
            pin.is_min_pin_y = false;
            pin.is_max_pin_y = false;
        }
        for net in &self.nets {
            if net.pins.len() < 2 {
                continue;
            }
            let (min_x, max_x) = net
                .pins
                .iter()
                .map(|&p| self.pins[p.0 as usize].cx)
                .minmax()
                .into_option()
                .unwrap();
            let (min_y, max_y) = net
                .pins
                .iter()
                .map(|&p| self.pins[p.0 as usize].cy)
                .minmax()
                .into_option()
                .unwrap();
            // exactly one pin carries each flag, ties broken by arena order
            let mut seen = (false, false, false, false);
            for &p in &net.pins {
                let pin = &mut self.pins[p.0 as usize];
                if !seen.0 && pin.cx == min_x {
                    pin.is_min_pin_x = true;
                    seen.0 = true;
                }
                if !seen.1 && pin.cx == max_x {
                    pin.is_max_pin_x = true;
                    seen.1 = true;
                }
                if !seen.2 && pin.cy == min_y {
                    pin.is_min_pin_y = true;
                    seen.2 = true;
                }
                if !seen.3 && pin.cy == max_y {
                    pin.is_max_pin_y = true;
                    seen.3 = true;
                }
            }
        }
    }

    pub fn total_hpwl(&self) -> i64 {
        self.nets.iter().map(|n| n.hpwl()).sum()
    }
}

/// Paints the core's site grid and turns contiguous Empty runs along X into
/// dummy-instance rectangles. Paint order: everything starts Empty,
/// rows (or the group's region, when one is present) paint Row, blockages
/// with a partial `maxDensity` re-paint a matching fraction of their sites
/// Empty, fixed instances paint FixedInst.
#[allow(clippy::too_many_arguments)]
fn build_dummy_fill(
    core: Rect,
    site_x: Dbu,
    site_y: Dbu,
    rows: &[placer_common::RawRow],
    instances: &[Instance],
    blockages: &[placer_common::RawBlockage],
    regions: &[Rect],
) -> Vec<Rect> {
    let site_x = site_x.max(1);
    let site_y = site_y.max(1);
    let cols = ((core.width() + site_x - 1) / site_x).max(0) as usize;
    let rows_cnt = ((core.height() + site_y - 1) / site_y).max(0) as usize;
    if cols == 0 || rows_cnt == 0 {
        return Vec::new();
    }

    let mut grid = vec![SiteState::Empty; cols * rows_cnt];

    let idx_span = |lo: Dbu, hi: Dbu, origin: Dbu, step: Dbu, cnt: usize| -> (usize, usize) {
        let lower = ((lo - origin) / step).max(0) as usize;
        let upper = (((hi - origin) + step - 1) / step).max(0) as usize;
        (lower.min(cnt), upper.min(cnt))
    };

    if regions.is_empty() {
        for row in rows {
            let (x0, x1) = idx_span(
                row.lx,
                row.lx + row.site_width * row.num_sites as Dbu,
                core.lx,
                site_x,
                cols,
            );
            let (y0, y1) = idx_span(row.ly, row.ly + row.site_height, core.ly, site_y, rows_cnt);
            for y in y0..y1 {
                for x in x0..x1 {
                    grid[y * cols + x] = SiteState::Row;
                }
            }
        }
    } else {
        // With a power-domain group, only sites inside the group's region
        // start as Row.
        for region in regions {
            let (x0, x1) = idx_span(region.lx, region.ux, core.lx, site_x, cols);
            let (y0, y1) = idx_span(region.ly, region.uy, core.ly, site_y, rows_cnt);
            for y in y0..y1 {
                for x in x0..x1 {
                    grid[y * cols + x] = SiteState::Row;
                }
            }
        }
    }

    for blockage in blockages {
        let empty_fraction = (100.0 - blockage.max_density.clamp(0.0, 100.0)) / 100.0;
        if empty_fraction <= 0.0 {
            continue;
        }
        let (x0, x1) = idx_span(blockage.rect.lx, blockage.rect.ux, core.lx, site_x, cols);
        let (y0, y1) = idx_span(blockage.rect.ly, blockage.rect.uy, core.ly, site_y, rows_cnt);
        // keep the running empty/total ratio at the requested fraction
        let mut cells = 0u32;
        let mut filled = 0u32;
        for y in y0..y1 {
            for x in x0..x1 {
                if cells == 0 || (filled as f32 / cells as f32) <= empty_fraction {
                    grid[y * cols + x] = SiteState::Empty;
                    filled += 1;
                }
                cells += 1;
            }
        }
    }

    for inst in instances.iter().filter(|i| i.fixed) {
        let (x0, x1) = idx_span(inst.lx, inst.ux, core.lx, site_x, cols);
        let (y0, y1) = idx_span(inst.ly, inst.uy, core.ly, site_y, rows_cnt);
        for y in y0..y1 {
            for x in x0..x1 {
                grid[y * cols + x] = SiteState::FixedInst;
            }
        }
    }

    let mut dummies = Vec::new();
    for y in 0..rows_cnt {
        let mut x = 0usize;
        while x < cols {
            if grid[y * cols + x] == SiteState::Empty {
                let start = x;
                while x < cols && grid[y * cols + x] == SiteState::Empty {
                    x += 1;
                }
                let lx = core.lx + start as Dbu * site_x;
                let ux = (core.lx + x as Dbu * site_x).min(core.ux);
                let ly = core.ly + y as Dbu * site_y;
                let uy = (ly + site_y).min(core.uy);
                dummies.push(Rect::new(lx, ly, ux, uy));
            } else {
                x += 1;
            }
        }
    }
    dummies
}

#[cfg(test)]
mod tests {
    use super::*;
    use placer_common::{RawBlockage, RawInstance, RawNet, RawPin, RawRegion, RawRow};

    pub(crate) struct FakeNetlist {
        pub die: Die,
        pub instances: Vec<RawInstance>,
        pub pins: Vec<RawPin>,
        pub nets: Vec<RawNet>,
        pub rows: Vec<RawRow>,
        pub blockages: Vec<RawBlockage>,
        pub regions: Vec<RawRegion>,
    }

    impl NetlistSource for FakeNetlist {
        fn die(&self) -> Result<Die> {
            Ok(self.die)
        }
        fn instances(&self) -> Result<Vec<RawInstance>> {
            Ok(self.instances.clone())
        }
        fn pins(&self) -> Result<Vec<RawPin>> {
            Ok(self.pins.clone())
        }
        fn nets(&self) -> Result<Vec<RawNet>> {
            Ok(self.nets.clone())
        }
        fn rows(&self) -> Result<Vec<RawRow>> {
            Ok(self.rows.clone())
        }
        fn blockages(&self) -> Result<Vec<RawBlockage>> {
            Ok(self.blockages.clone())
        }
        fn regions(&self) -> Result<Vec<RawRegion>> {
            Ok(self.regions.clone())
        }
    }

    /// 1000x1000 core fully covered by rows, two movable cells on one net,
    /// one fixed cell.
    fn simple_netlist() -> FakeNetlist {
        let die = Die::new(Rect::new(0, 0, 1000, 1000), Rect::new(0, 0, 1000, 1000)).unwrap();
        FakeNetlist {
            die,
            instances: vec![
                RawInstance {
                    handle: 1,
                    lx: 0,
                    ly: 0,
                    ux: 10,
                    uy: 10,
                    fixed: false,
                    is_macro: false,
                    region: None,
                },
                RawInstance {
                    handle: 2,
                    lx: 100,
                    ly: 100,
                    ux: 110,
                    uy: 110,
                    fixed: false,
                    is_macro: false,
                    region: None,
                },
                RawInstance {
                    handle: 3,
                    lx: 0,
                    ly: 900,
                    ux: 10,
                    uy: 910,
                    fixed: true,
                    is_macro: false,
                    region: None,
                },
            ],
            pins: vec![
                RawPin {
                    instance: Some(1),
                    net: 1,
                    offset_cx: 0,
                    offset_cy: 0,
                    cx: 0,
                    cy: 0,
                },
                RawPin {
                    instance: Some(2),
                    net: 1,
                    offset_cx: 0,
                    offset_cy: 0,
                    cx: 0,
                    cy: 0,
                },
            ],
            nets: vec![RawNet {
                handle: 1,
                signal_type: RawSignalType::Signal,
            }],
            rows: (0..100)
                .map(|i| RawRow {
                    lx: 0,
                    ly: i * 10,
                    site_width: 10,
                    site_height: 10,
                    num_sites: 100,
                })
                .collect(),
            blockages: vec![],
            regions: vec![],
        }
    }

    #[test]
    fn classifies_movable_and_fixed() {
        let nl = simple_netlist();
        let base = PlacerBaseCommon::from_netlist(&nl, 0, 0, false).unwrap();
        assert_eq!(base.place_insts.len(), 2);
        assert!(base.instances[2].fixed);
        // full row coverage and one snapped fixed cell: no dummies
        assert!(!base.instances.iter().any(|i| i.is_dummy));
    }

    #[test]
    fn uncovered_sites_become_dummies() {
        let mut nl = simple_netlist();
        // only the bottom half of the core has rows
        nl.rows.truncate(50);
        let base = PlacerBaseCommon::from_netlist(&nl, 0, 0, false).unwrap();
        let dummy_area: i64 = base
            .instances
            .iter()
            .filter(|i| i.is_dummy)
            .map(|i| i.area())
            .sum();
        // top half (500k) minus the fixed instance's snapped bbox (100)
        assert_eq!(dummy_area, 500 * 1000 - 100);
    }

    #[test]
    fn blockage_withholds_a_fraction_of_sites() {
        let mut nl = simple_netlist();
        nl.blockages.push(RawBlockage {
            rect: Rect::new(200, 200, 400, 400),
            max_density: 50.0,
        });
        let base = PlacerBaseCommon::from_netlist(&nl, 0, 0, false).unwrap();
        let dummy_area: i64 = base
            .instances
            .iter()
            .filter(|i| i.is_dummy)
            .map(|i| i.area())
            .sum();
        // half of the 200x200 blockage, within one site-row of rounding
        let expected = (200 * 200) / 2;
        assert!((dummy_area - expected).abs() <= 2000, "dummy_area={dummy_area}");
    }

    #[test]
    fn nets_skip_power_ground() {
        let mut nl = simple_netlist();
        nl.nets.push(RawNet {
            handle: 2,
            signal_type: RawSignalType::Power,
        });
        nl.pins.push(RawPin {
            instance: Some(1),
            net: 2,
            offset_cx: 0,
            offset_cy: 0,
            cx: 0,
            cy: 0,
        });
        let base = PlacerBaseCommon::from_netlist(&nl, 0, 0, false).unwrap();
        assert_eq!(base.nets.len(), 1);
    }

    #[test]
    fn skip_io_mode_drops_boundary_pins() {
        let mut nl = simple_netlist();
        nl.pins.push(RawPin {
            instance: None,
            net: 1,
            offset_cx: 0,
            offset_cy: 0,
            cx: 0,
            cy: 500,
        });
        let with_io = PlacerBaseCommon::from_netlist(&nl, 0, 0, false).unwrap();
        let without_io = PlacerBaseCommon::from_netlist(&nl, 0, 0, true).unwrap();
        assert_eq!(with_io.pins.len(), 3);
        assert_eq!(without_io.pins.len(), 2);
    }

    #[test]
    fn rejects_oversized_instance() {
        let mut nl = simple_netlist();
        nl.instances[0].ux = 2000;
        assert!(PlacerBaseCommon::from_netlist(&nl, 0, 0, false).is_err());
    }

    #[test]
    fn rejects_over_utilization() {
        let mut nl = simple_netlist();
        nl.instances[0].ux = 990;
        nl.instances[0].uy = 990;
        nl.instances[2].lx = 0;
        nl.instances[2].ly = 0;
        nl.instances[2].ux = 1000;
        nl.instances[2].uy = 500;
        assert!(PlacerBaseCommon::from_netlist(&nl, 0, 0, false).is_err());
    }

    #[test]
    fn extreme_pin_flags_are_unique_per_net() {
        let nl = simple_netlist();
        let base = PlacerBaseCommon::from_netlist(&nl, 0, 0, false).unwrap();
        let min_x_cnt = base.pins.iter().filter(|p| p.is_min_pin_x).count();
        let max_x_cnt = base.pins.iter().filter(|p| p.is_max_pin_x).count();
        assert_eq!(min_x_cnt, 1);
        assert_eq!(max_x_cnt, 1);
    }

    #[test]
    fn uniform_target_density_is_area_ratio() {
        let nl = simple_netlist();
        let base = PlacerBaseCommon::from_netlist(&nl, 0, 0, false).unwrap();
        let expected = (base.std_insts_area + base.macro_insts_area) as f64
            / (base.die.core_area() - base.non_place_insts_area) as f64;
        assert!((base.uniform_target_density() - expected).abs() < 1e-9);
    }
}
