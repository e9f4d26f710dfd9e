//! The bound-to-bound (B2B) quadratic initial placement: every
//! outer iteration re-marks each net's extreme pins, assembles one sparse
//! SPD system per axis over the movable instances, and solves both with
//! BiCGSTAB warm-started from the current locations. The outer loop stops
//! once the residual settles (or `maxIter` runs out).

use placer_common::{Dbu, PinOwner, PlaceError};

use crate::placer_base::PlacerBaseCommon;
use crate::sparse::{bicgstab_solve, relative_residual, SparseMatrix, SparseMatrixBuilder};

#[derive(Debug, Clone, Copy)]
pub struct InitialPlaceOptions {
    pub max_iter: usize,
    pub min_diff_length: Dbu,
    pub max_solver_iter: usize,
    pub max_fanout: usize,
    pub net_weight_scale: f32,
}

impl Default for InitialPlaceOptions {
    fn default() -> Self {
        Self {
            max_iter: 20,
            min_diff_length: 1500,
            max_solver_iter: 100,
            max_fanout: 200,
            net_weight_scale: 800.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Axis {
    X,
    Y,
}

/// Assigns each movable instance its dense solver row (`extId`).
fn set_place_inst_ext_ids(pb: &mut PlacerBaseCommon) {
    for inst in pb.instances.iter_mut() {
        inst.ext_id = None;
    }
    for (row, &id) in pb.place_insts.iter().enumerate() {
        pb.instances[id.0 as usize].ext_id = Some(row as u32);
    }
}

/// Starting point: every non-locked movable cell at the core center.
fn place_insts_center(pb: &mut PlacerBaseCommon) {
    let center_x = pb.die.core().cx();
    let center_y = pb.die.core().cy();
    for &id in &pb.place_insts.clone() {
        let inst = &mut pb.instances[id.0 as usize];
        if !inst.locked {
            inst.set_center_location(center_x, center_y);
        }
    }
}

/// Builds one axis' `A x = b` from the B2B net model. For every pin pair of
/// a net where at least one pin is the net's extreme on this axis, a spring
/// of weight `netWeightScale / ((p-1) * max(dist, minDiffLength))` couples
/// the two endpoints; fixed endpoints fold into the RHS.
fn build_axis_system(
    pb: &PlacerBaseCommon,
    opts: &InitialPlaceOptions,
    axis: Axis,
) -> (SparseMatrix, Vec<f64>) {
    let n = pb.place_insts.len();
    let mut builder = SparseMatrixBuilder::new(n);
    let mut rhs = vec![0.0f64; n];

    // pin coordinate, extreme-pin flag, and movable row (if any) per axis
    let pin_info = |pin_id: placer_common::PinId| -> (Dbu, bool, Option<(usize, Dbu)>) {
        let pin = &pb.pins[pin_id.0 as usize];
        let (coord, is_extreme) = match axis {
            Axis::X => (pin.cx, pin.is_min_pin_x || pin.is_max_pin_x),
            Axis::Y => (pin.cy, pin.is_min_pin_y || pin.is_max_pin_y),
        };
        let movable = match pin.owner {
            PinOwner::Instance(id) => {
                let inst = &pb.instances[id.0 as usize];
                inst.ext_id.map(|row| {
                    let inst_center = match axis {
                        Axis::X => inst.cx(),
                        Axis::Y => inst.cy(),
                    };
                    (row as usize, coord - inst_center)
                })
            }
            PinOwner::Boundary => None,
        };
        (coord, is_extreme, movable)
    };

    for net in &pb.nets {
        if net.pins.len() <= 1 || net.pins.len() >= opts.max_fanout {
            continue;
        }

        let net_weight = opts.net_weight_scale as f64 / (net.pins.len() - 1) as f64;

        for idx1 in 1..net.pins.len() {
            let (c1, extreme1, movable1) = pin_info(net.pins[idx1]);
            for idx2 in 0..idx1 {
                let (c2, extreme2, movable2) = pin_info(net.pins[idx2]);

                // pins on the same instance add nothing
                if let (Some((row1, _)), Some((row2, _))) = (movable1, movable2) {
                    if row1 == row2 {
                        continue;
                    }
                }

                if !(extreme1 || extreme2) {
                    continue;
                }

                let diff = (c1 - c2).abs().max(opts.min_diff_length);
                let weight = net_weight / diff as f64;

                match (movable1, movable2) {
                    (Some((row1, offset1)), Some((row2, offset2))) => {
                        builder.add(row1, row1, weight);
                        builder.add(row2, row2, weight);
                        builder.add(row1, row2, -weight);
                        builder.add(row2, row1, -weight);
                        rhs[row1] += -weight * (offset1 - offset2) as f64;
                        rhs[row2] += -weight * (offset2 - offset1) as f64;
                    }
                    (Some((row1, offset1)), None) => {
                        builder.add(row1, row1, weight);
                        rhs[row1] += weight * (c2 - offset1) as f64;
                    }
                    (None, Some((row2, offset2))) => {
                        builder.add(row2, row2, weight);
                        rhs[row2] += weight * (c1 - offset2) as f64;
                    }
                    (None, None) => {}
                }
            }
        }
    }

    (builder.build(), rhs)
}

/// Runs the full B2B loop in place on the instance arena; returns the
/// number of outer iterations used.
pub fn run(pb: &mut PlacerBaseCommon, opts: &InitialPlaceOptions) -> Result<usize, PlaceError> {
    let _span = tracing::info_span!("initial_place").entered();

    place_insts_center(pb);
    set_place_inst_ext_ids(pb);

    let n = pb.place_insts.len();
    if n == 0 {
        return Ok(0);
    }

    let mut iters = 0usize;
    for i in 1..=opts.max_iter {
        pb.refresh_geometry();

        let (mat_x, rhs_x) = build_axis_system(pb, opts, Axis::X);
        let (mat_y, rhs_y) = build_axis_system(pb, opts, Axis::Y);

        let guess_x: Vec<f64> = pb
            .place_insts
            .iter()
            .map(|&id| pb.instances[id.0 as usize].cx() as f64)
            .collect();
        let guess_y: Vec<f64> = pb
            .place_insts
            .iter()
            .map(|&id| pb.instances[id.0 as usize].cy() as f64)
            .collect();

        let (sol_x, _) = bicgstab_solve(&mat_x, &rhs_x, &guess_x, 1e-6, opts.max_solver_iter);
        let (sol_y, _) = bicgstab_solve(&mat_y, &rhs_y, &guess_y, 1e-6, opts.max_solver_iter);

        let error_x = relative_residual(&mat_x, &sol_x, &rhs_x);
        let error_y = relative_residual(&mat_y, &sol_y, &rhs_y);
        let error = error_x.max(error_y);
        if !error.is_finite() {
            return Err(PlaceError::diverged(
                placer_common::DivergeKind::InitStep,
                "B2B solve produced a non-finite residual",
                false,
            ));
        }

        for (row, &id) in pb.place_insts.iter().enumerate() {
            let inst = &mut pb.instances[id.0 as usize];
            if !inst.locked {
                inst.set_center_location(sol_x[row].round() as Dbu, sol_y[row].round() as Dbu);
            }
        }
        pb.refresh_geometry();
        iters = i;

        log::info!(
            "[InitialPlace] iter: {i} CG residual: {error:.8} HPWL: {}",
            pb.total_hpwl()
        );

        if error <= 1e-5 && i >= 5 {
            break;
        }
    }

    Ok(iters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use placer_common::{
        Die, NetlistSource, RawInstance, RawNet, RawPin, RawRow, RawSignalType, Rect,
    };

    struct PadNetlist;

    /// Two movable cells on one net with two fixed pads on the left/right
    /// core edges of a 10000-wide core.
    impl NetlistSource for PadNetlist {
        fn die(&self) -> anyhow::Result<Die> {
            Ok(Die::new(Rect::new(0, 0, 10000, 10000), Rect::new(0, 0, 10000, 10000)).unwrap())
        }
        fn instances(&self) -> anyhow::Result<Vec<RawInstance>> {
            Ok(vec![
                RawInstance { handle: 1, lx: 0, ly: 0, ux: 10, uy: 10, fixed: false, is_macro: false, region: None },
                RawInstance { handle: 2, lx: 0, ly: 0, ux: 10, uy: 10, fixed: false, is_macro: false, region: None },
                RawInstance { handle: 3, lx: 0, ly: 4990, ux: 10, uy: 5000, fixed: true, is_macro: false, region: None },
                RawInstance { handle: 4, lx: 9990, ly: 4990, ux: 10000, uy: 5000, fixed: true, is_macro: false, region: None },
            ])
        }
        fn pins(&self) -> anyhow::Result<Vec<RawPin>> {
            Ok((1..=4)
                .map(|handle| RawPin {
                    instance: Some(handle),
                    net: 1,
                    offset_cx: 0,
                    offset_cy: 0,
                    cx: 0,
                    cy: 0,
                })
                .collect())
        }
        fn nets(&self) -> anyhow::Result<Vec<RawNet>> {
            Ok(vec![RawNet { handle: 1, signal_type: RawSignalType::Signal }])
        }
        fn rows(&self) -> anyhow::Result<Vec<RawRow>> {
            Ok((0..1000)
                .map(|i| RawRow { lx: 0, ly: i * 10, site_width: 10, site_height: 10, num_sites: 1000 })
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
    fn two_cells_settle_at_the_pad_midpoint_within_three_iterations() {
        let mut pb = PlacerBaseCommon::from_netlist(&PadNetlist, 0, 0, false).unwrap();
        let opts = InitialPlaceOptions {
            max_iter: 3,
            ..Default::default()
        };
        run(&mut pb, &opts).unwrap();

        // pads sit at x = 5 and 9995: quadratic equilibrium is the midpoint
        let midpoint = 5000.0;
        let tolerance = 10000.0 * 0.01;
        for &id in &pb.place_insts {
            let cx = pb.instances[id.0 as usize].cx() as f64;
            assert!(
                (cx - midpoint).abs() <= tolerance,
                "cx = {cx}, expected ~{midpoint}"
            );
        }
    }

    #[test]
    fn b2b_matrix_is_symmetric_with_dominant_diagonal() {
        let mut pb = PlacerBaseCommon::from_netlist(&PadNetlist, 0, 0, false).unwrap();
        place_insts_center(&mut pb);
        set_place_inst_ext_ids(&mut pb);
        pb.refresh_geometry();

        let opts = InitialPlaceOptions::default();
        let (mat, _rhs) = build_axis_system(&pb, &opts, Axis::X);

        let n = pb.place_insts.len();
        for row in 0..n {
            for col in 0..n {
                assert!(
                    (mat.get(row, col) - mat.get(col, row)).abs() < 1e-12,
                    "A[{row},{col}] != A[{col},{row}]"
                );
            }
            // fixed-pad anchors only add to the diagonal, so each row is
            // diagonally dominant (PSD)
            let off_diag_sum: f64 = (0..n)
                .filter(|&c| c != row)
                .map(|c| mat.get(row, c).abs())
                .sum();
            assert!(mat.get(row, row) >= off_diag_sum - 1e-12);
        }
    }

    #[test]
    fn locked_cells_do_not_move() {
        let mut pb = PlacerBaseCommon::from_netlist(&PadNetlist, 0, 0, false).unwrap();
        let id = pb.place_insts[0];
        pb.instances[id.0 as usize].locked = true;
        pb.instances[id.0 as usize].set_center_location(1234, 4321);

        run(&mut pb, &InitialPlaceOptions::default()).unwrap();
        assert_eq!(pb.instances[id.0 as usize].cx(), 1234);
        assert_eq!(pb.instances[id.0 as usize].cy(), 4321);
    }

    #[test]
    fn empty_design_is_a_no_op() {
        struct Empty;
        impl NetlistSource for Empty {
            fn die(&self) -> anyhow::Result<Die> {
                Ok(Die::new(Rect::new(0, 0, 100, 100), Rect::new(0, 0, 100, 100)).unwrap())
            }
            fn instances(&self) -> anyhow::Result<Vec<RawInstance>> {
                Ok(vec![])
            }
            fn pins(&self) -> anyhow::Result<Vec<RawPin>> {
                Ok(vec![])
            }
            fn nets(&self) -> anyhow::Result<Vec<RawNet>> {
                Ok(vec![])
            }
            fn rows(&self) -> anyhow::Result<Vec<RawRow>> {
                Ok(vec![RawRow { lx: 0, ly: 0, site_width: 10, site_height: 10, num_sites: 10 }])
            }
            fn blockages(&self) -> anyhow::Result<Vec<placer_common::RawBlockage>> {
                Ok(vec![])
            }
            fn regions(&self) -> anyhow::Result<Vec<placer_common::RawRegion>> {
                Ok(vec![])
            }
        }
        let mut pb = PlacerBaseCommon::from_netlist(&Empty, 0, 0, false).unwrap();
        assert_eq!(run(&mut pb, &InitialPlaceOptions::default()).unwrap(), 0);
    }
}
