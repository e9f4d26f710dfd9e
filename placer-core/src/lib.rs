//! A standalone analytic global-placement engine: bound-to-bound (B2B)
//! quadratic initial placement followed by Nesterov-accelerated,
//! density-driven refinement, with optional routability and timing
//! hand-offs to external collaborators.
//!
//! Callers never touch a database directly; they implement
//! `placer_common::NetlistSource`/`NetlistSink` (and, optionally,
//! `GlobalRouter`/`Resizer`/`GraphicsSink`) and drive everything through
//! [`place`] or [`place_with_collaborators`].

pub mod bin_grid;
pub mod config;
pub mod fft;
pub mod initial_place;
pub mod nesterov_base;
pub mod nesterov_common;
pub mod nesterov_place;
pub mod placer_base;
pub mod route_base;
pub mod sparse;
pub mod timing_base;

use placer_common::{
    GlobalRouter, GraphicsSink, NetlistSink, NetlistSource, NullGraphicsSink, PlaceError, Resizer,
};

pub use config::PlaceOptions;
use fft::NaiveDctSolver;
use nesterov_base::{NesterovBase, NesterovBaseOptions};
use nesterov_common::NesterovBaseCommon;
use nesterov_place::{Collaborators, NesterovPlace};
use placer_base::PlacerBaseCommon;
use route_base::RouteBase;
use timing_base::TimingBase;

/// Summary of one `place()` run, enough for a caller to decide whether to
/// accept the result or retry with different options.
#[derive(Debug, Clone)]
pub struct PlaceReport {
    pub initial_place_iterations: usize,
    pub nesterov_iterations: usize,
    pub final_hpwl: i64,
    pub final_overflow: f32,
    pub reverted: bool,
}

/// The uniform minimum feasible density for this netlist:
/// `(stdArea + macroArea) / whiteSpaceArea`. A caller can feed this
/// back into `PlaceOptions::target_density`.
pub fn get_uniform_target_density(src: &dyn NetlistSource) -> anyhow::Result<f64> {
    let base = PlacerBaseCommon::from_netlist(src, 0, 0, false)?;
    Ok(base.uniform_target_density())
}

/// Runs the full pipeline with no router/resizer and no debug graphics.
pub fn place(
    src: &dyn NetlistSource,
    sink: &mut dyn NetlistSink,
    opts: &PlaceOptions,
) -> Result<PlaceReport, PlaceError> {
    place_with_collaborators(src, sink, opts, &mut NullGraphicsSink, None, None)
}

/// The full entry point: reads the netlist, seeds with B2B (unless
/// `incremental`), iterates Nesterov to convergence or divergence with the
/// timing/routability hand-offs interleaved at their trigger overflows,
/// and always writes the final locations back through `sink`.
pub fn place_with_collaborators<'a>(
    src: &dyn NetlistSource,
    sink: &'a mut dyn NetlistSink,
    opts: &PlaceOptions,
    graphics: &'a mut dyn GraphicsSink,
    router: Option<&'a mut dyn GlobalRouter>,
    resizer: Option<&'a mut dyn Resizer>,
) -> Result<PlaceReport, PlaceError> {
    opts.validate()?;

    let mut pb = PlacerBaseCommon::from_netlist(src, opts.pad_left, opts.pad_right, opts.skip_io_mode)
        .map_err(|e| PlaceError::input_invariant(format!("{e:#}")))?;

    let initial_place_iterations = if opts.incremental {
        0
    } else {
        initial_place::run(&mut pb, &opts.initial_place)?
    };
    graphics.on_initial_place(initial_place_iterations, pb.total_hpwl());

    let mut common = NesterovBaseCommon::build(&pb);

    if !opts.do_nesterov_place {
        for &id in &pb.place_insts {
            let inst = &pb.instances[id.0 as usize];
            if let Some(handle) = inst.external_handle {
                sink.set_instance_location(handle, inst.lx, inst.ly)
                    .map_err(|e| PlaceError::input_invariant(e.to_string()))?;
            }
        }
        return Ok(PlaceReport {
            initial_place_iterations,
            nesterov_iterations: 0,
            final_hpwl: pb.total_hpwl(),
            final_overflow: 0.0,
            reverted: false,
        });
    }

    let nb_opts = NesterovBaseOptions {
        target_density: opts.target_density,
        uniform_target_density_mode: opts.uniform_target_density_mode,
        bin_cnt: match (opts.bin_grid_cnt_x, opts.bin_grid_cnt_y) {
            (Some(x), Some(y)) => Some((x, y)),
            _ => None,
        },
    };

    // one region spanning the whole core; per-power-domain callers build
    // one NesterovBase per region here instead
    let nb = NesterovBase::new(
        nb_opts,
        opts.nesterov,
        &mut common,
        &pb,
        Box::new(NaiveDctSolver),
    )?;
    let mut regions = vec![nb];

    let mut driver = NesterovPlace::new(opts.nesterov);
    driver.init(&mut common, &mut regions)?;

    let mut route_base = if opts.nesterov.routability_driven_mode && router.is_some() {
        Some(RouteBase::new(opts.route, &common))
    } else {
        None
    };
    let mut timing_base = if opts.nesterov.timing_driven_mode && resizer.is_some() {
        Some(TimingBase::new(opts.timing.clone()))
    } else {
        None
    };

    let mut collab = Collaborators {
        sink,
        graphics,
        router,
        resizer,
        route_base: route_base.as_mut(),
        timing_base: timing_base.as_mut(),
    };

    let result = driver.do_nesterov_place(&mut common, &mut regions, &mut pb, &mut collab)?;

    Ok(PlaceReport {
        initial_place_iterations,
        nesterov_iterations: result.iterations,
        final_hpwl: result.final_hpwl,
        final_overflow: result.final_overflow,
        reverted: result.reverted,
    })
}
