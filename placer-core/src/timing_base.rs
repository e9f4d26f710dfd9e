//! Timing-driven net reweighting: fires once per trigger overflow,
//! pulls per-net slacks from the `Resizer` collaborator, and maps the
//! worst-slack window linearly onto net weights in `[1, netWeightMax]`.

use placer_common::Resizer;

use crate::nesterov_common::NesterovBaseCommon;
use crate::placer_base::PlacerBaseCommon;

#[derive(Debug, Clone)]
pub struct TimingBaseOptions {
    pub net_weight_max: f32,
    /// Trigger overflows in percent; a reweighting pass runs the first time
    /// the overflow dips below each entry.
    pub trigger_overflows: Vec<i32>,
}

impl Default for TimingBaseOptions {
    fn default() -> Self {
        Self {
            net_weight_max: 5.0,
            trigger_overflows: vec![79, 64, 49, 29, 21, 15],
        }
    }
}

pub struct TimingBase {
    net_weight_max: f32,
    trigger_overflows: Vec<i32>,
    overflow_fired: Vec<bool>,
}

impl TimingBase {
    pub fn new(opts: TimingBaseOptions) -> Self {
        let mut trigger_overflows = opts.trigger_overflows;
        trigger_overflows.sort_unstable_by(|a, b| b.cmp(a));
        trigger_overflows.dedup();
        let overflow_fired = vec![false; trigger_overflows.len()];
        Self {
            net_weight_max: opts.net_weight_max,
            trigger_overflows,
            overflow_fired,
        }
    }

    /// True exactly once per trigger: when the rounded percent overflow
    /// first drops below an entry of the descending trigger list.
    pub fn is_timing_net_weight_overflow(&mut self, overflow: f32) -> bool {
        let int_overflow = (overflow * 100.0).round() as i32;
        if self.trigger_overflows.is_empty() || int_overflow > self.trigger_overflows[0] {
            return false;
        }

        let mut need_td_run = false;
        for i in 0..self.trigger_overflows.len() {
            if self.trigger_overflows[i] > int_overflow {
                if !self.overflow_fired[i] {
                    self.overflow_fired[i] = true;
                    need_td_run = true;
                }
                continue;
            }
            return need_td_run;
        }
        need_td_run
    }

    /// Reweights every multi-pin net from the resizer's slack report.
    /// Returns `false` when no slack data exists, which disables timing
    /// mode for the rest of the run.
    pub fn update_net_weights(
        &self,
        common: &mut NesterovBaseCommon,
        pb: &mut PlacerBaseCommon,
        resizer: &mut dyn Resizer,
    ) -> bool {
        let _span = tracing::info_span!("timing_reweight").entered();

        if let Err(e) = resizer.find_resize_slacks() {
            log::warn!("timing-driven: resizer failed ({e}); timing-driven mode disabled");
            return false;
        }

        let worst_slack_nets = resizer.worst_slack_nets();
        if worst_slack_nets.is_empty() {
            log::warn!("timing-driven: no net slacks found; timing-driven mode disabled");
            return false;
        }

        let slack_min = resizer.net_slack(worst_slack_nets[0]);
        let slack_max = resizer.net_slack(*worst_slack_nets.last().unwrap());
        let (Some(slack_min), Some(slack_max)) = (slack_min, slack_max) else {
            log::warn!("timing-driven: no slacks found; timing-driven mode disabled");
            return false;
        };
        if slack_min.is_infinite() {
            log::warn!("timing-driven: no slacks found; timing-driven mode disabled");
            return false;
        }

        log::info!("timing-driven: worst slack {slack_min:.3e}");

        let mut weighted_net_count = 0usize;
        for (idx, gnet) in common.gnets.iter_mut().enumerate() {
            gnet.timing_weight = 1.0;
            if gnet.gpins.len() > 1 {
                let Some(net_slack) = resizer.net_slack(pb.net_handles[idx]) else {
                    continue;
                };
                if net_slack < slack_max {
                    // weight(minSlack) = netWeightMax, weight(maxSlack) = 1
                    let weight = if slack_max == slack_min {
                        1.0
                    } else {
                        1.0 + (self.net_weight_max - 1.0) * (slack_max - net_slack)
                            / (slack_max - slack_min)
                    };
                    gnet.timing_weight = weight.clamp(1.0, self.net_weight_max);
                    weighted_net_count += 1;
                }
            }
            pb.nets[idx].timing_weight = gnet.timing_weight;
        }

        log::info!("timing-driven: weighted {weighted_net_count} nets");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use placer_common::{NetId, PinId};
    use std::collections::HashMap;

    struct FakeResizer {
        slacks: Vec<(u64, f32)>,
    }

    impl Resizer for FakeResizer {
        fn find_resize_slacks(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
        fn worst_slack_nets(&self) -> Vec<u64> {
            let mut nets = self.slacks.clone();
            nets.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
            nets.into_iter().map(|(net, _)| net).collect()
        }
        fn net_slack(&self, net: u64) -> Option<f32> {
            self.slacks.iter().find(|(n, _)| *n == net).map(|(_, s)| *s)
        }
    }

    fn graph_with_nets(count: usize) -> (NesterovBaseCommon, PlacerBaseCommon) {
        use crate::nesterov_common::{GNet, GPin};
        use placer_common::{Die, Net, Rect};

        let mut gnets = Vec::new();
        let mut gpins = Vec::new();
        let mut nets = Vec::new();
        let mut net_handles = Vec::new();
        let mut handle_to_net = HashMap::new();
        for i in 0..count {
            let mut gnet = GNet {
                net: NetId(i as u32),
                gpins: vec![],
                lx: 0,
                ly: 0,
                ux: 0,
                uy: 0,
                timing_weight: 1.0,
                custom_weight: 1.0,
                wa_exp_min_sum_x: 0.0,
                wa_x_exp_min_sum_x: 0.0,
                wa_exp_max_sum_x: 0.0,
                wa_x_exp_max_sum_x: 0.0,
                wa_exp_min_sum_y: 0.0,
                wa_y_exp_min_sum_y: 0.0,
                wa_exp_max_sum_y: 0.0,
                wa_y_exp_max_sum_y: 0.0,
            };
            for _ in 0..2 {
                gnet.gpins.push(gpins.len());
                gpins.push(GPin {
                    pin: PinId(gpins.len() as u32),
                    gcell: None,
                    gnet: i,
                    offset_cx: 0,
                    offset_cy: 0,
                    cx: 0,
                    cy: 0,
                    min_exp_sum_x: None,
                    max_exp_sum_x: None,
                    min_exp_sum_y: None,
                    max_exp_sum_y: None,
                });
            }
            gnets.push(gnet);
            nets.push(Net::new());
            net_handles.push(i as u64 + 1);
            handle_to_net.insert(i as u64 + 1, NetId(i as u32));
        }

        let common = NesterovBaseCommon {
            gcells: vec![],
            gpins,
            gnets,
            inst_to_gcell: HashMap::new(),
        };
        let pb = PlacerBaseCommon {
            die: Die::new(Rect::new(0, 0, 100, 100), Rect::new(0, 0, 100, 100)).unwrap(),
            instances: vec![],
            pins: vec![],
            nets,
            net_handles,
            place_insts: vec![],
            non_place_insts: vec![],
            handle_to_instance: HashMap::new(),
            handle_to_net,
            site_size_x: 1,
            site_size_y: 1,
            pad_left: 0,
            pad_right: 0,
            place_insts_area: 0,
            non_place_insts_area: 0,
            macro_insts_area: 0,
            std_insts_area: 0,
        };
        (common, pb)
    }

    #[test]
    fn fires_each_trigger_once_in_descending_order() {
        let mut tb = TimingBase::new(TimingBaseOptions::default());
        // 0.90 is above the highest trigger (79%): nothing fires
        assert!(!tb.is_timing_net_weight_overflow(0.90));
        // dropping to 70% crosses the 79 trigger exactly once
        assert!(tb.is_timing_net_weight_overflow(0.70));
        assert!(!tb.is_timing_net_weight_overflow(0.70));
        // 20% crosses 64, 49, 29 and 21 in one dip
        assert!(tb.is_timing_net_weight_overflow(0.20));
        assert!(!tb.is_timing_net_weight_overflow(0.20));
        assert!(tb.is_timing_net_weight_overflow(0.10));
    }

    #[test]
    fn worst_slack_window_maps_linearly_onto_weights() {
        let (mut common, mut pb) = graph_with_nets(3);
        let tb = TimingBase::new(TimingBaseOptions::default());
        let mut resizer = FakeResizer {
            slacks: vec![(1, -10.0e-9), (2, -5.0e-9), (3, 0.0)],
        };
        assert!(tb.update_net_weights(&mut common, &mut pb, &mut resizer));

        // worst net gets the max weight; the boundary net stays at 1; the
        // midpoint lands in between, linear in slack
        assert!((common.gnets[0].timing_weight - 5.0).abs() < 1e-4);
        assert!((common.gnets[1].timing_weight - 3.0).abs() < 1e-4);
        assert!((common.gnets[2].timing_weight - 1.0).abs() < 1e-4);
        // mirrored into the net arena for later HPWL weighting
        assert_eq!(pb.nets[0].timing_weight, common.gnets[0].timing_weight);
    }

    #[test]
    fn no_slacks_disables_timing_mode() {
        let (mut common, mut pb) = graph_with_nets(1);
        let tb = TimingBase::new(TimingBaseOptions::default());
        let mut resizer = FakeResizer { slacks: vec![] };
        assert!(!tb.update_net_weights(&mut common, &mut pb, &mut resizer));
    }

    #[test]
    fn weights_clamp_at_net_weight_max() {
        let (mut common, mut pb) = graph_with_nets(2);
        let tb = TimingBase::new(TimingBaseOptions {
            net_weight_max: 2.0,
            ..Default::default()
        });
        let mut resizer = FakeResizer {
            slacks: vec![(1, -100.0), (2, 1.0)],
        };
        tb.update_net_weights(&mut common, &mut pb, &mut resizer);
        assert!(common.gnets[0].timing_weight <= 2.0);
        assert!((common.gnets[1].timing_weight - 1.0).abs() < 1e-6);
    }
}
