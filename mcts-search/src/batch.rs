//! Batch sizing (spec.md §4.F): how many leaves a selection pass should
//! try to collect before handing them to the NN evaluator. Pure functions
//! over `SearchConfig` and a little tree state — no I/O, easy to unit test.

use crate::config::SearchConfig;

pub struct BatchSizer;

impl BatchSizer {
    /// The target number of leaves to select this batch. Small early
    /// (when the tree barely has any evaluated nodes to branch from),
    /// growing sub-linearly toward `max_batch_size` as the search
    /// progresses, clamped by the remaining node budget.
    pub fn target_size(config: &SearchConfig, nodes_evaluated: u32, remaining_budget: u32) -> u32 {
        if !config.smart_size_batches {
            return config.max_batch_size.min(remaining_budget).max(1);
        }
        let grown = (nodes_evaluated as f32).sqrt() * 4.0 * config.batch_size_multiplier;
        let target = (grown.max(1.0) as u32)
            .min(config.max_batch_size)
            .min(remaining_budget.max(1));
        if config.padded_batch_sizing {
            Self::pad(config, target)
        } else {
            target.max(1)
        }
    }

    /// Rounds `target` up toward the nearest device breakpoint it's within
    /// 20% of, so the evaluator isn't handed an awkward batch size like 37
    /// when 32 or 64 would use the hardware better.
    fn pad(config: &SearchConfig, target: u32) -> u32 {
        for &bp in &config.device_breakpoints {
            if bp >= target && (bp as f32) <= target as f32 * 1.2 {
                return bp.max(1);
            }
        }
        let extra = config.padded_extra_nodes_base
            + (target as f32 * config.padded_extra_nodes_multiplier) as u32;
        target.saturating_add(extra).max(1)
    }

    /// Splits a target into a two-pass collection plan (spec.md §4.F):
    /// collect 60% first, top up with the remaining 40% only if the first
    /// pass's yield (leaves actually needing NN work, vs resolved for
    /// free) was at least two-thirds — otherwise the tree is mostly
    /// terminal/transposition hits and a second pass would waste latency.
    pub fn split_collection(target: u32) -> (u32, u32) {
        let first = ((target as f32) * 0.6).round() as u32;
        let second = target.saturating_sub(first);
        (first.max(1), second)
    }

    pub fn should_collect_second_pass(first_pass_yield: usize, first_pass_size: u32) -> bool {
        if first_pass_size == 0 {
            return false;
        }
        (first_pass_yield as f32 / first_pass_size as f32) >= 0.667
    }
}
