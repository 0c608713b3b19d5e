/// How a transposition hit is resolved into the tree (spec.md §4.C).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TranspositionMode {
    /// Never link; every position gets its own node and its own NN call.
    Off,
    /// Link once, copy the evaluation immediately, never revisit the link.
    SingleNodeCopy,
    /// Link and reuse the root's evaluation for a bounded number of visits
    /// before forcing a permanent copy.
    SingleNodeDeferredCopy,
    /// Link the whole linked node to the transposition root's subtree
    /// (children included) for a bounded number of visits, best-effort.
    SharedSubtree,
}

/// Every tunable named in spec.md §6, grouped the way `SearchFlow` consumes
/// them. Field names match the spec's flag names so the grounding stays
/// legible; defaults follow the "conservative, overlap-enabled" profile
/// spec.md §8 assumes for its scenarios.
#[derive(Clone, Debug)]
pub struct SearchConfig {
    pub flow_direct_overlapped: bool,
    pub flow_dual_selectors: bool,
    pub flow_split_selects: bool,

    pub padded_batch_sizing: bool,
    pub padded_extra_nodes_base: u32,
    pub padded_extra_nodes_multiplier: f32,

    pub max_batch_size: u32,
    pub batch_size_multiplier: f32,
    pub smart_size_batches: bool,
    pub device_breakpoints: Vec<u32>,

    pub transposition_mode: TranspositionMode,
    pub transposition_use_transposed_q: bool,
    pub transposition_root_q_fraction: f32,
    pub max_transposition_root_applications_fixed: u8,
    pub max_transposition_root_applications_fraction: f32,

    pub in_flight_this_batch_linkage_enabled: bool,
    pub in_flight_other_batch_linkage_enabled: bool,

    pub use_large_pages: bool,
    pub arena_capacity: u32,

    pub cpuct_base: f32,
    pub cpuct_init: f32,
    pub fpu_value: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            flow_direct_overlapped: true,
            flow_dual_selectors: true,
            flow_split_selects: true,

            padded_batch_sizing: true,
            padded_extra_nodes_base: 8,
            padded_extra_nodes_multiplier: 0.05,

            max_batch_size: 256,
            batch_size_multiplier: 1.0,
            smart_size_batches: true,
            device_breakpoints: vec![1, 8, 32, 64, 128, 256, 512],

            transposition_mode: TranspositionMode::SingleNodeDeferredCopy,
            transposition_use_transposed_q: true,
            transposition_root_q_fraction: 0.5,
            max_transposition_root_applications_fixed: 3,
            max_transposition_root_applications_fraction: 0.1,

            in_flight_this_batch_linkage_enabled: true,
            in_flight_other_batch_linkage_enabled: false,

            use_large_pages: true,
            arena_capacity: 1 << 20,

            cpuct_base: 19652.0,
            cpuct_init: 1.25,
            fpu_value: f32::NAN, // resolved per-call against the parent's own q
        }
    }
}

impl SearchConfig {
    /// A single-selector, non-overlapped profile: useful for tests and for
    /// `bench` runs where overlap's extra bookkeeping isn't worth it.
    pub fn single_threaded() -> Self {
        Self {
            flow_direct_overlapped: false,
            flow_dual_selectors: false,
            flow_split_selects: false,
            padded_batch_sizing: false,
            smart_size_batches: false,
            in_flight_other_batch_linkage_enabled: false,
            ..Self::default()
        }
    }

    pub fn max_transposition_applications(&self, root_visits: u32) -> u8 {
        let fractional = (root_visits as f32 * self.max_transposition_root_applications_fraction)
            .floor() as u32;
        self.max_transposition_root_applications_fixed
            .max(fractional.min(u8::MAX as u32) as u8)
    }
}
