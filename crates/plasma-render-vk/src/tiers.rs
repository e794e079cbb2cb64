// SPDX-License-Identifier: CEPL-1.0
//! Ownership tiers of the Vulkan device, in creation order.
//!
//! Each tier owns its handles and releases them on drop. The device pushes a
//! tier here as it finishes building it and pops tiers to tear down, so
//! destruction is always the reverse of construction.

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    /// Instance and optional debug messenger.
    Instance,
    /// Window surface created from the instance.
    Surface,
    /// Logical device, queues, command pool, mesh buffer.
    Device,
    /// Swapchain and its image views.
    Chain,
    /// Semaphores, fence, per-image command buffers.
    Frame,
    /// Render pass, framebuffers, pipeline layout, pipeline.
    Pipeline,
}

#[derive(Debug, Default)]
pub struct TierStack {
    built: Vec<Tier>,
}

impl TierStack {
    pub fn push(&mut self, tier: Tier) {
        debug_assert!(
            self.built.last().map_or(true, |top| *top < tier),
            "tier {tier:?} built out of order"
        );
        self.built.push(tier);
    }

    pub fn contains(&self, tier: Tier) -> bool {
        self.built.contains(&tier)
    }

    /// Pops the newest tier.
    pub fn pop(&mut self) -> Option<Tier> {
        self.built.pop()
    }

    /// Pops tiers newest first until `floor` has been popped. Returns them in
    /// pop order; empty when `floor` was never built.
    pub fn unwind_through(&mut self, floor: Tier) -> Vec<Tier> {
        if !self.contains(floor) {
            return Vec::new();
        }
        let mut popped = Vec::new();
        while let Some(tier) = self.built.pop() {
            popped.push(tier);
            if tier == floor {
                break;
            }
        }
        popped
    }

    pub fn is_empty(&self) -> bool {
        self.built.is_empty()
    }
}
