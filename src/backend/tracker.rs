// Live GPU handle accounting
//
// Every create/destroy pair in the backend reports here so a full teardown can
// be checked against the baseline taken before the resources were built.

use parking_lot::Mutex;

/// Kinds of Vulkan objects the backend creates and destroys itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Surface,
    Swapchain,
    ImageView,
    Image,
    DeviceMemory,
    Buffer,
    RenderPass,
    Framebuffer,
    ShaderModule,
    PipelineLayout,
    Pipeline,
    DescriptorSetLayout,
    DescriptorPool,
    CommandPool,
    Fence,
    Semaphore,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 16] = [
        ObjectKind::Surface,
        ObjectKind::Swapchain,
        ObjectKind::ImageView,
        ObjectKind::Image,
        ObjectKind::DeviceMemory,
        ObjectKind::Buffer,
        ObjectKind::RenderPass,
        ObjectKind::Framebuffer,
        ObjectKind::ShaderModule,
        ObjectKind::PipelineLayout,
        ObjectKind::Pipeline,
        ObjectKind::DescriptorSetLayout,
        ObjectKind::DescriptorPool,
        ObjectKind::CommandPool,
        ObjectKind::Fence,
        ObjectKind::Semaphore,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// Snapshot of live object counts, indexed by [`ObjectKind`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LiveCounts([usize; 16]);

impl LiveCounts {
    pub fn get(&self, kind: ObjectKind) -> usize {
        self.0[kind.index()]
    }

    pub fn total(&self) -> usize {
        self.0.iter().sum()
    }
}

#[derive(Debug, Default)]
pub struct ResourceTracker {
    live: Mutex<LiveCounts>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self, kind: ObjectKind) {
        self.created_n(kind, 1);
    }

    pub fn created_n(&self, kind: ObjectKind, count: usize) {
        self.live.lock().0[kind.index()] += count;
    }

    pub fn destroyed(&self, kind: ObjectKind) {
        self.destroyed_n(kind, 1);
    }

    pub fn destroyed_n(&self, kind: ObjectKind, count: usize) {
        let mut live = self.live.lock();
        let slot = &mut live.0[kind.index()];
        if *slot < count {
            log::error!(
                "Destroyed {} {:?} but only {} were live",
                count,
                kind,
                slot
            );
            *slot = 0;
        } else {
            *slot -= count;
        }
    }

    pub fn live(&self, kind: ObjectKind) -> usize {
        self.live.lock().get(kind)
    }

    pub fn snapshot(&self) -> LiveCounts {
        *self.live.lock()
    }

    /// Log every kind whose count differs from `baseline`; returns whether
    /// the counts match.
    pub fn report_leaks(&self, baseline: &LiveCounts) -> bool {
        let now = self.snapshot();
        let mut clean = true;
        for kind in ObjectKind::ALL {
            if now.get(kind) != baseline.get(kind) {
                log::warn!(
                    "{:?}: {} live, baseline {}",
                    kind,
                    now.get(kind),
                    baseline.get(kind)
                );
                clean = false;
            }
        }
        clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_lists_every_kind_in_index_order() {
        for (i, kind) in ObjectKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }

    #[test]
    fn counts_return_to_baseline() {
        let tracker = ResourceTracker::new();
        let baseline = tracker.snapshot();

        tracker.created(ObjectKind::Buffer);
        tracker.created(ObjectKind::DeviceMemory);
        tracker.created_n(ObjectKind::Framebuffer, 3);
        assert_eq!(tracker.live(ObjectKind::Framebuffer), 3);
        assert_eq!(tracker.snapshot().total(), 5);
        assert!(!tracker.report_leaks(&baseline));

        tracker.destroyed(ObjectKind::DeviceMemory);
        tracker.destroyed(ObjectKind::Buffer);
        tracker.destroyed_n(ObjectKind::Framebuffer, 3);
        assert!(tracker.report_leaks(&baseline));
        assert_eq!(tracker.snapshot(), baseline);
    }

    #[test]
    fn over_destroy_saturates_at_zero() {
        let tracker = ResourceTracker::new();
        tracker.destroyed(ObjectKind::Fence);
        assert_eq!(tracker.live(ObjectKind::Fence), 0);
    }
}
