// SPDX-License-Identifier: CEPL-1.0
use crate::resources::{create_semaphore, create_signaled_fence, Owned};
use ash::vk;
use umbra_render::RenderError;

/// Per-slot synchronization. The fence starts signaled so the first wait
/// on each slot returns immediately.
pub(crate) struct FrameSlot {
    pub image_available: Owned<vk::Semaphore>,
    pub render_finished: Owned<vk::Semaphore>,
    pub in_flight: Owned<vk::Fence>,
}

pub(crate) unsafe fn create_frame_slots(
    device: &ash::Device,
    count: usize,
) -> Result<Vec<FrameSlot>, RenderError> {
    (0..count)
        .map(|_| {
            Ok(FrameSlot {
                image_available: create_semaphore(device)?,
                render_finished: create_semaphore(device)?,
                in_flight: create_signaled_fence(device)?,
            })
        })
        .collect()
}
