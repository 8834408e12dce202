// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend: omnidirectional shadow cubemap pass followed by a
//! multisampled scene pass, driven by [`FrameOrchestrator`].
use ash::prelude::VkResult;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::path::Path;
use tracing::{info, warn};
use umbra_render::{
    Acquired, FrameBackend, FrameOrchestrator, FrameOutcome, FramebufferHost, Material, Model,
    Presented, RenderError, RenderSize, Renderer, SceneSettings, MAX_MATERIALS,
};

mod context;
mod frame_sync;
mod mesh;
mod record;
mod resources;
mod scene_pass;
mod shaders;
mod shadow_pass;
mod swapchain;
mod targets;

use context::Context;
use frame_sync::{create_frame_slots, FrameSlot};
use mesh::ModelBuffers;
use resources::Owned;
use shaders::ShaderSet;
use targets::SwapchainTargets;

pub use shaders::{SCENE_FRAG, SCENE_VERT, SHADOW_FRAG, SHADOW_VERT};

/// Where build.rs leaves the compiled shaders.
pub const DEFAULT_SHADER_DIR: &str = env!("OUT_DIR");

/// Configured shader directory, else the build's own output.
pub fn shader_dir(settings: &SceneSettings) -> &Path {
    settings
        .shader_dir
        .as_deref()
        .unwrap_or(Path::new(DEFAULT_SHADER_DIR))
}

pub(crate) trait VkResultExt<T> {
    /// For object creation during setup or rebuild.
    fn creating(self, what: &'static str) -> Result<T, RenderError>;
    /// For per-frame and other steady-state calls.
    fn calling(self, call: &'static str) -> Result<T, RenderError>;
}

impl<T> VkResultExt<T> for VkResult<T> {
    fn creating(self, what: &'static str) -> Result<T, RenderError> {
        self.map_err(|e| RenderError::creation(what, e))
    }

    fn calling(self, call: &'static str) -> Result<T, RenderError> {
        self.map_err(|e| RenderError::device(call, e))
    }
}

/// Device-side state the orchestrator drives.
struct Gpu {
    // Teardown order: swap-chain dependents, frame slots, model, pool, context.
    targets: Option<SwapchainTargets>,
    slots: Vec<FrameSlot>,
    model: ModelBuffers,
    command_pool: Owned<vk::CommandPool>,
    shaders: ShaderSet,
    materials: Vec<Material>,
    settings: SceneSettings,
    ctx: Context,
}

impl Gpu {
    fn targets(&self) -> Result<&SwapchainTargets, RenderError> {
        self.targets.as_ref().ok_or(RenderError::SurfaceLost)
    }

    fn slot(&self, slot: usize) -> &FrameSlot {
        &self.slots[slot % self.slots.len()]
    }
}

impl Drop for Gpu {
    fn drop(&mut self) {
        if let Err(e) = unsafe { self.ctx.device().device_wait_idle() } {
            warn!("device_wait_idle during teardown: {e}");
        }
    }
}

impl FrameBackend for Gpu {
    type Fence = vk::Fence;

    fn slot_fence(&self, slot: usize) -> vk::Fence {
        self.slot(slot).in_flight.handle()
    }

    fn wait_fence(&mut self, fence: vk::Fence) -> Result<(), RenderError> {
        unsafe {
            self.ctx
                .device()
                .wait_for_fences(&[fence], true, u64::MAX)
                .calling("vkWaitForFences")
        }
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> Result<(), RenderError> {
        unsafe {
            self.ctx
                .device()
                .reset_fences(&[fence])
                .calling("vkResetFences")
        }
    }

    fn acquire(&mut self, slot: usize) -> Result<Acquired, RenderError> {
        let swapchain = self.targets()?.swapchain();
        let semaphore = self.slot(slot).image_available.handle();
        let result = unsafe {
            self.ctx.swapchain_loader().acquire_next_image(
                swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };
        match result {
            Ok((index, suboptimal)) => Ok(Acquired::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquired::OutOfDate),
            Err(e) => Err(RenderError::device("vkAcquireNextImageKHR", e)),
        }
    }

    fn submit(&mut self, slot: usize, image_index: u32) -> Result<(), RenderError> {
        let cmd = self
            .targets()?
            .command_buffer(image_index as usize)
            .ok_or_else(|| {
                RenderError::device("vkQueueSubmit", format!("no commands for image {image_index}"))
            })?;
        let slot = self.slot(slot);
        let wait = [slot.image_available.handle()];
        let stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal = [slot.render_finished.handle()];
        let si = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: wait.len() as u32,
            p_wait_semaphores: wait.as_ptr(),
            p_wait_dst_stage_mask: stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: signal.len() as u32,
            p_signal_semaphores: signal.as_ptr(),
            ..Default::default()
        };
        unsafe {
            self.ctx
                .device()
                .queue_submit(self.ctx.graphics_queue(), &[si], slot.in_flight.handle())
                .calling("vkQueueSubmit")
        }
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<Presented, RenderError> {
        let swapchains = [self.targets()?.swapchain()];
        let wait = [self.slot(slot).render_finished.handle()];
        let indices = [image_index];
        let pi = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: wait.len() as u32,
            p_wait_semaphores: wait.as_ptr(),
            swapchain_count: 1,
            p_swapchains: swapchains.as_ptr(),
            p_image_indices: indices.as_ptr(),
            ..Default::default()
        };
        let result = unsafe {
            self.ctx
                .swapchain_loader()
                .queue_present(self.ctx.present_queue(), &pi)
        };
        match result {
            Ok(false) => Ok(Presented::Optimal),
            Ok(true) => Ok(Presented::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Presented::OutOfDate),
            Err(e) => Err(RenderError::device("vkQueuePresentKHR", e)),
        }
    }

    fn image_count(&self) -> usize {
        self.targets.as_ref().map_or(0, SwapchainTargets::image_count)
    }

    fn recreate(&mut self, size: RenderSize) -> Result<(), RenderError> {
        unsafe {
            self.ctx
                .device()
                .device_wait_idle()
                .calling("vkDeviceWaitIdle")?;
            // Old resources go before the new swap chain is created.
            self.targets = None;
            self.targets = Some(SwapchainTargets::new(
                &self.ctx,
                self.command_pool.handle(),
                &self.shaders,
                &self.model,
                &self.materials,
                &self.settings,
                size,
            )?);
        }
        Ok(())
    }
}

pub struct VkRenderer {
    frames: FrameOrchestrator<vk::Fence>,
    gpu: Gpu,
}

impl VkRenderer {
    unsafe fn build(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &SceneSettings,
        model: &Model,
    ) -> Result<Self, RenderError> {
        if model.materials.len() > MAX_MATERIALS {
            return Err(umbra_render::ModelError::TooManyMaterials {
                count: model.materials.len(),
                max: MAX_MATERIALS,
            }
            .into());
        }
        let shaders = ShaderSet::load(shader_dir(settings))?;
        let ctx = Context::new(window, display, settings.max_msaa_samples)?;
        let device = ctx.device();

        let pci = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: ctx.queues().graphics,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        let command_pool = Owned::new(
            device,
            device
                .create_command_pool(&pci, None)
                .creating("command pool")?,
        );
        let model_buffers = ModelBuffers::upload(&ctx, command_pool.handle(), model)?;
        let slots = create_frame_slots(device, settings.frames_in_flight.max(1))?;
        let targets = SwapchainTargets::new(
            &ctx,
            command_pool.handle(),
            &shaders,
            &model_buffers,
            &model.materials,
            settings,
            size,
        )?;

        let frames = FrameOrchestrator::new(slots.len(), targets.image_count());
        info!(
            "renderer ready: {} frames in flight, {} swap images",
            slots.len(),
            targets.image_count()
        );
        Ok(Self {
            frames,
            gpu: Gpu {
                targets: Some(targets),
                slots,
                model: model_buffers,
                command_pool,
                shaders,
                materials: model.materials.clone(),
                settings: settings.clone(),
                ctx,
            },
        })
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &SceneSettings,
        model: &Model,
    ) -> Result<Self, RenderError> {
        unsafe { Self::build(window, display, size, settings, model) }
    }

    fn render(&mut self, host: &mut dyn FramebufferHost) -> Result<FrameOutcome, RenderError> {
        self.frames.draw_frame(&mut self.gpu, host)
    }

    fn wait_idle(&mut self) -> Result<(), RenderError> {
        unsafe {
            self.gpu
                .ctx
                .device()
                .device_wait_idle()
                .calling("vkDeviceWaitIdle")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn shaders_default_to_the_build_output() {
        let mut settings = SceneSettings::default();
        assert_eq!(shader_dir(&settings), Path::new(env!("OUT_DIR")));
        settings.shader_dir = Some(PathBuf::from("custom"));
        assert_eq!(shader_dir(&settings), Path::new("custom"));
    }

    #[test]
    fn build_output_holds_every_stage() {
        let set = ShaderSet::load(shader_dir(&SceneSettings::default()));
        assert!(set.is_ok());
    }
}
