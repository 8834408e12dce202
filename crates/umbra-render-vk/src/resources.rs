// SPDX-License-Identifier: CEPL-1.0
//! Owning wrappers for device objects plus the buffer/image helpers every
//! pass uses. Field order in structs holding these is teardown order.
use crate::{context::Context, VkResultExt};
use ash::vk;
use umbra_render::RenderError;

pub(crate) trait DeviceObject: Copy {
    unsafe fn destroy(self, device: &ash::Device);
}

macro_rules! device_object {
    ($($ty:ty => $destroy:ident),* $(,)?) => {
        $(impl DeviceObject for $ty {
            unsafe fn destroy(self, device: &ash::Device) {
                device.$destroy(self, None);
            }
        })*
    };
}

device_object! {
    vk::ImageView => destroy_image_view,
    vk::Framebuffer => destroy_framebuffer,
    vk::RenderPass => destroy_render_pass,
    vk::Sampler => destroy_sampler,
    vk::DescriptorSetLayout => destroy_descriptor_set_layout,
    vk::DescriptorPool => destroy_descriptor_pool,
    vk::PipelineLayout => destroy_pipeline_layout,
    vk::Pipeline => destroy_pipeline,
    vk::ShaderModule => destroy_shader_module,
    vk::Semaphore => destroy_semaphore,
    vk::Fence => destroy_fence,
    vk::CommandPool => destroy_command_pool,
}

/// A device object destroyed on drop.
pub(crate) struct Owned<T: DeviceObject> {
    device: ash::Device,
    handle: T,
}

impl<T: DeviceObject> Owned<T> {
    /// `handle` must come from `device` and have no other owner.
    pub(crate) unsafe fn new(device: &ash::Device, handle: T) -> Self {
        Self {
            device: device.clone(),
            handle,
        }
    }

    pub(crate) fn handle(&self) -> T {
        self.handle
    }
}

impl<T: DeviceObject> Drop for Owned<T> {
    fn drop(&mut self) {
        unsafe { self.handle.destroy(&self.device) }
    }
}

pub(crate) fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    req: vk::MemoryPropertyFlags,
) -> Result<u32, RenderError> {
    (0..props.memory_type_count)
        .find(|&i| {
            (type_bits & (1 << i)) != 0
                && props.memory_types[i as usize].property_flags.contains(req)
        })
        .ok_or_else(|| RenderError::CapabilityMissing(format!("memory type with {req:?}")))
}

/// Buffer plus its dedicated allocation.
pub(crate) struct GpuBuffer {
    device: ash::Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl GpuBuffer {
    pub(crate) unsafe fn new(
        ctx: &Context,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        props: vk::MemoryPropertyFlags,
    ) -> Result<Self, RenderError> {
        let device = ctx.device();
        let bci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        // Null memory until allocated; Drop copes with either.
        let mut out = Self {
            device: device.clone(),
            buffer: device.create_buffer(&bci, None).creating("buffer")?,
            memory: vk::DeviceMemory::null(),
            size,
        };
        let req = device.get_buffer_memory_requirements(out.buffer);
        let mai = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index: find_memory_type(
                ctx.memory_properties(),
                req.memory_type_bits,
                props,
            )?,
            ..Default::default()
        };
        out.memory = device
            .allocate_memory(&mai, None)
            .creating("buffer memory")?;
        device
            .bind_buffer_memory(out.buffer, out.memory, 0)
            .calling("vkBindBufferMemory")?;
        Ok(out)
    }

    pub(crate) unsafe fn host_visible(
        ctx: &Context,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Result<Self, RenderError> {
        Self::new(
            ctx,
            size,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
    }

    /// Device-local buffer filled through a staging copy on the graphics queue.
    pub(crate) unsafe fn device_local_with_data(
        ctx: &Context,
        pool: vk::CommandPool,
        usage: vk::BufferUsageFlags,
        bytes: &[u8],
    ) -> Result<Self, RenderError> {
        let size = bytes.len() as vk::DeviceSize;
        let staging = Self::host_visible(ctx, size, vk::BufferUsageFlags::TRANSFER_SRC)?;
        staging.write_bytes(bytes)?;
        let dst = Self::new(
            ctx,
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        copy_buffer(ctx, pool, staging.buffer, dst.buffer, size)?;
        Ok(dst)
    }

    pub(crate) fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Only valid for host-visible, coherent buffers.
    pub(crate) unsafe fn write_bytes(&self, bytes: &[u8]) -> Result<(), RenderError> {
        if bytes.len() as vk::DeviceSize > self.size {
            return Err(RenderError::creation(
                "buffer write",
                format!("{} bytes into {}", bytes.len(), self.size),
            ));
        }
        let ptr = self
            .device
            .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
            .calling("vkMapMemory")?;
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len());
        self.device.unmap_memory(self.memory);
        Ok(())
    }

    pub(crate) unsafe fn write<T: bytemuck::Pod>(&self, value: &T) -> Result<(), RenderError> {
        self.write_bytes(bytemuck::bytes_of(value))
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Records and runs a one-off copy, waiting for the queue to drain.
unsafe fn copy_buffer(
    ctx: &Context,
    pool: vk::CommandPool,
    src: vk::Buffer,
    dst: vk::Buffer,
    size: vk::DeviceSize,
) -> Result<(), RenderError> {
    let device = ctx.device();
    let ai = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool: pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: 1,
        ..Default::default()
    };
    let cmds = device
        .allocate_command_buffers(&ai)
        .creating("upload command buffer")?;
    let cmd = cmds[0];

    let run = || -> Result<(), RenderError> {
        let bi = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        device
            .begin_command_buffer(cmd, &bi)
            .calling("vkBeginCommandBuffer")?;
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        device.cmd_copy_buffer(cmd, src, dst, std::slice::from_ref(&region));
        device
            .end_command_buffer(cmd)
            .calling("vkEndCommandBuffer")?;

        let si = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            ..Default::default()
        };
        device
            .queue_submit(ctx.graphics_queue(), std::slice::from_ref(&si), vk::Fence::null())
            .calling("vkQueueSubmit")?;
        device
            .queue_wait_idle(ctx.graphics_queue())
            .calling("vkQueueWaitIdle")
    };
    let result = run();
    device.free_command_buffers(pool, &cmds);
    result
}

/// Image plus its dedicated allocation.
pub(crate) struct GpuImage {
    device: ash::Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
}

impl GpuImage {
    pub(crate) unsafe fn new(
        ctx: &Context,
        info: &vk::ImageCreateInfo,
        props: vk::MemoryPropertyFlags,
    ) -> Result<Self, RenderError> {
        let device = ctx.device();
        let mut out = Self {
            device: device.clone(),
            image: device.create_image(info, None).creating("image")?,
            memory: vk::DeviceMemory::null(),
        };
        let req = device.get_image_memory_requirements(out.image);
        let mai = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index: find_memory_type(
                ctx.memory_properties(),
                req.memory_type_bits,
                props,
            )?,
            ..Default::default()
        };
        out.memory = device
            .allocate_memory(&mai, None)
            .creating("image memory")?;
        device
            .bind_image_memory(out.image, out.memory, 0)
            .calling("vkBindImageMemory")?;
        Ok(out)
    }

    /// 2D attachment whose contents never leave the render pass.
    pub(crate) unsafe fn transient_attachment(
        ctx: &Context,
        format: vk::Format,
        extent: vk::Extent2D,
        samples: vk::SampleCountFlags,
        usage: vk::ImageUsageFlags,
    ) -> Result<Self, RenderError> {
        let info = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: usage | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        Self::new(ctx, &info, vk::MemoryPropertyFlags::DEVICE_LOCAL)
    }

    pub(crate) fn handle(&self) -> vk::Image {
        self.image
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Aspects that layout transitions and attachment views of a depth format
/// must name. Sampled views of a combined format use DEPTH alone.
pub(crate) fn depth_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
        _ => vk::ImageAspectFlags::DEPTH,
    }
}

pub(crate) unsafe fn create_image_view(
    device: &ash::Device,
    image: vk::Image,
    view_type: vk::ImageViewType,
    format: vk::Format,
    aspect_mask: vk::ImageAspectFlags,
    base_array_layer: u32,
    layer_count: u32,
) -> Result<Owned<vk::ImageView>, RenderError> {
    let ci = vk::ImageViewCreateInfo {
        s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
        image,
        view_type,
        format,
        components: vk::ComponentMapping::default(),
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer,
            layer_count,
        },
        ..Default::default()
    };
    let view = device.create_image_view(&ci, None).creating("image view")?;
    Ok(Owned::new(device, view))
}

pub(crate) unsafe fn create_framebuffer(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    attachments: &[vk::ImageView],
    extent: vk::Extent2D,
) -> Result<Owned<vk::Framebuffer>, RenderError> {
    let ci = vk::FramebufferCreateInfo {
        s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
        render_pass,
        attachment_count: attachments.len() as u32,
        p_attachments: attachments.as_ptr(),
        width: extent.width,
        height: extent.height,
        layers: 1,
        ..Default::default()
    };
    let fb = device.create_framebuffer(&ci, None).creating("framebuffer")?;
    Ok(Owned::new(device, fb))
}

pub(crate) unsafe fn create_semaphore(
    device: &ash::Device,
) -> Result<Owned<vk::Semaphore>, RenderError> {
    let sem = device
        .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
        .creating("semaphore")?;
    Ok(Owned::new(device, sem))
}

pub(crate) unsafe fn create_signaled_fence(
    device: &ash::Device,
) -> Result<Owned<vk::Fence>, RenderError> {
    let ci = vk::FenceCreateInfo {
        s_type: vk::StructureType::FENCE_CREATE_INFO,
        flags: vk::FenceCreateFlags::SIGNALED,
        ..Default::default()
    };
    let fence = device.create_fence(&ci, None).creating("fence")?;
    Ok(Owned::new(device, fence))
}
