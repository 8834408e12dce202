// SPDX-License-Identifier: CEPL-1.0
//! Everything rebuilt when the swap chain is: the swap chain itself, both
//! passes, one shadow cubemap, command buffer, descriptor set and uniform
//! pair per swap image.
use crate::context::Context;
use crate::mesh::ModelBuffers;
use crate::record::{record_image, RecordInputs};
use crate::resources::{GpuBuffer, Owned};
use crate::scene_pass::{
    ScenePass, FRAGMENT_UNIFORMS_BINDING, SHADOW_MAP_BINDING, VERTEX_UNIFORMS_BINDING,
};
use crate::shaders::ShaderSet;
use crate::shadow_pass::{ShadowCubemap, ShadowPass};
use crate::swapchain::Swapchain;
use crate::VkResultExt;
use ash::vk;
use std::mem::size_of;
use tracing::debug;
use umbra_render::abi::{FragmentUniforms, VertexUniforms};
use umbra_render::{Material, RenderError, RenderSize, SceneSettings};

struct ImageUniforms {
    vertex: GpuBuffer,
    fragment: GpuBuffer,
}

struct CommandBuffers {
    device: ash::Device,
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
}

impl Drop for CommandBuffers {
    fn drop(&mut self) {
        if !self.buffers.is_empty() {
            unsafe { self.device.free_command_buffers(self.pool, &self.buffers) }
        }
    }
}

pub(crate) struct SwapchainTargets {
    // Teardown order: descriptor sets and uniforms, command buffers, shadow
    // pass resources, scene pass resources, swap chain.
    uniforms: Vec<ImageUniforms>,
    descriptor_pool: Owned<vk::DescriptorPool>,
    descriptor_sets: Vec<vk::DescriptorSet>,
    commands: CommandBuffers,
    cubemaps: Vec<ShadowCubemap>,
    shadow: ShadowPass,
    scene: ScenePass,
    swapchain: Swapchain,
}

impl SwapchainTargets {
    pub(crate) unsafe fn new(
        ctx: &Context,
        command_pool: vk::CommandPool,
        shaders: &ShaderSet,
        model: &ModelBuffers,
        materials: &[Material],
        settings: &SceneSettings,
        size: RenderSize,
    ) -> Result<Self, RenderError> {
        let device = ctx.device();
        let swapchain = Swapchain::new(ctx, size, settings.present)?;
        let image_count = swapchain.image_count();
        let scene = ScenePass::new(ctx, shaders, &swapchain, &settings.shadow.bias)?;
        let shadow = ShadowPass::new(ctx, shaders, settings.shadow.resolution)?;
        let cubemaps = (0..image_count)
            .map(|_| shadow.create_cubemap(ctx))
            .collect::<Result<Vec<_>, _>>()?;

        let ai = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: image_count as u32,
            ..Default::default()
        };
        let commands = CommandBuffers {
            device: device.clone(),
            pool: command_pool,
            buffers: device
                .allocate_command_buffers(&ai)
                .creating("command buffers")?,
        };

        let descriptor_pool = create_descriptor_pool(device, image_count as u32)?;
        let layouts = vec![scene.set_layout(); image_count];
        let dsai = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: descriptor_pool.handle(),
            descriptor_set_count: layouts.len() as u32,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        let descriptor_sets = device
            .allocate_descriptor_sets(&dsai)
            .creating("descriptor sets")?;

        let mut uniforms = Vec::with_capacity(image_count);
        for _ in 0..image_count {
            uniforms.push(ImageUniforms {
                vertex: GpuBuffer::host_visible(
                    ctx,
                    size_of::<VertexUniforms>() as vk::DeviceSize,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                )?,
                fragment: GpuBuffer::host_visible(
                    ctx,
                    size_of::<FragmentUniforms>() as vk::DeviceSize,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                )?,
            });
        }

        let targets = Self {
            uniforms,
            descriptor_pool,
            descriptor_sets,
            commands,
            cubemaps,
            shadow,
            scene,
            swapchain,
        };
        targets.write_descriptors(device);
        targets.write_uniforms(settings, materials)?;
        targets.record(device, model, settings)?;
        debug!("swap-chain resources ready for {image_count} images");
        Ok(targets)
    }

    pub(crate) fn swapchain(&self) -> vk::SwapchainKHR {
        self.swapchain.handle()
    }

    pub(crate) fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    pub(crate) fn command_buffer(&self, image_index: usize) -> Option<vk::CommandBuffer> {
        self.commands.buffers.get(image_index).copied()
    }

    unsafe fn write_descriptors(&self, device: &ash::Device) {
        for (i, &set) in self.descriptor_sets.iter().enumerate() {
            let vertex_info = vk::DescriptorBufferInfo {
                buffer: self.uniforms[i].vertex.handle(),
                offset: 0,
                range: vk::WHOLE_SIZE,
            };
            let fragment_info = vk::DescriptorBufferInfo {
                buffer: self.uniforms[i].fragment.handle(),
                offset: 0,
                range: vk::WHOLE_SIZE,
            };
            let shadow_info = vk::DescriptorImageInfo {
                sampler: self.shadow.sampler(),
                image_view: self.cubemaps[i].cube_view(),
                image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            };
            let writes = [
                vk::WriteDescriptorSet {
                    s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                    dst_set: set,
                    dst_binding: VERTEX_UNIFORMS_BINDING,
                    descriptor_count: 1,
                    descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                    p_buffer_info: &vertex_info,
                    ..Default::default()
                },
                vk::WriteDescriptorSet {
                    s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                    dst_set: set,
                    dst_binding: FRAGMENT_UNIFORMS_BINDING,
                    descriptor_count: 1,
                    descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                    p_buffer_info: &fragment_info,
                    ..Default::default()
                },
                vk::WriteDescriptorSet {
                    s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                    dst_set: set,
                    dst_binding: SHADOW_MAP_BINDING,
                    descriptor_count: 1,
                    descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    p_image_info: &shadow_info,
                    ..Default::default()
                },
            ];
            device.update_descriptor_sets(&writes, &[]);
        }
    }

    /// Uniform contents depend only on settings and the swap-chain aspect,
    /// so they are written once per rebuild.
    unsafe fn write_uniforms(
        &self,
        settings: &SceneSettings,
        materials: &[Material],
    ) -> Result<(), RenderError> {
        let extent = self.swapchain.extent();
        let aspect = RenderSize::new(extent.width, extent.height).aspect();
        let model = settings.model_transform;
        let vertex = VertexUniforms {
            model,
            model_view_projection: settings.camera.view_projection(aspect) * model,
        };
        let fragment = FragmentUniforms::new(
            settings.light_position,
            settings.shadow.near,
            settings.shadow.far,
            materials,
        );
        for u in &self.uniforms {
            u.vertex.write(&vertex)?;
            u.fragment.write(&fragment)?;
        }
        Ok(())
    }

    unsafe fn record(
        &self,
        device: &ash::Device,
        model: &ModelBuffers,
        settings: &SceneSettings,
    ) -> Result<(), RenderError> {
        let face_transforms = settings
            .light_matrices()
            .face_transforms(settings.model_transform);
        for (i, &cmd) in self.commands.buffers.iter().enumerate() {
            let inputs = RecordInputs {
                shadow: &self.shadow,
                cubemap: &self.cubemaps[i],
                scene: &self.scene,
                model,
                descriptor_set: self.descriptor_sets[i],
                image_index: i,
                face_transforms: &face_transforms,
                clear_color: settings.clear_color,
            };
            record_image(device, cmd, &inputs)?;
        }
        Ok(())
    }
}

unsafe fn create_descriptor_pool(
    device: &ash::Device,
    sets: u32,
) -> Result<Owned<vk::DescriptorPool>, RenderError> {
    let sizes = [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 2 * sets,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: sets,
        },
    ];
    let ci = vk::DescriptorPoolCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
        max_sets: sets,
        pool_size_count: sizes.len() as u32,
        p_pool_sizes: sizes.as_ptr(),
        ..Default::default()
    };
    let pool = device
        .create_descriptor_pool(&ci, None)
        .creating("descriptor pool")?;
    Ok(Owned::new(device, pool))
}
