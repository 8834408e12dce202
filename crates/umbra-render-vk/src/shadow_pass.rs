// SPDX-License-Identifier: CEPL-1.0
//! Depth-only pass rendering the model into each face of a cube-compatible
//! depth image, and the barriers moving that image between passes.
use crate::context::Context;
use crate::resources::{create_framebuffer, create_image_view, depth_aspect, GpuImage, Owned};
use crate::shaders::{create_module, ShaderSet};
use crate::VkResultExt;
use ash::vk;
use std::mem::size_of;
use umbra_math::CubeFace;
use umbra_render::abi::FacePushConstant;
use umbra_render::{RenderError, ShadowLayout, ShadowTransition};

pub(crate) struct ShadowPass {
    pipeline: Owned<vk::Pipeline>,
    layout: Owned<vk::PipelineLayout>,
    sampler: Owned<vk::Sampler>,
    render_pass: Owned<vk::RenderPass>,
    format: vk::Format,
    resolution: u32,
}

impl ShadowPass {
    pub(crate) unsafe fn new(
        ctx: &Context,
        shaders: &ShaderSet,
        resolution: u32,
    ) -> Result<Self, RenderError> {
        let device = ctx.device();
        let format = ctx.caps().shadow_format;
        let render_pass = create_render_pass(device, format)?;
        let sampler = create_sampler(device, ctx.caps().max_anisotropy)?;

        let push = vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX,
            offset: 0,
            size: size_of::<FacePushConstant>() as u32,
        };
        let lci = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            push_constant_range_count: 1,
            p_push_constant_ranges: &push,
            ..Default::default()
        };
        let layout = Owned::new(
            device,
            device
                .create_pipeline_layout(&lci, None)
                .creating("shadow pipeline layout")?,
        );
        let pipeline = create_pipeline(
            device,
            shaders,
            render_pass.handle(),
            layout.handle(),
            resolution,
        )?;

        Ok(Self {
            pipeline,
            layout,
            sampler,
            render_pass,
            format,
            resolution,
        })
    }

    pub(crate) fn render_pass(&self) -> vk::RenderPass {
        self.render_pass.handle()
    }

    pub(crate) fn pipeline(&self) -> vk::Pipeline {
        self.pipeline.handle()
    }

    pub(crate) fn layout(&self) -> vk::PipelineLayout {
        self.layout.handle()
    }

    pub(crate) fn sampler(&self) -> vk::Sampler {
        self.sampler.handle()
    }

    pub(crate) fn format(&self) -> vk::Format {
        self.format
    }

    pub(crate) fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.resolution,
            height: self.resolution,
        }
    }

    pub(crate) unsafe fn create_cubemap(&self, ctx: &Context) -> Result<ShadowCubemap, RenderError> {
        let device = ctx.device();
        let info = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            flags: vk::ImageCreateFlags::CUBE_COMPATIBLE,
            image_type: vk::ImageType::TYPE_2D,
            format: self.format,
            extent: vk::Extent3D {
                width: self.resolution,
                height: self.resolution,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: CubeFace::COUNT as u32,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let image = GpuImage::new(ctx, &info, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;

        let cube_view = create_image_view(
            device,
            image.handle(),
            vk::ImageViewType::CUBE,
            self.format,
            vk::ImageAspectFlags::DEPTH,
            0,
            CubeFace::COUNT as u32,
        )?;
        let mut face_views = Vec::with_capacity(CubeFace::COUNT);
        let mut framebuffers = Vec::with_capacity(CubeFace::COUNT);
        for face in CubeFace::ALL {
            let view = create_image_view(
                device,
                image.handle(),
                vk::ImageViewType::TYPE_2D,
                self.format,
                depth_aspect(self.format),
                face.layer(),
                1,
            )?;
            framebuffers.push(create_framebuffer(
                device,
                self.render_pass(),
                &[view.handle()],
                self.extent(),
            )?);
            face_views.push(view);
        }

        Ok(ShadowCubemap {
            framebuffers,
            _face_views: face_views,
            cube_view,
            image,
        })
    }
}

/// One cube-compatible depth image per swap image.
pub(crate) struct ShadowCubemap {
    framebuffers: Vec<Owned<vk::Framebuffer>>,
    // Held so the framebuffers' attachments outlive them.
    _face_views: Vec<Owned<vk::ImageView>>,
    cube_view: Owned<vk::ImageView>,
    image: GpuImage,
}

impl ShadowCubemap {
    pub(crate) fn framebuffer(&self, face: CubeFace) -> vk::Framebuffer {
        self.framebuffers[face.layer() as usize].handle()
    }

    pub(crate) fn cube_view(&self) -> vk::ImageView {
        self.cube_view.handle()
    }

    pub(crate) fn image(&self) -> vk::Image {
        self.image.handle()
    }
}

pub(crate) fn image_layout(layout: ShadowLayout) -> vk::ImageLayout {
    match layout {
        ShadowLayout::RenderTarget => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ShadowLayout::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    }
}

pub(crate) struct ShadowBarrier {
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub barrier: vk::ImageMemoryBarrier<'static>,
}

/// Layout transition covering all six layers at once.
pub(crate) fn shadow_barrier(
    image: vk::Image,
    format: vk::Format,
    transition: ShadowTransition,
) -> ShadowBarrier {
    let (src_stage, dst_stage, src_access, dst_access) = match transition {
        ShadowTransition::ToShaderRead => (
            vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::AccessFlags::SHADER_READ,
        ),
        ShadowTransition::ToRenderTarget => (
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            vk::AccessFlags::SHADER_READ,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
    };
    ShadowBarrier {
        src_stage,
        dst_stage,
        barrier: vk::ImageMemoryBarrier {
            s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
            src_access_mask: src_access,
            dst_access_mask: dst_access,
            old_layout: image_layout(transition.from()),
            new_layout: image_layout(transition.to()),
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            image,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: depth_aspect(format),
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: CubeFace::COUNT as u32,
            },
            ..Default::default()
        },
    }
}

unsafe fn create_render_pass(
    device: &ash::Device,
    format: vk::Format,
) -> Result<Owned<vk::RenderPass>, RenderError> {
    let attachment = vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ..Default::default()
    };
    let depth_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        p_depth_stencil_attachment: &depth_ref,
        ..Default::default()
    };
    let ci = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &attachment,
        subpass_count: 1,
        p_subpasses: &subpass,
        ..Default::default()
    };
    let rp = device
        .create_render_pass(&ci, None)
        .creating("shadow render pass")?;
    Ok(Owned::new(device, rp))
}

unsafe fn create_sampler(
    device: &ash::Device,
    max_anisotropy: f32,
) -> Result<Owned<vk::Sampler>, RenderError> {
    let ci = vk::SamplerCreateInfo {
        s_type: vk::StructureType::SAMPLER_CREATE_INFO,
        mag_filter: vk::Filter::NEAREST,
        min_filter: vk::Filter::NEAREST,
        mipmap_mode: vk::SamplerMipmapMode::NEAREST,
        address_mode_u: vk::SamplerAddressMode::CLAMP_TO_EDGE,
        address_mode_v: vk::SamplerAddressMode::CLAMP_TO_EDGE,
        address_mode_w: vk::SamplerAddressMode::CLAMP_TO_EDGE,
        anisotropy_enable: vk::TRUE,
        max_anisotropy,
        border_color: vk::BorderColor::FLOAT_OPAQUE_WHITE,
        max_lod: 0.0,
        ..Default::default()
    };
    let sampler = device
        .create_sampler(&ci, None)
        .creating("shadow sampler")?;
    Ok(Owned::new(device, sampler))
}

unsafe fn create_pipeline(
    device: &ash::Device,
    shaders: &ShaderSet,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    resolution: u32,
) -> Result<Owned<vk::Pipeline>, RenderError> {
    let vert = create_module(device, &shaders.shadow_vert)?;
    let frag = create_module(device, &shaders.shadow_frag)?;
    let stages = [
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::VERTEX,
            module: vert.handle(),
            p_name: c"main".as_ptr(),
            ..Default::default()
        },
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::FRAGMENT,
            module: frag.handle(),
            p_name: c"main".as_ptr(),
            ..Default::default()
        },
    ];

    let binding = vk::VertexInputBindingDescription {
        binding: 0,
        stride: size_of::<[f32; 3]>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    };
    let attribute = vk::VertexInputAttributeDescription {
        location: 0,
        binding: 0,
        format: vk::Format::R32G32B32_SFLOAT,
        offset: 0,
    };
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        vertex_binding_description_count: 1,
        p_vertex_binding_descriptions: &binding,
        vertex_attribute_description_count: 1,
        p_vertex_attribute_descriptions: &attribute,
        ..Default::default()
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        ..Default::default()
    };

    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: resolution as f32,
        height: resolution as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    let scissor = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: vk::Extent2D {
            width: resolution,
            height: resolution,
        },
    };
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
        viewport_count: 1,
        p_viewports: &viewport,
        scissor_count: 1,
        p_scissors: &scissor,
        ..Default::default()
    };

    // Face views are mirrored, so winding flips per face; draw both sides.
    let raster = vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: vk::CullModeFlags::NONE,
        front_face: vk::FrontFace::COUNTER_CLOCKWISE,
        line_width: 1.0,
        ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        rasterization_samples: vk::SampleCountFlags::TYPE_1,
        ..Default::default()
    };
    let depth = vk::PipelineDepthStencilStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
        depth_test_enable: vk::TRUE,
        depth_write_enable: vk::TRUE,
        depth_compare_op: vk::CompareOp::LESS_OR_EQUAL,
        ..Default::default()
    };
    let blend = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        attachment_count: 0,
        ..Default::default()
    };

    let pci = vk::GraphicsPipelineCreateInfo {
        s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
        stage_count: stages.len() as u32,
        p_stages: stages.as_ptr(),
        p_vertex_input_state: &vertex_input,
        p_input_assembly_state: &input_assembly,
        p_viewport_state: &viewport_state,
        p_rasterization_state: &raster,
        p_multisample_state: &multisample,
        p_depth_stencil_state: &depth,
        p_color_blend_state: &blend,
        layout,
        render_pass,
        subpass: 0,
        ..Default::default()
    };
    let pipelines = device
        .create_graphics_pipelines(vk::PipelineCache::null(), &[pci], None)
        .map_err(|(_, e)| RenderError::creation("shadow pipeline", e))?;
    Ok(Owned::new(device, pipelines[0]))
}
