// SPDX-License-Identifier: CEPL-1.0
//! Multisampled forward pass shading the model with the shadow cubemap.
use crate::context::Context;
use crate::resources::{create_framebuffer, create_image_view, depth_aspect, GpuImage, Owned};
use crate::shaders::{create_module, ShaderSet};
use crate::swapchain::Swapchain;
use crate::VkResultExt;
use ash::vk;
use std::mem::size_of;
use umbra_math::ShadowBias;
use umbra_render::RenderError;

/// Binding numbers shared with scene.vert / scene.frag.
pub(crate) const VERTEX_UNIFORMS_BINDING: u32 = 0;
pub(crate) const FRAGMENT_UNIFORMS_BINDING: u32 = 1;
pub(crate) const SHADOW_MAP_BINDING: u32 = 2;

struct Attachment {
    view: Owned<vk::ImageView>,
    // Backs `view`; dropped after it.
    _image: GpuImage,
}

impl Attachment {
    unsafe fn new(
        ctx: &Context,
        format: vk::Format,
        extent: vk::Extent2D,
        samples: vk::SampleCountFlags,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
    ) -> Result<Self, RenderError> {
        let image = GpuImage::transient_attachment(ctx, format, extent, samples, usage)?;
        let view = create_image_view(
            ctx.device(),
            image.handle(),
            vk::ImageViewType::TYPE_2D,
            format,
            aspect,
            0,
            1,
        )?;
        Ok(Self {
            view,
            _image: image,
        })
    }
}

pub(crate) struct ScenePass {
    framebuffers: Vec<Owned<vk::Framebuffer>>,
    pipeline: Owned<vk::Pipeline>,
    layout: Owned<vk::PipelineLayout>,
    set_layout: Owned<vk::DescriptorSetLayout>,
    // Attachments referenced only through the framebuffers. No color
    // attachment when single-sampled: the swap image is drawn directly.
    _color: Option<Attachment>,
    _depth: Attachment,
    render_pass: Owned<vk::RenderPass>,
    extent: vk::Extent2D,
}

impl ScenePass {
    pub(crate) unsafe fn new(
        ctx: &Context,
        shaders: &ShaderSet,
        swapchain: &Swapchain,
        bias: &ShadowBias,
    ) -> Result<Self, RenderError> {
        let device = ctx.device();
        let samples = ctx.caps().msaa_samples;
        let extent = swapchain.extent();
        let color_format = swapchain.format();
        let depth_format = ctx.caps().depth_format;

        let render_pass = create_render_pass(device, color_format, depth_format, samples)?;
        let color = if samples == vk::SampleCountFlags::TYPE_1 {
            None
        } else {
            Some(Attachment::new(
                ctx,
                color_format,
                extent,
                samples,
                vk::ImageUsageFlags::COLOR_ATTACHMENT,
                vk::ImageAspectFlags::COLOR,
            )?)
        };
        let depth = Attachment::new(
            ctx,
            depth_format,
            extent,
            samples,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            depth_aspect(depth_format),
        )?;

        let set_layout = create_set_layout(device)?;
        let set_layouts = [set_layout.handle()];
        let lci = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            set_layout_count: 1,
            p_set_layouts: set_layouts.as_ptr(),
            ..Default::default()
        };
        let layout = Owned::new(
            device,
            device
                .create_pipeline_layout(&lci, None)
                .creating("scene pipeline layout")?,
        );
        let pipeline = create_pipeline(
            device,
            shaders,
            render_pass.handle(),
            layout.handle(),
            extent,
            samples,
            bias,
        )?;

        let mut framebuffers = Vec::with_capacity(swapchain.image_count());
        for swap_view in swapchain.views() {
            let attachments = match &color {
                Some(ms) => vec![ms.view.handle(), depth.view.handle(), swap_view],
                None => vec![swap_view, depth.view.handle()],
            };
            framebuffers.push(create_framebuffer(
                device,
                render_pass.handle(),
                &attachments,
                extent,
            )?);
        }

        Ok(Self {
            framebuffers,
            pipeline,
            layout,
            set_layout,
            _color: color,
            _depth: depth,
            render_pass,
            extent,
        })
    }

    pub(crate) fn render_pass(&self) -> vk::RenderPass {
        self.render_pass.handle()
    }

    pub(crate) fn framebuffer(&self, image_index: usize) -> vk::Framebuffer {
        self.framebuffers[image_index].handle()
    }

    pub(crate) fn pipeline(&self) -> vk::Pipeline {
        self.pipeline.handle()
    }

    pub(crate) fn layout(&self) -> vk::PipelineLayout {
        self.layout.handle()
    }

    pub(crate) fn set_layout(&self) -> vk::DescriptorSetLayout {
        self.set_layout.handle()
    }

    pub(crate) fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

/// Clear values in attachment order; the resolve target loads DONT_CARE.
pub(crate) fn clear_values(clear_color: [f32; 4]) -> [vk::ClearValue; 2] {
    [
        vk::ClearValue {
            color: vk::ClearColorValue {
                float32: clear_color,
            },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        },
    ]
}

fn attachment_descriptions(
    color_format: vk::Format,
    depth_format: vk::Format,
    samples: vk::SampleCountFlags,
) -> Vec<vk::AttachmentDescription> {
    let multisampled = samples != vk::SampleCountFlags::TYPE_1;
    let color = vk::AttachmentDescription {
        format: color_format,
        samples,
        load_op: vk::AttachmentLoadOp::CLEAR,
        // Multisampled color only lives until the resolve.
        store_op: if multisampled {
            vk::AttachmentStoreOp::DONT_CARE
        } else {
            vk::AttachmentStoreOp::STORE
        },
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: if multisampled {
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        } else {
            vk::ImageLayout::PRESENT_SRC_KHR
        },
        ..Default::default()
    };
    let depth = vk::AttachmentDescription {
        format: depth_format,
        samples,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::DONT_CARE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ..Default::default()
    };
    if !multisampled {
        return vec![color, depth];
    }
    let resolve = vk::AttachmentDescription {
        format: color_format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::DONT_CARE,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    };
    vec![color, depth, resolve]
}

unsafe fn create_render_pass(
    device: &ash::Device,
    color_format: vk::Format,
    depth_format: vk::Format,
    samples: vk::SampleCountFlags,
) -> Result<Owned<vk::RenderPass>, RenderError> {
    let attachments = attachment_descriptions(color_format, depth_format, samples);
    let color_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let depth_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };
    let resolve_ref = vk::AttachmentReference {
        attachment: 2,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &color_ref,
        p_resolve_attachments: if attachments.len() == 3 {
            &resolve_ref
        } else {
            std::ptr::null()
        },
        p_depth_stencil_attachment: &depth_ref,
        ..Default::default()
    };
    let dependency = external_dependency();
    let ci = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: attachments.len() as u32,
        p_attachments: attachments.as_ptr(),
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: 1,
        p_dependencies: &dependency,
        ..Default::default()
    };
    let rp = device
        .create_render_pass(&ci, None)
        .creating("scene render pass")?;
    Ok(Owned::new(device, rp))
}

/// The multisampled color and depth images are shared by every swap image,
/// so the previous submission's attachment writes must finish before this
/// pass clears them again.
fn external_dependency() -> vk::SubpassDependency {
    let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: stages,
        dst_stage_mask: stages,
        src_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ..Default::default()
    }
}

fn set_layout_bindings() -> [vk::DescriptorSetLayoutBinding<'static>; 3] {
    [
        vk::DescriptorSetLayoutBinding {
            binding: VERTEX_UNIFORMS_BINDING,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::VERTEX,
            ..Default::default()
        },
        vk::DescriptorSetLayoutBinding {
            binding: FRAGMENT_UNIFORMS_BINDING,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
            ..Default::default()
        },
        vk::DescriptorSetLayoutBinding {
            binding: SHADOW_MAP_BINDING,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
            ..Default::default()
        },
    ]
}

unsafe fn create_set_layout(
    device: &ash::Device,
) -> Result<Owned<vk::DescriptorSetLayout>, RenderError> {
    let bindings = set_layout_bindings();
    let ci = vk::DescriptorSetLayoutCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
        binding_count: bindings.len() as u32,
        p_bindings: bindings.as_ptr(),
        ..Default::default()
    };
    let layout = device
        .create_descriptor_set_layout(&ci, None)
        .creating("scene descriptor set layout")?;
    Ok(Owned::new(device, layout))
}

/// Position, normal and material index each come from their own buffer.
fn vertex_bindings() -> [vk::VertexInputBindingDescription; 3] {
    [
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<[f32; 3]>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        },
        vk::VertexInputBindingDescription {
            binding: 1,
            stride: size_of::<[f32; 3]>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        },
        vk::VertexInputBindingDescription {
            binding: 2,
            stride: size_of::<u32>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        },
    ]
}

fn vertex_attributes() -> [vk::VertexInputAttributeDescription; 3] {
    [
        vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: 0,
        },
        vk::VertexInputAttributeDescription {
            location: 1,
            binding: 1,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: 0,
        },
        vk::VertexInputAttributeDescription {
            location: 2,
            binding: 2,
            format: vk::Format::R32_UINT,
            offset: 0,
        },
    ]
}

/// Bias terms as fragment specialization constants 0, 1 and 2.
fn bias_constants(bias: &ShadowBias) -> ([vk::SpecializationMapEntry; 3], [f32; 3]) {
    let entry = |id: u32| vk::SpecializationMapEntry {
        constant_id: id,
        offset: id * size_of::<f32>() as u32,
        size: size_of::<f32>(),
    };
    (
        [entry(0), entry(1), entry(2)],
        [bias.base, bias.depth_scale, bias.edge_scale],
    )
}

unsafe fn create_pipeline(
    device: &ash::Device,
    shaders: &ShaderSet,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    extent: vk::Extent2D,
    samples: vk::SampleCountFlags,
    bias: &ShadowBias,
) -> Result<Owned<vk::Pipeline>, RenderError> {
    let vert = create_module(device, &shaders.scene_vert)?;
    let frag = create_module(device, &shaders.scene_frag)?;

    let (entries, values) = bias_constants(bias);
    let specialization = vk::SpecializationInfo {
        map_entry_count: entries.len() as u32,
        p_map_entries: entries.as_ptr(),
        data_size: size_of::<[f32; 3]>(),
        p_data: values.as_ptr().cast(),
        ..Default::default()
    };
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
            p_specialization_info: &specialization,
            ..Default::default()
        },
    ];

    let bindings = vertex_bindings();
    let attributes = vertex_attributes();
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        vertex_binding_description_count: bindings.len() as u32,
        p_vertex_binding_descriptions: bindings.as_ptr(),
        vertex_attribute_description_count: attributes.len() as u32,
        p_vertex_attribute_descriptions: attributes.as_ptr(),
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
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    let scissor = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    };
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
        viewport_count: 1,
        p_viewports: &viewport,
        scissor_count: 1,
        p_scissors: &scissor,
        ..Default::default()
    };
    let raster = vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: vk::CullModeFlags::BACK,
        front_face: vk::FrontFace::COUNTER_CLOCKWISE,
        line_width: 1.0,
        ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        rasterization_samples: samples,
        ..Default::default()
    };
    let depth = vk::PipelineDepthStencilStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
        depth_test_enable: vk::TRUE,
        depth_write_enable: vk::TRUE,
        depth_compare_op: vk::CompareOp::LESS,
        ..Default::default()
    };
    let blend_attachment = vk::PipelineColorBlendAttachmentState {
        blend_enable: vk::FALSE,
        color_write_mask: vk::ColorComponentFlags::RGBA,
        ..Default::default()
    };
    let blend = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &blend_attachment,
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
        .map_err(|(_, e)| RenderError::creation("scene pipeline", e))?;
    Ok(Owned::new(device, pipelines[0]))
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLOR: vk::Format = vk::Format::B8G8R8A8_SRGB;
    const DEPTH: vk::Format = vk::Format::D32_SFLOAT;

    #[test]
    fn multisampled_pass_resolves_into_the_swap_image() {
        let a = attachment_descriptions(COLOR, DEPTH, vk::SampleCountFlags::TYPE_4);
        assert_eq!(a.len(), 3);
        assert_eq!(a[0].samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(a[0].store_op, vk::AttachmentStoreOp::DONT_CARE);
        assert_eq!(a[1].samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(a[2].samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(a[2].store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(a[2].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn single_sample_pass_draws_straight_to_the_swap_image() {
        let a = attachment_descriptions(COLOR, DEPTH, vk::SampleCountFlags::TYPE_1);
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].format, COLOR);
        assert_eq!(a[0].store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(a[0].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(a[1].format, DEPTH);
    }

    #[test]
    fn shared_attachment_writes_are_ordered_across_frames() {
        let dep = external_dependency();
        assert_eq!(dep.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(dep.dst_subpass, 0);
        for stage in [
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        ] {
            assert!(dep.src_stage_mask.contains(stage));
        }
        assert!(dep
            .dst_stage_mask
            .contains(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS));
        let writes =
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
        assert_eq!(dep.src_access_mask, writes);
        assert!(dep.dst_access_mask.contains(writes));
    }

    #[test]
    fn descriptor_bindings_match_shader_interface() {
        let b = set_layout_bindings();
        assert_eq!(b[0].binding, 0);
        assert_eq!(b[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(b[0].stage_flags, vk::ShaderStageFlags::VERTEX);
        assert_eq!(b[1].binding, 1);
        assert_eq!(b[1].stage_flags, vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(b[2].binding, 2);
        assert_eq!(
            b[2].descriptor_type,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
    }

    #[test]
    fn vertex_streams_are_separate_buffers() {
        let bindings = vertex_bindings();
        let attrs = vertex_attributes();
        for (i, (b, a)) in bindings.iter().zip(&attrs).enumerate() {
            assert_eq!(b.binding, i as u32);
            assert_eq!(a.binding, i as u32);
            assert_eq!(a.location, i as u32);
            assert_eq!(a.offset, 0);
        }
        assert_eq!(bindings[0].stride, 12);
        assert_eq!(bindings[2].stride, 4);
        assert_eq!(attrs[2].format, vk::Format::R32_UINT);
    }

    #[test]
    fn bias_terms_map_to_constant_ids() {
        let bias = ShadowBias {
            base: 1.0,
            depth_scale: 2.0,
            edge_scale: 3.0,
        };
        let (entries, values) = bias_constants(&bias);
        assert_eq!(values, [1.0, 2.0, 3.0]);
        for (i, e) in entries.iter().enumerate() {
            assert_eq!(e.constant_id, i as u32);
            assert_eq!(e.offset, 4 * i as u32);
            assert_eq!(e.size, 4);
        }
    }
}
