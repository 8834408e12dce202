// SPDX-License-Identifier: CEPL-1.0
//! Encodes the per-image frame plan into a command buffer.
use crate::mesh::ModelBuffers;
use crate::scene_pass::{clear_values, ScenePass};
use crate::shadow_pass::{shadow_barrier, ShadowCubemap, ShadowPass};
use crate::VkResultExt;
use ash::vk;
use glam::Mat4;
use umbra_math::CubeFace;
use umbra_render::abi::FacePushConstant;
use umbra_render::{frame_plan, FrameOp, RenderError};

/// Everything one image's command buffer refers to.
pub(crate) struct RecordInputs<'a> {
    pub shadow: &'a ShadowPass,
    pub cubemap: &'a ShadowCubemap,
    pub scene: &'a ScenePass,
    pub model: &'a ModelBuffers,
    pub descriptor_set: vk::DescriptorSet,
    pub image_index: usize,
    pub face_transforms: &'a [Mat4; CubeFace::COUNT],
    pub clear_color: [f32; 4],
}

pub(crate) unsafe fn record_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    inputs: &RecordInputs<'_>,
) -> Result<(), RenderError> {
    device
        .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
        .calling("vkResetCommandBuffer")?;
    let bi = vk::CommandBufferBeginInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
        ..Default::default()
    };
    device
        .begin_command_buffer(cmd, &bi)
        .calling("vkBeginCommandBuffer")?;

    let shadow_clear = [vk::ClearValue {
        depth_stencil: vk::ClearDepthStencilValue {
            depth: 1.0,
            stencil: 0,
        },
    }];
    let scene_clear = clear_values(inputs.clear_color);
    let mut in_pass = false;

    for op in frame_plan() {
        match op {
            FrameOp::BeginShadowFace(face) => {
                let rbi = vk::RenderPassBeginInfo {
                    s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
                    render_pass: inputs.shadow.render_pass(),
                    framebuffer: inputs.cubemap.framebuffer(face),
                    render_area: vk::Rect2D {
                        offset: vk::Offset2D { x: 0, y: 0 },
                        extent: inputs.shadow.extent(),
                    },
                    clear_value_count: shadow_clear.len() as u32,
                    p_clear_values: shadow_clear.as_ptr(),
                    ..Default::default()
                };
                device.cmd_begin_render_pass(cmd, &rbi, vk::SubpassContents::INLINE);
                device.cmd_bind_pipeline(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    inputs.shadow.pipeline(),
                );
                device.cmd_bind_vertex_buffers(cmd, 0, &[inputs.model.position_buffer()], &[0]);
                device.cmd_bind_index_buffer(
                    cmd,
                    inputs.model.index_buffer(),
                    0,
                    vk::IndexType::UINT16,
                );
                in_pass = true;
            }
            FrameOp::PushFaceTransform(face) => {
                let push = FacePushConstant {
                    face_transform: inputs.face_transforms[face.layer() as usize],
                };
                device.cmd_push_constants(
                    cmd,
                    inputs.shadow.layout(),
                    vk::ShaderStageFlags::VERTEX,
                    0,
                    bytemuck::bytes_of(&push),
                );
            }
            FrameOp::BeginScene => {
                let rbi = vk::RenderPassBeginInfo {
                    s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
                    render_pass: inputs.scene.render_pass(),
                    framebuffer: inputs.scene.framebuffer(inputs.image_index),
                    render_area: vk::Rect2D {
                        offset: vk::Offset2D { x: 0, y: 0 },
                        extent: inputs.scene.extent(),
                    },
                    clear_value_count: scene_clear.len() as u32,
                    p_clear_values: scene_clear.as_ptr(),
                    ..Default::default()
                };
                device.cmd_begin_render_pass(cmd, &rbi, vk::SubpassContents::INLINE);
                device.cmd_bind_pipeline(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    inputs.scene.pipeline(),
                );
                device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    inputs.scene.layout(),
                    0,
                    &[inputs.descriptor_set],
                    &[],
                );
                device.cmd_bind_vertex_buffers(cmd, 0, &inputs.model.vertex_buffers(), &[0; 3]);
                device.cmd_bind_index_buffer(
                    cmd,
                    inputs.model.index_buffer(),
                    0,
                    vk::IndexType::UINT16,
                );
                in_pass = true;
            }
            FrameOp::DrawModel => {
                debug_assert!(in_pass);
                device.cmd_draw_indexed(cmd, inputs.model.index_count(), 1, 0, 0, 0);
            }
            FrameOp::EndPass => {
                device.cmd_end_render_pass(cmd);
                in_pass = false;
            }
            FrameOp::TransitionShadow(transition) => {
                let b = shadow_barrier(
                    inputs.cubemap.image(),
                    inputs.shadow.format(),
                    transition,
                );
                device.cmd_pipeline_barrier(
                    cmd,
                    b.src_stage,
                    b.dst_stage,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[b.barrier],
                );
            }
        }
    }

    device
        .end_command_buffer(cmd)
        .calling("vkEndCommandBuffer")
}
