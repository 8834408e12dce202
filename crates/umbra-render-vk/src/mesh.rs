// SPDX-License-Identifier: CEPL-1.0
use crate::context::Context;
use crate::resources::GpuBuffer;
use ash::vk;
use tracing::info;
use umbra_render::{Model, RenderError};

/// Device-local copies of the model's three vertex streams and its indices.
pub(crate) struct ModelBuffers {
    positions: GpuBuffer,
    normals: GpuBuffer,
    materials: GpuBuffer,
    indices: GpuBuffer,
    index_count: u32,
}

impl ModelBuffers {
    pub(crate) unsafe fn upload(
        ctx: &Context,
        pool: vk::CommandPool,
        model: &Model,
    ) -> Result<Self, RenderError> {
        if model.index_count() == 0 {
            return Err(RenderError::creation("model buffers", "model has no triangles"));
        }
        let vertex = vk::BufferUsageFlags::VERTEX_BUFFER;
        let out = Self {
            positions: GpuBuffer::device_local_with_data(
                ctx,
                pool,
                vertex,
                bytemuck::cast_slice(&model.positions),
            )?,
            normals: GpuBuffer::device_local_with_data(
                ctx,
                pool,
                vertex,
                bytemuck::cast_slice(&model.normals),
            )?,
            materials: GpuBuffer::device_local_with_data(
                ctx,
                pool,
                vertex,
                bytemuck::cast_slice(&model.material_indices),
            )?,
            indices: GpuBuffer::device_local_with_data(
                ctx,
                pool,
                vk::BufferUsageFlags::INDEX_BUFFER,
                bytemuck::cast_slice(&model.indices),
            )?,
            index_count: model.index_count(),
        };
        info!(
            "uploaded model: {} vertices, {} indices",
            model.vertex_count(),
            out.index_count
        );
        Ok(out)
    }

    /// Bindings 0, 1 and 2 of the scene pipeline, in order.
    pub(crate) fn vertex_buffers(&self) -> [vk::Buffer; 3] {
        [
            self.positions.handle(),
            self.normals.handle(),
            self.materials.handle(),
        ]
    }

    /// The shadow pipeline only reads positions.
    pub(crate) fn position_buffer(&self) -> vk::Buffer {
        self.positions.handle()
    }

    pub(crate) fn index_buffer(&self) -> vk::Buffer {
        self.indices.handle()
    }

    pub(crate) fn index_count(&self) -> u32 {
        self.index_count
    }
}
