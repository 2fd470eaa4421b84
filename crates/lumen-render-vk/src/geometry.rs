// SPDX-License-Identifier: CEPL-1.0
use anyhow::{bail, Result};
use ash::vk;
use lumen_render::Batch;
use tracing::debug;

use crate::memory::{create_buffer, upload, Buffer};

/// A [`Batch`] resident on the GPU, one buffer per vertex stream.
pub(crate) struct GpuBatch {
    pub positions: Buffer,
    pub colors: Buffer,
    pub normals: Buffer,
    pub indices: Buffer,
    pub index_count: u32,
}

unsafe fn stream(
    device: &ash::Device,
    mem_props: &vk::PhysicalDeviceMemoryProperties,
    bytes: &[u8],
    usage: vk::BufferUsageFlags,
) -> Result<Buffer> {
    let buf = create_buffer(
        device,
        mem_props,
        bytes.len() as vk::DeviceSize,
        usage,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )?;
    if let Err(e) = upload(device, &buf, bytes) {
        buf.destroy(device);
        return Err(e);
    }
    Ok(buf)
}

impl GpuBatch {
    pub unsafe fn upload(
        device: &ash::Device,
        mem_props: &vk::PhysicalDeviceMemoryProperties,
        batch: &Batch,
    ) -> Result<Self> {
        if batch.is_empty() {
            bail!("refusing to upload an empty batch");
        }
        let vb = vk::BufferUsageFlags::VERTEX_BUFFER;
        let positions = stream(device, mem_props, bytemuck::cast_slice(&batch.positions), vb)?;
        let colors = stream(device, mem_props, bytemuck::cast_slice(&batch.colors), vb)?;
        let normals = stream(device, mem_props, bytemuck::cast_slice(&batch.normals), vb)?;
        let indices = stream(
            device,
            mem_props,
            bytemuck::cast_slice(&batch.indices),
            vk::BufferUsageFlags::INDEX_BUFFER,
        )?;
        debug!(
            "uploaded {} vertices, {} indices",
            batch.vertex_count(),
            batch.index_count()
        );
        Ok(Self {
            positions,
            colors,
            normals,
            indices,
            index_count: batch.index_count(),
        })
    }

    /// Matches vertex input bindings 0, 1, 2.
    pub fn vertex_buffers(&self) -> [vk::Buffer; 3] {
        [self.positions.buffer, self.colors.buffer, self.normals.buffer]
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        self.indices.destroy(device);
        self.normals.destroy(device);
        self.colors.destroy(device);
        self.positions.destroy(device);
    }
}
