// SPDX-License-Identifier: CEPL-1.0
//! Per-slot frame resources and the Vulkan side of the pacing protocol.

use std::mem::size_of;

use anyhow::{Context, Result};
use ash::khr::swapchain;
use ash::vk;
use lumen_render::{Acquired, FrameBackend, FrameError, PerFrameData, PipelineVariant};

use crate::bootstrap::Gpu;
use crate::geometry::GpuBatch;
use crate::memory::MappedBuffer;
use crate::pipeline::Pipelines;
use crate::result::FrameResultExt;
use crate::swapchain::Swapchain;

/// Everything one in-flight frame owns. Never shared between slots.
pub(crate) struct FrameSlot {
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    /// Signalled by acquire, waited by this slot's submit.
    acquire: vk::Semaphore,
    /// Signalled when this slot's submission retires. Created signalled so
    /// the first wait returns at once.
    fence: vk::Fence,
    uniform: MappedBuffer,
    descriptor_set: vk::DescriptorSet,
}

pub(crate) struct FrameSlots {
    pub slots: Vec<FrameSlot>,
    descriptor_pool: vk::DescriptorPool,
}

impl FrameSlots {
    pub unsafe fn create(gpu: &Gpu, set_layout: vk::DescriptorSetLayout, count: usize) -> Result<Self> {
        let device = &gpu.device;

        let pool_size = vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: count as u32,
        };
        let pool_info = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            max_sets: count as u32,
            pool_size_count: 1,
            p_pool_sizes: &pool_size,
            ..Default::default()
        };
        let descriptor_pool = device
            .create_descriptor_pool(&pool_info, None)
            .context("create_descriptor_pool")?;

        let layouts = vec![set_layout; count];
        let alloc_info = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool,
            descriptor_set_count: layouts.len() as u32,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        let sets = device
            .allocate_descriptor_sets(&alloc_info)
            .context("allocate_descriptor_sets")?;

        let mut slots = Vec::with_capacity(count);
        for descriptor_set in sets {
            slots.push(FrameSlot::create(gpu, descriptor_set)?);
        }
        Ok(Self {
            slots,
            descriptor_pool,
        })
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        for s in &self.slots {
            s.destroy(device);
        }
        // Frees the sets too.
        device.destroy_descriptor_pool(self.descriptor_pool, None);
    }
}

impl FrameSlot {
    unsafe fn create(gpu: &Gpu, descriptor_set: vk::DescriptorSet) -> Result<Self> {
        let device = &gpu.device;

        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            flags: vk::CommandPoolCreateFlags::TRANSIENT
                | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            queue_family_index: gpu.queue_family,
            ..Default::default()
        };
        let command_pool = device
            .create_command_pool(&pool_info, None)
            .context("create_command_pool")?;

        let alloc = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };
        let command_buffer = device
            .allocate_command_buffers(&alloc)
            .context("allocate_command_buffers")?[0];

        let sem_info = vk::SemaphoreCreateInfo {
            s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
            ..Default::default()
        };
        let acquire = device
            .create_semaphore(&sem_info, None)
            .context("create_semaphore (acquire)")?;

        let fence_info = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        let fence = device
            .create_fence(&fence_info, None)
            .context("create_fence")?;

        let uniform = MappedBuffer::new(
            device,
            &gpu.memory_props,
            size_of::<PerFrameData>() as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
        )
        .context("per-frame uniform buffer")?;

        let buffer_info = vk::DescriptorBufferInfo {
            buffer: uniform.inner.buffer,
            offset: 0,
            range: size_of::<PerFrameData>() as vk::DeviceSize,
        };
        let write = vk::WriteDescriptorSet {
            s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
            dst_set: descriptor_set,
            dst_binding: 0,
            descriptor_count: 1,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            p_buffer_info: &buffer_info,
            ..Default::default()
        };
        device.update_descriptor_sets(&[write], &[]);

        Ok(Self {
            command_pool,
            command_buffer,
            acquire,
            fence,
            uniform,
            descriptor_set,
        })
    }

    unsafe fn destroy(&self, device: &ash::Device) {
        self.uniform.destroy(device);
        device.destroy_fence(self.fence, None);
        device.destroy_semaphore(self.acquire, None);
        // Frees the command buffer with it.
        device.destroy_command_pool(self.command_pool, None);
    }
}

/// Borrowed view of the renderer that carries out one frame.
pub(crate) struct VkFrameBackend<'a> {
    pub device: &'a ash::Device,
    pub swapchain_loader: &'a swapchain::Device,
    pub queue: vk::Queue,
    pub slots: &'a [FrameSlot],
    pub swapchain: &'a Swapchain,
    pub render_pass: vk::RenderPass,
    pub pipelines: &'a Pipelines,
    pub geometry: &'a GpuBatch,
    pub clear_color: [f32; 4],
}

impl VkFrameBackend<'_> {
    fn slot(&self, slot: usize) -> &FrameSlot {
        &self.slots[slot]
    }

    unsafe fn record_draw(&self, slot: &FrameSlot, image: u32, variant: PipelineVariant) -> Result<(), FrameError> {
        let d = self.device;
        let cmd = slot.command_buffer;
        let extent = self.swapchain.extent;

        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        d.begin_command_buffer(cmd, &begin).frame_err("begin_command_buffer")?;

        let clears = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let rp_begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: self.render_pass,
            framebuffer: self.swapchain.frames[image as usize].framebuffer,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
            clear_value_count: clears.len() as u32,
            p_clear_values: clears.as_ptr(),
            ..Default::default()
        };
        d.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);

        d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipelines.get(variant));

        // The projection already flips Y, so the viewport stays positive.
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
        d.cmd_set_viewport(cmd, 0, &[viewport]);
        d.cmd_set_scissor(cmd, 0, &[scissor]);

        d.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            self.pipelines.layout,
            0,
            &[slot.descriptor_set],
            &[],
        );
        d.cmd_bind_vertex_buffers(cmd, 0, &self.geometry.vertex_buffers(), &[0, 0, 0]);
        d.cmd_bind_index_buffer(cmd, self.geometry.indices.buffer, 0, vk::IndexType::UINT32);
        d.cmd_draw_indexed(cmd, self.geometry.index_count, 1, 0, 0, 0);

        d.cmd_end_render_pass(cmd);
        d.end_command_buffer(cmd).frame_err("end_command_buffer")
    }
}

impl FrameBackend for VkFrameBackend<'_> {
    fn wait_slot(&mut self, slot: usize) -> Result<(), FrameError> {
        let fence = self.slot(slot).fence;
        unsafe { self.device.wait_for_fences(&[fence], true, u64::MAX) }.frame_err("wait_for_fences")
    }

    fn acquire_image(&mut self, slot: usize) -> Result<Acquired, FrameError> {
        let acquire = self.slot(slot).acquire;
        let (image, suboptimal) = unsafe {
            self.swapchain_loader
                .acquire_next_image(self.swapchain.handle, u64::MAX, acquire, vk::Fence::null())
        }
        .frame_err("acquire_next_image")?;
        Ok(Acquired { image, suboptimal })
    }

    fn reset_slot(&mut self, slot: usize) -> Result<(), FrameError> {
        let s = self.slot(slot);
        unsafe {
            self.device.reset_fences(&[s.fence]).frame_err("reset_fences")?;
            self.device
                .reset_command_pool(s.command_pool, vk::CommandPoolResetFlags::empty())
                .frame_err("reset_command_pool")
        }
    }

    fn write_frame_data(&mut self, slot: usize, data: &PerFrameData) -> Result<(), FrameError> {
        if self.slot(slot).uniform.write(bytemuck::bytes_of(data)) {
            Ok(())
        } else {
            Err(FrameError::OutOfMemory {
                call: "write_frame_data",
            })
        }
    }

    fn record(&mut self, slot: usize, image: u32, variant: PipelineVariant) -> Result<(), FrameError> {
        unsafe { self.record_draw(self.slot(slot), image, variant) }
    }

    fn submit(&mut self, slot: usize, image: u32) -> Result<(), FrameError> {
        let s = self.slot(slot);
        let wait = [s.acquire];
        let stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal = [self.swapchain.frames[image as usize].render_finished];
        let cmds = [s.command_buffer];

        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: wait.len() as u32,
            p_wait_semaphores: wait.as_ptr(),
            p_wait_dst_stage_mask: stages.as_ptr(),
            command_buffer_count: cmds.len() as u32,
            p_command_buffers: cmds.as_ptr(),
            signal_semaphore_count: signal.len() as u32,
            p_signal_semaphores: signal.as_ptr(),
            ..Default::default()
        };
        unsafe {
            self.device
                .queue_submit(self.queue, std::slice::from_ref(&submit), s.fence)
                .frame_err("queue_submit")
        }
    }

    fn present(&mut self, image: u32) -> Result<bool, FrameError> {
        let wait = [self.swapchain.frames[image as usize].render_finished];
        let swapchains = [self.swapchain.handle];
        let indices = [image];
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: wait.len() as u32,
            p_wait_semaphores: wait.as_ptr(),
            swapchain_count: swapchains.len() as u32,
            p_swapchains: swapchains.as_ptr(),
            p_image_indices: indices.as_ptr(),
            ..Default::default()
        };
        unsafe { self.swapchain_loader.queue_present(self.queue, &present) }.frame_err("queue_present")
    }
}
