// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Context, Result};
use tracing::{debug, info};

use ash::vk;
use lumen_render::{FrameError, FrameInput, FramePacer, FrameReport, RenderSize, Renderer, SceneDesc};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

mod bootstrap;
mod frames;
mod geometry;
mod memory;
mod pipeline;
mod result;
mod swapchain;

use bootstrap::Gpu;
use frames::{FrameSlots, VkFrameBackend};
use geometry::GpuBatch;
use pipeline::{create_render_pass, Pipelines};
use swapchain::{choose_surface_format, Swapchain, SwapchainConfig};

/// Draws one static batch with frames in flight.
///
/// The render pass, pipelines, frame slots and geometry live as long as the
/// renderer; only the swapchain and its targets are rebuilt on resize.
pub struct VkRenderer {
    gpu: Gpu,
    swap_cfg: SwapchainConfig,
    render_pass: vk::RenderPass,
    pipelines: Pipelines,
    swapchain: Swapchain,
    slots: FrameSlots,
    geometry: GpuBatch,
    pacer: FramePacer,
    clear_color: [f32; 4],
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        unsafe {
            // STRICT TEARDOWN ORDER: idle the GPU, then release everything in
            // reverse order of creation. The device and instance go last.
            let d = &self.gpu.device;
            d.device_wait_idle().ok();

            self.geometry.destroy(d);
            self.slots.destroy(d);
            self.swapchain.destroy(&self.gpu);
            self.pipelines.destroy(d);
            d.destroy_render_pass(self.render_pass, None);

            self.gpu.destroy();
        }
    }
}

unsafe fn build_renderer(
    window: &dyn HasWindowHandle,
    display: &dyn HasDisplayHandle,
    size: RenderSize,
    scene: &SceneDesc,
) -> Result<VkRenderer> {
    let gpu = Gpu::new(window, display)?;

    let formats = gpu
        .surface_loader
        .get_physical_device_surface_formats(gpu.phys, gpu.surface)
        .context("get_physical_device_surface_formats")?;
    let format = choose_surface_format(&formats).ok_or_else(|| anyhow!("surface reports no formats"))?;
    info!("surface format {:?} / {:?}", format.format, format.color_space);

    let swap_cfg = SwapchainConfig {
        format,
        present_mode: scene.present_mode,
        desired_image_count: scene.desired_image_count,
    };

    let render_pass = create_render_pass(&gpu.device, format.format, gpu.depth_format, gpu.samples)?;
    let pipelines = Pipelines::create(&gpu.device, render_pass, gpu.samples, scene.shaders.as_ref())?;
    let swapchain = Swapchain::create(&gpu, render_pass, &swap_cfg, size, vk::SwapchainKHR::null())?;
    let slots = FrameSlots::create(&gpu, pipelines.set_layout, scene.frames_in_flight)?;
    let geometry = GpuBatch::upload(&gpu.device, &gpu.memory_props, &scene.batch)?;

    Ok(VkRenderer {
        gpu,
        swap_cfg,
        render_pass,
        pipelines,
        swapchain,
        slots,
        geometry,
        pacer: FramePacer::new(scene.frames_in_flight),
        clear_color: scene.clear_color,
    })
}

impl VkRenderer {
    unsafe fn recreate_swapchain(&mut self, size: RenderSize) -> Result<()> {
        self.gpu.device.device_wait_idle().context("device_wait_idle")?;

        let fresh = Swapchain::create(
            &self.gpu,
            self.render_pass,
            &self.swap_cfg,
            size,
            self.swapchain.handle,
        )?;
        let old = std::mem::replace(&mut self.swapchain, fresh);
        old.destroy(&self.gpu);
        Ok(())
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        scene: &SceneDesc,
    ) -> Result<Self> {
        if scene.frames_in_flight == 0 {
            return Err(anyhow!("frames_in_flight must be at least 1"));
        }
        unsafe {
            let r = build_renderer(window, display, size, scene)?;
            info!(
                "Vulkan renderer ready ({}x{}, {} frames in flight, {} indices)",
                r.swapchain.extent.width,
                r.swapchain.extent.height,
                r.pacer.slots(),
                r.geometry.index_count
            );
            Ok(r)
        }
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        if size.is_zero() {
            debug!("skipping swapchain rebuild for zero-sized window");
            return Ok(());
        }
        unsafe { self.recreate_swapchain(size) }
    }

    fn render(&mut self, frame: &FrameInput) -> Result<FrameReport, FrameError> {
        let mut backend = VkFrameBackend {
            device: &self.gpu.device,
            swapchain_loader: &self.gpu.swapchain_loader,
            queue: self.gpu.queue,
            slots: &self.slots.slots,
            swapchain: &self.swapchain,
            render_pass: self.render_pass,
            pipelines: &self.pipelines,
            geometry: &self.geometry,
            clear_color: self.clear_color,
        };
        self.pacer.run_frame(&mut backend, frame)
    }

    fn extent(&self) -> RenderSize {
        self.swapchain.size()
    }
}
