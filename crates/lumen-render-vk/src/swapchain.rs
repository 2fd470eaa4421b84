// SPDX-License-Identifier: CEPL-1.0
//! Swapchain, its per-image framebuffers and the multisampled targets that
//! resolve into them.

use anyhow::{anyhow, Context, Result};
use ash::vk;
use lumen_render::{PresentMode, RenderSize};
use tracing::{debug, info};

use crate::bootstrap::Gpu;
use crate::memory::{create_image, create_image_view, Image, ImageDesc};

/// Preferred surface formats, best first. Anything else falls back to the
/// first format the surface reports.
const PREFERRED_FORMATS: [vk::Format; 2] = [vk::Format::R8G8B8A8_SRGB, vk::Format::B8G8R8A8_SRGB];

pub(crate) fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    PREFERRED_FORMATS
        .iter()
        .find_map(|&want| formats.iter().copied().find(|f| f.format == want))
        .or_else(|| formats.first().copied())
}

pub(crate) fn choose_present_mode(want: PresentMode, available: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    match want {
        PresentMode::Mailbox if available.contains(&vk::PresentModeKHR::MAILBOX) => {
            vk::PresentModeKHR::MAILBOX
        }
        _ => vk::PresentModeKHR::FIFO,
    }
}

/// `desired` clamped into the surface's range; a max of 0 means unbounded.
pub(crate) fn clamp_image_count(desired: u32, caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = desired.max(caps.min_image_count);
    if caps.max_image_count == 0 {
        count
    } else {
        count.min(caps.max_image_count)
    }
}

pub(crate) fn choose_transform(caps: &vk::SurfaceCapabilitiesKHR) -> vk::SurfaceTransformFlagsKHR {
    if caps
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        caps.current_transform
    }
}

fn choose_composite_alpha(caps: &vk::SurfaceCapabilitiesKHR) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::INHERIT,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
    ]
    .into_iter()
    .find(|&a| caps.supported_composite_alpha.contains(a))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

/// The surface dictates the extent unless it reports the `u32::MAX` wildcard.
pub(crate) fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// Choices made once at startup and reused on every rebuild.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SwapchainConfig {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: PresentMode,
    pub desired_image_count: u32,
}

/// One presentable image and everything tied to it.
pub(crate) struct PresentationFrame {
    pub view: vk::ImageView,
    pub framebuffer: vk::Framebuffer,
    /// Signalled by the submit that draws into this image, waited by present.
    pub render_finished: vk::Semaphore,
}

pub(crate) struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub extent: vk::Extent2D,
    pub frames: Vec<PresentationFrame>,
    color: Image,
    depth: Image,
}

impl Swapchain {
    /// Builds a swapchain for `size`. `old` is retired by the driver but must
    /// still be destroyed by the caller.
    pub unsafe fn create(
        gpu: &Gpu,
        render_pass: vk::RenderPass,
        cfg: &SwapchainConfig,
        size: RenderSize,
        old: vk::SwapchainKHR,
    ) -> Result<Self> {
        let caps = gpu
            .surface_loader
            .get_physical_device_surface_capabilities(gpu.phys, gpu.surface)
            .context("get_physical_device_surface_capabilities")?;
        let modes = gpu
            .surface_loader
            .get_physical_device_surface_present_modes(gpu.phys, gpu.surface)
            .context("get_physical_device_surface_present_modes")?;

        let extent = extent_from_caps(&caps, size);
        let image_count = clamp_image_count(cfg.desired_image_count, &caps);
        let present_mode = choose_present_mode(cfg.present_mode, &modes);

        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: gpu.surface,
            min_image_count: image_count,
            image_format: cfg.format.format,
            image_color_space: cfg.format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: vk::SharingMode::EXCLUSIVE,
            pre_transform: choose_transform(&caps),
            composite_alpha: choose_composite_alpha(&caps),
            present_mode,
            clipped: vk::TRUE,
            old_swapchain: old,
            ..Default::default()
        };

        let handle = gpu
            .swapchain_loader
            .create_swapchain(&swap_info, None)
            .context("create_swapchain")?;
        let images = gpu
            .swapchain_loader
            .get_swapchain_images(handle)
            .context("get_swapchain_images")?;

        let device = &gpu.device;
        let color = create_image(
            device,
            &gpu.memory_props,
            &ImageDesc {
                extent,
                format: cfg.format.format,
                samples: gpu.samples,
                usage: vk::ImageUsageFlags::TRANSIENT_ATTACHMENT | vk::ImageUsageFlags::COLOR_ATTACHMENT,
                aspect: vk::ImageAspectFlags::COLOR,
            },
        )
        .context("multisampled color target")?;
        let depth = create_image(
            device,
            &gpu.memory_props,
            &ImageDesc {
                extent,
                format: gpu.depth_format,
                samples: gpu.samples,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                aspect: vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
            },
        )
        .context("depth-stencil target")?;

        let sem_info = vk::SemaphoreCreateInfo {
            s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
            ..Default::default()
        };

        let mut frames = Vec::with_capacity(images.len());
        for &image in &images {
            let view = create_image_view(device, image, cfg.format.format, vk::ImageAspectFlags::COLOR)?;

            // Order matches the render pass: MSAA color, depth, resolve.
            let attachments = [color.view, depth.view, view];
            let fb_info = vk::FramebufferCreateInfo {
                s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                render_pass,
                attachment_count: attachments.len() as u32,
                p_attachments: attachments.as_ptr(),
                width: extent.width,
                height: extent.height,
                layers: 1,
                ..Default::default()
            };
            let framebuffer = device
                .create_framebuffer(&fb_info, None)
                .context("create_framebuffer")?;
            let render_finished = device
                .create_semaphore(&sem_info, None)
                .context("create_semaphore (render finished)")?;

            frames.push(PresentationFrame {
                view,
                framebuffer,
                render_finished,
            });
        }

        if frames.is_empty() {
            return Err(anyhow!("swapchain returned no images"));
        }

        info!(
            "swapchain {}x{}, {} images (asked {}), {:?}",
            extent.width,
            extent.height,
            frames.len(),
            cfg.desired_image_count,
            present_mode
        );
        debug!("surface caps: min {} max {} images", caps.min_image_count, caps.max_image_count);

        Ok(Self {
            handle,
            extent,
            frames,
            color,
            depth,
        })
    }

    pub fn size(&self) -> RenderSize {
        RenderSize {
            width: self.extent.width,
            height: self.extent.height,
        }
    }

    /// The GPU must be done with every image.
    pub unsafe fn destroy(&self, gpu: &Gpu) {
        let d = &gpu.device;
        for f in &self.frames {
            d.destroy_semaphore(f.render_finished, None);
            d.destroy_framebuffer(f.framebuffer, None);
            d.destroy_image_view(f.view, None);
        }
        self.depth.destroy(d);
        self.color.destroy(d);
        gpu.swapchain_loader.destroy_swapchain(self.handle, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            ..Default::default()
        }
    }

    #[test]
    fn rgba_srgb_wins_over_bgra_srgb() {
        let formats = [
            fmt(vk::Format::B8G8R8A8_UNORM),
            fmt(vk::Format::B8G8R8A8_SRGB),
            fmt(vk::Format::R8G8B8A8_SRGB),
        ];
        assert_eq!(choose_surface_format(&formats), Some(fmt(vk::Format::R8G8B8A8_SRGB)));
    }

    #[test]
    fn bgra_srgb_when_rgba_missing() {
        let formats = [fmt(vk::Format::B8G8R8A8_UNORM), fmt(vk::Format::B8G8R8A8_SRGB)];
        assert_eq!(choose_surface_format(&formats), Some(fmt(vk::Format::B8G8R8A8_SRGB)));
    }

    #[test]
    fn first_format_otherwise_and_none_when_empty() {
        let formats = [fmt(vk::Format::A2B10G10R10_UNORM_PACK32), fmt(vk::Format::B8G8R8A8_UNORM)];
        assert_eq!(
            choose_surface_format(&formats),
            Some(fmt(vk::Format::A2B10G10R10_UNORM_PACK32))
        );
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn image_count_respects_surface_limits() {
        assert_eq!(clamp_image_count(3, &caps(2, 8)), 3);
        assert_eq!(clamp_image_count(3, &caps(2, 2)), 2);
        assert_eq!(clamp_image_count(3, &caps(4, 8)), 4);
        // Unbounded maximum.
        assert_eq!(clamp_image_count(5, &caps(2, 0)), 5);
    }

    #[test]
    fn mailbox_only_when_asked_and_available() {
        let both = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        let fifo_only = [vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(PresentMode::Fifo, &both), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(PresentMode::Mailbox, &both), vk::PresentModeKHR::MAILBOX);
        assert_eq!(choose_present_mode(PresentMode::Mailbox, &fifo_only), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn identity_transform_preferred() {
        let mut c = caps(2, 3);
        c.supported_transforms = vk::SurfaceTransformFlagsKHR::IDENTITY | vk::SurfaceTransformFlagsKHR::ROTATE_90;
        c.current_transform = vk::SurfaceTransformFlagsKHR::ROTATE_90;
        assert_eq!(choose_transform(&c), vk::SurfaceTransformFlagsKHR::IDENTITY);

        c.supported_transforms = vk::SurfaceTransformFlagsKHR::ROTATE_90;
        assert_eq!(choose_transform(&c), vk::SurfaceTransformFlagsKHR::ROTATE_90);
    }

    #[test]
    fn extent_follows_surface_or_clamps_wildcard() {
        let mut c = caps(2, 3);
        c.current_extent = vk::Extent2D { width: 800, height: 600 };
        let want = RenderSize { width: 640, height: 480 };
        assert_eq!(extent_from_caps(&c, want), vk::Extent2D { width: 800, height: 600 });

        c.current_extent = vk::Extent2D { width: u32::MAX, height: u32::MAX };
        c.min_image_extent = vk::Extent2D { width: 1, height: 1 };
        c.max_image_extent = vk::Extent2D { width: 512, height: 4096 };
        assert_eq!(extent_from_caps(&c, want), vk::Extent2D { width: 512, height: 480 });
    }
}
