// SPDX-License-Identifier: CEPL-1.0
//! Buffer and image allocation with plain per-resource device memory.

use std::ffi::c_void;
use std::ptr::NonNull;

use anyhow::{anyhow, Context, Result};
use ash::vk;

/// First memory type index allowed by `type_bits` whose flags contain `required`.
pub(crate) fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..props.memory_type_count).find(|&i| {
        (type_bits & (1 << i)) != 0
            && props.memory_types[i as usize]
                .property_flags
                .contains(required)
    })
}

unsafe fn allocate(
    device: &ash::Device,
    mem_props: &vk::PhysicalDeviceMemoryProperties,
    req: vk::MemoryRequirements,
    flags: vk::MemoryPropertyFlags,
) -> Result<vk::DeviceMemory> {
    let memory_type_index = find_memory_type(mem_props, req.memory_type_bits, flags)
        .ok_or_else(|| anyhow!("no memory type with {:?} in filter {:#b}", flags, req.memory_type_bits))?;
    let alloc = vk::MemoryAllocateInfo {
        s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
        allocation_size: req.size,
        memory_type_index,
        ..Default::default()
    };
    Ok(device.allocate_memory(&alloc, None).context("allocate_memory")?)
}

/// Passes `result` through, running `release` first when it is an error.
fn or_release<T, E>(result: Result<T, E>, release: impl FnOnce()) -> Result<T, E> {
    if result.is_err() {
        release();
    }
    result
}

pub(crate) struct Buffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl Buffer {
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_buffer(self.buffer, None);
        device.free_memory(self.memory, None);
    }
}

pub(crate) unsafe fn create_buffer(
    device: &ash::Device,
    mem_props: &vk::PhysicalDeviceMemoryProperties,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    flags: vk::MemoryPropertyFlags,
) -> Result<Buffer> {
    let bci = vk::BufferCreateInfo {
        s_type: vk::StructureType::BUFFER_CREATE_INFO,
        size,
        usage,
        sharing_mode: vk::SharingMode::EXCLUSIVE,
        ..Default::default()
    };
    let buffer = device.create_buffer(&bci, None).context("create_buffer")?;
    let req = device.get_buffer_memory_requirements(buffer);
    let memory = or_release(allocate(device, mem_props, req, flags), || {
        device.destroy_buffer(buffer, None)
    })?;
    or_release(
        device
            .bind_buffer_memory(buffer, memory, 0)
            .context("bind_buffer_memory"),
        || {
            device.destroy_buffer(buffer, None);
            device.free_memory(memory, None);
        },
    )?;
    Ok(Buffer { buffer, memory, size })
}

/// Map, copy, unmap. `memory` must be host-visible and coherent.
pub(crate) unsafe fn upload(device: &ash::Device, buffer: &Buffer, bytes: &[u8]) -> Result<()> {
    let raw = device
        .map_memory(buffer.memory, 0, buffer.size, vk::MemoryMapFlags::empty())
        .context("map_memory")?;
    let copied = fill_mapping(raw, buffer.size, bytes);
    device.unmap_memory(buffer.memory);
    copied
}

/// Copies `bytes` into a freshly mapped `size`-byte range.
unsafe fn fill_mapping(raw: *mut c_void, size: vk::DeviceSize, bytes: &[u8]) -> Result<()> {
    let dst = NonNull::new(raw as *mut u8).ok_or_else(|| anyhow!("map_memory returned null"))?;
    if !write_bytes(dst, size as usize, bytes) {
        return Err(anyhow!("upload of {} bytes into {} byte buffer", bytes.len(), size));
    }
    Ok(())
}

/// Host-coherent buffer that stays mapped for its whole life.
pub(crate) struct MappedBuffer {
    pub inner: Buffer,
    ptr: NonNull<u8>,
}

impl MappedBuffer {
    pub unsafe fn new(
        device: &ash::Device,
        mem_props: &vk::PhysicalDeviceMemoryProperties,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Result<Self> {
        let inner = create_buffer(
            device,
            mem_props,
            size,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        let raw = device
            .map_memory(inner.memory, 0, size, vk::MemoryMapFlags::empty())
            .context("map_memory (persistent)")?;
        let ptr = NonNull::new(raw as *mut u8).ok_or_else(|| anyhow!("map_memory returned null"))?;
        Ok(Self { inner, ptr })
    }

    pub fn write(&self, bytes: &[u8]) -> bool {
        unsafe { write_bytes(self.ptr, self.inner.size as usize, bytes) }
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.unmap_memory(self.inner.memory);
        self.inner.destroy(device);
    }
}

/// Copies `bytes` to the start of a `capacity`-byte mapping. Returns `false`
/// without writing anything if they do not fit.
unsafe fn write_bytes(dst: NonNull<u8>, capacity: usize, bytes: &[u8]) -> bool {
    if bytes.len() > capacity {
        return false;
    }
    std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst.as_ptr(), bytes.len());
    true
}

pub(crate) struct Image {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
}

impl Image {
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_image_view(self.view, None);
        device.destroy_image(self.image, None);
        device.free_memory(self.memory, None);
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct ImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
}

/// Device-local 2D image with a single mip and layer, plus its view.
pub(crate) unsafe fn create_image(
    device: &ash::Device,
    mem_props: &vk::PhysicalDeviceMemoryProperties,
    desc: &ImageDesc,
) -> Result<Image> {
    let img_ci = vk::ImageCreateInfo {
        s_type: vk::StructureType::IMAGE_CREATE_INFO,
        image_type: vk::ImageType::TYPE_2D,
        format: desc.format,
        extent: vk::Extent3D {
            width: desc.extent.width,
            height: desc.extent.height,
            depth: 1,
        },
        mip_levels: 1,
        array_layers: 1,
        samples: desc.samples,
        tiling: vk::ImageTiling::OPTIMAL,
        usage: desc.usage,
        sharing_mode: vk::SharingMode::EXCLUSIVE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        ..Default::default()
    };
    let image = device.create_image(&img_ci, None).context("create_image")?;
    let req = device.get_image_memory_requirements(image);
    let memory = or_release(
        allocate(device, mem_props, req, vk::MemoryPropertyFlags::DEVICE_LOCAL),
        || device.destroy_image(image, None),
    )?;
    let release = || {
        device.destroy_image(image, None);
        device.free_memory(memory, None);
    };
    or_release(
        device
            .bind_image_memory(image, memory, 0)
            .context("bind_image_memory"),
        release,
    )?;
    let view = or_release(
        create_image_view(device, image, desc.format, desc.aspect),
        release,
    )?;
    Ok(Image { image, memory, view })
}

pub(crate) unsafe fn create_image_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    aspect_mask: vk::ImageAspectFlags,
) -> Result<vk::ImageView> {
    let view_ci = vk::ImageViewCreateInfo {
        s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
        image,
        view_type: vk::ImageViewType::TYPE_2D,
        format,
        components: vk::ComponentMapping::default(),
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        },
        ..Default::default()
    };
    Ok(device.create_image_view(&view_ci, None).context("create_image_view")?)
}
