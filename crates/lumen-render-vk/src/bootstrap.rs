// SPDX-License-Identifier: CEPL-1.0
//! Instance, surface, physical/logical device and the capability queries
//! that fix the render targets for the renderer's lifetime.

use std::ffi::{c_void, CStr};

use anyhow::{anyhow, bail, Context, Result};
use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use tracing::{debug, error, info, trace, warn};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

type FeatureCheck = (&'static str, fn(&vk::PhysicalDeviceFeatures) -> vk::Bool32);

/// Features the device must offer; all are enabled at device creation.
const REQUIRED_FEATURES: [FeatureCheck; 6] = [
    ("geometryShader", |f| f.geometry_shader),
    ("tessellationShader", |f| f.tessellation_shader),
    ("multiDrawIndirect", |f| f.multi_draw_indirect),
    ("fillModeNonSolid", |f| f.fill_mode_non_solid),
    ("sampleRateShading", |f| f.sample_rate_shading),
    ("samplerAnisotropy", |f| f.sampler_anisotropy),
];

const REQUIRED_EXTENSIONS: [&CStr; 1] = [swapchain::NAME];

/// Depth-stencil formats in order of preference.
const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D16_UNORM_S8_UINT,
];

fn required_features() -> vk::PhysicalDeviceFeatures {
    vk::PhysicalDeviceFeatures {
        geometry_shader: vk::TRUE,
        tessellation_shader: vk::TRUE,
        multi_draw_indirect: vk::TRUE,
        fill_mode_non_solid: vk::TRUE,
        sample_rate_shading: vk::TRUE,
        sampler_anisotropy: vk::TRUE,
        ..Default::default()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct DeviceRating {
    pub score: i32,
    pub missing: Vec<&'static str>,
}

/// +40 when every required feature and extension is present, -40 otherwise,
/// +10 for a discrete GPU. A negative score means the device is unusable.
pub(crate) fn rate_device(
    device_type: vk::PhysicalDeviceType,
    features: &vk::PhysicalDeviceFeatures,
    extensions: &[&CStr],
) -> DeviceRating {
    let mut missing = Vec::new();
    for (name, get) in REQUIRED_FEATURES {
        if get(features) != vk::TRUE {
            missing.push(name);
        }
    }
    for ext in REQUIRED_EXTENSIONS {
        if !extensions.contains(&ext) {
            missing.push(ext.to_str().unwrap_or("<non-utf8 extension>"));
        }
    }

    let mut score = if missing.is_empty() { 40 } else { -40 };
    if device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
        score += 10;
    }
    DeviceRating { score, missing }
}

/// First family that can do graphics and present to the surface.
pub(crate) fn find_queue_family(
    families: &[vk::QueueFamilyProperties],
    mut can_present: impl FnMut(u32) -> bool,
) -> Option<u32> {
    families
        .iter()
        .enumerate()
        .find(|&(i, q)| {
            q.queue_count > 0
                && q.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                && can_present(i as u32)
        })
        .map(|(i, _)| i as u32)
}

/// Highest of 8/4/2/1 samples usable for color, depth and stencil at once.
pub(crate) fn max_sample_count(limits: &vk::PhysicalDeviceLimits) -> vk::SampleCountFlags {
    let counts = limits.framebuffer_color_sample_counts
        & limits.framebuffer_depth_sample_counts
        & limits.framebuffer_stencil_sample_counts;
    [
        vk::SampleCountFlags::TYPE_8,
        vk::SampleCountFlags::TYPE_4,
        vk::SampleCountFlags::TYPE_2,
    ]
    .into_iter()
    .find(|&c| counts.contains(c))
    .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

pub(crate) fn first_depth_format(
    mut optimal_features: impl FnMut(vk::Format) -> vk::FormatFeatureFlags,
) -> Option<vk::Format> {
    DEPTH_CANDIDATES.into_iter().find(|&f| {
        optimal_features(f).contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    })
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "vulkan", "{:?}: {}", types, msg);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "vulkan", "{:?}: {}", types, msg);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!(target: "vulkan", "{:?}: {}", types, msg);
    } else {
        trace!(target: "vulkan", "{:?}: {}", types, msg);
    }
    vk::FALSE
}

struct DebugMessenger {
    loader: debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

/// Debug builds turn on validation when the layer is installed.
unsafe fn validation_available(entry: &Entry) -> bool {
    if !cfg!(debug_assertions) {
        return false;
    }
    let layers = entry.enumerate_instance_layer_properties().unwrap_or_default();
    let has_layer = layers
        .iter()
        .any(|l| l.layer_name_as_c_str().is_ok_and(|n| n == VALIDATION_LAYER));
    let exts = entry
        .enumerate_instance_extension_properties(None)
        .unwrap_or_default();
    let has_debug_utils = exts
        .iter()
        .any(|e| e.extension_name_as_c_str().is_ok_and(|n| n == debug_utils::NAME));
    if !has_layer {
        debug!("{} not installed, running without validation", VALIDATION_LAYER.to_string_lossy());
    }
    has_layer && has_debug_utils
}

unsafe fn create_instance(entry: &Entry, display_raw: RawDisplayHandle, validation: bool) -> Result<Instance> {
    let app_name = c"lumen";

    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app_name.as_ptr(),
        application_version: vk::make_api_version(0, 0, 1, 0),
        p_engine_name: app_name.as_ptr(),
        engine_version: vk::make_api_version(0, 0, 1, 0),
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let mut ext_vec = ash_window::enumerate_required_extensions(display_raw)
        .context("enumerate_required_extensions")?
        .to_vec();
    let layers = [VALIDATION_LAYER.as_ptr()];
    if validation {
        ext_vec.push(debug_utils::NAME.as_ptr());
    }

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: ext_vec.len() as u32,
        pp_enabled_extension_names: ext_vec.as_ptr(),
        enabled_layer_count: if validation { layers.len() as u32 } else { 0 },
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };

    Ok(entry.create_instance(&create_info, None).context("create_instance")?)
}

unsafe fn create_debug_messenger(entry: &Entry, instance: &Instance) -> Result<DebugMessenger> {
    let loader = debug_utils::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    let messenger = loader
        .create_debug_utils_messenger(&ci, None)
        .context("create_debug_utils_messenger")?;
    Ok(DebugMessenger { loader, messenger })
}

struct SelectedDevice {
    phys: vk::PhysicalDevice,
    queue_family: u32,
    name: String,
    rating: DeviceRating,
}

unsafe fn select_device(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<SelectedDevice> {
    let mut best: Option<SelectedDevice> = None;

    for phys in instance
        .enumerate_physical_devices()
        .context("enumerate_physical_devices")?
    {
        let props = instance.get_physical_device_properties(phys);
        let name = props
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let features = instance.get_physical_device_features(phys);
        let ext_props = instance
            .enumerate_device_extension_properties(phys)
            .unwrap_or_default();
        let exts: Vec<&CStr> = ext_props
            .iter()
            .filter_map(|e| e.extension_name_as_c_str().ok())
            .collect();
        let rating = rate_device(props.device_type, &features, &exts);

        let families = instance.get_physical_device_queue_family_properties(phys);
        let Some(queue_family) = find_queue_family(&families, |i| {
            surface_loader
                .get_physical_device_surface_support(phys, i, surface)
                .unwrap_or(false)
        }) else {
            debug!("{name}: no queue family can draw and present, skipping");
            continue;
        };

        debug!("{name}: rating {} (missing {:?})", rating.score, rating.missing);
        if best.as_ref().map_or(true, |b| rating.score > b.rating.score) {
            best = Some(SelectedDevice {
                phys,
                queue_family,
                name,
                rating,
            });
        }
    }

    match best {
        Some(sel) if sel.rating.score >= 0 => Ok(sel),
        Some(sel) => bail!("best GPU '{}' is missing {}", sel.name, sel.rating.missing.join(", ")),
        None => bail!("no GPU with a queue that can draw and present to the window"),
    }
}

unsafe fn create_device(instance: &Instance, phys: vk::PhysicalDevice, queue_family: u32) -> Result<ash::Device> {
    let priorities = [1.0_f32];
    let qinfo = vk::DeviceQueueCreateInfo {
        s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
        queue_family_index: queue_family,
        queue_count: 1,
        p_queue_priorities: priorities.as_ptr(),
        ..Default::default()
    };

    let features = required_features();
    let device_exts = REQUIRED_EXTENSIONS.map(|e| e.as_ptr());
    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: 1,
        p_queue_create_infos: &qinfo,
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        p_enabled_features: &features,
        ..Default::default()
    };

    Ok(instance
        .create_device(phys, &dinfo, None)
        .context("create_device")?)
}

/// Instance-to-queue state shared by every other part of the backend.
pub(crate) struct Gpu {
    _entry: Entry,
    pub instance: Instance,
    debug: Option<DebugMessenger>,
    pub surface_loader: surface::Instance,
    pub surface: vk::SurfaceKHR,

    pub phys: vk::PhysicalDevice,
    pub device: ash::Device,
    pub queue_family: u32,
    pub queue: vk::Queue,
    pub swapchain_loader: swapchain::Device,

    pub memory_props: vk::PhysicalDeviceMemoryProperties,
    pub samples: vk::SampleCountFlags,
    pub depth_format: vk::Format,
}

impl Gpu {
    // STRICT ORDER: instance, then the surface from that instance, then the
    // physical device checked against that surface, then the logical device.
    pub unsafe fn new(window: &dyn HasWindowHandle, display: &dyn HasDisplayHandle) -> Result<Self> {
        let dh = display
            .display_handle()
            .map_err(|e| anyhow!("display_handle: {e}"))?
            .as_raw();
        let wh = window
            .window_handle()
            .map_err(|e| anyhow!("window_handle: {e}"))?
            .as_raw();

        let entry = Entry::linked();
        let validation = validation_available(&entry);
        let instance = create_instance(&entry, dh, validation)?;
        let debug = if validation {
            Some(create_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        let surface_loader = surface::Instance::new(&entry, &instance);
        let surface = ash_window::create_surface(&entry, &instance, dh, wh, None)
            .context("ash_window::create_surface")?;

        let sel = select_device(&instance, &surface_loader, surface)?;
        let device = create_device(&instance, sel.phys, sel.queue_family)?;
        let queue = device.get_device_queue(sel.queue_family, 0);
        let swapchain_loader = swapchain::Device::new(&instance, &device);

        let props = instance.get_physical_device_properties(sel.phys);
        let memory_props = instance.get_physical_device_memory_properties(sel.phys);
        let samples = max_sample_count(&props.limits);
        let depth_format = first_depth_format(|f| {
            instance
                .get_physical_device_format_properties(sel.phys, f)
                .optimal_tiling_features
        })
        .ok_or_else(|| anyhow!("'{}' supports none of {:?} as depth-stencil", sel.name, DEPTH_CANDIDATES))?;

        info!(
            "GPU '{}' (rating {}), queue family {}, {:?} samples, depth {:?}, validation {}",
            sel.name, sel.rating.score, sel.queue_family, samples, depth_format, validation
        );

        Ok(Self {
            _entry: entry,
            instance,
            debug,
            surface_loader,
            surface,
            phys: sel.phys,
            device,
            queue_family: sel.queue_family,
            queue,
            swapchain_loader,
            memory_props,
            samples,
            depth_format,
        })
    }

    /// Device, then surface, then messenger, instance last. Everything
    /// created from the device must already be gone.
    pub unsafe fn destroy(&mut self) {
        self.device.destroy_device(None);
        self.surface_loader.destroy_surface(self.surface, None);
        if let Some(dbg) = self.debug.take() {
            dbg.loader.destroy_debug_utils_messenger(dbg.messenger, None);
        }
        self.instance.destroy_instance(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_features() -> vk::PhysicalDeviceFeatures {
        required_features()
    }

    #[test]
    fn discrete_gpu_with_everything_scores_fifty() {
        let r = rate_device(
            vk::PhysicalDeviceType::DISCRETE_GPU,
            &full_features(),
            &[swapchain::NAME],
        );
        assert_eq!(r, DeviceRating { score: 50, missing: vec![] });
    }

    #[test]
    fn integrated_gpu_with_everything_scores_forty() {
        let r = rate_device(
            vk::PhysicalDeviceType::INTEGRATED_GPU,
            &full_features(),
            &[c"VK_KHR_maintenance1", swapchain::NAME],
        );
        assert_eq!(r.score, 40);
    }

    #[test]
    fn one_missing_feature_is_negative_even_when_discrete() {
        let mut f = full_features();
        f.fill_mode_non_solid = vk::FALSE;
        let r = rate_device(vk::PhysicalDeviceType::DISCRETE_GPU, &f, &[swapchain::NAME]);
        assert_eq!(r.score, -30);
        assert_eq!(r.missing, vec!["fillModeNonSolid"]);
    }

    #[test]
    fn missing_extension_is_negative() {
        let r = rate_device(vk::PhysicalDeviceType::INTEGRATED_GPU, &full_features(), &[]);
        assert!(r.score < 0);
        assert_eq!(r.missing, vec!["VK_KHR_swapchain"]);
    }

    #[test]
    fn queue_family_needs_graphics_and_present() {
        let families = [
            vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
                queue_count: 2,
                ..Default::default()
            },
            vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::GRAPHICS,
                queue_count: 1,
                ..Default::default()
            },
            vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
                queue_count: 1,
                ..Default::default()
            },
        ];
        assert_eq!(find_queue_family(&families, |_| true), Some(1));
        assert_eq!(find_queue_family(&families, |i| i == 2), Some(2));
        assert_eq!(find_queue_family(&families, |i| i == 0), None);
    }

    #[test]
    fn sample_count_is_common_maximum() {
        let limits = vk::PhysicalDeviceLimits {
            framebuffer_color_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_2
                | vk::SampleCountFlags::TYPE_4
                | vk::SampleCountFlags::TYPE_8,
            framebuffer_depth_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_2
                | vk::SampleCountFlags::TYPE_4,
            framebuffer_stencil_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_2
                | vk::SampleCountFlags::TYPE_4
                | vk::SampleCountFlags::TYPE_8,
            ..Default::default()
        };
        assert_eq!(max_sample_count(&limits), vk::SampleCountFlags::TYPE_4);

        let single = vk::PhysicalDeviceLimits {
            framebuffer_color_sample_counts: vk::SampleCountFlags::TYPE_1,
            framebuffer_depth_sample_counts: vk::SampleCountFlags::TYPE_1,
            framebuffer_stencil_sample_counts: vk::SampleCountFlags::TYPE_1,
            ..Default::default()
        };
        assert_eq!(max_sample_count(&single), vk::SampleCountFlags::TYPE_1);
    }

    #[test]
    fn depth_format_follows_preference_order() {
        let only_d24 = |f: vk::Format| {
            if f == vk::Format::D24_UNORM_S8_UINT {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::FormatFeatureFlags::empty()
            }
        };
        assert_eq!(first_depth_format(only_d24), Some(vk::Format::D24_UNORM_S8_UINT));
        assert_eq!(
            first_depth_format(|_| vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT),
            Some(vk::Format::D32_SFLOAT_S8_UINT)
        );
        assert_eq!(first_depth_format(|_| vk::FormatFeatureFlags::SAMPLED_IMAGE), None);
    }
}
