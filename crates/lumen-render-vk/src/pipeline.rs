// SPDX-License-Identifier: CEPL-1.0
//! Render pass, descriptor layout and the solid/wireframe mesh pipelines.

use std::io::Cursor;
use std::mem::size_of;

use anyhow::{Context, Result};
use ash::vk;
use lumen_render::{PipelineVariant, ShaderBlobs};

const BUILTIN_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/mesh.vert.spv"));
const BUILTIN_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/mesh.frag.spv"));

/// Three non-interleaved streams: position, color, normal.
pub(crate) fn vertex_input() -> (
    [vk::VertexInputBindingDescription; 3],
    [vk::VertexInputAttributeDescription; 3],
) {
    let streams = [
        (size_of::<[f32; 3]>(), vk::Format::R32G32B32_SFLOAT),
        (size_of::<[f32; 4]>(), vk::Format::R32G32B32A32_SFLOAT),
        (size_of::<[f32; 3]>(), vk::Format::R32G32B32_SFLOAT),
    ];
    let bindings = std::array::from_fn(|i| vk::VertexInputBindingDescription {
        binding: i as u32,
        stride: streams[i].0 as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    });
    let attributes = std::array::from_fn(|i| vk::VertexInputAttributeDescription {
        location: i as u32,
        binding: i as u32,
        format: streams[i].1,
        offset: 0,
    });
    (bindings, attributes)
}

/// Attachments: 0 multisampled color, 1 depth-stencil, 2 single-sample
/// resolve target that gets presented.
pub(crate) unsafe fn create_render_pass(
    device: &ash::Device,
    color_format: vk::Format,
    depth_format: vk::Format,
    samples: vk::SampleCountFlags,
) -> Result<vk::RenderPass> {
    let attachments = [
        vk::AttachmentDescription {
            format: color_format,
            samples,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ..Default::default()
        },
        vk::AttachmentDescription {
            format: depth_format,
            samples,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            stencil_load_op: vk::AttachmentLoadOp::CLEAR,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ..Default::default()
        },
        vk::AttachmentDescription {
            format: color_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::DONT_CARE,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Default::default()
        },
    ];

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
        p_resolve_attachments: &resolve_ref,
        p_depth_stencil_attachment: &depth_ref,
        ..Default::default()
    };

    // Previous frame's color and depth writes finish before this frame's.
    let dependency = vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        src_access_mask: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
            | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ..Default::default()
    };

    let rp_info = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: attachments.len() as u32,
        p_attachments: attachments.as_ptr(),
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: 1,
        p_dependencies: &dependency,
        ..Default::default()
    };
    Ok(device
        .create_render_pass(&rp_info, None)
        .context("create_render_pass")?)
}

unsafe fn create_shader_module(device: &ash::Device, spv: &[u8], what: &str) -> Result<vk::ShaderModule> {
    let words = ash::util::read_spv(&mut Cursor::new(spv)).with_context(|| format!("{what}: not SPIR-V"))?;
    let info = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        code_size: words.len() * 4,
        p_code: words.as_ptr(),
        ..Default::default()
    };
    Ok(device
        .create_shader_module(&info, None)
        .with_context(|| format!("create_shader_module ({what})"))?)
}

pub(crate) struct Pipelines {
    pub set_layout: vk::DescriptorSetLayout,
    pub layout: vk::PipelineLayout,
    solid: vk::Pipeline,
    wireframe: vk::Pipeline,
}

impl Pipelines {
    pub unsafe fn create(
        device: &ash::Device,
        render_pass: vk::RenderPass,
        samples: vk::SampleCountFlags,
        shaders: Option<&ShaderBlobs>,
    ) -> Result<Self> {
        let ubo_binding = vk::DescriptorSetLayoutBinding {
            binding: 0,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::VERTEX,
            ..Default::default()
        };
        let set_info = vk::DescriptorSetLayoutCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
            binding_count: 1,
            p_bindings: &ubo_binding,
            ..Default::default()
        };
        let set_layout = device
            .create_descriptor_set_layout(&set_info, None)
            .context("create_descriptor_set_layout")?;

        let layout_info = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            set_layout_count: 1,
            p_set_layouts: &set_layout,
            ..Default::default()
        };
        let layout = device
            .create_pipeline_layout(&layout_info, None)
            .context("create_pipeline_layout")?;

        let (vert_spv, frag_spv) = match shaders {
            Some(s) => (s.vertex.as_slice(), s.fragment.as_slice()),
            None => (BUILTIN_VERT, BUILTIN_FRAG),
        };
        let vert = create_shader_module(device, vert_spv, "vertex")?;
        let frag = create_shader_module(device, frag_spv, "fragment")?;

        let entry = c"main";
        let stages = [
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::VERTEX,
                module: vert,
                p_name: entry.as_ptr(),
                ..Default::default()
            },
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::FRAGMENT,
                module: frag,
                p_name: entry.as_ptr(),
                ..Default::default()
            },
        ];

        let (bindings, attributes) = vertex_input();
        let vertex_state = vk::PipelineVertexInputStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
            vertex_binding_description_count: bindings.len() as u32,
            p_vertex_binding_descriptions: bindings.as_ptr(),
            vertex_attribute_description_count: attributes.len() as u32,
            p_vertex_attribute_descriptions: attributes.as_ptr(),
            ..Default::default()
        };
        let assembly = vk::PipelineInputAssemblyStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            ..Default::default()
        };
        // Viewport and scissor are dynamic so rebuilds never touch pipelines.
        let viewport_state = vk::PipelineViewportStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
            viewport_count: 1,
            scissor_count: 1,
            ..Default::default()
        };
        let dynamic = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
            dynamic_state_count: dynamic.len() as u32,
            p_dynamic_states: dynamic.as_ptr(),
            ..Default::default()
        };

        let raster = |polygon_mode: vk::PolygonMode| vk::PipelineRasterizationStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
            polygon_mode,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            line_width: 1.0,
            ..Default::default()
        };
        let rasters = [raster(vk::PolygonMode::FILL), raster(vk::PolygonMode::LINE)];

        let multisample = vk::PipelineMultisampleStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
            rasterization_samples: samples,
            sample_shading_enable: vk::TRUE,
            min_sample_shading: 1.0,
            ..Default::default()
        };
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
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

        // Same state apart from polygon mode: [solid, wireframe].
        let infos: Vec<vk::GraphicsPipelineCreateInfo> = rasters
            .iter()
            .map(|raster| vk::GraphicsPipelineCreateInfo {
                s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
                stage_count: stages.len() as u32,
                p_stages: stages.as_ptr(),
                p_vertex_input_state: &vertex_state,
                p_input_assembly_state: &assembly,
                p_viewport_state: &viewport_state,
                p_rasterization_state: raster,
                p_multisample_state: &multisample,
                p_depth_stencil_state: &depth_stencil,
                p_color_blend_state: &blend,
                p_dynamic_state: &dynamic_state,
                layout,
                render_pass,
                subpass: 0,
                ..Default::default()
            })
            .collect();

        let created = device.create_graphics_pipelines(vk::PipelineCache::null(), &infos, None);

        device.destroy_shader_module(vert, None);
        device.destroy_shader_module(frag, None);

        let pipelines = created
            .map_err(|(_, e)| e)
            .context("create_graphics_pipelines")?;

        Ok(Self {
            set_layout,
            layout,
            solid: pipelines[0],
            wireframe: pipelines[1],
        })
    }

    pub fn get(&self, variant: PipelineVariant) -> vk::Pipeline {
        match variant {
            PipelineVariant::Solid => self.solid,
            PipelineVariant::Wireframe => self.wireframe,
        }
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_pipeline(self.wireframe, None);
        device.destroy_pipeline(self.solid, None);
        device.destroy_pipeline_layout(self.layout, None);
        device.destroy_descriptor_set_layout(self.set_layout, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_streams_match_batch_layout() {
        let (bindings, attributes) = vertex_input();
        let strides: Vec<u32> = bindings.iter().map(|b| b.stride).collect();
        assert_eq!(strides, vec![12, 16, 12]);
        for (i, a) in attributes.iter().enumerate() {
            assert_eq!(a.location, i as u32);
            assert_eq!(a.binding, i as u32);
            assert_eq!(a.offset, 0);
        }
        assert_eq!(attributes[1].format, vk::Format::R32G32B32A32_SFLOAT);
    }

    #[test]
    fn builtin_shaders_are_spirv() {
        for spv in [BUILTIN_VERT, BUILTIN_FRAG] {
            let words = ash::util::read_spv(&mut Cursor::new(spv)).unwrap();
            assert_eq!(words[0], 0x0723_0203);
        }
    }
}
