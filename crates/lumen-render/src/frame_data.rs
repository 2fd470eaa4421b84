// SPDX-License-Identifier: CEPL-1.0
use bytemuck::{Pod, Zeroable};
use glam::Mat4;

/// Uniform block at set 0, binding 0, read by the vertex stage.
/// Layout matches `layout(std140) uniform { mat4 view; mat4 projection; }`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PerFrameData {
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
}

impl PerFrameData {
    pub fn new(view: Mat4, projection: Mat4) -> Self {
        Self {
            view: view.to_cols_array_2d(),
            projection: projection.to_cols_array_2d(),
        }
    }
}

/// Rasterization variant of the fixed pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PipelineVariant {
    #[default]
    Solid,
    Wireframe,
}

/// Everything the renderer needs from the simulation for one frame.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameInput {
    pub uniforms: PerFrameData,
    pub variant: PipelineVariant,
}

/// What happened during a successfully submitted frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameReport {
    pub frame: u64,
    pub slot: usize,
    pub image: u32,
    /// Acquire or present reported the swapchain as suboptimal.
    pub suboptimal: bool,
}
