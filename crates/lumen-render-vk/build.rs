use std::{env, fs, path::PathBuf};

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR"));

    // Vertex streams are separate bindings:
    //   - binding 0, location 0: R32G32B32_SFLOAT    (position)
    //   - binding 1, location 1: R32G32B32A32_SFLOAT (color)
    //   - binding 2, location 2: R32G32B32_SFLOAT    (normal)
    let vs_src = r#"
#version 450
layout(location = 0) in vec3 inPosition;
layout(location = 1) in vec4 inColor;
layout(location = 2) in vec3 inNormal;

layout(set = 0, binding = 0) uniform PerFrame {
    mat4 view;
    mat4 projection;
} frame;

layout(location = 0) out vec4 vColor;
layout(location = 1) out vec3 vNormal;

void main() {
    vColor = inColor;
    vNormal = inNormal;
    gl_Position = frame.projection * frame.view * vec4(inPosition, 1.0);
}
"#;

    // Fixed directional light plus ambient so the shape reads without materials.
    let fs_src = r#"
#version 450
layout(location = 0) in vec4 vColor;
layout(location = 1) in vec3 vNormal;

layout(location = 0) out vec4 outColor;

void main() {
    vec3 light = normalize(vec3(0.4, 1.0, -0.6));
    float ndl = max(dot(normalize(vNormal), light), 0.0);
    outColor = vec4(vColor.rgb * (0.25 + 0.75 * ndl), vColor.a);
}
"#;

    let comp = shaderc::Compiler::new().expect("shaderc compiler");
    let mut opts = shaderc::CompileOptions::new().expect("shaderc options");

    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    let vs_spv = comp
        .compile_into_spirv(
            vs_src,
            shaderc::ShaderKind::Vertex,
            "mesh.vert",
            "main",
            Some(&opts),
        )
        .expect("compile mesh.vert");

    let fs_spv = comp
        .compile_into_spirv(
            fs_src,
            shaderc::ShaderKind::Fragment,
            "mesh.frag",
            "main",
            Some(&opts),
        )
        .expect("compile mesh.frag");

    fs::write(out.join("mesh.vert.spv"), vs_spv.as_binary_u8()).expect("write mesh.vert.spv");
    fs::write(out.join("mesh.frag.spv"), fs_spv.as_binary_u8()).expect("write mesh.frag.spv");

    println!("cargo:rerun-if-changed=build.rs");
}
