use std::{env, fs, path::PathBuf};

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").unwrap());

    // Vertex shader: position + uv, passed straight through.
    // Matches the Rust pipeline vertex layout:
    //   - binding 0, location 0: R32G32B32_SFLOAT (pos)
    //   - binding 0, location 1: R32G32_SFLOAT (uv)
    let vs_src = r#"
#version 450
layout(location = 0) in vec3 inPos;
layout(location = 1) in vec2 inUv;

layout(location = 0) out vec2 vUv;

void main() {
    vUv = inUv;
    gl_Position = vec4(inPos, 1.0);
}
"#;

    // Fragment shader: point-sample the checkerboard.
    let fs_src = r#"
#version 450
layout(set = 0, binding = 0) uniform sampler2D uTexture;

layout(location = 0) in vec2 vUv;
layout(location = 0) out vec4 outColor;

void main() {
    outColor = texture(uTexture, vUv);
}
"#;

    // Compute shader: every invocation records its own cell coordinate into
    // the wide-atomic storage image with an atomic max. The resulting image
    // holds packUint2x32((x, y)) per texel, which is what the readback path
    // reports.
    let cs_src = r#"
#version 450
#extension GL_EXT_shader_explicit_arithmetic_types_int64 : require
#extension GL_EXT_shader_image_int64 : require

layout(local_size_x = 32, local_size_y = 32, local_size_z = 1) in;

layout(set = 0, binding = 0, r64ui) uniform u64image2D uStorage;

void main() {
    uvec2 cell = gl_GlobalInvocationID.xy;
    imageAtomicMax(uStorage, ivec2(cell), packUint2x32(cell));
}
"#;

    let comp = shaderc::Compiler::new().unwrap();
    let mut opts = shaderc::CompileOptions::new().unwrap();

    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_2 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    let vs_spv = comp
        .compile_into_spirv(
            vs_src,
            shaderc::ShaderKind::Vertex,
            "triangle.vert",
            "main",
            Some(&opts),
        )
        .unwrap();

    let fs_spv = comp
        .compile_into_spirv(
            fs_src,
            shaderc::ShaderKind::Fragment,
            "triangle.frag",
            "main",
            Some(&opts),
        )
        .unwrap();

    let cs_spv = comp
        .compile_into_spirv(
            cs_src,
            shaderc::ShaderKind::Compute,
            "atomic_max.comp",
            "main",
            Some(&opts),
        )
        .unwrap();

    fs::write(out.join("triangle.vert.spv"), vs_spv.as_binary_u8()).unwrap();
    fs::write(out.join("triangle.frag.spv"), fs_spv.as_binary_u8()).unwrap();
    // The compute stage is consumed as an opaque blob by path at run time,
    // not embedded; the default path points at this artifact.
    fs::write(out.join("atomic_max.comp.spv"), cs_spv.as_binary_u8()).unwrap();

    // Re-run if this file changes (inline sources live here)
    println!("cargo:rerun-if-changed=build.rs");
}
