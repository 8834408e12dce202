use anyhow::{anyhow, Context, Result};
use std::{env, fs, path::PathBuf};

// (source file, stage) pairs; output lands in OUT_DIR as "<source>.spv".
const SHADERS: &[(&str, shaderc::ShaderKind)] = &[
    ("shadow.vert", shaderc::ShaderKind::Vertex),
    ("shadow.frag", shaderc::ShaderKind::Fragment),
    ("scene.vert", shaderc::ShaderKind::Vertex),
    ("scene.frag", shaderc::ShaderKind::Fragment),
];

fn main() -> Result<()> {
    let out = PathBuf::from(env::var("OUT_DIR")?);
    let src_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR")?).join("shaders");

    let comp = shaderc::Compiler::new().ok_or_else(|| anyhow!("shaderc compiler unavailable"))?;
    let mut opts =
        shaderc::CompileOptions::new().ok_or_else(|| anyhow!("shaderc options unavailable"))?;
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    for &(name, kind) in SHADERS {
        let path = src_dir.join(name);
        println!("cargo:rerun-if-changed={}", path.display());
        let source =
            fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        let spv = comp
            .compile_into_spirv(&source, kind, name, "main", Some(&opts))
            .with_context(|| format!("compiling {name}"))?;
        fs::write(out.join(format!("{name}.spv")), spv.as_binary_u8())?;
    }

    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
