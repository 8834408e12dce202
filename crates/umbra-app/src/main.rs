// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{error, info};
use umbra_core::init_tracing;
use umbra_platform::Platform;
use umbra_render::{FrameOutcome, FramebufferHost, Model, RenderSize, Renderer};
use umbra_render_vk::VkRenderer;

mod config;

use config::AppConfig;

#[derive(Parser, Debug)]
#[command(author, version, about = "Point-light shadow renderer", long_about = None)]
struct Args {
    /// Configuration file
    #[arg(long, default_value = "umbra.toml")]
    config: PathBuf,
    /// OBJ model to render (overrides [scene] model)
    #[arg(long)]
    model: Option<PathBuf>,
    /// Directory holding the compiled .spv shaders (overrides [render] shader_dir)
    #[arg(long)]
    shader_dir: Option<PathBuf>,
}

/// Lends the platform to the frame orchestrator.
struct Host<'a>(&'a mut Platform);

impl FramebufferHost for Host<'_> {
    fn framebuffer_size(&self) -> RenderSize {
        let (width, height) = self.0.framebuffer_size();
        RenderSize::new(width, height)
    }

    fn wait_events(&mut self) {
        self.0.wait_events();
    }

    fn take_resize_request(&mut self) -> bool {
        self.0.take_resize_request()
    }

    fn close_requested(&self) -> bool {
        self.0.close_requested()
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = AppConfig::load(&args.config);

    let mut settings = cfg.scene_settings();
    if let Some(dir) = args.shader_dir {
        settings.shader_dir = Some(dir);
    }
    let model_path = args.model.unwrap_or_else(|| cfg.scene.model.clone());
    let model = Model::load(&model_path)
        .with_context(|| format!("loading model {}", model_path.display()))?;
    info!(
        "model {}: {} triangles, {} materials",
        model_path.display(),
        model.index_count() / 3,
        model.materials.len()
    );

    let mut platform = Platform::new(cfg.window_config())?;
    let window = platform.open_window()?;
    let size = window.inner_size();
    let mut renderer = VkRenderer::new(
        window,
        window,
        RenderSize::new(size.width, size.height),
        &settings,
        &model,
    )
    .context("creating Vulkan renderer")?;

    let mut frames = 0u32;
    let mut last_report = Instant::now();
    while platform.pump() {
        match renderer.render(&mut Host(&mut platform)) {
            Ok(FrameOutcome::Presented) => frames += 1,
            Ok(FrameOutcome::Recreated) => {}
            Ok(FrameOutcome::Closed) => break,
            Err(e) => {
                error!("frame failed: {e}");
                return Err(e).context("render loop");
            }
        }
        if last_report.elapsed() >= Duration::from_secs(1) {
            info!("{frames} fps");
            frames = 0;
            last_report = Instant::now();
        }
    }

    renderer.wait_idle().context("waiting for the GPU")?;
    // Swap chain and surface go before the window they were made for.
    drop(renderer);
    platform.close_window();
    info!("shutdown complete");
    Ok(())
}
