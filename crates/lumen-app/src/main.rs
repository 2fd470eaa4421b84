// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use lumen_core::{consts, init_tracing, read_blob};
use lumen_render::{load_obj, RenderSize, Renderer, SceneDesc, ShaderBlobs};
use lumen_render_vk::VkRenderer;
use tracing::{error, info};

use lumen_platform::winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

mod config;
mod driver;

use config::{load_cfg, AppCfg, DEFAULT_CONFIG};
use driver::LoopDriver;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file
    #[arg(long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,
    /// OBJ mesh to draw, overrides `scene.mesh`
    #[arg(long)]
    mesh: Option<PathBuf>,
}

/// Reads everything the renderer needs from disk before a window exists.
fn build_scene(cfg: &AppCfg) -> Result<SceneDesc> {
    let batch = load_obj(&cfg.scene.mesh).with_context(|| format!("loading mesh {}", cfg.scene.mesh.display()))?;

    let shaders = match &cfg.render.shader_dir {
        Some(dir) => {
            info!("loading SPIR-V from {}", dir.display());
            Some(ShaderBlobs {
                vertex: read_blob(dir.join("mesh.vert.spv"))?,
                fragment: read_blob(dir.join("mesh.frag.spv"))?,
            })
        }
        None => None,
    };

    Ok(SceneDesc {
        batch,
        shaders,
        clear_color: cfg.render.clear_color,
        present_mode: cfg.render.present_mode.into(),
        desired_image_count: cfg.render.desired_image_count,
        frames_in_flight: consts::FRAMES_IN_FLIGHT,
    })
}

struct App {
    cfg: AppCfg,
    scene: SceneDesc,
    // Declared before the window so the renderer drops first.
    driver: Option<LoopDriver<VkRenderer>>,
    window: Option<Window>,
    failure: Option<anyhow::Error>,
}

impl App {
    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attrs = Window::default_attributes()
            .with_title(self.cfg.window.title.clone())
            .with_inner_size(PhysicalSize::new(self.cfg.window.width, self.cfg.window.height));
        let window = event_loop.create_window(attrs).context("create_window")?;

        let size = window.inner_size();
        let render_size = RenderSize {
            width: size.width,
            height: size.height,
        };

        let renderer = VkRenderer::new(&window, &window, render_size, &self.scene)?;
        self.driver = Some(LoopDriver::new(renderer, render_size, self.cfg.render.target_fps));
        self.window = Some(window);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("{e:#}");
        self.failure = Some(e);
        self.driver = None;
        self.window = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.init(event_loop) {
                self.fail(event_loop, e);
                return;
            }
        }
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }
        let Some(driver) = self.driver.as_mut() else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.driver = None;
                self.window = None;
                event_loop.exit();
            }

            WindowEvent::Resized(new_size) => {
                driver.resized(RenderSize {
                    width: new_size.width,
                    height: new_size.height,
                });
            }

            WindowEvent::Focused(false) => driver.input_mut().clear(),

            WindowEvent::KeyboardInput { event, .. } => driver.input_mut().handle_key_event(&event),

            WindowEvent::RedrawRequested => {
                if let Err(e) = driver.tick() {
                    self.fail(event_loop, e);
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let Some(driver) = &self.driver else {
            return;
        };
        if driver.is_paused() {
            // Minimized: sleep until the next resize.
            event_loop.set_control_flow(ControlFlow::Wait);
        } else {
            // The driver's frame limiter does the pacing.
            event_loop.set_control_flow(ControlFlow::Poll);
            if let Some(w) = &self.window {
                w.request_redraw();
            }
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut cfg = load_cfg(&args.config)?;
    if let Some(mesh) = args.mesh {
        cfg.scene.mesh = mesh;
    }
    let scene = build_scene(&cfg)?;

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App {
        cfg,
        scene,
        driver: None,
        window: None,
        failure: None,
    };
    event_loop.run_app(&mut app)?;

    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
