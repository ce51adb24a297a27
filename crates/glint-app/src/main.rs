// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::Result;
use clap::Parser;
use glint_core::init_tracing;
use glint_render::{FrameBackend, FrameLoop, RenderSize};
use glint_render_vk::{
    VkBackend, VkBackendOptions, DEFAULT_COMPUTE_SHADER, REQUIRED_EXTENSION_VERSION,
};
use tracing::{error, info};

use glint_platform::winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    raw_window_handle::{HasDisplayHandle, HasWindowHandle},
    window::{Window, WindowId},
};

use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

/// Exit code when a required vendor capability fails to activate.
const ACTIVATION_FAILURE_EXIT: i32 = 1;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Select the software rasterizer instead of hardware
    #[arg(long)]
    software: bool,

    /// Enable the API validation layer
    #[arg(long)]
    validation: bool,

    /// Keep running when the vendor atomics extension is unavailable
    #[arg(long)]
    allow_missing_atomics: bool,
}

#[derive(Debug, Deserialize, Clone)]
struct RenderCfg {
    #[serde(default = "default_clear")]
    clear_color: [f32; 4],
    #[serde(default)]
    validation: bool,
    #[serde(default)]
    software_adapter: bool,
    #[serde(default = "default_require_atomics")]
    require_atomics: bool,
    #[serde(default)]
    compute_shader: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, Copy)]
struct WindowCfg {
    #[serde(default = "default_width")]
    width: u32,
    #[serde(default = "default_height")]
    height: u32,
}

#[derive(Debug, Deserialize, Default)]
struct AppCfg {
    #[serde(default)]
    render: RenderCfg,
    #[serde(default)]
    window: WindowCfg,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: default_clear(),
            validation: false,
            software_adapter: false,
            require_atomics: true,
            compute_shader: None,
        }
    }
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg { width: default_width(), height: default_height() }
    }
}

fn default_clear() -> [f32; 4] {
    glint_render::frame::CLEAR_COLOR
}
fn default_require_atomics() -> bool {
    true
}
fn default_width() -> u32 {
    1280
}
fn default_height() -> u32 {
    720
}

fn load_cfg() -> AppCfg {
    match fs::read_to_string("glint.toml") {
        Ok(s) => toml::from_str::<AppCfg>(&s).unwrap_or_default(),
        Err(_) => AppCfg::default(),
    }
}

struct App {
    cfg: AppCfg,
    args: Args,
    window: Option<Window>,
    frame: Option<FrameLoop<VkBackend>>,
    exiting: bool,
    paused: bool,
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            let window = event_loop
                .create_window(
                    Window::default_attributes()
                        .with_title("glint")
                        .with_inner_size(PhysicalSize::new(
                            self.cfg.window.width,
                            self.cfg.window.height,
                        )),
                )
                .expect("create_window");

            let size = window.inner_size();
            let wh = window.window_handle().expect("window_handle");
            let dh = window.display_handle().expect("display_handle");

            let options = VkBackendOptions {
                size: RenderSize {
                    width: size.width.max(1),
                    height: size.height.max(1),
                },
                validation: self.cfg.render.validation || self.args.validation,
                software_adapter: self.cfg.render.software_adapter || self.args.software,
                required_extension: REQUIRED_EXTENSION_VERSION,
                compute_shader: self
                    .cfg
                    .render
                    .compute_shader
                    .clone()
                    .unwrap_or_else(|| DEFAULT_COMPUTE_SHADER.into()),
            };
            let backend = VkBackend::new(&wh, &dh, &options).expect("vulkan init");

            // The negotiator itself only reports "no capability"; turning
            // that into an abort is this host's policy.
            let required = self.cfg.render.require_atomics && !self.args.allow_missing_atomics;
            if required && !backend.atomics_enabled() {
                error!("unable to activate the vendor atomics extension");
                std::process::exit(ACTIVATION_FAILURE_EXIT);
            }
            match backend.active_extension_version() {
                Some(v) => info!("vendor atomics extension active (version {v})"),
                None => info!("running without the vendor atomics extension"),
            }

            self.frame = Some(
                FrameLoop::new(backend).with_clear_color(self.cfg.render.clear_color),
            );
            self.window = Some(window);
        }

        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.exiting = true;
                if let Some(frame) = self.frame.take() {
                    if let Err(e) = frame.shutdown() {
                        error!("shutdown drain failed: {e:#}");
                    }
                }
                self.window = None;
                event_loop.exit();
            }

            WindowEvent::Resized(new_size) => {
                // The presentation surface keeps its startup extent; the
                // window merely letterboxes it.
                self.paused = new_size.width == 0 || new_size.height == 0;
                info!(
                    "Resized → {}x{} (paused={})",
                    new_size.width, new_size.height, self.paused
                );
            }

            WindowEvent::Occluded(occluded) => {
                self.paused = occluded;
                info!("Occluded={} → paused={}", occluded, self.paused);
            }

            WindowEvent::RedrawRequested => {
                if self.exiting || self.paused {
                    return;
                }

                if let Some(frame) = &mut self.frame {
                    frame.update();
                    if let Err(e) = frame.render() {
                        // Steady-state failures are fatal: no frame-skip, no
                        // resubmission.
                        error!("render failed: {e:#}");
                        self.exiting = true;
                        event_loop.exit();
                        return;
                    }
                }

                if let Some(w) = &self.window {
                    w.request_redraw();
                }
            }

            _ => {}
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let event_loop: EventLoop<()> = EventLoop::new()?;

    let mut app = App {
        cfg: load_cfg(),
        args,
        window: None,
        frame: None,
        exiting: false,
        paused: false,
    };

    event_loop.run_app(&mut app)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_yields_defaults() {
        let cfg: AppCfg = toml::from_str("").unwrap();
        assert_eq!(cfg.window.width, 1280);
        assert_eq!(cfg.window.height, 720);
        assert!(cfg.render.require_atomics);
        assert!(!cfg.render.software_adapter);
        assert_eq!(cfg.render.clear_color, glint_render::frame::CLEAR_COLOR);
        assert!(cfg.render.compute_shader.is_none());
    }

    #[test]
    fn partial_config_overrides_only_named_keys() {
        let cfg: AppCfg = toml::from_str(
            r#"
            [render]
            require_atomics = false
            clear_color = [0.1, 0.1, 0.1, 1.0]

            [window]
            width = 640
            "#,
        )
        .unwrap();
        assert!(!cfg.render.require_atomics);
        assert_eq!(cfg.render.clear_color, [0.1, 0.1, 0.1, 1.0]);
        assert_eq!(cfg.window.width, 640);
        assert_eq!(cfg.window.height, 720);
    }
}
