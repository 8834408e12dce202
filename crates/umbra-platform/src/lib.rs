// SPDX-License-Identifier: CEPL-1.0
//! Window host driven by explicit event pumping, so the render loop can block
//! on window events while the framebuffer is zero-sized.
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::{anyhow, Context, Result};
use std::time::Duration;
use tracing::{error, info};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{Window, WindowId},
};

pub use winit;

#[derive(Clone, Debug)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            title: "Vulkan Application".to_string(),
        }
    }
}

struct Handler {
    config: WindowConfig,
    window: Option<Window>,
    size: PhysicalSize<u32>,
    resize_requested: bool,
    close_requested: bool,
    create_error: Option<String>,
}

impl ApplicationHandler for Handler {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        event_loop.set_control_flow(ControlFlow::Poll);
        if self.window.is_some() {
            return;
        }
        let attrs = Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));
        match event_loop.create_window(attrs) {
            Ok(window) => {
                self.size = window.inner_size();
                info!(
                    "window created {}x{}",
                    self.size.width, self.size.height
                );
                self.window = Some(window);
            }
            Err(e) => {
                error!("create_window: {e}");
                self.create_error = Some(e.to_string());
                event_loop.exit();
            }
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
                self.close_requested = true;
                event_loop.exit();
            }
            WindowEvent::Resized(new_size) => {
                if new_size != self.size {
                    info!("Resized → {}x{}", new_size.width, new_size.height);
                }
                self.size = new_size;
                self.resize_requested = true;
            }
            _ => {}
        }
    }
}

/// Owns the event loop and the single application window.
pub struct Platform {
    event_loop: EventLoop<()>,
    handler: Handler,
    exited: bool,
}

impl Platform {
    pub fn new(config: WindowConfig) -> Result<Self> {
        let event_loop = EventLoop::new().context("EventLoop::new")?;
        Ok(Self {
            event_loop,
            handler: Handler {
                config,
                window: None,
                size: PhysicalSize::new(0, 0),
                resize_requested: false,
                close_requested: false,
                create_error: None,
            },
            exited: false,
        })
    }

    /// Pumps events until the platform has handed us a window.
    pub fn open_window(&mut self) -> Result<&Window> {
        while self.handler.window.is_none() {
            if !self.pump_with(Some(Duration::from_millis(10))) {
                let reason = self
                    .handler
                    .create_error
                    .take()
                    .unwrap_or_else(|| "event loop exited".to_string());
                return Err(anyhow!("no window: {reason}"));
            }
        }
        self.window().context("window vanished after creation")
    }

    pub fn window(&self) -> Option<&Window> {
        self.handler.window.as_ref()
    }

    /// Handles pending events without blocking. Returns false once the
    /// event loop has exited.
    pub fn pump(&mut self) -> bool {
        self.pump_with(Some(Duration::ZERO))
    }

    /// Blocks until at least one event arrives and has been handled.
    pub fn wait_events(&mut self) {
        self.pump_with(None);
    }

    pub fn framebuffer_size(&self) -> (u32, u32) {
        (self.handler.size.width, self.handler.size.height)
    }

    pub fn take_resize_request(&mut self) -> bool {
        std::mem::take(&mut self.handler.resize_requested)
    }

    pub fn close_requested(&self) -> bool {
        self.handler.close_requested || self.exited
    }

    /// Drops the window. Anything rendering to it must be gone already.
    pub fn close_window(&mut self) {
        self.handler.window = None;
    }

    fn pump_with(&mut self, timeout: Option<Duration>) -> bool {
        if self.exited {
            return false;
        }
        if let PumpStatus::Exit(code) = self
            .event_loop
            .pump_app_events(timeout, &mut self.handler)
        {
            info!("event loop exit (code {code})");
            self.exited = true;
        }
        !self.exited
    }
}
