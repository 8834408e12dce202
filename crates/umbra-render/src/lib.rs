// SPDX-License-Identifier: CEPL-1.0
//! Backend-agnostic pieces of the point-light shadow renderer.
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

pub mod abi;
pub mod error;
pub mod frame;
pub mod graph;
pub mod model;
pub mod settings;

pub use error::RenderError;
pub use frame::{
    Acquired, FrameBackend, FrameOrchestrator, FrameOutcome, FrameState, FramebufferHost,
    Presented,
};
pub use graph::{
    frame_plan, validate, FrameOp, GraphViolation, ShadowLayout, ShadowTracker, ShadowTransition,
};
pub use model::{Material, Model, ModelError, MAX_MATERIALS};
pub use settings::{
    CameraSettings, PresentPreference, SceneSettings, ShadowSettings, DEFAULT_FRAMES_IN_FLIGHT,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimized window reports a zero-sized framebuffer.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &SceneSettings,
        model: &Model,
    ) -> Result<Self, RenderError>
    where
        Self: Sized;

    /// Draws one frame, recovering from swap-chain invalidation internally.
    fn render(&mut self, host: &mut dyn FramebufferHost) -> Result<FrameOutcome, RenderError>;

    /// Blocks until the GPU has finished all submitted work.
    fn wait_idle(&mut self) -> Result<(), RenderError>;
}
