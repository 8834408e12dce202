// SPDX-License-Identifier: CEPL-1.0
//! Per-image command plan (shadow faces, barrier, scene, barrier) and a
//! checker for the shadow cubemap's layout protocol.
//!
//! Backends record exactly the ops returned by [`frame_plan`], so any
//! property checked here holds for the recorded command buffers too.
use thiserror::Error;
use umbra_math::{CubeFace, CubeFaces};

/// Logical state of a shadow cubemap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShadowLayout {
    RenderTarget,
    ShaderReadOnly,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShadowTransition {
    /// After the six face renders, before the scene pass samples.
    ToShaderRead,
    /// After the scene pass, so the next frame can render again.
    ToRenderTarget,
}

impl ShadowTransition {
    pub fn from(self) -> ShadowLayout {
        match self {
            ShadowTransition::ToShaderRead => ShadowLayout::RenderTarget,
            ShadowTransition::ToRenderTarget => ShadowLayout::ShaderReadOnly,
        }
    }

    pub fn to(self) -> ShadowLayout {
        match self {
            ShadowTransition::ToShaderRead => ShadowLayout::ShaderReadOnly,
            ShadowTransition::ToRenderTarget => ShadowLayout::RenderTarget,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOp {
    BeginShadowFace(CubeFace),
    PushFaceTransform(CubeFace),
    BeginScene,
    DrawModel,
    EndPass,
    TransitionShadow(ShadowTransition),
}

/// Commands recorded into every swap image's command buffer.
pub fn frame_plan() -> Vec<FrameOp> {
    let mut ops = Vec::with_capacity(CubeFace::COUNT * 4 + 5);
    for face in CubeFace::ALL {
        ops.extend([
            FrameOp::BeginShadowFace(face),
            FrameOp::PushFaceTransform(face),
            FrameOp::DrawModel,
            FrameOp::EndPass,
        ]);
    }
    ops.extend([
        FrameOp::TransitionShadow(ShadowTransition::ToShaderRead),
        FrameOp::BeginScene,
        FrameOp::DrawModel,
        FrameOp::EndPass,
        FrameOp::TransitionShadow(ShadowTransition::ToRenderTarget),
    ]);
    ops
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GraphViolation {
    #[error("face {0} rendered while the cubemap is shader-readable")]
    RenderWhileSampled(&'static str),
    #[error("scene pass began while the cubemap is a render target")]
    SampleWhileRendering,
    #[error("barrier expects {expected:?} but the cubemap is {actual:?}")]
    LayoutMismatch {
        expected: ShadowLayout,
        actual: ShadowLayout,
    },
    #[error("cubemap made readable with faces {missing:?} unwritten")]
    IncompleteCubemap { missing: CubeFaces },
    #[error("{0} outside a render pass")]
    OutsidePass(&'static str),
    #[error("render pass begun inside another render pass")]
    NestedPass,
    #[error("barrier recorded inside a render pass")]
    BarrierInsidePass,
    #[error("face {0} drawn without its own transform")]
    WrongFaceTransform(&'static str),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ActivePass {
    Shadow {
        face: CubeFace,
        pushed: Option<CubeFace>,
    },
    Scene,
}

/// Replays ops against the cubemap state machine.
#[derive(Clone, Debug)]
pub struct ShadowTracker {
    layout: ShadowLayout,
    written: CubeFaces,
    pass: Option<ActivePass>,
    history: Vec<ShadowLayout>,
}

impl Default for ShadowTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ShadowTracker {
    /// Cubemaps start as render targets: the shadow render pass discards
    /// previous contents on load.
    pub fn new() -> Self {
        Self {
            layout: ShadowLayout::RenderTarget,
            written: CubeFaces::empty(),
            pass: None,
            history: vec![ShadowLayout::RenderTarget],
        }
    }

    pub fn layout(&self) -> ShadowLayout {
        self.layout
    }

    /// Every layout the cubemap has been in, initial state first.
    pub fn history(&self) -> &[ShadowLayout] {
        &self.history
    }

    pub fn apply(&mut self, op: FrameOp) -> Result<(), GraphViolation> {
        match op {
            FrameOp::BeginShadowFace(face) => {
                if self.pass.is_some() {
                    return Err(GraphViolation::NestedPass);
                }
                if self.layout != ShadowLayout::RenderTarget {
                    return Err(GraphViolation::RenderWhileSampled(face.name()));
                }
                self.pass = Some(ActivePass::Shadow { face, pushed: None });
            }
            FrameOp::PushFaceTransform(face) => match &mut self.pass {
                Some(ActivePass::Shadow { pushed, .. }) => *pushed = Some(face),
                _ => return Err(GraphViolation::OutsidePass("face transform push")),
            },
            FrameOp::BeginScene => {
                if self.pass.is_some() {
                    return Err(GraphViolation::NestedPass);
                }
                if self.layout != ShadowLayout::ShaderReadOnly {
                    return Err(GraphViolation::SampleWhileRendering);
                }
                self.pass = Some(ActivePass::Scene);
            }
            FrameOp::DrawModel => match self.pass {
                Some(ActivePass::Shadow { face, pushed }) => {
                    if pushed != Some(face) {
                        return Err(GraphViolation::WrongFaceTransform(face.name()));
                    }
                    self.written |= face.flag();
                }
                Some(ActivePass::Scene) => {}
                None => return Err(GraphViolation::OutsidePass("draw")),
            },
            FrameOp::EndPass => {
                if self.pass.take().is_none() {
                    return Err(GraphViolation::OutsidePass("end of render pass"));
                }
            }
            FrameOp::TransitionShadow(t) => {
                if self.pass.is_some() {
                    return Err(GraphViolation::BarrierInsidePass);
                }
                if self.layout != t.from() {
                    return Err(GraphViolation::LayoutMismatch {
                        expected: t.from(),
                        actual: self.layout,
                    });
                }
                if t == ShadowTransition::ToShaderRead && self.written != CubeFaces::all() {
                    return Err(GraphViolation::IncompleteCubemap {
                        missing: CubeFaces::all() - self.written,
                    });
                }
                if t == ShadowTransition::ToRenderTarget {
                    self.written = CubeFaces::empty();
                }
                self.layout = t.to();
                self.history.push(self.layout);
            }
        }
        Ok(())
    }
}

/// Checks a whole op stream, returning the final tracker state.
pub fn validate<'a>(
    ops: impl IntoIterator<Item = &'a FrameOp>,
) -> Result<ShadowTracker, GraphViolation> {
    let mut tracker = ShadowTracker::new();
    for &op in ops {
        tracker.apply(op)?;
    }
    Ok(tracker)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_frame_round_trips_the_cubemap() {
        let tracker = validate(&frame_plan()).unwrap();
        assert_eq!(tracker.layout(), ShadowLayout::RenderTarget);
        assert_eq!(
            tracker.history(),
            [
                ShadowLayout::RenderTarget,
                ShadowLayout::ShaderReadOnly,
                ShadowLayout::RenderTarget
            ]
        );
    }

    #[test]
    fn repeated_frames_alternate_layouts() {
        let plan = frame_plan();
        let trace: Vec<FrameOp> = (0..5).flat_map(|_| plan.iter().copied()).collect();
        let tracker = validate(&trace).unwrap();
        let history = tracker.history();
        assert_eq!(history.len(), 11);
        for pair in history.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
    }

    #[test]
    fn plan_draws_each_face_once_with_one_barrier_pair() {
        let plan = frame_plan();
        let faces: Vec<CubeFace> = plan
            .iter()
            .filter_map(|op| match op {
                FrameOp::BeginShadowFace(f) => Some(*f),
                _ => None,
            })
            .collect();
        assert_eq!(faces, CubeFace::ALL);
        let barriers = plan
            .iter()
            .filter(|op| matches!(op, FrameOp::TransitionShadow(_)))
            .count();
        assert_eq!(barriers, 2);
        assert_eq!(plan.iter().filter(|op| **op == FrameOp::DrawModel).count(), 7);
    }

    #[test]
    fn sampling_before_the_barrier_is_rejected() {
        let mut plan = frame_plan();
        let barrier = plan
            .iter()
            .position(|op| *op == FrameOp::TransitionShadow(ShadowTransition::ToShaderRead))
            .unwrap();
        plan.remove(barrier);
        assert_eq!(validate(&plan).unwrap_err(), GraphViolation::SampleWhileRendering);
    }

    #[test]
    fn rendering_while_readable_is_rejected() {
        let mut plan = frame_plan();
        plan.pop();
        plan.extend(frame_plan());
        assert_eq!(
            validate(&plan).unwrap_err(),
            GraphViolation::RenderWhileSampled("+X")
        );
    }

    #[test]
    fn barrier_before_all_faces_is_rejected() {
        let plan = [
            FrameOp::BeginShadowFace(CubeFace::PositiveX),
            FrameOp::PushFaceTransform(CubeFace::PositiveX),
            FrameOp::DrawModel,
            FrameOp::EndPass,
            FrameOp::TransitionShadow(ShadowTransition::ToShaderRead),
        ];
        let err = validate(&plan).unwrap_err();
        assert_eq!(
            err,
            GraphViolation::IncompleteCubemap {
                missing: CubeFaces::all() - CubeFaces::POSITIVE_X
            }
        );
    }

    #[test]
    fn reverse_barrier_needs_readable_state() {
        let plan = [FrameOp::TransitionShadow(ShadowTransition::ToRenderTarget)];
        assert_eq!(
            validate(&plan).unwrap_err(),
            GraphViolation::LayoutMismatch {
                expected: ShadowLayout::ShaderReadOnly,
                actual: ShadowLayout::RenderTarget
            }
        );
    }

    #[test]
    fn face_draw_needs_its_transform() {
        let plan = [
            FrameOp::BeginShadowFace(CubeFace::NegativeY),
            FrameOp::PushFaceTransform(CubeFace::PositiveY),
            FrameOp::DrawModel,
        ];
        assert_eq!(
            validate(&plan).unwrap_err(),
            GraphViolation::WrongFaceTransform("-Y")
        );
    }

    #[test]
    fn structural_errors_are_caught() {
        assert_eq!(
            validate(&[FrameOp::DrawModel]).unwrap_err(),
            GraphViolation::OutsidePass("draw")
        );
        assert_eq!(
            validate(&[
                FrameOp::BeginShadowFace(CubeFace::PositiveX),
                FrameOp::BeginShadowFace(CubeFace::NegativeX)
            ])
            .unwrap_err(),
            GraphViolation::NestedPass
        );
        assert_eq!(
            validate(&[
                FrameOp::BeginShadowFace(CubeFace::PositiveX),
                FrameOp::TransitionShadow(ShadowTransition::ToShaderRead)
            ])
            .unwrap_err(),
            GraphViolation::BarrierInsidePass
        );
    }
}
