// SPDX-License-Identifier: CEPL-1.0
//! Frames-in-flight state machine, independent of the graphics API.
//!
//! Idle -> Acquiring -> Submitting -> Presenting -> Idle, with Recreating
//! entered from Acquiring or Presenting when the swap chain goes stale.
use crate::{RenderError, RenderSize};
use tracing::{debug, info};

/// Window-side services the orchestrator needs while running and while
/// waiting out a minimized window.
pub trait FramebufferHost {
    /// Current framebuffer size in pixels; zero while minimized.
    fn framebuffer_size(&self) -> RenderSize;
    /// Blocks until at least one window event has been processed.
    fn wait_events(&mut self);
    /// Returns and clears the "resize requested" flag.
    fn take_resize_request(&mut self) -> bool;
    fn close_requested(&self) -> bool {
        false
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquired {
    Image { index: u32, suboptimal: bool },
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Presented {
    Optimal,
    Suboptimal,
    OutOfDate,
}

/// GPU side of a frame. Every method maps to one API call or one short
/// sequence of them; the orchestrator decides the order.
pub trait FrameBackend {
    type Fence: Copy + Eq + std::fmt::Debug;

    fn slot_fence(&self, slot: usize) -> Self::Fence;
    /// Unbounded wait.
    fn wait_fence(&mut self, fence: Self::Fence) -> Result<(), RenderError>;
    fn reset_fence(&mut self, fence: Self::Fence) -> Result<(), RenderError>;
    /// Acquires the next image, signalling the slot's image-ready semaphore.
    fn acquire(&mut self, slot: usize) -> Result<Acquired, RenderError>;
    /// Submits the image's recorded commands; waits image-ready, signals
    /// render-complete and the slot fence.
    fn submit(&mut self, slot: usize, image_index: u32) -> Result<(), RenderError>;
    fn present(&mut self, slot: usize, image_index: u32) -> Result<Presented, RenderError>;
    fn image_count(&self) -> usize;
    /// Waits for the device to go idle, tears down swap-chain dependent
    /// resources and rebuilds them for `size`.
    fn recreate(&mut self, size: RenderSize) -> Result<(), RenderError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquiring,
    Submitting,
    Presenting,
    Recreating,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// No frame reached the screen or the swap chain was rebuilt after it did.
    Recreated,
    /// The window closed while we were waiting for it to become visible.
    Closed,
}

pub struct FrameOrchestrator<F> {
    frames_in_flight: usize,
    current_frame: usize,
    /// Fence of the slot that last rendered into each swap image.
    image_fences: Vec<Option<F>>,
    state: FrameState,
}

impl<F: Copy + Eq + std::fmt::Debug> FrameOrchestrator<F> {
    pub fn new(frames_in_flight: usize, image_count: usize) -> Self {
        Self {
            frames_in_flight: frames_in_flight.max(1),
            current_frame: 0,
            image_fences: vec![None; image_count],
            state: FrameState::Idle,
        }
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn image_fence(&self, image_index: usize) -> Option<F> {
        self.image_fences.get(image_index).copied().flatten()
    }

    pub fn draw_frame<B>(
        &mut self,
        backend: &mut B,
        host: &mut dyn FramebufferHost,
    ) -> Result<FrameOutcome, RenderError>
    where
        B: FrameBackend<Fence = F>,
    {
        self.state = FrameState::Acquiring;
        let slot = self.current_frame;
        let slot_fence = backend.slot_fence(slot);
        backend.wait_fence(slot_fence)?;

        let (image_index, acquire_suboptimal) = match backend.acquire(slot)? {
            Acquired::Image { index, suboptimal } => (index, suboptimal),
            Acquired::OutOfDate => {
                debug!("acquire: out of date");
                return self.recreate(backend, host);
            }
        };

        self.state = FrameState::Submitting;
        let image = image_index as usize;
        if image >= self.image_fences.len() {
            self.image_fences.resize(image + 1, None);
        }
        // A different slot may still be writing this image.
        if let Some(prior) = self.image_fences[image] {
            if prior != slot_fence {
                backend.wait_fence(prior)?;
            }
        }
        self.image_fences[image] = Some(slot_fence);
        backend.reset_fence(slot_fence)?;
        backend.submit(slot, image_index)?;

        self.state = FrameState::Presenting;
        let presented = backend.present(slot, image_index)?;
        let resize = host.take_resize_request();
        if resize || acquire_suboptimal || presented != Presented::Optimal {
            debug!(?presented, resize, acquire_suboptimal, "present: swap chain stale");
            return self.recreate(backend, host);
        }

        self.current_frame = (self.current_frame + 1) % self.frames_in_flight;
        self.state = FrameState::Idle;
        Ok(FrameOutcome::Presented)
    }

    /// Rebuilds swap-chain dependent resources once the window has a
    /// drawable size again.
    pub fn recreate<B>(
        &mut self,
        backend: &mut B,
        host: &mut dyn FramebufferHost,
    ) -> Result<FrameOutcome, RenderError>
    where
        B: FrameBackend<Fence = F>,
    {
        self.state = FrameState::Recreating;
        let mut size = host.framebuffer_size();
        while size.is_empty() {
            if host.close_requested() {
                self.state = FrameState::Idle;
                return Ok(FrameOutcome::Closed);
            }
            host.wait_events();
            size = host.framebuffer_size();
        }

        backend.recreate(size)?;
        // Old fence aliases refer to submissions that are all complete now.
        self.image_fences = vec![None; backend.image_count()];
        self.state = FrameState::Idle;
        info!(
            width = size.width,
            height = size.height,
            images = self.image_fences.len(),
            "swap chain recreated"
        );
        Ok(FrameOutcome::Recreated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    const N: usize = 3;
    const SIZE: RenderSize = RenderSize {
        width: 800,
        height: 600,
    };
    const ZERO: RenderSize = RenderSize {
        width: 0,
        height: 0,
    };

    /// GPU model in which work only completes when the CPU waits for it,
    /// the worst legal case for the fencing scheme.
    struct MockGpu {
        images: usize,
        images_after_recreate: usize,
        fence_signaled: Vec<bool>,
        // (fence, image) pairs submitted and not yet waited on
        pending: Vec<(usize, u32)>,
        max_pending: usize,
        acquire_script: VecDeque<Acquired>,
        present_script: VecDeque<Presented>,
        next_image: u32,
        submits: usize,
        presents: usize,
        live_swapchains: usize,
        live_views: usize,
        views_created: usize,
        views_destroyed: usize,
        recreated_with: Vec<RenderSize>,
        fail_submit: bool,
    }

    impl MockGpu {
        fn new(images: usize) -> Self {
            Self {
                images,
                images_after_recreate: images,
                fence_signaled: vec![true; N],
                pending: Vec::new(),
                max_pending: 0,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                next_image: 0,
                submits: 0,
                presents: 0,
                live_swapchains: 1,
                live_views: images,
                views_created: images,
                views_destroyed: 0,
                recreated_with: Vec::new(),
                fail_submit: false,
            }
        }

        fn complete(&mut self, fence: usize) {
            self.fence_signaled[fence] = true;
            self.pending.retain(|&(f, _)| f != fence);
        }
    }

    impl FrameBackend for MockGpu {
        type Fence = usize;

        fn slot_fence(&self, slot: usize) -> usize {
            slot
        }

        fn wait_fence(&mut self, fence: usize) -> Result<(), RenderError> {
            self.complete(fence);
            Ok(())
        }

        fn reset_fence(&mut self, fence: usize) -> Result<(), RenderError> {
            assert!(self.fence_signaled[fence], "reset of a busy fence");
            self.fence_signaled[fence] = false;
            Ok(())
        }

        fn acquire(&mut self, _slot: usize) -> Result<Acquired, RenderError> {
            if let Some(scripted) = self.acquire_script.pop_front() {
                return Ok(scripted);
            }
            let index = self.next_image % self.images as u32;
            self.next_image += 1;
            Ok(Acquired::Image {
                index,
                suboptimal: false,
            })
        }

        fn submit(&mut self, slot: usize, image_index: u32) -> Result<(), RenderError> {
            if self.fail_submit {
                return Err(RenderError::device("queue_submit", "ERROR_DEVICE_LOST"));
            }
            if self.fence_signaled[slot] {
                return Err(RenderError::device("queue_submit", "slot fence not reset"));
            }
            if self.pending.iter().any(|&(_, img)| img == image_index) {
                return Err(RenderError::device("queue_submit", "image still in flight"));
            }
            self.pending.push((slot, image_index));
            self.max_pending = self.max_pending.max(self.pending.len());
            self.submits += 1;
            Ok(())
        }

        fn present(&mut self, _slot: usize, _image_index: u32) -> Result<Presented, RenderError> {
            self.presents += 1;
            Ok(self.present_script.pop_front().unwrap_or(Presented::Optimal))
        }

        fn image_count(&self) -> usize {
            self.images
        }

        fn recreate(&mut self, size: RenderSize) -> Result<(), RenderError> {
            for fence in 0..N {
                self.complete(fence);
            }
            assert!(self.pending.is_empty());

            self.views_destroyed += self.live_views;
            self.live_views = 0;
            self.live_swapchains -= 1;

            self.images = self.images_after_recreate;
            self.live_swapchains += 1;
            self.live_views = self.images;
            self.views_created += self.images;
            self.next_image = 0;
            self.recreated_with.push(size);
            Ok(())
        }
    }

    struct ScriptedHost {
        size: RenderSize,
        upcoming: VecDeque<RenderSize>,
        waits: usize,
        resize: bool,
        closing: bool,
    }

    impl ScriptedHost {
        fn steady() -> Self {
            Self {
                size: SIZE,
                upcoming: VecDeque::new(),
                waits: 0,
                resize: false,
                closing: false,
            }
        }
    }

    impl FramebufferHost for ScriptedHost {
        fn framebuffer_size(&self) -> RenderSize {
            self.size
        }

        fn wait_events(&mut self) {
            self.waits += 1;
            if let Some(next) = self.upcoming.pop_front() {
                self.size = next;
            }
        }

        fn take_resize_request(&mut self) -> bool {
            std::mem::take(&mut self.resize)
        }

        fn close_requested(&self) -> bool {
            self.closing
        }
    }

    fn setup(images: usize) -> (FrameOrchestrator<usize>, MockGpu, ScriptedHost) {
        (
            FrameOrchestrator::new(N, images),
            MockGpu::new(images),
            ScriptedHost::steady(),
        )
    }

    #[test]
    fn cold_start_advances_one_slot() {
        let (mut frames, mut gpu, mut host) = setup(3);
        let outcome = frames.draw_frame(&mut gpu, &mut host).unwrap();
        assert_eq!(outcome, FrameOutcome::Presented);
        assert_eq!(frames.current_frame(), 1 % N);
        assert_eq!(frames.state(), FrameState::Idle);
        assert_eq!(frames.image_fence(0), Some(0));
        assert_eq!(gpu.submits, 1);
    }

    #[test]
    fn at_most_n_submissions_are_outstanding() {
        for images in [2, 3, 4, 5] {
            let (mut frames, mut gpu, mut host) = setup(images);
            for i in 0..40 {
                frames.draw_frame(&mut gpu, &mut host).unwrap();
                assert_eq!(frames.current_frame(), (i + 1) % N);
            }
            assert!(gpu.max_pending <= N, "images {images}: {}", gpu.max_pending);
            assert_eq!(gpu.submits, 40);
        }
    }

    #[test]
    fn image_fence_is_honoured_when_slots_outnumber_images() {
        let (mut frames, mut gpu, mut host) = setup(2);
        for _ in 0..30 {
            // MockGpu::submit fails if the image is still being written.
            frames.draw_frame(&mut gpu, &mut host).unwrap();
        }
        assert_eq!(gpu.submits, 30);
    }

    #[test]
    fn mock_detects_reuse_of_an_image_in_flight() {
        let mut gpu = MockGpu::new(2);
        gpu.reset_fence(0).unwrap();
        gpu.submit(0, 1).unwrap();
        gpu.reset_fence(1).unwrap();
        let err = gpu.submit(1, 1).unwrap_err();
        assert!(matches!(err, RenderError::Device { .. }));
    }

    #[test]
    fn image_fence_aliases_the_last_slot_used() {
        let (mut frames, mut gpu, mut host) = setup(2);
        for _ in 0..3 {
            frames.draw_frame(&mut gpu, &mut host).unwrap();
        }
        // slot 0 -> image 0, slot 1 -> image 1, slot 2 -> image 0
        assert_eq!(frames.image_fence(0), Some(2));
        assert_eq!(frames.image_fence(1), Some(1));
    }

    #[test]
    fn out_of_date_acquire_skips_submission() {
        let (mut frames, mut gpu, mut host) = setup(3);
        gpu.acquire_script.push_back(Acquired::OutOfDate);
        let outcome = frames.draw_frame(&mut gpu, &mut host).unwrap();
        assert_eq!(outcome, FrameOutcome::Recreated);
        assert_eq!(gpu.submits, 0);
        assert_eq!(gpu.presents, 0);
        assert_eq!(frames.current_frame(), 0);
        assert_eq!(gpu.recreated_with, vec![SIZE]);
    }

    #[test]
    fn suboptimal_acquire_still_renders_then_recreates() {
        let (mut frames, mut gpu, mut host) = setup(3);
        gpu.acquire_script.push_back(Acquired::Image {
            index: 1,
            suboptimal: true,
        });
        let outcome = frames.draw_frame(&mut gpu, &mut host).unwrap();
        assert_eq!(outcome, FrameOutcome::Recreated);
        assert_eq!(gpu.submits, 1);
        assert_eq!(gpu.presents, 1);
        assert_eq!(gpu.recreated_with.len(), 1);
    }

    #[test]
    fn stale_present_or_resize_request_recreates() {
        for trigger in [Presented::Suboptimal, Presented::OutOfDate] {
            let (mut frames, mut gpu, mut host) = setup(3);
            gpu.present_script.push_back(trigger);
            frames.draw_frame(&mut gpu, &mut host).unwrap();
            assert_eq!(gpu.recreated_with.len(), 1, "{trigger:?}");
            assert!((0..3).all(|i| frames.image_fence(i).is_none()));
        }

        let (mut frames, mut gpu, mut host) = setup(3);
        host.resize = true;
        let outcome = frames.draw_frame(&mut gpu, &mut host).unwrap();
        assert_eq!(outcome, FrameOutcome::Recreated);
        assert!(!host.resize);
        // next frame is a normal one
        let outcome = frames.draw_frame(&mut gpu, &mut host).unwrap();
        assert_eq!(outcome, FrameOutcome::Presented);
    }

    #[test]
    fn recreating_twice_leaves_one_swap_chain() {
        let (mut frames, mut gpu, mut host) = setup(3);
        frames.draw_frame(&mut gpu, &mut host).unwrap();
        frames.recreate(&mut gpu, &mut host).unwrap();
        frames.recreate(&mut gpu, &mut host).unwrap();

        assert_eq!(gpu.live_swapchains, 1);
        assert_eq!(gpu.live_views, 3);
        assert_eq!(gpu.views_created - gpu.views_destroyed, gpu.live_views);
        assert_eq!(gpu.recreated_with, vec![SIZE, SIZE]);
        frames.draw_frame(&mut gpu, &mut host).unwrap();
    }

    #[test]
    fn image_tracking_follows_a_new_image_count() {
        let (mut frames, mut gpu, mut host) = setup(3);
        gpu.images_after_recreate = 4;
        frames.recreate(&mut gpu, &mut host).unwrap();
        for _ in 0..8 {
            frames.draw_frame(&mut gpu, &mut host).unwrap();
        }
        assert!(frames.image_fence(3).is_some());
    }

    #[test]
    fn minimize_blocks_until_restored() {
        let (mut frames, mut gpu, mut host) = setup(3);
        frames.draw_frame(&mut gpu, &mut host).unwrap();

        host.size = ZERO;
        host.resize = true;
        host.upcoming.extend([ZERO, ZERO, SIZE]);
        let outcome = frames.draw_frame(&mut gpu, &mut host).unwrap();

        assert_eq!(outcome, FrameOutcome::Recreated);
        assert_eq!(host.waits, 3);
        assert_eq!(gpu.recreated_with, vec![SIZE]);
        assert_eq!(frames.state(), FrameState::Idle);

        for _ in 0..4 {
            assert_eq!(
                frames.draw_frame(&mut gpu, &mut host).unwrap(),
                FrameOutcome::Presented
            );
        }
    }

    #[test]
    fn closing_while_minimized_stops_waiting() {
        let (mut frames, mut gpu, mut host) = setup(3);
        host.size = ZERO;
        host.closing = true;
        let outcome = frames.recreate(&mut gpu, &mut host).unwrap();
        assert_eq!(outcome, FrameOutcome::Closed);
        assert!(gpu.recreated_with.is_empty());
        assert_eq!(host.waits, 0);
    }

    #[test]
    fn device_errors_abort_the_frame() {
        let (mut frames, mut gpu, mut host) = setup(3);
        gpu.fail_submit = true;
        let err = frames.draw_frame(&mut gpu, &mut host).unwrap_err();
        assert!(matches!(err, RenderError::Device { call: "queue_submit", .. }));
        assert_eq!(frames.current_frame(), 0);
    }
}
