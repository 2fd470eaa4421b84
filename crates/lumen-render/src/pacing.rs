// SPDX-License-Identifier: CEPL-1.0
//! Frames-in-flight pacing.
//!
//! A fixed ring of `N` frame slots lets the CPU record frame `K + 1` while
//! the GPU still executes frame `K`. Each slot owns a command buffer, an
//! acquire semaphore and a completion fence; the fence is the only thing the
//! CPU ever blocks on. [`FramePacer`] walks one slot through the protocol
//! below and refuses any step that would reuse a slot whose previous
//! submission may still be running.
//!
//! ```text
//! slot k = frame_count mod N
//!
//! 1. wait     slot k's completion fence              SUBMITTED -> IDLE
//! 2. acquire  next image, signalling k's acquire semaphore
//! 3. reset    k's fence and command pool             IDLE -> RECORDING
//! 4. update   k's mapped uniform data
//! 5. record   draw into the *acquired image's* framebuffer
//! 6. submit   wait acquire sem, signal image's render-finished sem + k's fence
//!                                                    RECORDING -> SUBMITTED
//! 7. present  the image once its render-finished semaphore fires
//! 8. advance  frame_count
//! ```
//!
//! The slot index and the acquired image index are independent: the
//! presentation engine hands out images in whatever order it likes.
//!
//! An out-of-date swapchain at step 2 leaves every slot untouched and the
//! frame is not counted, so the caller can rebuild and retry the same slot.
//! At step 7 the work is already queued; the frame counts and the slot stays
//! `SUBMITTED` until its fence is observed.

use tracing::trace;

use crate::error::FrameError;
use crate::frame_data::{FrameInput, FrameReport, PerFrameData, PipelineVariant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Recording,
    Submitted,
}

/// Result of acquiring a presentable image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Acquired {
    pub image: u32,
    pub suboptimal: bool,
}

/// The GPU side of the protocol, one method per step.
///
/// Implementations block in `wait_slot` (fence wait) and `acquire_image`
/// (presentation engine), nowhere else.
pub trait FrameBackend {
    fn wait_slot(&mut self, slot: usize) -> Result<(), FrameError>;
    fn acquire_image(&mut self, slot: usize) -> Result<Acquired, FrameError>;
    fn reset_slot(&mut self, slot: usize) -> Result<(), FrameError>;
    fn write_frame_data(&mut self, slot: usize, data: &PerFrameData) -> Result<(), FrameError>;
    fn record(
        &mut self,
        slot: usize,
        image: u32,
        variant: PipelineVariant,
    ) -> Result<(), FrameError>;
    fn submit(&mut self, slot: usize, image: u32) -> Result<(), FrameError>;
    /// Returns `true` when the presentation engine reports the swapchain suboptimal.
    fn present(&mut self, image: u32) -> Result<bool, FrameError>;
}

/// CPU-side bookkeeping for the slot ring.
#[derive(Debug)]
pub struct FramePacer {
    states: Vec<SlotState>,
    frame_count: u64,
}

impl FramePacer {
    /// Fences start signaled, so every slot starts `Idle`.
    ///
    /// # Panics
    /// If `slots` is zero.
    pub fn new(slots: usize) -> Self {
        assert!(slots > 0, "frame pacer needs at least one slot");
        Self {
            states: vec![SlotState::Idle; slots],
            frame_count: 0,
        }
    }

    pub fn slots(&self) -> usize {
        self.states.len()
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn current_slot(&self) -> usize {
        (self.frame_count % self.states.len() as u64) as usize
    }

    pub fn state(&self, slot: usize) -> SlotState {
        self.states[slot]
    }

    /// Slots whose last submission has not been observed complete.
    pub fn in_flight(&self) -> usize {
        self.states
            .iter()
            .filter(|&&s| s == SlotState::Submitted)
            .count()
    }

    /// The slot's fence was seen signaled.
    ///
    /// A `Recording` slot has a reset fence that nothing will ever signal, so
    /// waiting on it is an error rather than a hang.
    pub fn observe_complete(&mut self, slot: usize) -> Result<(), FrameError> {
        match self.states[slot] {
            SlotState::Recording => Err(FrameError::SyncViolation { slot, op: "wait" }),
            SlotState::Idle | SlotState::Submitted => {
                self.states[slot] = SlotState::Idle;
                Ok(())
            }
        }
    }

    /// The slot's fence and command pool are about to be reset.
    pub fn begin_recording(&mut self, slot: usize) -> Result<(), FrameError> {
        if self.states[slot] != SlotState::Idle {
            return Err(FrameError::SyncViolation { slot, op: "reset" });
        }
        self.states[slot] = SlotState::Recording;
        Ok(())
    }

    /// The slot's command buffer was handed to the queue.
    pub fn mark_submitted(&mut self, slot: usize) -> Result<(), FrameError> {
        if self.states[slot] != SlotState::Recording {
            return Err(FrameError::SyncViolation { slot, op: "submit" });
        }
        self.states[slot] = SlotState::Submitted;
        Ok(())
    }

    /// Drives one full iteration of the protocol against `backend`.
    pub fn run_frame<B>(
        &mut self,
        backend: &mut B,
        input: &FrameInput,
    ) -> Result<FrameReport, FrameError>
    where
        B: FrameBackend + ?Sized,
    {
        let slot = self.current_slot();
        if self.states[slot] == SlotState::Recording {
            return Err(FrameError::SyncViolation { slot, op: "wait" });
        }

        backend.wait_slot(slot)?;
        self.observe_complete(slot)?;

        let acquired = backend.acquire_image(slot)?;

        self.begin_recording(slot)?;
        backend.reset_slot(slot)?;
        backend.write_frame_data(slot, &input.uniforms)?;
        backend.record(slot, acquired.image, input.variant)?;
        backend.submit(slot, acquired.image)?;
        self.mark_submitted(slot)?;

        let frame = self.frame_count;
        self.frame_count += 1;
        trace!(frame, slot, image = acquired.image, "submitted");

        let present_suboptimal = backend.present(acquired.image)?;

        Ok(FrameReport {
            frame,
            slot,
            image: acquired.image,
            suboptimal: acquired.suboptimal || present_suboptimal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// In-order GPU that only retires work when the CPU waits on a fence,
    /// which keeps as many frames in flight as the pacer allows.
    struct MockGpu {
        fence_signaled: Vec<bool>,
        queue: VecDeque<usize>,
        max_queued: usize,
        image_count: u32,
        next_image: u32,
        acquire_out_of_date: bool,
        present_out_of_date: bool,
        violations: Vec<String>,
        written: Vec<Option<PerFrameData>>,
        recorded: Vec<(usize, u32, PipelineVariant)>,
    }

    impl MockGpu {
        fn new(slots: usize, image_count: u32) -> Self {
            Self {
                fence_signaled: vec![true; slots],
                queue: VecDeque::new(),
                max_queued: 0,
                image_count,
                next_image: 0,
                acquire_out_of_date: false,
                present_out_of_date: false,
                violations: Vec::new(),
                written: vec![None; slots],
                recorded: Vec::new(),
            }
        }

        fn retire_oldest(&mut self) {
            if let Some(done) = self.queue.pop_front() {
                self.fence_signaled[done] = true;
            }
        }

        fn busy(&self, slot: usize) -> bool {
            self.queue.contains(&slot)
        }
    }

    impl FrameBackend for MockGpu {
        fn wait_slot(&mut self, slot: usize) -> Result<(), FrameError> {
            while !self.fence_signaled[slot] {
                if self.queue.is_empty() {
                    self.violations.push(format!("slot {slot}: wait would block forever"));
                    return Err(FrameError::DeviceLost);
                }
                self.retire_oldest();
            }
            Ok(())
        }

        fn acquire_image(&mut self, _slot: usize) -> Result<Acquired, FrameError> {
            if std::mem::take(&mut self.acquire_out_of_date) {
                return Err(FrameError::OutOfDate);
            }
            let image = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            Ok(Acquired { image, suboptimal: false })
        }

        fn reset_slot(&mut self, slot: usize) -> Result<(), FrameError> {
            if !self.fence_signaled[slot] || self.busy(slot) {
                self.violations.push(format!("slot {slot}: reset while fence unsignaled"));
            }
            self.fence_signaled[slot] = false;
            Ok(())
        }

        fn write_frame_data(&mut self, slot: usize, data: &PerFrameData) -> Result<(), FrameError> {
            if self.busy(slot) {
                self.violations.push(format!("slot {slot}: uniforms written while in flight"));
            }
            self.written[slot] = Some(*data);
            Ok(())
        }

        fn record(
            &mut self,
            slot: usize,
            image: u32,
            variant: PipelineVariant,
        ) -> Result<(), FrameError> {
            if self.busy(slot) {
                self.violations.push(format!("slot {slot}: recorded while in flight"));
            }
            self.recorded.push((slot, image, variant));
            Ok(())
        }

        fn submit(&mut self, slot: usize, _image: u32) -> Result<(), FrameError> {
            if self.busy(slot) {
                self.violations.push(format!("slot {slot}: submitted twice"));
            }
            self.queue.push_back(slot);
            self.max_queued = self.max_queued.max(self.queue.len());
            Ok(())
        }

        fn present(&mut self, _image: u32) -> Result<bool, FrameError> {
            if std::mem::take(&mut self.present_out_of_date) {
                return Err(FrameError::OutOfDate);
            }
            Ok(false)
        }
    }

    #[test]
    fn never_more_than_n_frames_in_flight() {
        for n in 1..=4 {
            let mut pacer = FramePacer::new(n);
            let mut gpu = MockGpu::new(n, 3);
            for _ in 0..50 {
                pacer.run_frame(&mut gpu, &FrameInput::default()).unwrap();
                assert!(pacer.in_flight() <= n);
                assert!(gpu.queue.len() <= n);
            }
            assert_eq!(gpu.max_queued, n, "ring of {n} should fill up");
            assert!(gpu.violations.is_empty(), "{:?}", gpu.violations);
        }
    }

    #[test]
    fn command_buffers_reset_only_after_fence_wait() {
        let mut pacer = FramePacer::new(2);
        let mut gpu = MockGpu::new(2, 3);
        for _ in 0..20 {
            pacer.run_frame(&mut gpu, &FrameInput::default()).unwrap();
        }
        assert!(gpu.violations.is_empty(), "{:?}", gpu.violations);
    }

    #[test]
    fn second_submit_without_wait_is_rejected() {
        let mut pacer = FramePacer::new(2);
        pacer.begin_recording(0).unwrap();
        pacer.mark_submitted(0).unwrap();

        assert_eq!(
            pacer.mark_submitted(0),
            Err(FrameError::SyncViolation { slot: 0, op: "submit" })
        );
        assert_eq!(
            pacer.begin_recording(0),
            Err(FrameError::SyncViolation { slot: 0, op: "reset" })
        );

        pacer.observe_complete(0).unwrap();
        pacer.begin_recording(0).unwrap();
    }

    #[test]
    fn waiting_on_a_recording_slot_is_rejected() {
        let mut pacer = FramePacer::new(1);
        pacer.begin_recording(0).unwrap();
        assert!(matches!(
            pacer.observe_complete(0),
            Err(FrameError::SyncViolation { op: "wait", .. })
        ));

        let mut gpu = MockGpu::new(1, 2);
        assert!(matches!(
            pacer.run_frame(&mut gpu, &FrameInput::default()),
            Err(FrameError::SyncViolation { op: "wait", .. })
        ));
        assert!(gpu.recorded.is_empty());
    }

    #[test]
    fn image_index_is_independent_of_slot() {
        let mut pacer = FramePacer::new(2);
        let mut gpu = MockGpu::new(2, 3);
        let reports: Vec<_> = (0..6)
            .map(|_| pacer.run_frame(&mut gpu, &FrameInput::default()).unwrap())
            .collect();

        let slots: Vec<_> = reports.iter().map(|r| r.slot).collect();
        let images: Vec<_> = reports.iter().map(|r| r.image).collect();
        assert_eq!(slots, [0, 1, 0, 1, 0, 1]);
        assert_eq!(images, [0, 1, 2, 0, 1, 2]);

        // Recording targets the acquired image, not the slot.
        assert!(gpu.recorded.iter().any(|&(slot, image, _)| slot as u32 != image));
        for (r, &(slot, image, _)) in reports.iter().zip(&gpu.recorded) {
            assert_eq!((r.slot, r.image), (slot, image));
        }
    }

    #[test]
    fn out_of_date_acquire_leaves_slot_untouched() {
        let mut pacer = FramePacer::new(2);
        let mut gpu = MockGpu::new(2, 3);
        pacer.run_frame(&mut gpu, &FrameInput::default()).unwrap();

        gpu.acquire_out_of_date = true;
        let err = pacer.run_frame(&mut gpu, &FrameInput::default()).unwrap_err();
        assert_eq!(err, FrameError::OutOfDate);
        assert_eq!(pacer.frame_count(), 1);
        assert_eq!(pacer.current_slot(), 1);
        assert_eq!(pacer.state(1), SlotState::Idle);
        assert!(gpu.fence_signaled[1], "fence must not be reset before a successful acquire");

        let report = pacer.run_frame(&mut gpu, &FrameInput::default()).unwrap();
        assert_eq!(report.slot, 1);
        assert!(gpu.violations.is_empty(), "{:?}", gpu.violations);
    }

    #[test]
    fn out_of_date_present_still_counts_the_frame() {
        let mut pacer = FramePacer::new(2);
        let mut gpu = MockGpu::new(2, 3);
        gpu.present_out_of_date = true;

        let err = pacer.run_frame(&mut gpu, &FrameInput::default()).unwrap_err();
        assert_eq!(err, FrameError::OutOfDate);
        assert_eq!(pacer.frame_count(), 1);
        assert_eq!(pacer.state(0), SlotState::Submitted);

        for _ in 0..4 {
            pacer.run_frame(&mut gpu, &FrameInput::default()).unwrap();
        }
        assert!(gpu.violations.is_empty(), "{:?}", gpu.violations);
    }

    #[test]
    fn uniforms_and_variant_reach_the_backend() {
        let mut pacer = FramePacer::new(2);
        let mut gpu = MockGpu::new(2, 2);
        let input = FrameInput {
            uniforms: PerFrameData::new(
                glam::Mat4::from_scale(glam::Vec3::splat(2.0)),
                glam::Mat4::IDENTITY,
            ),
            variant: PipelineVariant::Wireframe,
        };
        pacer.run_frame(&mut gpu, &input).unwrap();
        assert_eq!(gpu.written[0], Some(input.uniforms));
        assert_eq!(gpu.recorded[0].2, PipelineVariant::Wireframe);
    }
}
