// SPDX-License-Identifier: CEPL-1.0
//! Render loop driver: camera simulation, pipeline variant selection and the
//! error policy around [`Renderer::render`].

use std::time::Instant;

use anyhow::{Context, Result};
use lumen_core::{FpsCounter, FrameClock, FrameLimiter};
use lumen_math::{FlyCamera, Smoothing};
use lumen_platform::InputState;
use lumen_render::{FrameInput, FrameReport, PerFrameData, PipelineVariant, RenderSize, Renderer};
use tracing::{debug, info};

pub struct LoopDriver<R: Renderer> {
    renderer: R,
    camera: FlyCamera,
    smoothing: Smoothing,
    input: InputState,
    variant: PipelineVariant,

    clock: FrameClock,
    limiter: FrameLimiter,
    fps: FpsCounter,

    window_size: RenderSize,
    paused: bool,
    needs_rebuild: bool,
}

impl<R: Renderer> LoopDriver<R> {
    pub fn new(renderer: R, window_size: RenderSize, target_fps: u32) -> Self {
        Self {
            renderer,
            camera: FlyCamera::default(),
            smoothing: Smoothing::default(),
            input: InputState::default(),
            variant: PipelineVariant::Solid,
            clock: FrameClock::new(),
            limiter: FrameLimiter::new(target_fps),
            fps: FpsCounter::new(),
            window_size,
            paused: window_size.is_zero(),
            needs_rebuild: false,
        }
    }

    pub fn input_mut(&mut self) -> &mut InputState {
        &mut self.input
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// A zero-sized window pauses the loop; any other size schedules a
    /// swapchain rebuild before the next frame.
    pub fn resized(&mut self, size: RenderSize) {
        let was_paused = self.paused;
        self.window_size = size;
        self.paused = size.is_zero();
        if self.paused != was_paused {
            info!("{}x{} -> paused={}", size.width, size.height, self.paused);
        }
        if !self.paused {
            self.needs_rebuild = true;
            if was_paused {
                // Do not feed the pause into the camera as one huge step.
                self.clock.reset();
            }
        }
    }

    /// Advances the camera by `dt` seconds and latches the pipeline variant.
    pub fn simulate(&mut self, dt: f32) {
        self.camera.apply_movement(self.input.movement(), dt);
        self.camera.smooth(self.smoothing.alpha(dt));

        match self.input.wireframe_request() {
            Some(true) => self.variant = PipelineVariant::Wireframe,
            Some(false) => self.variant = PipelineVariant::Solid,
            None => {}
        }
    }

    fn frame_input(&self) -> FrameInput {
        let aspect = self.renderer.extent().aspect();
        FrameInput {
            uniforms: PerFrameData::new(self.camera.view(), self.camera.projection(aspect)),
            variant: self.variant,
        }
    }

    /// One loop iteration. Returns the report of the frame that was
    /// submitted, or `None` when nothing was drawn (paused or out of date).
    /// Only unrecoverable render errors come back as `Err`.
    pub fn tick(&mut self) -> Result<Option<FrameReport>> {
        let frame_start = Instant::now();
        let dt = self.clock.tick();
        if self.paused {
            return Ok(None);
        }

        if self.needs_rebuild {
            self.renderer
                .resize(self.window_size)
                .context("rebuilding swapchain")?;
            self.needs_rebuild = false;
        }

        self.simulate(dt);
        let input = self.frame_input();

        match self.renderer.render(&input) {
            Ok(report) => {
                if report.suboptimal {
                    debug!("frame {} suboptimal, rebuilding", report.frame);
                    self.needs_rebuild = true;
                }
                if let Some(fps) = self.fps.frame() {
                    debug!("fps ~ {fps}");
                }
                self.limiter.throttle(frame_start);
                Ok(Some(report))
            }
            Err(e) if e.is_recoverable() => {
                debug!("{e}, rebuilding before the next frame");
                self.needs_rebuild = true;
                Ok(None)
            }
            Err(e) => Err(e).context("render loop stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_platform::winit::keyboard::KeyCode;
    use lumen_platform::winit::raw_window_handle::{HasDisplayHandle, HasWindowHandle};
    use lumen_render::{FrameError, SceneDesc};
    use std::collections::VecDeque;

    #[derive(Default)]
    struct MockRenderer {
        extent: Option<RenderSize>,
        script: VecDeque<Result<FrameReport, FrameError>>,
        resizes: Vec<RenderSize>,
        inputs: Vec<FrameInput>,
        frame: u64,
    }

    impl MockRenderer {
        fn with_script(script: Vec<Result<FrameReport, FrameError>>) -> Self {
            Self {
                script: script.into(),
                ..Default::default()
            }
        }
    }

    impl Renderer for MockRenderer {
        fn new(
            _window: &dyn HasWindowHandle,
            _display: &dyn HasDisplayHandle,
            size: RenderSize,
            _scene: &SceneDesc,
        ) -> Result<Self> {
            Ok(Self {
                extent: Some(size),
                ..Default::default()
            })
        }

        fn resize(&mut self, size: RenderSize) -> Result<()> {
            self.resizes.push(size);
            self.extent = Some(size);
            Ok(())
        }

        fn render(&mut self, frame: &FrameInput) -> Result<FrameReport, FrameError> {
            self.inputs.push(*frame);
            let result = self.script.pop_front().unwrap_or_else(|| {
                Ok(FrameReport {
                    frame: self.frame,
                    slot: 0,
                    image: 0,
                    suboptimal: false,
                })
            });
            if result.is_ok() {
                self.frame += 1;
            }
            result
        }

        fn extent(&self) -> RenderSize {
            self.extent.unwrap_or(SIZE)
        }
    }

    const SIZE: RenderSize = RenderSize {
        width: 640,
        height: 480,
    };

    fn driver(script: Vec<Result<FrameReport, FrameError>>) -> LoopDriver<MockRenderer> {
        LoopDriver::new(MockRenderer::with_script(script), SIZE, 0)
    }

    fn report(suboptimal: bool) -> FrameReport {
        FrameReport {
            frame: 0,
            slot: 0,
            image: 0,
            suboptimal,
        }
    }

    #[test]
    fn out_of_date_rebuilds_before_next_frame() {
        let mut d = driver(vec![Err(FrameError::OutOfDate)]);
        assert!(d.tick().unwrap().is_none());
        assert!(d.renderer.resizes.is_empty());

        assert!(d.tick().unwrap().is_some());
        assert_eq!(d.renderer.resizes, vec![SIZE]);
    }

    #[test]
    fn suboptimal_frame_counts_and_schedules_rebuild() {
        let mut d = driver(vec![Ok(report(true))]);
        assert!(d.tick().unwrap().is_some());
        assert!(d.renderer.resizes.is_empty());
        d.tick().unwrap();
        assert_eq!(d.renderer.resizes.len(), 1);
    }

    #[test]
    fn other_errors_end_the_loop() {
        for fatal in [
            FrameError::DeviceLost,
            FrameError::SurfaceLost,
            FrameError::SyncViolation { slot: 1, op: "reset" },
        ] {
            let mut d = driver(vec![Err(fatal.clone())]);
            let err = d.tick().unwrap_err();
            assert_eq!(err.downcast_ref::<FrameError>(), Some(&fatal));
        }
    }

    #[test]
    fn zero_size_pauses_until_resized() {
        let mut d = driver(vec![]);
        d.resized(RenderSize { width: 0, height: 0 });
        assert!(d.is_paused());
        assert!(d.tick().unwrap().is_none());
        assert!(d.renderer.inputs.is_empty());

        let restored = RenderSize {
            width: 800,
            height: 600,
        };
        d.resized(restored);
        assert!(!d.is_paused());
        assert!(d.tick().unwrap().is_some());
        assert_eq!(d.renderer.resizes, vec![restored]);
    }

    #[test]
    fn starting_minimized_is_paused() {
        let d = LoopDriver::new(MockRenderer::default(), RenderSize { width: 0, height: 0 }, 0);
        assert!(d.is_paused());
    }

    #[test]
    fn q_and_e_latch_the_variant() {
        let mut d = driver(vec![]);
        d.input_mut().set_key(KeyCode::KeyQ, true);
        d.tick().unwrap();
        assert_eq!(d.renderer.inputs[0].variant, PipelineVariant::Wireframe);

        d.input_mut().set_key(KeyCode::KeyQ, false);
        d.tick().unwrap();
        assert_eq!(d.renderer.inputs[1].variant, PipelineVariant::Wireframe);

        d.input_mut().set_key(KeyCode::KeyE, true);
        d.tick().unwrap();
        assert_eq!(d.renderer.inputs[2].variant, PipelineVariant::Solid);
    }

    #[test]
    fn forward_moves_the_target_by_speed_times_dt() {
        let mut d = driver(vec![]);
        d.input_mut().set_key(KeyCode::KeyW, true);
        d.simulate(0.5);
        let target = d.camera.target();
        assert!((target.z - (-100.0 + 0.5 * lumen_math::camera::MOVE_SPEED)).abs() < 1e-3);
        // Position lags behind the target.
        assert!(d.camera.position().z < target.z);
    }

    #[test]
    fn projection_uses_the_swapchain_aspect() {
        let mut d = LoopDriver::new(
            MockRenderer {
                extent: Some(RenderSize {
                    width: 800,
                    height: 400,
                }),
                ..Default::default()
            },
            SIZE,
            0,
        );
        d.tick().unwrap();
        let p = d.renderer.inputs[0].uniforms.projection;
        // Y is flipped, so the Y scale is negative.
        assert!(p[1][1] < 0.0);
        assert!((-p[1][1] / p[0][0] - 2.0).abs() < 1e-4);
    }
}
