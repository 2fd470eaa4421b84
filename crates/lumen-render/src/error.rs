// SPDX-License-Identifier: CEPL-1.0
use thiserror::Error;

/// Failure of one step of the per-frame protocol.
///
/// Only [`FrameError::OutOfDate`] is recoverable: the caller rebuilds the
/// swapchain and tries again. Everything else ends the render loop.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("swapchain out of date")]
    OutOfDate,
    #[error("presentation surface lost")]
    SurfaceLost,
    #[error("graphics device lost")]
    DeviceLost,
    #[error("out of memory in {call}")]
    OutOfMemory { call: &'static str },
    #[error("frame slot {slot}: {op} would touch work still in flight")]
    SyncViolation { slot: usize, op: &'static str },
    #[error("{call} failed with code {code}")]
    Api { call: &'static str, code: i32 },
}

impl FrameError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FrameError::OutOfDate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_out_of_date_recovers() {
        assert!(FrameError::OutOfDate.is_recoverable());
        for fatal in [
            FrameError::SurfaceLost,
            FrameError::DeviceLost,
            FrameError::OutOfMemory { call: "queue_submit" },
            FrameError::SyncViolation { slot: 0, op: "submit" },
            FrameError::Api { call: "vkQueuePresentKHR", code: -3 },
        ] {
            assert!(!fatal.is_recoverable(), "{fatal}");
        }
    }

    #[test]
    fn messages_name_the_failing_call() {
        let e = FrameError::Api { call: "acquire_next_image", code: -4 };
        assert_eq!(e.to_string(), "acquire_next_image failed with code -4");
    }
}
