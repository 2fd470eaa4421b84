// SPDX-License-Identifier: CEPL-1.0
use ash::{prelude::VkResult, vk};
use lumen_render::FrameError;

/// Maps a failed Vulkan call onto the frame error taxonomy.
pub(crate) fn classify(call: &'static str, err: vk::Result) -> FrameError {
    match err {
        vk::Result::ERROR_OUT_OF_DATE_KHR => FrameError::OutOfDate,
        vk::Result::ERROR_SURFACE_LOST_KHR => FrameError::SurfaceLost,
        vk::Result::ERROR_DEVICE_LOST => FrameError::DeviceLost,
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            FrameError::OutOfMemory { call }
        }
        other => FrameError::Api {
            call,
            code: other.as_raw(),
        },
    }
}

pub(crate) trait FrameResultExt<T> {
    fn frame_err(self, call: &'static str) -> Result<T, FrameError>;
}

impl<T> FrameResultExt<T> for VkResult<T> {
    fn frame_err(self, call: &'static str) -> Result<T, FrameError> {
        self.map_err(|e| classify(call, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_date_is_recoverable() {
        let e = classify("acquire_next_image", vk::Result::ERROR_OUT_OF_DATE_KHR);
        assert_eq!(e, FrameError::OutOfDate);
        assert!(e.is_recoverable());
    }

    #[test]
    fn fatal_kinds_are_distinguished() {
        assert_eq!(
            classify("queue_present", vk::Result::ERROR_SURFACE_LOST_KHR),
            FrameError::SurfaceLost
        );
        assert_eq!(
            classify("queue_submit", vk::Result::ERROR_DEVICE_LOST),
            FrameError::DeviceLost
        );
        assert_eq!(
            classify("queue_submit", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            FrameError::OutOfMemory { call: "queue_submit" }
        );
    }

    #[test]
    fn everything_else_keeps_the_raw_code() {
        let e = classify("wait_for_fences", vk::Result::TIMEOUT);
        assert_eq!(
            e,
            FrameError::Api {
                call: "wait_for_fences",
                code: vk::Result::TIMEOUT.as_raw()
            }
        );
    }

    #[test]
    fn ext_trait_maps_errors_and_passes_values() {
        let ok: VkResult<u32> = Ok(7);
        assert_eq!(ok.frame_err("x"), Ok(7));
        let bad: VkResult<u32> = Err(vk::Result::ERROR_DEVICE_LOST);
        assert_eq!(bad.frame_err("x"), Err(FrameError::DeviceLost));
    }
}
