// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
pub mod blob;
pub mod consts;
pub mod timing;

pub use blob::{read_blob, BlobError};
pub use timing::{FpsCounter, FrameClock, FrameLimiter};

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .try_init();
}
