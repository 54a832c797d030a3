pub mod buf;
pub mod checksum;
mod seq32;
pub mod timer;

pub use buf::*;
pub use checksum::{checksum, Checksum};
pub use seq32::*;
pub use timer::{TimerHandle, TimerScheduler};
