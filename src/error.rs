use ash::vk;

use crate::text::frame::FrameState;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error surface of the renderer.
///
/// `FrameFull`, `AtlasFull` and `UploadTooLarge` are recoverable: the frame
/// stays in `Recording` and the caller may retry after flushing work or
/// growing capacity. `DeviceLost` is fatal; every bank folds back to `Idle`
/// and the renderer must be re-created.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("misconfigured: {0}")]
	Misconfigured(&'static str),

	#[error("out of host or device memory")]
	OutOfMemory,

	#[error("atlas cannot fit a {w}x{h} rect even at max extent")]
	AtlasFull { w: u32, h: u32 },

	#[error("instance buffer full ({capacity} instances)")]
	FrameFull { capacity: u32 },

	#[error("staging ring cannot hold {bytes} more bytes this frame")]
	UploadTooLarge { bytes: u64 },

	#[error("{op} is not valid in frame state {state:?}")]
	InvalidFrameState { op: &'static str, state: FrameState },

	#[error("frame slot {slot} out of range ({frames} frames in flight)")]
	SlotOutOfRange { slot: usize, frames: usize },

	#[error("device lost")]
	DeviceLost,

	#[error("vulkan: {0}")]
	Vulkan(vk::Result),
}

impl From<vk::Result> for Error {
	fn from(res: vk::Result) -> Self {
		match res {
			vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
				Self::OutOfMemory
			}
			vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
			other => Self::Vulkan(other),
		}
	}
}
