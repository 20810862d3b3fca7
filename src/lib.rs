#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(
	clippy::cast_precision_loss,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_sign_loss,
	clippy::missing_errors_doc,
	clippy::missing_panics_doc,
	clippy::module_name_repetitions,
	clippy::must_use_candidate,
	clippy::float_cmp
)]

//! Vulkan 1.3 text rendering core: a growable glyph atlas with staged
//! uploads plus an instanced quad renderer with per-frame state banks,
//! adaptive draw batching, and an optional transfer-queue upload path.
//!
//! The caller owns instance/device bring-up, the swapchain, rasterization,
//! and shader compilation; this crate owns everything between an R8 glyph
//! bitmap and the instanced draws that sample it.

pub mod error;
pub mod gfx;
pub mod text;

pub use error::{Error, Result};
pub use gfx::GpuContext;
pub use text::{
	AtlasCreateInfo, AtlasRect, BatchConfig, EncodeTarget, FrameState, FrameStats, FrameSyncInfo,
	GlyphAtlas, ProfileSink, ProfileSummary, ProfilerConfig, QueueKind, TextQuad, TextRenderer,
	TextRendererCreateInfo, TransferQueueInfo,
};
