pub mod atlas;
pub mod autotune;
pub mod frame;
pub mod packer;
pub mod profiler;
pub mod renderer;

pub use atlas::{AtlasCreateInfo, GlyphAtlas, QueueKind};
pub use autotune::BatchConfig;
pub use frame::{FrameState, FrameStats, FrameSyncInfo, TextQuad};
pub use packer::AtlasRect;
pub use profiler::{LogSink, ProfileSink, ProfileSummary, ProfilerConfig};
pub use renderer::{
	EncodeTarget, StatsCallback, TextRenderer, TextRendererCreateInfo, TransferQueueInfo,
};
