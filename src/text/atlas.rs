//! The dynamic glyph atlas.
//!
//! A growable R8 image fed through a host-visible staging ring. Uploads
//! accumulate per frame and flush as one transition in, one multi-region
//! copy, one transition out: a single barrier pair per frame, whatever the
//! upload count.

use std::sync::Arc;

use ash::vk;
use smallvec::SmallVec;

use super::packer::{AtlasRect, Packer, Reserve};
use crate::error::{Error, Result};
use crate::gfx::GpuContext;
use crate::gfx::memory::{GpuBuffer, GpuImage, color_subresource_range};

/// Atlas configuration.
#[derive(Debug, Clone, Copy)]
pub struct AtlasCreateInfo {
	/// Initial square extent; power of two.
	pub initial_extent: u32,
	/// Growth cap; clamped to the device's 2D image limit.
	pub max_extent: u32,
	/// Border texels around every reservation, against bilinear bleed.
	pub padding: u32,
	/// Staging ring slice per in-flight frame.
	pub staging_bytes_per_frame: vk::DeviceSize,
}

impl Default for AtlasCreateInfo {
	fn default() -> Self {
		Self {
			initial_extent: 512,
			max_extent: 8192,
			padding: 1,
			staging_bytes_per_frame: 1024 * 1024,
		}
	}
}

/// Which queue the upload commands are recorded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
	Graphics,
	/// Dedicated transfer queue; the final transition becomes a
	/// queue-family release and the graphics path records the acquire.
	Transfer { queue_family: u32 },
}

/// One staged copy, waiting for the next flush.
struct PendingUpload {
	rect: AtlasRect,
	offset: vk::DeviceSize,
	bytes: u32,
}

/// What a flush recorded, for telemetry.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FlushInfo {
	pub regions: u32,
	pub bytes: u64,
}

/// Cursor bookkeeping for the staging buffer, one slice per in-flight
/// frame. A slice only rewinds when its frame begins again (the caller's
/// fence guarantees the GPU is done with it) or on an explicit release.
struct StagingRing {
	per_frame: vk::DeviceSize,
	cursors: Vec<vk::DeviceSize>,
	active: usize,
}

impl StagingRing {
	fn new(per_frame: vk::DeviceSize, slots: usize) -> Self {
		Self {
			per_frame,
			cursors: vec![0; slots],
			active: 0,
		}
	}

	fn begin_slot(&mut self, slot: usize) {
		self.active = slot;
		self.cursors[slot] = 0;
	}

	fn alloc(&mut self, bytes: vk::DeviceSize) -> Option<vk::DeviceSize> {
		let cursor = self.cursors[self.active];
		if cursor + bytes > self.per_frame {
			return None;
		}
		self.cursors[self.active] = cursor + bytes;
		Some(self.active as vk::DeviceSize * self.per_frame + cursor)
	}

	fn release_all(&mut self) {
		for cursor in &mut self.cursors {
			*cursor = 0;
		}
	}
}

/// The dynamic glyph atlas. Owns the image, its sampler, and the staging
/// ring; records its own transitions and copies into caller-supplied
/// command buffers.
pub struct GlyphAtlas {
	gpu: Arc<GpuContext>,
	image: GpuImage,
	sampler: vk::Sampler,
	layout: vk::ImageLayout,
	packer: Packer,
	padding: u32,
	staging: GpuBuffer,
	ring: StagingRing,
	pending: Vec<PendingUpload>,
	grew_this_frame: bool,
	generation: u64,
}

impl GlyphAtlas {
	pub(crate) fn new(
		gpu: Arc<GpuContext>,
		info: &AtlasCreateInfo,
		frames_in_flight: u32,
	) -> Result<Self> {
		let max_extent = info.max_extent.min(gpu.max_image_dimension_2d);
		let extent = info.initial_extent.min(max_extent);

		let image = GpuImage::new_sampled(&gpu, extent, extent, vk::Format::R8_UNORM)?;

		let sampler_info = vk::SamplerCreateInfo::builder()
			.mag_filter(vk::Filter::LINEAR)
			.min_filter(vk::Filter::LINEAR)
			.address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
			.address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
			.address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE);
		let sampler = match unsafe { gpu.device.create_sampler(&sampler_info, None) } {
			Ok(sampler) => sampler,
			Err(err) => {
				let mut image = image;
				unsafe { image.destroy(&gpu.device) };
				return Err(err.into());
			}
		};

		let staging_size = info.staging_bytes_per_frame * vk::DeviceSize::from(frames_in_flight);
		let staging = match GpuBuffer::new_host(
			&gpu,
			staging_size,
			vk::BufferUsageFlags::TRANSFER_SRC,
		) {
			Ok(staging) => staging,
			Err(err) => {
				let mut image = image;
				unsafe {
					gpu.device.destroy_sampler(sampler, None);
					image.destroy(&gpu.device);
				}
				return Err(err);
			}
		};

		Ok(Self {
			packer: Packer::new(extent, extent, max_extent),
			image,
			sampler,
			layout: vk::ImageLayout::UNDEFINED,
			padding: info.padding,
			staging,
			ring: StagingRing::new(info.staging_bytes_per_frame, frames_in_flight as usize),
			pending: Vec::new(),
			grew_this_frame: false,
			generation: 0,
			gpu,
		})
	}

	pub fn extent(&self) -> [u32; 2] {
		self.packer.extent()
	}

	/// `(view, sampler, extent)` for descriptor writes and UV math.
	pub fn view(&self) -> (vk::ImageView, vk::Sampler, [u32; 2]) {
		(self.image.view, self.sampler, self.packer.extent())
	}

	/// True once after a grow; clears on read.
	pub fn took_grow(&mut self) -> bool {
		std::mem::take(&mut self.grew_this_frame)
	}

	pub(crate) fn generation(&self) -> u64 {
		self.generation
	}

	pub fn pending_uploads(&self) -> usize {
		self.pending.len()
	}

	/// True when the image has never been initialized (fresh or regrown)
	/// and must be cleared before it is first sampled.
	pub(crate) fn needs_init(&self) -> bool {
		self.layout == vk::ImageLayout::UNDEFINED
	}

	/// Reserves a `w`x`h` region, growing the atlas as needed. The returned
	/// coordinates stay valid for the atlas's lifetime; after a grow the
	/// caller re-uploads every live rect it still needs.
	pub fn reserve_rect(&mut self, w: u32, h: u32) -> Result<AtlasRect> {
		if w == 0 || h == 0 {
			return Err(Error::Misconfigured("zero-sized atlas reservation"));
		}
		loop {
			match self.packer.reserve(w, h, self.padding)? {
				Reserve::Fit(rect) => return Ok(rect),
				Reserve::Grow { w: new_w, h: new_h } => self.grow(new_w, new_h)?,
			}
		}
	}

	/// Stages `bytes` (`rect.w * rect.h`, tightly packed R8 rows) for the
	/// next flush.
	pub fn upload(&mut self, rect: AtlasRect, bytes: &[u8]) -> Result<()> {
		if bytes.len() as u64 != rect.area() {
			return Err(Error::Misconfigured("upload length != rect area"));
		}
		let Some(offset) = self.ring.alloc(bytes.len() as vk::DeviceSize) else {
			return Err(Error::UploadTooLarge {
				bytes: bytes.len() as u64,
			});
		};
		unsafe {
			std::ptr::copy_nonoverlapping(
				bytes.as_ptr(),
				self.staging.ptr.add(offset as usize),
				bytes.len(),
			);
		}
		self.pending.push(PendingUpload {
			rect,
			offset,
			bytes: bytes.len() as u32,
		});
		Ok(())
	}

	/// Flushes all staged uploads into `cmd`: at most one layout transition
	/// in, one `CopyBufferToImage` with a region per upload, one transition
	/// out to `ShaderReadOnly`.
	pub fn record_uploads(&mut self, cmd: vk::CommandBuffer, queue: QueueKind) {
		if self.record_flush(cmd, queue, false).is_some() {
			self.commit_flush();
		}
	}

	/// Rotates the staging ring onto the new frame's slice.
	pub(crate) fn begin_frame_slot(&mut self, slot: usize) {
		self.ring.begin_slot(slot);
	}

	/// Marks every staging slice reusable. Only call once the GPU has
	/// consumed all previously flushed uploads.
	pub fn release_uploads(&mut self) {
		self.ring.release_all();
	}

	/// Records the flush without consuming state, so a failed transfer
	/// submit can fall back to the inline path. `force_init` initializes an
	/// untouched image even with nothing staged.
	pub(crate) fn record_flush(
		&self,
		cmd: vk::CommandBuffer,
		queue: QueueKind,
		force_init: bool,
	) -> Option<FlushInfo> {
		let init = self.needs_init();
		if self.pending.is_empty() && !(init && force_init) {
			return None;
		}

		let device = &self.gpu.device;
		let range = color_subresource_range();

		let transfer_stages = vk::PipelineStageFlags2::COPY | vk::PipelineStageFlags2::CLEAR;

		// One transition into TransferDst covers the clear and every copy.
		let to_transfer = vk::ImageMemoryBarrier2::builder()
			.src_stage_mask(match (queue, self.layout) {
				// Prior sampling only ever happened on the graphics queue.
				(QueueKind::Graphics, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => {
					vk::PipelineStageFlags2::FRAGMENT_SHADER
				}
				_ => vk::PipelineStageFlags2::NONE,
			})
			.src_access_mask(vk::AccessFlags2::NONE)
			.dst_stage_mask(transfer_stages)
			.dst_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
			.old_layout(self.layout)
			.new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
			.src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
			.dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
			.image(self.image.image)
			.subresource_range(range)
			.build();
		let dep = vk::DependencyInfo::builder()
			.image_memory_barriers(std::slice::from_ref(&to_transfer));
		unsafe { device.cmd_pipeline_barrier2(cmd, &dep) };

		if init {
			// Zero the whole image so padding texels sample as transparent.
			let black = vk::ClearColorValue { float32: [0.0; 4] };
			unsafe {
				device.cmd_clear_color_image(
					cmd,
					self.image.image,
					vk::ImageLayout::TRANSFER_DST_OPTIMAL,
					&black,
					std::slice::from_ref(&range),
				);
			}
		}

		let mut bytes: u64 = 0;
		if !self.pending.is_empty() {
			let regions: SmallVec<[vk::BufferImageCopy; 16]> = self
				.pending
				.iter()
				.map(|p| {
					bytes += u64::from(p.bytes);
					vk::BufferImageCopy {
						buffer_offset: p.offset,
						buffer_row_length: 0,
						buffer_image_height: 0,
						image_subresource: vk::ImageSubresourceLayers {
							aspect_mask: vk::ImageAspectFlags::COLOR,
							mip_level: 0,
							base_array_layer: 0,
							layer_count: 1,
						},
						image_offset: vk::Offset3D {
							x: p.rect.x as i32,
							y: p.rect.y as i32,
							z: 0,
						},
						image_extent: vk::Extent3D {
							width: p.rect.w,
							height: p.rect.h,
							depth: 1,
						},
					}
				})
				.collect();
			unsafe {
				device.cmd_copy_buffer_to_image(
					cmd,
					self.staging.buffer,
					self.image.image,
					vk::ImageLayout::TRANSFER_DST_OPTIMAL,
					&regions,
				);
			}
		}

		// One transition out; a cross-family transfer queue turns it into
		// the release half of the ownership handoff.
		let mut to_sampled = vk::ImageMemoryBarrier2::builder()
			.src_stage_mask(transfer_stages)
			.src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
			.dst_stage_mask(vk::PipelineStageFlags2::FRAGMENT_SHADER)
			.dst_access_mask(vk::AccessFlags2::SHADER_SAMPLED_READ)
			.old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
			.new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
			.src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
			.dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
			.image(self.image.image)
			.subresource_range(range);
		if let QueueKind::Transfer { queue_family } = queue {
			if queue_family != self.gpu.graphics_queue_family {
				to_sampled = to_sampled
					.src_queue_family_index(queue_family)
					.dst_queue_family_index(self.gpu.graphics_queue_family)
					.dst_stage_mask(vk::PipelineStageFlags2::NONE)
					.dst_access_mask(vk::AccessFlags2::NONE);
			}
		}
		let to_sampled = to_sampled.build();
		let dep = vk::DependencyInfo::builder()
			.image_memory_barriers(std::slice::from_ref(&to_sampled));
		unsafe { device.cmd_pipeline_barrier2(cmd, &dep) };

		Some(FlushInfo {
			regions: self.pending.len() as u32,
			bytes,
		})
	}

	/// Applies the state transition a successful flush implies.
	pub(crate) fn commit_flush(&mut self) {
		self.layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
		self.pending.clear();
	}

	/// Acquire half of the queue-family handoff, recorded at the head of
	/// the graphics command buffer. Only needed across families.
	pub(crate) fn record_acquire(&self, cmd: vk::CommandBuffer, transfer_family: u32) {
		let barrier = vk::ImageMemoryBarrier2::builder()
			.src_stage_mask(vk::PipelineStageFlags2::NONE)
			.src_access_mask(vk::AccessFlags2::NONE)
			.dst_stage_mask(vk::PipelineStageFlags2::FRAGMENT_SHADER)
			.dst_access_mask(vk::AccessFlags2::SHADER_SAMPLED_READ)
			.old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
			.new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
			.src_queue_family_index(transfer_family)
			.dst_queue_family_index(self.gpu.graphics_queue_family)
			.image(self.image.image)
			.subresource_range(color_subresource_range())
			.build();
		let dep =
			vk::DependencyInfo::builder().image_memory_barriers(std::slice::from_ref(&barrier));
		unsafe { self.gpu.device.cmd_pipeline_barrier2(cmd, &dep) };
	}

	/// Swaps in a larger image. The old image may still be referenced by
	/// in-flight frames, so this waits for the device before destroying it;
	/// grows are rare enough that the stall is acceptable.
	fn grow(&mut self, new_w: u32, new_h: u32) -> Result<()> {
		let [old_w, old_h] = self.packer.extent();
		log::info!("glyph atlas grow {old_w}x{old_h} -> {new_w}x{new_h}");

		unsafe { self.gpu.device.device_wait_idle() }?;

		let new_image = GpuImage::new_sampled(&self.gpu, new_w, new_h, self.image.format)?;
		unsafe { self.image.destroy(&self.gpu.device) };
		self.image = new_image;
		self.layout = vk::ImageLayout::UNDEFINED;

		self.packer.grow(new_w, new_h);
		self.grew_this_frame = true;
		self.generation += 1;
		// Staged-but-unflushed uploads still target valid coordinates and
		// will land in the new image; everything already uploaded is gone
		// until the caller re-uploads it.
		Ok(())
	}
}

impl Drop for GlyphAtlas {
	fn drop(&mut self) {
		unsafe {
			self.gpu.device.destroy_sampler(self.sampler, None);
			self.image.destroy(&self.gpu.device);
			self.staging.destroy(&self.gpu.device);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn staging_slices_are_partitioned_by_slot() {
		let mut ring = StagingRing::new(1024, 3);
		ring.begin_slot(0);
		assert_eq!(ring.alloc(100), Some(0));
		assert_eq!(ring.alloc(100), Some(100));
		ring.begin_slot(2);
		assert_eq!(ring.alloc(64), Some(2048));
	}

	#[test]
	fn slice_overflow_is_refused() {
		let mut ring = StagingRing::new(256, 2);
		ring.begin_slot(1);
		assert_eq!(ring.alloc(200), Some(256));
		assert_eq!(ring.alloc(57), None);
		// An exact fit still lands.
		assert_eq!(ring.alloc(56), Some(456));
		assert_eq!(ring.alloc(1), None);
	}

	#[test]
	fn reentering_a_slot_rewinds_its_cursor() {
		let mut ring = StagingRing::new(512, 2);
		ring.begin_slot(0);
		assert_eq!(ring.alloc(512), Some(0));
		assert_eq!(ring.alloc(1), None);
		ring.begin_slot(1);
		ring.begin_slot(0);
		assert_eq!(ring.alloc(512), Some(0));
	}

	#[test]
	fn release_rewinds_every_slice() {
		let mut ring = StagingRing::new(128, 2);
		ring.begin_slot(0);
		assert_eq!(ring.alloc(128), Some(0));
		ring.begin_slot(1);
		assert_eq!(ring.alloc(128), Some(128));
		ring.release_all();
		assert_eq!(ring.alloc(128), Some(128));
	}
}
