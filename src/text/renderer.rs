//! The per-frame text renderer.
//!
//! Owns the graphics pipeline, the glyph atlas, the frame ring, the batch
//! autotuner, and the profiler. The caller drives it from one thread:
//! `begin_frame` -> atlas work + `queue_quad*` -> `encode` -> `end_frame`,
//! then chains `frame_sync_info` into its graphics submit whenever the
//! transfer queue carried atlas uploads.

use std::sync::Arc;
use std::time::Instant;

use ash::vk;
use glam::Mat4;

use super::atlas::{AtlasCreateInfo, FlushInfo, GlyphAtlas, QueueKind};
use super::autotune::{BatchAutotuner, BatchConfig, batch_ranges};
use super::frame::{FrameBank, FrameRing, FrameState, FrameStats, FrameSyncInfo, TextQuad};
use super::profiler::{Profiler, ProfilerConfig};
use crate::error::{Error, Result};
use crate::gfx::GpuContext;

/// Vertex binding carrying the per-instance quad stream.
const INSTANCE_BINDING: u32 = 1;

/// Push-constant range: one column-major mat4.
const PROJECTION_BYTES: u32 = 64;

pub type StatsCallback = Box<dyn FnMut(&FrameStats)>;

/// Dedicated transfer queue configuration.
pub struct TransferQueueInfo {
	pub queue: vk::Queue,
	pub queue_family: u32,
	/// Pool on `queue_family`; must allow per-buffer reset
	/// (`RESET_COMMAND_BUFFER`).
	pub command_pool: vk::CommandPool,
	/// The timeline starts here; the first frame signals `value + 1`.
	pub initial_timeline_value: u64,
}

pub struct TextRendererCreateInfo<'a> {
	pub surface_format: vk::Format,
	/// Initial viewport; update with [`TextRenderer::set_extent`] on resize.
	pub extent: vk::Extent2D,
	pub frames_in_flight: u32,
	/// Instance-buffer capacity per frame bank.
	pub max_instances: u32,
	/// SPIR-V blobs; must be 4-byte aligned.
	pub vert_spirv: &'a [u8],
	pub frag_spirv: &'a [u8],
	pub atlas: AtlasCreateInfo,
	pub batch: BatchConfig,
	pub transfer: Option<TransferQueueInfo>,
	pub profiler: Option<ProfilerConfig>,
	pub stats_callback: Option<StatsCallback>,
}

/// Where `encode` renders: the caller's color attachment for this frame.
pub struct EncodeTarget {
	pub color_view: vk::ImageView,
	/// `Some` clears the attachment to this color first; `None` loads it.
	pub clear: Option<[f32; 4]>,
}

struct TextPipeline {
	set_layout: vk::DescriptorSetLayout,
	layout: vk::PipelineLayout,
	pipeline: vk::Pipeline,
}

struct TransferCtx {
	queue: vk::Queue,
	queue_family: u32,
	command_pool: vk::CommandPool,
	semaphore: vk::Semaphore,
	next_value: u64,
}

pub struct TextRenderer {
	gpu: Arc<GpuContext>,
	pipeline: TextPipeline,
	atlas: GlyphAtlas,
	ring: FrameRing,
	autotuner: BatchAutotuner,
	profiler: Option<Profiler>,
	stats_callback: Option<StatsCallback>,
	transfer: Option<TransferCtx>,
	descriptor_pool: vk::DescriptorPool,
	extent: vk::Extent2D,
}

impl TextRenderer {
	pub fn new(gpu: Arc<GpuContext>, info: TextRendererCreateInfo) -> Result<Self> {
		validate(&info)?;
		let device = gpu.device.clone();

		let pipeline = TextPipeline::new(&device, &info)?;

		let atlas = GlyphAtlas::new(gpu.clone(), &info.atlas, info.frames_in_flight)?;

		let frames = info.frames_in_flight;
		let pool_size = vk::DescriptorPoolSize {
			ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
			descriptor_count: frames,
		};
		let pool_info = vk::DescriptorPoolCreateInfo::builder()
			.max_sets(frames)
			.pool_sizes(std::slice::from_ref(&pool_size));
		let descriptor_pool = unsafe { device.create_descriptor_pool(&pool_info, None) }?;

		let set_layouts = vec![pipeline.set_layout; frames as usize];
		let set_info = vk::DescriptorSetAllocateInfo::builder()
			.descriptor_pool(descriptor_pool)
			.set_layouts(&set_layouts);
		let descriptor_sets = unsafe { device.allocate_descriptor_sets(&set_info) }?;

		let transfer = match &info.transfer {
			Some(tx) => Some(TransferCtx::new(&device, tx)?),
			None => None,
		};
		let transfer_cmds = match &transfer {
			Some(tx) => {
				let alloc = vk::CommandBufferAllocateInfo::builder()
					.command_pool(tx.command_pool)
					.level(vk::CommandBufferLevel::PRIMARY)
					.command_buffer_count(frames);
				unsafe { device.allocate_command_buffers(&alloc) }?
			}
			None => vec![vk::CommandBuffer::null(); frames as usize],
		};

		let (view, sampler, _) = atlas.view();
		let mut banks = Vec::with_capacity(frames as usize);
		for slot in 0..frames as usize {
			let bank = FrameBank::new(
				&gpu,
				info.max_instances,
				descriptor_sets[slot],
				transfer_cmds[slot],
			)?;
			write_atlas_descriptor(&device, bank.descriptor_set, view, sampler);
			banks.push(bank);
		}

		Ok(Self {
			autotuner: BatchAutotuner::new(&info.batch, info.max_instances),
			profiler: info.profiler.map(Profiler::new),
			stats_callback: info.stats_callback,
			ring: FrameRing::new(banks),
			atlas,
			pipeline,
			transfer,
			descriptor_pool,
			extent: info.extent,
			gpu,
		})
	}

	pub fn glyph_atlas(&mut self) -> &mut GlyphAtlas {
		&mut self.atlas
	}

	/// Current per-draw instance limit, as tuned.
	pub fn batch_limit(&self) -> u32 {
		self.autotuner.limit()
	}

	/// Smoothed glyphs-per-draw ratio over recent frames.
	pub fn glyphs_per_draw(&self) -> f32 {
		self.autotuner.glyphs_per_draw()
	}

	/// Viewport for subsequent frames; call on swapchain recreate.
	pub fn set_extent(&mut self, extent: vk::Extent2D) {
		self.extent = extent;
	}

	pub fn begin_frame(&mut self, slot: usize) -> Result<()> {
		self.ring.begin(slot)?;
		self.atlas.begin_frame_slot(slot);
		Ok(())
	}

	pub fn set_projection(&mut self, projection: Mat4) -> Result<()> {
		self.ring.recording("set_projection")?.projection = projection;
		Ok(())
	}

	pub fn queue_quad(&mut self, quad: &TextQuad) -> Result<()> {
		self.ring.recording("queue_quad")?.writer.push(quad)
	}

	/// Bulk append; all-or-nothing on overflow.
	pub fn queue_quads(&mut self, quads: &[TextQuad]) -> Result<()> {
		self.ring.recording("queue_quads")?.writer.extend(quads)
	}

	/// Records this frame into `cmd`: atlas flush (inline or via the
	/// transfer queue), descriptor refresh, then the instanced draws inside
	/// a dynamic-rendering scope against `target`. CPU-only except for the
	/// non-blocking transfer submit. `cmd` must be in the recording state
	/// and outside any render pass.
	pub fn encode(&mut self, cmd: vk::CommandBuffer, target: &EncodeTarget) -> Result<()> {
		let t0 = Instant::now();
		let slot = self.ring.recording_slot("encode")?;
		let instance_count = self.ring.bank(slot)?.writer.count();

		// A fresh or regrown image must be initialized before any draw can
		// legally sample it, even with nothing staged this frame.
		let force_init = self.atlas.needs_init() && instance_count > 0;
		let has_atlas_work = self.atlas.pending_uploads() > 0 || force_init;

		let mut flush: Option<FlushInfo> = None;
		let mut sync: Option<FrameSyncInfo> = None;
		let mut transfer_ns = 0u64;
		let mut submit_ns = 0u64;

		if has_atlas_work {
			let mut inline = true;
			if let Some(tx) = &mut self.transfer {
				let tt0 = Instant::now();
				let tx_cmd = self.ring.bank(slot)?.transfer_cmd;
				match submit_transfer(&self.gpu, tx, &mut self.atlas, tx_cmd, force_init) {
					Ok((info, sync_info, sns)) => {
						if tx.queue_family != self.gpu.graphics_queue_family {
							self.atlas.record_acquire(cmd, tx.queue_family);
						}
						flush = Some(info);
						sync = Some(sync_info);
						submit_ns = sns;
						inline = false;
					}
					Err(Error::DeviceLost) => {
						self.ring.reset_all();
						return Err(Error::DeviceLost);
					}
					Err(err) => {
						log::warn!("transfer-queue upload failed, using inline path: {err}");
					}
				}
				transfer_ns = tt0.elapsed().as_nanos() as u64;
			}
			if inline {
				flush = self.atlas.record_flush(cmd, QueueKind::Graphics, force_init);
				if flush.is_some() {
					self.atlas.commit_flush();
				}
			}
		}

		// Refresh the bank's descriptor set if the atlas was regrown since
		// this bank last encoded.
		let generation = self.atlas.generation();
		let (view, sampler, _) = self.atlas.view();
		let bank = &mut self.ring.banks_mut()[slot];
		if bank.atlas_generation != generation {
			write_atlas_descriptor(&self.gpu.device, bank.descriptor_set, view, sampler);
			bank.atlas_generation = generation;
		}

		let limit = self.autotuner.limit();
		let mut draws = 0u32;

		let device = &self.gpu.device;
		let color_attachment = vk::RenderingAttachmentInfo::builder()
			.image_view(target.color_view)
			.image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
			.load_op(if target.clear.is_some() {
				vk::AttachmentLoadOp::CLEAR
			} else {
				vk::AttachmentLoadOp::LOAD
			})
			.store_op(vk::AttachmentStoreOp::STORE)
			.clear_value(vk::ClearValue {
				color: vk::ClearColorValue {
					float32: target.clear.unwrap_or_default(),
				},
			})
			.build();
		let area = vk::Rect2D {
			offset: vk::Offset2D { x: 0, y: 0 },
			extent: self.extent,
		};
		let rendering = vk::RenderingInfo::builder()
			.render_area(area)
			.layer_count(1)
			.color_attachments(std::slice::from_ref(&color_attachment));

		unsafe {
			device.cmd_begin_rendering(cmd, &rendering);
			device.cmd_bind_pipeline(
				cmd,
				vk::PipelineBindPoint::GRAPHICS,
				self.pipeline.pipeline,
			);
			device.cmd_bind_descriptor_sets(
				cmd,
				vk::PipelineBindPoint::GRAPHICS,
				self.pipeline.layout,
				0,
				std::slice::from_ref(&bank.descriptor_set),
				&[],
			);
			device.cmd_bind_vertex_buffers(
				cmd,
				INSTANCE_BINDING,
				std::slice::from_ref(&bank.instances.buffer),
				&[0],
			);
			let viewport = vk::Viewport {
				x: 0.0,
				y: 0.0,
				width: self.extent.width as f32,
				height: self.extent.height as f32,
				min_depth: 0.0,
				max_depth: 1.0,
			};
			device.cmd_set_viewport(cmd, 0, std::slice::from_ref(&viewport));
			device.cmd_set_scissor(cmd, 0, std::slice::from_ref(&area));

			let projection = bank.projection.to_cols_array();
			let bytes = std::slice::from_raw_parts(
				projection.as_ptr().cast::<u8>(),
				PROJECTION_BYTES as usize,
			);
			device.cmd_push_constants(
				cmd,
				self.pipeline.layout,
				vk::ShaderStageFlags::VERTEX,
				0,
				bytes,
			);

			for (first, count) in batch_ranges(instance_count, limit) {
				device.cmd_draw(cmd, 4, count, 0, first);
				draws += 1;
			}
			device.cmd_end_rendering(cmd);
		}

		bank.stats = FrameStats {
			glyphs: instance_count,
			draws,
			atlas_uploads: flush.map_or(0, |f| f.regions),
			upload_bytes: flush.map_or(0, |f| f.bytes),
			encode_cpu_ns: t0.elapsed().as_nanos() as u64,
			transfer_cpu_ns: transfer_ns,
			submit_cpu_ns: submit_ns,
			used_transfer_queue: sync.is_some(),
			batch_limit_used: limit,
		};
		bank.sync = sync;
		bank.state = FrameState::Encoded;
		Ok(())
	}

	/// Finalizes telemetry and feeds the autotuner and profiler.
	pub fn end_frame(&mut self) -> Result<()> {
		let slot = self.ring.finish()?;
		let stats = self.ring.bank(slot)?.stats;
		self.autotuner
			.end_frame(stats.encode_cpu_ns, stats.glyphs, stats.draws);
		if let Some(profiler) = &mut self.profiler {
			profiler.record(&stats);
		}
		if let Some(callback) = &mut self.stats_callback {
			callback(&stats);
		}
		Ok(())
	}

	pub fn frame_stats(&self, slot: usize) -> Result<FrameStats> {
		Ok(self.ring.bank(slot)?.stats)
	}

	/// Timeline wait for the caller's graphics submit; `Some` exactly when
	/// this slot's atlas work went through the transfer queue.
	pub fn frame_sync_info(&self, slot: usize) -> Option<FrameSyncInfo> {
		self.ring.bank(slot).ok().and_then(|bank| bank.sync)
	}

	/// Marks every staging slice reusable. Only call once the GPU has
	/// consumed all flushed atlas uploads.
	pub fn release_atlas_uploads(&mut self) {
		self.atlas.release_uploads();
	}
}

impl Drop for TextRenderer {
	fn drop(&mut self) {
		let device = &self.gpu.device;
		unsafe {
			let _ = device.device_wait_idle();
			let mut transfer_cmds = Vec::new();
			for bank in self.ring.banks_mut() {
				bank.instances.destroy(device);
				transfer_cmds.push(bank.transfer_cmd);
			}
			if let Some(tx) = &self.transfer {
				device.destroy_semaphore(tx.semaphore, None);
				device.free_command_buffers(tx.command_pool, &transfer_cmds);
			}
			device.destroy_descriptor_pool(self.descriptor_pool, None);
			device.destroy_pipeline(self.pipeline.pipeline, None);
			device.destroy_pipeline_layout(self.pipeline.layout, None);
			device.destroy_descriptor_set_layout(self.pipeline.set_layout, None);
		}
	}
}

impl TransferCtx {
	fn new(device: &ash::Device, info: &TransferQueueInfo) -> Result<Self> {
		let mut type_info = vk::SemaphoreTypeCreateInfo::builder()
			.semaphore_type(vk::SemaphoreType::TIMELINE)
			.initial_value(info.initial_timeline_value);
		let sem_info = vk::SemaphoreCreateInfo::builder().push_next(&mut type_info);
		let semaphore = unsafe { device.create_semaphore(&sem_info, None) }?;
		Ok(Self {
			queue: info.queue,
			queue_family: info.queue_family,
			command_pool: info.command_pool,
			semaphore,
			next_value: info.initial_timeline_value + 1,
		})
	}
}

/// Records the flush into the bank's transfer command buffer and submits it,
/// signalling the next timeline value. The atlas state is only consumed on a
/// successful submit, so a failure can fall back to the inline path intact.
fn submit_transfer(
	gpu: &GpuContext,
	tx: &mut TransferCtx,
	atlas: &mut GlyphAtlas,
	tx_cmd: vk::CommandBuffer,
	force_init: bool,
) -> Result<(FlushInfo, FrameSyncInfo, u64)> {
	let device = &gpu.device;
	unsafe {
		device.reset_command_buffer(tx_cmd, vk::CommandBufferResetFlags::empty())?;
		let begin = vk::CommandBufferBeginInfo::builder()
			.flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
		device.begin_command_buffer(tx_cmd, &begin)?;
	}

	let queue_kind = QueueKind::Transfer {
		queue_family: tx.queue_family,
	};
	let Some(flush) = atlas.record_flush(tx_cmd, queue_kind, force_init) else {
		unsafe { device.end_command_buffer(tx_cmd) }?;
		return Err(Error::Misconfigured("transfer flush with nothing staged"));
	};
	unsafe { device.end_command_buffer(tx_cmd) }?;

	let value = tx.next_value;
	let cmd_info = vk::CommandBufferSubmitInfo::builder()
		.command_buffer(tx_cmd)
		.build();
	let signal = vk::SemaphoreSubmitInfo::builder()
		.semaphore(tx.semaphore)
		.value(value)
		.stage_mask(vk::PipelineStageFlags2::ALL_TRANSFER)
		.build();
	let submit = vk::SubmitInfo2::builder()
		.command_buffer_infos(std::slice::from_ref(&cmd_info))
		.signal_semaphore_infos(std::slice::from_ref(&signal))
		.build();

	let s0 = Instant::now();
	unsafe { device.queue_submit2(tx.queue, std::slice::from_ref(&submit), vk::Fence::null()) }?;
	let submit_ns = s0.elapsed().as_nanos() as u64;

	tx.next_value += 1;
	atlas.commit_flush();

	Ok((
		flush,
		FrameSyncInfo {
			semaphore: tx.semaphore,
			value,
			stage_mask: vk::PipelineStageFlags2::FRAGMENT_SHADER,
		},
		submit_ns,
	))
}

fn write_atlas_descriptor(
	device: &ash::Device,
	set: vk::DescriptorSet,
	view: vk::ImageView,
	sampler: vk::Sampler,
) {
	let image_info = vk::DescriptorImageInfo {
		sampler,
		image_view: view,
		image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
	};
	let write = vk::WriteDescriptorSet::builder()
		.dst_set(set)
		.dst_binding(1)
		.descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
		.image_info(std::slice::from_ref(&image_info))
		.build();
	unsafe { device.update_descriptor_sets(std::slice::from_ref(&write), &[]) };
}

impl TextPipeline {
	fn new(device: &ash::Device, info: &TextRendererCreateInfo) -> Result<Self> {
		let vert = create_shader_module(device, info.vert_spirv)?;
		let frag = match create_shader_module(device, info.frag_spirv) {
			Ok(frag) => frag,
			Err(err) => {
				unsafe { device.destroy_shader_module(vert, None) };
				return Err(err);
			}
		};
		let result = Self::build(device, info.surface_format, vert, frag);
		unsafe {
			device.destroy_shader_module(vert, None);
			device.destroy_shader_module(frag, None);
		}
		result
	}

	fn build(
		device: &ash::Device,
		surface_format: vk::Format,
		vert: vk::ShaderModule,
		frag: vk::ShaderModule,
	) -> Result<Self> {
		// set 0: binding 1 = atlas sampler. Binding 0 stays reserved for a
		// uniform-buffer projection; it is unused while the projection fits
		// in push constants.
		let sampler_binding = vk::DescriptorSetLayoutBinding::builder()
			.binding(1)
			.descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
			.descriptor_count(1)
			.stage_flags(vk::ShaderStageFlags::FRAGMENT)
			.build();
		let set_layout_info = vk::DescriptorSetLayoutCreateInfo::builder()
			.bindings(std::slice::from_ref(&sampler_binding));
		let set_layout = unsafe { device.create_descriptor_set_layout(&set_layout_info, None) }?;

		let push_range = vk::PushConstantRange {
			stage_flags: vk::ShaderStageFlags::VERTEX,
			offset: 0,
			size: PROJECTION_BYTES,
		};
		let layout_info = vk::PipelineLayoutCreateInfo::builder()
			.set_layouts(std::slice::from_ref(&set_layout))
			.push_constant_ranges(std::slice::from_ref(&push_range));
		let layout = match unsafe { device.create_pipeline_layout(&layout_info, None) } {
			Ok(layout) => layout,
			Err(err) => {
				unsafe { device.destroy_descriptor_set_layout(set_layout, None) };
				return Err(err.into());
			}
		};

		let stages = [
			vk::PipelineShaderStageCreateInfo::builder()
				.stage(vk::ShaderStageFlags::VERTEX)
				.module(vert)
				.name(c"main")
				.build(),
			vk::PipelineShaderStageCreateInfo::builder()
				.stage(vk::ShaderStageFlags::FRAGMENT)
				.module(frag)
				.name(c"main")
				.build(),
		];

		let binding = vk::VertexInputBindingDescription {
			binding: INSTANCE_BINDING,
			stride: std::mem::size_of::<TextQuad>() as u32,
			input_rate: vk::VertexInputRate::INSTANCE,
		};
		let attributes = [
			vk::VertexInputAttributeDescription {
				location: 0,
				binding: INSTANCE_BINDING,
				format: vk::Format::R32G32_SFLOAT,
				offset: 0,
			},
			vk::VertexInputAttributeDescription {
				location: 1,
				binding: INSTANCE_BINDING,
				format: vk::Format::R32G32_SFLOAT,
				offset: 8,
			},
			vk::VertexInputAttributeDescription {
				location: 2,
				binding: INSTANCE_BINDING,
				format: vk::Format::R32G32B32A32_SFLOAT,
				offset: 16,
			},
			vk::VertexInputAttributeDescription {
				location: 3,
				binding: INSTANCE_BINDING,
				format: vk::Format::R32G32B32A32_SFLOAT,
				offset: 32,
			},
		];
		let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
			.vertex_binding_descriptions(std::slice::from_ref(&binding))
			.vertex_attribute_descriptions(&attributes);

		let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
			.topology(vk::PrimitiveTopology::TRIANGLE_STRIP);

		let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
			.viewport_count(1)
			.scissor_count(1);

		let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
			.polygon_mode(vk::PolygonMode::FILL)
			.cull_mode(vk::CullModeFlags::NONE)
			.front_face(vk::FrontFace::COUNTER_CLOCKWISE)
			.line_width(1.0);

		let multisample = vk::PipelineMultisampleStateCreateInfo::builder()
			.rasterization_samples(vk::SampleCountFlags::TYPE_1);

		let blend_attachment = vk::PipelineColorBlendAttachmentState {
			blend_enable: vk::TRUE,
			src_color_blend_factor: vk::BlendFactor::SRC_ALPHA,
			dst_color_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
			color_blend_op: vk::BlendOp::ADD,
			src_alpha_blend_factor: vk::BlendFactor::ONE,
			dst_alpha_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
			alpha_blend_op: vk::BlendOp::ADD,
			color_write_mask: vk::ColorComponentFlags::RGBA,
		};
		let blend = vk::PipelineColorBlendStateCreateInfo::builder()
			.attachments(std::slice::from_ref(&blend_attachment));

		let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
		let dynamic = vk::PipelineDynamicStateCreateInfo::builder()
			.dynamic_states(&dynamic_states);

		let mut rendering = vk::PipelineRenderingCreateInfo::builder()
			.color_attachment_formats(std::slice::from_ref(&surface_format));

		let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
			.push_next(&mut rendering)
			.stages(&stages)
			.vertex_input_state(&vertex_input)
			.input_assembly_state(&input_assembly)
			.viewport_state(&viewport_state)
			.rasterization_state(&rasterization)
			.multisample_state(&multisample)
			.color_blend_state(&blend)
			.dynamic_state(&dynamic)
			.layout(layout)
			.build();

		let pipelines = unsafe {
			device.create_graphics_pipelines(
				vk::PipelineCache::null(),
				std::slice::from_ref(&pipeline_info),
				None,
			)
		};
		match pipelines {
			Ok(pipelines) => Ok(Self {
				set_layout,
				layout,
				pipeline: pipelines[0],
			}),
			Err((_, err)) => {
				unsafe {
					device.destroy_pipeline_layout(layout, None);
					device.destroy_descriptor_set_layout(set_layout, None);
				}
				Err(err.into())
			}
		}
	}
}

fn create_shader_module(device: &ash::Device, spirv: &[u8]) -> Result<vk::ShaderModule> {
	let words = spirv_words(spirv)?;
	let info = vk::ShaderModuleCreateInfo::builder().code(words);
	Ok(unsafe { device.create_shader_module(&info, None) }?)
}

fn spirv_words(spirv: &[u8]) -> Result<&[u32]> {
	if spirv.is_empty() || spirv.len() % 4 != 0 || spirv.as_ptr().align_offset(4) != 0 {
		return Err(Error::Misconfigured(
			"SPIR-V blobs must be non-empty and 4-byte aligned",
		));
	}
	Ok(unsafe { std::slice::from_raw_parts(spirv.as_ptr().cast::<u32>(), spirv.len() / 4) })
}

fn validate(info: &TextRendererCreateInfo) -> Result<()> {
	if info.frames_in_flight == 0 {
		return Err(Error::Misconfigured("frames_in_flight must be nonzero"));
	}
	if info.max_instances == 0 {
		return Err(Error::Misconfigured("max_instances must be nonzero"));
	}
	if info.surface_format == vk::Format::UNDEFINED {
		return Err(Error::Misconfigured("surface format is undefined"));
	}
	if info.extent.width == 0 || info.extent.height == 0 {
		return Err(Error::Misconfigured("viewport extent must be nonzero"));
	}
	spirv_words(info.vert_spirv)?;
	spirv_words(info.frag_spirv)?;
	if info.batch.min == 0 {
		return Err(Error::Misconfigured("batch_min must be nonzero"));
	}
	if info.atlas.initial_extent == 0 || !info.atlas.initial_extent.is_power_of_two() {
		return Err(Error::Misconfigured(
			"atlas initial extent must be a power of two",
		));
	}
	if info.atlas.max_extent < info.atlas.initial_extent {
		return Err(Error::Misconfigured(
			"atlas max extent below initial extent",
		));
	}
	if info.atlas.staging_bytes_per_frame == 0 {
		return Err(Error::Misconfigured("staging ring must be nonzero"));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn spirv_backing() -> Vec<u32> {
		// Magic number plus a few zero words; enough to pass blob checks.
		vec![0x0723_0203, 0, 0, 0]
	}

	fn aligned_bytes(words: &[u32]) -> &[u8] {
		let (pre, bytes, post) = unsafe { words.align_to::<u8>() };
		assert!(pre.is_empty() && post.is_empty());
		bytes
	}

	fn base_info<'a>(vert: &'a [u8], frag: &'a [u8]) -> TextRendererCreateInfo<'a> {
		TextRendererCreateInfo {
			surface_format: vk::Format::B8G8R8A8_UNORM,
			extent: vk::Extent2D {
				width: 2560,
				height: 1440,
			},
			frames_in_flight: 2,
			max_instances: 512,
			vert_spirv: vert,
			frag_spirv: frag,
			atlas: AtlasCreateInfo::default(),
			batch: BatchConfig::default(),
			transfer: None,
			profiler: None,
			stats_callback: None,
		}
	}

	#[test]
	fn validation_accepts_a_sane_config() {
		let words = spirv_backing();
		let bytes = aligned_bytes(&words);
		assert!(validate(&base_info(bytes, bytes)).is_ok());
	}

	#[test]
	fn validation_rejects_unaligned_spirv() {
		let words = spirv_backing();
		let bytes = aligned_bytes(&words);
		let unaligned = &bytes[1..13];
		assert!(matches!(
			validate(&base_info(bytes, unaligned)),
			Err(Error::Misconfigured(_))
		));
	}

	#[test]
	fn validation_rejects_truncated_spirv() {
		let words = spirv_backing();
		let bytes = aligned_bytes(&words);
		assert!(matches!(
			validate(&base_info(&bytes[..10], bytes)),
			Err(Error::Misconfigured(_))
		));
		assert!(matches!(
			validate(&base_info(&[], bytes)),
			Err(Error::Misconfigured(_))
		));
	}

	#[test]
	fn validation_rejects_zero_sizing() {
		let words = spirv_backing();
		let bytes = aligned_bytes(&words);

		let mut info = base_info(bytes, bytes);
		info.frames_in_flight = 0;
		assert!(matches!(validate(&info), Err(Error::Misconfigured(_))));

		let mut info = base_info(bytes, bytes);
		info.max_instances = 0;
		assert!(matches!(validate(&info), Err(Error::Misconfigured(_))));

		let mut info = base_info(bytes, bytes);
		info.atlas.initial_extent = 500;
		assert!(matches!(validate(&info), Err(Error::Misconfigured(_))));
	}
}
