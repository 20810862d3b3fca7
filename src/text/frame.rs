//! Per-frame state banks.
//!
//! One bank per in-flight frame: a persistently mapped instance buffer, the
//! bank's descriptor set, telemetry, and the frame state machine. All banks
//! are allocated at init; the hot path never touches the heap.

use ash::vk;
use glam::Mat4;

use crate::error::{Error, Result};
use crate::gfx::GpuContext;
use crate::gfx::memory::GpuBuffer;

/// One glyph quad instance, written straight into the mapped instance
/// buffer and consumed by vertex binding 1.
///
/// `pos`/`size` are screen-space pixels; `uv` is `(u0, v0, u1, v1)` from
/// [`AtlasRect::uv`](crate::text::AtlasRect::uv).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextQuad {
	pub pos: [f32; 2],
	pub size: [f32; 2],
	pub uv: [f32; 4],
	pub color: [f32; 4],
}

const _: () = assert!(std::mem::size_of::<TextQuad>() == 48);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
	Idle,
	Recording,
	Encoded,
}

/// Telemetry for one frame; valid from `encode` until the slot's next
/// `begin_frame`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameStats {
	pub glyphs: u32,
	pub draws: u32,
	pub atlas_uploads: u32,
	pub upload_bytes: u64,
	pub encode_cpu_ns: u64,
	pub transfer_cpu_ns: u64,
	pub submit_cpu_ns: u64,
	pub used_transfer_queue: bool,
	pub batch_limit_used: u32,
}

/// Timeline wait the caller chains into its graphics submit whenever atlas
/// work went through the transfer queue this frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameSyncInfo {
	pub semaphore: vk::Semaphore,
	pub value: u64,
	pub stage_mask: vk::PipelineStageFlags2,
}

/// Bounded writer over a bank's mapped instance memory.
pub(crate) struct QuadWriter {
	ptr: *mut TextQuad,
	capacity: u32,
	count: u32,
}

impl QuadWriter {
	pub fn new(ptr: *mut TextQuad, capacity: u32) -> Self {
		Self {
			ptr,
			capacity,
			count: 0,
		}
	}

	pub fn count(&self) -> u32 {
		self.count
	}

	pub fn reset(&mut self) {
		self.count = 0;
	}

	pub fn push(&mut self, quad: &TextQuad) -> Result<()> {
		if self.count == self.capacity {
			return Err(Error::FrameFull {
				capacity: self.capacity,
			});
		}
		unsafe { self.ptr.add(self.count as usize).write(*quad) };
		self.count += 1;
		Ok(())
	}

	/// All-or-nothing bulk append; a slice that would overflow writes nothing.
	pub fn extend(&mut self, quads: &[TextQuad]) -> Result<()> {
		if quads.len() as u64 > u64::from(self.capacity - self.count) {
			return Err(Error::FrameFull {
				capacity: self.capacity,
			});
		}
		unsafe {
			std::ptr::copy_nonoverlapping(
				quads.as_ptr(),
				self.ptr.add(self.count as usize),
				quads.len(),
			);
		}
		self.count += quads.len() as u32;
		Ok(())
	}
}

pub(crate) struct FrameBank {
	pub instances: GpuBuffer,
	pub writer: QuadWriter,
	pub projection: Mat4,
	pub descriptor_set: vk::DescriptorSet,
	/// Atlas generation the descriptor set was last written against.
	pub atlas_generation: u64,
	pub stats: FrameStats,
	pub sync: Option<FrameSyncInfo>,
	pub state: FrameState,
	/// Pre-allocated transfer command buffer; null without a transfer queue.
	pub transfer_cmd: vk::CommandBuffer,
}

impl FrameBank {
	pub fn new(
		gpu: &GpuContext,
		max_instances: u32,
		descriptor_set: vk::DescriptorSet,
		transfer_cmd: vk::CommandBuffer,
	) -> Result<Self> {
		let bytes = u64::from(max_instances) * std::mem::size_of::<TextQuad>() as u64;
		let instances = GpuBuffer::new_host(gpu, bytes, vk::BufferUsageFlags::VERTEX_BUFFER)?;
		let writer = QuadWriter::new(instances.ptr.cast(), max_instances);
		Ok(Self {
			instances,
			writer,
			projection: Mat4::IDENTITY,
			descriptor_set,
			atlas_generation: 0,
			stats: FrameStats::default(),
			sync: None,
			state: FrameState::Idle,
			transfer_cmd,
		})
	}

	pub fn begin(&mut self) {
		self.state = FrameState::Recording;
		self.writer.reset();
		self.stats = FrameStats::default();
		self.sync = None;
	}
}

/// The rotating set of frame banks plus the currently recorded slot.
pub(crate) struct FrameRing {
	banks: Vec<FrameBank>,
	current: Option<usize>,
}

impl FrameRing {
	pub fn new(banks: Vec<FrameBank>) -> Self {
		Self {
			banks,
			current: None,
		}
	}

	pub fn banks_mut(&mut self) -> &mut [FrameBank] {
		&mut self.banks
	}

	pub fn bank(&self, slot: usize) -> Result<&FrameBank> {
		self.banks.get(slot).ok_or(Error::SlotOutOfRange {
			slot,
			frames: self.banks.len(),
		})
	}

	/// Starts recording into `slot`. A slot left in `Recording` by an
	/// abandoned frame is folded back into a fresh recording; a slot that
	/// was encoded but never ended is refused.
	pub fn begin(&mut self, slot: usize) -> Result<&mut FrameBank> {
		if slot >= self.banks.len() {
			return Err(Error::SlotOutOfRange {
				slot,
				frames: self.banks.len(),
			});
		}
		if let Some(cur) = self.current {
			if cur != slot {
				return Err(Error::InvalidFrameState {
					op: "begin_frame",
					state: self.banks[cur].state,
				});
			}
		}
		let bank = &mut self.banks[slot];
		if bank.state == FrameState::Encoded {
			return Err(Error::InvalidFrameState {
				op: "begin_frame",
				state: bank.state,
			});
		}
		bank.begin();
		self.current = Some(slot);
		Ok(bank)
	}

	/// The bank of the frame being recorded, for `queue_quad`-class ops.
	pub fn recording(&mut self, op: &'static str) -> Result<&mut FrameBank> {
		let slot = self.recording_slot(op)?;
		Ok(&mut self.banks[slot])
	}

	pub fn recording_slot(&self, op: &'static str) -> Result<usize> {
		let Some(slot) = self.current else {
			return Err(Error::InvalidFrameState {
				op,
				state: FrameState::Idle,
			});
		};
		if self.banks[slot].state != FrameState::Recording {
			return Err(Error::InvalidFrameState {
				op,
				state: self.banks[slot].state,
			});
		}
		Ok(slot)
	}

	/// Finishes the encoded frame, returning its slot.
	pub fn finish(&mut self) -> Result<usize> {
		let Some(slot) = self.current else {
			return Err(Error::InvalidFrameState {
				op: "end_frame",
				state: FrameState::Idle,
			});
		};
		let bank = &mut self.banks[slot];
		if bank.state != FrameState::Encoded {
			return Err(Error::InvalidFrameState {
				op: "end_frame",
				state: bank.state,
			});
		}
		bank.state = FrameState::Idle;
		self.current = None;
		Ok(slot)
	}

	/// Device loss folds every bank back to `Idle` with counters zeroed.
	pub fn reset_all(&mut self) {
		for bank in &mut self.banks {
			bank.state = FrameState::Idle;
			bank.writer.reset();
			bank.sync = None;
		}
		self.current = None;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn quad(i: u32) -> TextQuad {
		TextQuad {
			pos: [i as f32, 2.0 * i as f32],
			size: [8.0, 16.0],
			uv: [0.0, 0.0, 0.25, 0.5],
			color: [1.0, 1.0, 1.0, 1.0],
		}
	}

	fn writer_with_backing(capacity: u32) -> (QuadWriter, Box<[TextQuad]>) {
		let mut backing = vec![quad(0); capacity as usize].into_boxed_slice();
		let writer = QuadWriter::new(backing.as_mut_ptr(), capacity);
		(writer, backing)
	}

	#[test]
	fn instance_layout_matches_the_vertex_attributes() {
		assert_eq!(std::mem::size_of::<TextQuad>(), 48);
		assert_eq!(std::mem::offset_of!(TextQuad, pos), 0);
		assert_eq!(std::mem::offset_of!(TextQuad, size), 8);
		assert_eq!(std::mem::offset_of!(TextQuad, uv), 16);
		assert_eq!(std::mem::offset_of!(TextQuad, color), 32);
	}

	#[test]
	fn push_fails_at_capacity() {
		let (mut w, backing) = writer_with_backing(2);
		w.push(&quad(1)).unwrap();
		w.push(&quad(2)).unwrap();
		assert!(matches!(
			w.push(&quad(3)),
			Err(Error::FrameFull { capacity: 2 })
		));
		assert_eq!(w.count(), 2);
		assert_eq!(backing[0], quad(1));
		assert_eq!(backing[1], quad(2));
	}

	#[test]
	fn extend_is_all_or_nothing() {
		let (mut w, backing) = writer_with_backing(4);
		w.push(&quad(9)).unwrap();
		let quads: Vec<_> = (10..14).map(quad).collect();
		assert!(matches!(w.extend(&quads), Err(Error::FrameFull { .. })));
		// Nothing past the first push was written.
		assert_eq!(w.count(), 1);
		assert_eq!(backing[1], quad(0));

		w.extend(&quads[..3]).unwrap();
		assert_eq!(w.count(), 4);
	}

	#[test]
	fn extend_matches_scalar_pushes() {
		let quads: Vec<_> = (0..13).map(quad).collect();
		let (mut bulk, bulk_backing) = writer_with_backing(16);
		let (mut scalar, scalar_backing) = writer_with_backing(16);
		bulk.extend(&quads).unwrap();
		for q in &quads {
			scalar.push(q).unwrap();
		}
		assert_eq!(bulk.count(), scalar.count());
		assert_eq!(&bulk_backing[..13], &scalar_backing[..13]);
	}

	#[test]
	fn empty_extend_is_fine_at_capacity() {
		let (mut w, _backing) = writer_with_backing(1);
		w.push(&quad(0)).unwrap();
		w.extend(&[]).unwrap();
		assert_eq!(w.count(), 1);
	}

	/// A bank over leaked host memory; state transitions never touch the
	/// device, so null handles are fine here.
	fn host_bank(capacity: u32) -> FrameBank {
		let backing = Box::leak(vec![quad(0); capacity as usize].into_boxed_slice());
		FrameBank {
			instances: GpuBuffer {
				buffer: vk::Buffer::null(),
				memory: vk::DeviceMemory::null(),
				size: u64::from(capacity) * 48,
				ptr: backing.as_mut_ptr().cast(),
			},
			writer: QuadWriter::new(backing.as_mut_ptr(), capacity),
			projection: Mat4::IDENTITY,
			descriptor_set: vk::DescriptorSet::null(),
			atlas_generation: 0,
			stats: FrameStats::default(),
			sync: None,
			state: FrameState::Idle,
			transfer_cmd: vk::CommandBuffer::null(),
		}
	}

	fn host_ring(slots: usize) -> FrameRing {
		FrameRing::new((0..slots).map(|_| host_bank(16)).collect())
	}

	#[test]
	fn ops_require_a_recording_frame() {
		let mut ring = host_ring(2);
		assert!(matches!(
			ring.recording("queue_quad"),
			Err(Error::InvalidFrameState {
				op: "queue_quad",
				state: FrameState::Idle,
			})
		));
		ring.begin(0).unwrap();
		ring.recording("queue_quad").unwrap().writer.push(&quad(1)).unwrap();
	}

	#[test]
	fn begin_rejects_out_of_range_slots() {
		let mut ring = host_ring(2);
		assert!(matches!(
			ring.begin(2),
			Err(Error::SlotOutOfRange { slot: 2, frames: 2 })
		));
	}

	#[test]
	fn begin_rejects_a_second_slot_mid_frame() {
		let mut ring = host_ring(2);
		ring.begin(0).unwrap();
		assert!(matches!(
			ring.begin(1),
			Err(Error::InvalidFrameState {
				op: "begin_frame",
				..
			})
		));
	}

	#[test]
	fn rebeginning_a_stuck_frame_resets_it() {
		let mut ring = host_ring(2);
		ring.begin(0).unwrap();
		ring.recording("queue_quad").unwrap().writer.push(&quad(1)).unwrap();
		// The caller abandoned the frame; the next begin folds it back.
		let bank = ring.begin(0).unwrap();
		assert_eq!(bank.writer.count(), 0);
	}

	#[test]
	fn finish_requires_an_encoded_frame() {
		let mut ring = host_ring(1);
		assert!(matches!(
			ring.finish(),
			Err(Error::InvalidFrameState { op: "end_frame", .. })
		));
		ring.begin(0).unwrap();
		assert!(matches!(
			ring.finish(),
			Err(Error::InvalidFrameState {
				op: "end_frame",
				state: FrameState::Recording,
			})
		));
		ring.banks_mut()[0].state = FrameState::Encoded;
		assert_eq!(ring.finish().unwrap(), 0);
		// An encoded-but-never-ended slot refuses to begin again.
		ring.begin(0).unwrap();
		ring.banks_mut()[0].state = FrameState::Encoded;
		assert!(matches!(
			ring.begin(0),
			Err(Error::InvalidFrameState {
				op: "begin_frame",
				state: FrameState::Encoded,
			})
		));
	}

	#[test]
	fn reset_all_folds_every_bank_to_idle() {
		let mut ring = host_ring(2);
		ring.begin(1).unwrap();
		ring.recording("queue_quad").unwrap().writer.push(&quad(1)).unwrap();
		ring.reset_all();
		assert!(matches!(
			ring.recording("queue_quad"),
			Err(Error::InvalidFrameState { .. })
		));
		ring.begin(0).unwrap();
	}
}
