use ash::vk;

use super::GpuContext;
use crate::error::{Error, Result};

/// Heaps at least this large that are both device-local and host-visible are
/// treated as resizable BAR and preferred for CPU-written buffers.
const BAR_HEAP_THRESHOLD: vk::DeviceSize = 256 * 1024 * 1024;

pub fn find_memory_type(
	props: &vk::PhysicalDeviceMemoryProperties,
	type_bits: u32,
	flags: vk::MemoryPropertyFlags,
) -> Option<u32> {
	(0..props.memory_type_count).find(|&i| {
		type_bits & (1 << i) != 0
			&& props.memory_types[i as usize].property_flags.contains(flags)
	})
}

/// Host-visible + coherent, preferring BAR memory when a large enough
/// device-local + host-visible heap exists.
pub fn find_host_memory_type(
	props: &vk::PhysicalDeviceMemoryProperties,
	type_bits: u32,
) -> Option<u32> {
	let base = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

	let bar = (0..props.memory_type_count).find(|&i| {
		let mt = &props.memory_types[i as usize];
		type_bits & (1 << i) != 0
			&& mt.property_flags.contains(base | vk::MemoryPropertyFlags::DEVICE_LOCAL)
			&& props.memory_heaps[mt.heap_index as usize].size >= BAR_HEAP_THRESHOLD
	});

	bar.or_else(|| find_memory_type(props, type_bits, base))
}

/// A buffer with its own persistently-mapped allocation.
pub struct GpuBuffer {
	pub buffer: vk::Buffer,
	pub memory: vk::DeviceMemory,
	pub size: vk::DeviceSize,
	pub ptr: *mut u8,
}

impl GpuBuffer {
	pub fn new_host(
		gpu: &GpuContext,
		size: vk::DeviceSize,
		usage: vk::BufferUsageFlags,
	) -> Result<Self> {
		let device = &gpu.device;

		let info = vk::BufferCreateInfo::builder()
			.size(size)
			.usage(usage)
			.sharing_mode(vk::SharingMode::EXCLUSIVE);
		let buffer = unsafe { device.create_buffer(&info, None) }?;

		let reqs = unsafe { device.get_buffer_memory_requirements(buffer) };
		let Some(type_index) = find_host_memory_type(&gpu.memory_props, reqs.memory_type_bits)
		else {
			unsafe { device.destroy_buffer(buffer, None) };
			return Err(Error::OutOfMemory);
		};

		let alloc = vk::MemoryAllocateInfo::builder()
			.allocation_size(reqs.size)
			.memory_type_index(type_index);
		let memory = match unsafe { device.allocate_memory(&alloc, None) } {
			Ok(memory) => memory,
			Err(err) => {
				unsafe { device.destroy_buffer(buffer, None) };
				return Err(err.into());
			}
		};

		let mapped = unsafe {
			match device.bind_buffer_memory(buffer, memory, 0) {
				Ok(()) => {
					device.map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
				}
				Err(err) => Err(err),
			}
		};
		let ptr = match mapped {
			Ok(ptr) => ptr.cast::<u8>(),
			Err(err) => {
				unsafe {
					device.destroy_buffer(buffer, None);
					device.free_memory(memory, None);
				}
				return Err(err.into());
			}
		};

		Ok(Self {
			buffer,
			memory,
			size,
			ptr,
		})
	}

	pub unsafe fn destroy(&mut self, device: &ash::Device) {
		unsafe {
			device.destroy_buffer(self.buffer, None);
			device.free_memory(self.memory, None);
		}
		self.buffer = vk::Buffer::null();
		self.memory = vk::DeviceMemory::null();
		self.ptr = std::ptr::null_mut();
	}
}

/// A sampled 2D image in device-local memory, with its default view.
pub struct GpuImage {
	pub image: vk::Image,
	pub memory: vk::DeviceMemory,
	pub view: vk::ImageView,
	pub extent: vk::Extent2D,
	pub format: vk::Format,
}

impl GpuImage {
	pub fn new_sampled(
		gpu: &GpuContext,
		width: u32,
		height: u32,
		format: vk::Format,
	) -> Result<Self> {
		let device = &gpu.device;

		let info = vk::ImageCreateInfo::builder()
			.image_type(vk::ImageType::TYPE_2D)
			.format(format)
			.extent(vk::Extent3D {
				width,
				height,
				depth: 1,
			})
			.mip_levels(1)
			.array_layers(1)
			.samples(vk::SampleCountFlags::TYPE_1)
			.tiling(vk::ImageTiling::OPTIMAL)
			.usage(vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST)
			.sharing_mode(vk::SharingMode::EXCLUSIVE)
			.initial_layout(vk::ImageLayout::UNDEFINED);
		let image = unsafe { device.create_image(&info, None) }?;

		let reqs = unsafe { device.get_image_memory_requirements(image) };
		let Some(type_index) = find_memory_type(
			&gpu.memory_props,
			reqs.memory_type_bits,
			vk::MemoryPropertyFlags::DEVICE_LOCAL,
		) else {
			unsafe { device.destroy_image(image, None) };
			return Err(Error::OutOfMemory);
		};

		let alloc = vk::MemoryAllocateInfo::builder()
			.allocation_size(reqs.size)
			.memory_type_index(type_index);
		let memory = match unsafe { device.allocate_memory(&alloc, None) } {
			Ok(memory) => memory,
			Err(err) => {
				unsafe { device.destroy_image(image, None) };
				return Err(err.into());
			}
		};

		if let Err(err) = unsafe { device.bind_image_memory(image, memory, 0) } {
			unsafe {
				device.destroy_image(image, None);
				device.free_memory(memory, None);
			}
			return Err(err.into());
		}

		let view_info = vk::ImageViewCreateInfo::builder()
			.image(image)
			.view_type(vk::ImageViewType::TYPE_2D)
			.format(format)
			.subresource_range(color_subresource_range());
		let view = match unsafe { device.create_image_view(&view_info, None) } {
			Ok(view) => view,
			Err(err) => {
				unsafe {
					device.destroy_image(image, None);
					device.free_memory(memory, None);
				}
				return Err(err.into());
			}
		};

		Ok(Self {
			image,
			memory,
			view,
			extent: vk::Extent2D { width, height },
			format,
		})
	}

	pub unsafe fn destroy(&mut self, device: &ash::Device) {
		unsafe {
			device.destroy_image_view(self.view, None);
			device.destroy_image(self.image, None);
			device.free_memory(self.memory, None);
		}
		self.image = vk::Image::null();
		self.view = vk::ImageView::null();
		self.memory = vk::DeviceMemory::null();
	}
}

pub const fn color_subresource_range() -> vk::ImageSubresourceRange {
	vk::ImageSubresourceRange {
		aspect_mask: vk::ImageAspectFlags::COLOR,
		base_mip_level: 0,
		level_count: 1,
		base_array_layer: 0,
		layer_count: 1,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn props_with(
		types: &[(vk::MemoryPropertyFlags, u32)],
		heaps: &[vk::DeviceSize],
	) -> vk::PhysicalDeviceMemoryProperties {
		let mut props = vk::PhysicalDeviceMemoryProperties::default();
		props.memory_type_count = types.len() as u32;
		for (i, &(flags, heap)) in types.iter().enumerate() {
			props.memory_types[i] = vk::MemoryType {
				property_flags: flags,
				heap_index: heap,
			};
		}
		props.memory_heap_count = heaps.len() as u32;
		for (i, &size) in heaps.iter().enumerate() {
			props.memory_heaps[i].size = size;
		}
		props
	}

	#[test]
	fn host_type_prefers_bar_on_large_heap() {
		let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
		let props = props_with(
			&[
				(vk::MemoryPropertyFlags::DEVICE_LOCAL, 0),
				(host, 1),
				(host | vk::MemoryPropertyFlags::DEVICE_LOCAL, 2),
			],
			&[8 << 30, 16 << 30, 512 << 20],
		);
		assert_eq!(find_host_memory_type(&props, !0), Some(2));
	}

	#[test]
	fn host_type_skips_small_bar_heap() {
		let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
		let props = props_with(
			&[
				(host | vk::MemoryPropertyFlags::DEVICE_LOCAL, 0),
				(host, 1),
			],
			&[128 << 20, 16 << 30],
		);
		// 128 MiB BAR window is below the threshold; fall back to plain host memory.
		assert_eq!(find_host_memory_type(&props, !0), Some(1));
	}

	#[test]
	fn memory_type_respects_type_bits() {
		let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
		let props = props_with(&[(host, 0), (host, 0)], &[1 << 30]);
		assert_eq!(find_memory_type(&props, 0b10, host), Some(1));
		assert_eq!(find_memory_type(&props, 0, host), None);
	}
}
