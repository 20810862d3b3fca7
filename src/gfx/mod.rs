pub mod memory;

use std::sync::Arc;

use ash::vk;

/// Device context shared by everything the renderer owns.
///
/// The caller brings up the instance and logical device, then hands us a
/// clone of the `ash::Device` dispatch table. The device must outlive every
/// object created from this context; the renderer never destroys it.
pub struct GpuContext {
	pub device: ash::Device,
	pub memory_props: vk::PhysicalDeviceMemoryProperties,
	pub graphics_queue_family: u32,
	/// `VkPhysicalDeviceLimits::maxImageDimension2D`; caps atlas growth.
	pub max_image_dimension_2d: u32,
}

impl GpuContext {
	pub fn new(
		device: ash::Device,
		memory_props: vk::PhysicalDeviceMemoryProperties,
		graphics_queue_family: u32,
		max_image_dimension_2d: u32,
	) -> Arc<Self> {
		Arc::new(Self {
			device,
			memory_props,
			graphics_queue_family,
			max_image_dimension_2d,
		})
	}
}
