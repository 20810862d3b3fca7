//! Adaptive draw batching.
//!
//! Heavy frames collapse toward a single instanced draw; light frames keep
//! the per-draw instance limit lean so encode stays under its CPU budget.

/// Draw batching configuration.
#[derive(Debug, Clone, Copy)]
pub struct BatchConfig {
	/// Initial per-draw instance limit.
	pub target: u32,
	/// Autotuner floor.
	pub min: u32,
	pub autotune: bool,
	/// CPU budget for `encode`, in nanoseconds.
	pub goal_ns: u64,
}

impl Default for BatchConfig {
	fn default() -> Self {
		Self {
			target: 2048,
			min: 64,
			autotune: true,
			goal_ns: 2_000_000,
		}
	}
}

const EWMA_ALPHA: f64 = 0.25;

pub(crate) struct BatchAutotuner {
	enabled: bool,
	goal_ns: u64,
	min: u32,
	max: u32,
	limit: u32,
	ewma_encode_ns: Option<f64>,
	ewma_glyphs_per_draw: f32,
}

impl BatchAutotuner {
	pub fn new(config: &BatchConfig, max_instances: u32) -> Self {
		let min = config.min.max(1).min(max_instances);
		Self {
			enabled: config.autotune,
			goal_ns: config.goal_ns,
			min,
			max: max_instances,
			limit: config.target.clamp(min, max_instances),
			ewma_encode_ns: None,
			ewma_glyphs_per_draw: 0.0,
		}
	}

	pub fn limit(&self) -> u32 {
		self.limit
	}

	pub fn glyphs_per_draw(&self) -> f32 {
		self.ewma_glyphs_per_draw
	}

	pub fn end_frame(&mut self, encode_ns: u64, glyphs: u32, draws: u32) {
		if draws > 0 {
			let ratio = glyphs as f32 / draws as f32;
			self.ewma_glyphs_per_draw = if self.ewma_glyphs_per_draw == 0.0 {
				ratio
			} else {
				EWMA_ALPHA as f32 * ratio + (1.0 - EWMA_ALPHA as f32) * self.ewma_glyphs_per_draw
			};
		}

		if !self.enabled {
			return;
		}

		let smoothed = match self.ewma_encode_ns {
			None => encode_ns as f64,
			Some(prev) => EWMA_ALPHA * encode_ns as f64 + (1.0 - EWMA_ALPHA) * prev,
		};
		self.ewma_encode_ns = Some(smoothed);

		if smoothed > self.goal_ns as f64 {
			self.limit = (self.limit - self.limit / 4).max(self.min);
		} else if smoothed < self.goal_ns as f64 / 2.0 && glyphs == self.limit {
			self.limit = (self.limit + self.limit / 4).min(self.max);
		}
	}
}

/// `(first_instance, instance_count)` chunks for one frame's draws.
pub(crate) fn batch_ranges(count: u32, limit: u32) -> impl Iterator<Item = (u32, u32)> {
	let limit = limit.max(1);
	(0..count)
		.step_by(limit as usize)
		.map(move |first| (first, (count - first).min(limit)))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn tuner(target: u32, min: u32, max: u32, goal_ns: u64) -> BatchAutotuner {
		BatchAutotuner::new(
			&BatchConfig {
				target,
				min,
				autotune: true,
				goal_ns,
			},
			max,
		)
	}

	#[test]
	fn ranges_split_exactly_at_the_limit() {
		let ranges: Vec<_> = batch_ranges(1024, 512).collect();
		assert_eq!(ranges, vec![(0, 512), (512, 512)]);
	}

	#[test]
	fn ranges_carry_the_remainder() {
		let ranges: Vec<_> = batch_ranges(1000, 512).collect();
		assert_eq!(ranges, vec![(0, 512), (512, 488)]);
		assert_eq!(batch_ranges(0, 512).count(), 0);
		assert_eq!(batch_ranges(5, 512).collect::<Vec<_>>(), vec![(0, 5)]);
	}

	#[test]
	fn shrinks_while_over_budget() {
		// 8 ms frames against a 2 ms goal, from scenario testing at 4096.
		let mut t = tuner(4096, 64, 8192, 2_000_000);
		for frames in 1..=6 {
			let before = t.limit();
			t.end_frame(8_000_000, before, 1);
			assert!(t.limit() < before, "limit must strictly decrease");
			if frames == 3 {
				assert!(t.limit() <= 2048);
			}
		}
		assert!(t.limit() <= 1024);
	}

	#[test]
	fn floors_at_min() {
		let mut t = tuner(128, 100, 8192, 1_000_000);
		for _ in 0..50 {
			t.end_frame(10_000_000, 64, 1);
		}
		assert_eq!(t.limit(), 100);
	}

	#[test]
	fn grows_only_when_fast_and_saturated() {
		let mut t = tuner(512, 64, 8192, 2_000_000);
		// Fast but not saturated: stays put.
		t.end_frame(100_000, 17, 1);
		assert_eq!(t.limit(), 512);
		// Fast and exactly at the limit: +25%.
		t.end_frame(100_000, 512, 1);
		assert_eq!(t.limit(), 640);
	}

	#[test]
	fn growth_ceils_at_max_instances() {
		let mut t = tuner(900, 64, 1024, 2_000_000);
		t.end_frame(100_000, 900, 1);
		assert_eq!(t.limit(), 1024);
		t.end_frame(100_000, 1024, 1);
		assert_eq!(t.limit(), 1024);
	}

	#[test]
	fn disabled_tuner_keeps_the_target() {
		let mut t = BatchAutotuner::new(
			&BatchConfig {
				target: 256,
				min: 64,
				autotune: false,
				goal_ns: 1,
			},
			8192,
		);
		t.end_frame(10_000_000, 256, 1);
		assert_eq!(t.limit(), 256);
	}

	#[test]
	fn glyphs_per_draw_tracks_the_ratio() {
		let mut t = tuner(512, 64, 8192, u64::MAX);
		t.end_frame(1, 1024, 2);
		assert_eq!(t.glyphs_per_draw(), 512.0);
		t.end_frame(1, 0, 0);
		// A drawless frame leaves the ratio alone.
		assert_eq!(t.glyphs_per_draw(), 512.0);
	}
}
