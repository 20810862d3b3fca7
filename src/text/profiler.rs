//! Rolling frame telemetry.
//!
//! Keeps fixed windows of the last K frames and hands a percentile summary
//! to a sink every `log_interval` frames.

use super::frame::FrameStats;

/// Receives periodic summaries; implement for custom telemetry routing.
pub trait ProfileSink {
	fn summary(&mut self, summary: &ProfileSummary);
}

/// Default sink; writes summaries to the `log` facade.
pub struct LogSink;

impl ProfileSink for LogSink {
	fn summary(&mut self, s: &ProfileSummary) {
		log::debug!(
			"text frames={} encode p50={}us p95={}us max={}us submit p50={}us glyphs/draw={:.1}",
			s.frames,
			s.encode_p50_ns / 1_000,
			s.encode_p95_ns / 1_000,
			s.encode_max_ns / 1_000,
			s.submit_p50_ns / 1_000,
			s.mean_glyphs_per_draw,
		);
	}
}

pub struct ProfilerConfig {
	/// Frames between summaries.
	pub log_interval: u32,
	/// Window length in frames.
	pub window: usize,
	/// Defaults to [`LogSink`] when `None`.
	pub sink: Option<Box<dyn ProfileSink>>,
}

impl Default for ProfilerConfig {
	fn default() -> Self {
		Self {
			log_interval: 600,
			window: 240,
			sink: None,
		}
	}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProfileSummary {
	/// Total frames recorded so far.
	pub frames: u64,
	pub encode_p50_ns: u64,
	pub encode_p95_ns: u64,
	pub encode_max_ns: u64,
	pub submit_p50_ns: u64,
	pub mean_glyphs_per_draw: f32,
}

pub(crate) struct Profiler {
	encode_ns: Ring,
	submit_ns: Ring,
	glyphs: Ring,
	draws: Ring,
	frames: u64,
	log_interval: u64,
	sink: Box<dyn ProfileSink>,
}

impl Profiler {
	pub fn new(config: ProfilerConfig) -> Self {
		let window = config.window.max(1);
		Self {
			encode_ns: Ring::new(window),
			submit_ns: Ring::new(window),
			glyphs: Ring::new(window),
			draws: Ring::new(window),
			frames: 0,
			log_interval: u64::from(config.log_interval.max(1)),
			sink: config.sink.unwrap_or_else(|| Box::new(LogSink)),
		}
	}

	pub fn record(&mut self, stats: &FrameStats) {
		self.encode_ns.push(stats.encode_cpu_ns);
		self.submit_ns.push(stats.submit_cpu_ns);
		self.glyphs.push(u64::from(stats.glyphs));
		self.draws.push(u64::from(stats.draws));
		self.frames += 1;
		if self.frames % self.log_interval == 0 {
			let summary = self.summarize();
			self.sink.summary(&summary);
		}
	}

	fn summarize(&self) -> ProfileSummary {
		let mut encode = self.encode_ns.values();
		encode.sort_unstable();
		let mut submit = self.submit_ns.values();
		submit.sort_unstable();

		let glyphs: u64 = self.glyphs.values().iter().sum();
		let draws: u64 = self.draws.values().iter().sum();

		ProfileSummary {
			frames: self.frames,
			encode_p50_ns: percentile(&encode, 0.50),
			encode_p95_ns: percentile(&encode, 0.95),
			encode_max_ns: encode.last().copied().unwrap_or(0),
			submit_p50_ns: percentile(&submit, 0.50),
			mean_glyphs_per_draw: if draws == 0 {
				0.0
			} else {
				glyphs as f32 / draws as f32
			},
		}
	}
}

/// Fixed-size ring of the last N samples.
struct Ring {
	samples: Vec<u64>,
	window: usize,
	cursor: usize,
}

impl Ring {
	fn new(window: usize) -> Self {
		Self {
			samples: Vec::with_capacity(window),
			window,
			cursor: 0,
		}
	}

	fn push(&mut self, value: u64) {
		if self.samples.len() < self.window {
			self.samples.push(value);
		} else {
			self.samples[self.cursor] = value;
		}
		self.cursor = (self.cursor + 1) % self.window;
	}

	fn values(&self) -> Vec<u64> {
		self.samples.clone()
	}
}

fn percentile(sorted: &[u64], p: f64) -> u64 {
	if sorted.is_empty() {
		return 0;
	}
	let rank = (p * (sorted.len() - 1) as f64).round() as usize;
	sorted[rank.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
	use std::cell::RefCell;
	use std::rc::Rc;

	use super::*;

	#[test]
	fn percentile_picks_rank_from_sorted_samples() {
		let sorted: Vec<u64> = (1..=100).collect();
		assert_eq!(percentile(&sorted, 0.50), 50);
		assert_eq!(percentile(&sorted, 0.95), 95);
		assert_eq!(percentile(&sorted, 1.0), 100);
		assert_eq!(percentile(&[], 0.5), 0);
		assert_eq!(percentile(&[7], 0.95), 7);
	}

	#[test]
	fn ring_keeps_only_the_window() {
		let mut ring = Ring::new(4);
		for v in 0..10u64 {
			ring.push(v);
		}
		let mut values = ring.values();
		values.sort_unstable();
		assert_eq!(values, vec![6, 7, 8, 9]);
	}

	struct CountingSink(Rc<RefCell<Vec<ProfileSummary>>>);

	impl ProfileSink for CountingSink {
		fn summary(&mut self, s: &ProfileSummary) {
			self.0.borrow_mut().push(*s);
		}
	}

	#[test]
	fn summaries_fire_on_the_interval() {
		let out = Rc::new(RefCell::new(Vec::new()));
		let mut profiler = Profiler::new(ProfilerConfig {
			log_interval: 3,
			window: 8,
			sink: Some(Box::new(CountingSink(out.clone()))),
		});

		for i in 0u64..7 {
			profiler.record(&FrameStats {
				glyphs: 100,
				draws: 2,
				encode_cpu_ns: 1_000 * (i + 1),
				..Default::default()
			});
		}

		let summaries = out.borrow();
		assert_eq!(summaries.len(), 2);
		assert_eq!(summaries[0].frames, 3);
		assert_eq!(summaries[1].frames, 6);
		assert_eq!(summaries[1].mean_glyphs_per_draw, 50.0);
		assert_eq!(summaries[1].encode_max_ns, 6_000);
	}
}
