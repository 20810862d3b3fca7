//! Online rectangle packing for the glyph atlas.
//!
//! Best-short-side-fit over a guillotine free list. Deterministic: ties are
//! broken by smaller free-rect area, then by smaller `(y, x)`.

use crate::error::{Error, Result};

/// A packed sub-region of the atlas.
///
/// Coordinates are fixed once issued and stay valid across atlas grows;
/// only the pixel contents are lost on grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtlasRect {
	pub x: u32,
	pub y: u32,
	pub w: u32,
	pub h: u32,
}

impl AtlasRect {
	/// Normalized `(u0, v0, u1, v1)` for the given atlas extent.
	pub fn uv(&self, extent: [u32; 2]) -> [f32; 4] {
		let w = extent[0] as f32;
		let h = extent[1] as f32;
		[
			self.x as f32 / w,
			self.y as f32 / h,
			(self.x + self.w) as f32 / w,
			(self.y + self.h) as f32 / h,
		]
	}

	pub(crate) fn area(&self) -> u64 {
		u64::from(self.w) * u64::from(self.h)
	}

	#[cfg(test)]
	fn overlaps(&self, o: &Self) -> bool {
		self.x < o.x + o.w && o.x < self.x + self.w && self.y < o.y + o.h && o.y < self.y + self.h
	}
}

/// Outcome of a reservation attempt.
pub enum Reserve {
	Fit(AtlasRect),
	/// No free rect fits; grow the atlas to at least this extent and retry.
	Grow { w: u32, h: u32 },
}

pub struct Packer {
	extent: [u32; 2],
	max_extent: u32,
	free: Vec<AtlasRect>,
}

impl Packer {
	pub fn new(w: u32, h: u32, max_extent: u32) -> Self {
		Self {
			extent: [w, h],
			max_extent,
			free: vec![AtlasRect { x: 0, y: 0, w, h }],
		}
	}

	pub fn extent(&self) -> [u32; 2] {
		self.extent
	}

	/// Reserves `w`x`h` plus a border of `padding` texels on every side.
	/// The returned rect is the inner (unpadded) region.
	pub fn reserve(&mut self, w: u32, h: u32, padding: u32) -> Result<Reserve> {
		let rw = w + 2 * padding;
		let rh = h + 2 * padding;

		let mut best: Option<usize> = None;
		let mut best_short = u32::MAX;
		for (i, f) in self.free.iter().enumerate() {
			if f.w < rw || f.h < rh {
				continue;
			}
			let short = (f.w - rw).min(f.h - rh);
			let better = match best {
				None => true,
				Some(b) => {
					let bf = &self.free[b];
					short < best_short
						|| (short == best_short
							&& (f.area() < bf.area()
								|| (f.area() == bf.area() && (f.y, f.x) < (bf.y, bf.x))))
				}
			};
			if better {
				best = Some(i);
				best_short = short;
			}
		}

		let Some(idx) = best else {
			return self.grow_request(rw, rh);
		};
		let f = self.free.swap_remove(idx);

		// Guillotine split across the free rect's shorter axis.
		let (a, b) = if f.w < f.h {
			// horizontal cut below the placed row
			(
				AtlasRect {
					x: f.x + rw,
					y: f.y,
					w: f.w - rw,
					h: rh,
				},
				AtlasRect {
					x: f.x,
					y: f.y + rh,
					w: f.w,
					h: f.h - rh,
				},
			)
		} else {
			// vertical cut right of the placed column
			(
				AtlasRect {
					x: f.x + rw,
					y: f.y,
					w: f.w - rw,
					h: f.h,
				},
				AtlasRect {
					x: f.x,
					y: f.y + rh,
					w: rw,
					h: f.h - rh,
				},
			)
		};
		if a.w > 0 && a.h > 0 {
			self.free.push(a);
		}
		if b.w > 0 && b.h > 0 {
			self.free.push(b);
		}

		Ok(Reserve::Fit(AtlasRect {
			x: f.x + padding,
			y: f.y + padding,
			w,
			h,
		}))
	}

	/// Minimum new extent that doubles the smaller dimension (both when
	/// square), covers the request, and stays within `max_extent`.
	fn grow_request(&self, rw: u32, rh: u32) -> Result<Reserve> {
		if rw > self.max_extent || rh > self.max_extent {
			return Err(Error::AtlasFull { w: rw, h: rh });
		}

		let [mut w, mut h] = self.extent;
		while w < rw || h < rh || [w, h] == self.extent {
			if w == self.max_extent && h == self.max_extent {
				return Err(Error::AtlasFull { w: rw, h: rh });
			}
			if w < h {
				w *= 2;
			} else if h < w {
				h *= 2;
			} else {
				w *= 2;
				h *= 2;
			}
			w = w.min(self.max_extent);
			h = h.min(self.max_extent);
		}
		Ok(Reserve::Grow { w, h })
	}

	/// Extends the free list with the two new strips. Existing free rects and
	/// issued coordinates are untouched.
	pub fn grow(&mut self, new_w: u32, new_h: u32) {
		let [w, h] = self.extent;
		debug_assert!(new_w >= w && new_h >= h);
		if new_w > w {
			self.free.push(AtlasRect {
				x: w,
				y: 0,
				w: new_w - w,
				h: new_h,
			});
		}
		if new_h > h {
			self.free.push(AtlasRect {
				x: 0,
				y: h,
				w,
				h: new_h - h,
			});
		}
		self.extent = [new_w, new_h];
	}
}
