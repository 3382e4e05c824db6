//! Randomized placement of kernel regions inside fixed windows.

use prekern_arch::{
	Cpu, PageTables, VirtMemory,
	paging::{PAGE_SIZE, round_down},
};
use prekern_rng::RandomSource;

use crate::{AddressSpace, MmError};

/// Regions a single [`Placer`] can track.
pub const MAX_REGIONS: usize = 4;

/// Draws a placer makes before giving up on one region.
pub const MAX_ATTEMPTS: u32 = 4096;

/// A span of virtual address space regions may be placed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
	/// First address of the window.
	pub base: u64,
	/// Size of the window in bytes.
	pub size: u64,
}

impl Window {
	/// One past the last address of the window, wrapping to zero at the
	/// top of the address space.
	#[must_use]
	pub const fn end(&self) -> u64 {
		self.base.wrapping_add(self.size)
	}

	/// Whether `range` lies entirely inside the window.
	#[must_use]
	pub const fn contains(&self, range: VirtRange) -> bool {
		range.start >= self.base && range.end - self.base <= self.size
	}
}

/// The last 2GiB of the address space, where the kernel segments go.
pub const KASLR_WINDOW: Window = Window {
	base: 0xFFFF_FFFF_8000_0000,
	size: 2 << 30,
};

/// The 1GiB directly below [`KASLR_WINDOW`], where the ELF head goes.
pub const HEAD_WINDOW: Window = Window {
	base: KASLR_WINDOW.base - (1 << 30),
	size: 1 << 30,
};

/// A half-open range of virtual addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtRange {
	/// First address.
	pub start: u64,
	/// One past the last address.
	pub end:   u64,
}

impl VirtRange {
	/// Whether the two ranges share any address.
	#[inline]
	#[must_use]
	pub const fn overlaps(&self, other: &Self) -> bool {
		self.start < other.end && other.start < self.end
	}
}

/// Chooses random, mutually disjoint locations inside one window.
#[derive(Debug, Clone)]
pub struct Placer {
	/// Where regions go.
	window:       Window,
	/// Regions already handed out.
	slots:        [Option<VirtRange>; MAX_REGIONS],
	/// Retry cap per region.
	max_attempts: u32,
}

impl Placer {
	/// An empty placer over `window`.
	#[must_use]
	pub const fn new(window: Window) -> Self {
		Self {
			window,
			slots: [None; MAX_REGIONS],
			max_attempts: MAX_ATTEMPTS,
		}
	}

	/// Overrides the per-region retry cap.
	#[must_use]
	pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
		self.max_attempts = max_attempts;
		self
	}

	/// The window regions are placed in.
	#[must_use]
	pub const fn window(&self) -> Window {
		self.window
	}

	/// Regions handed out so far.
	pub fn placed(&self) -> impl Iterator<Item = VirtRange> + '_ {
		self.slots.iter().flatten().copied()
	}

	/// Picks an address for `size` bytes aligned to `align` that does not
	/// overlap any registered region. Nothing is registered.
	pub fn choose<R: RandomSource + ?Sized>(
		&self,
		rng: &mut R,
		size: u64,
		align: u64,
	) -> Result<u64, MmError> {
		if !align.is_power_of_two() || align < PAGE_SIZE {
			return Err(MmError::BadAlignment(align));
		}
		if size >= self.window.size {
			return Err(MmError::RegionTooLarge {
				size,
				window: self.window.size,
			});
		}

		let span = self.window.size - size;
		for _ in 0..self.max_attempts {
			let va = round_down(self.window.base + rng.random_u64() % span, align);
			if va < self.window.base {
				continue;
			}

			let candidate = VirtRange {
				start: va,
				end:   va + size,
			};
			if self.placed().any(|r| r.overlaps(&candidate)) {
				continue;
			}

			return Ok(va);
		}

		Err(MmError::PlacementExhausted(self.max_attempts))
	}

	/// Registers `[va, va + size)`.
	pub fn register(&mut self, va: u64, size: u64) -> Result<(), MmError> {
		let slot = self
			.slots
			.iter_mut()
			.find(|s| s.is_none())
			.ok_or(MmError::SlotsExhausted)?;
		*slot = Some(VirtRange {
			start: va,
			end:   va + size,
		});
		Ok(())
	}

	/// Chooses a location, registers it and builds the intermediate
	/// tables under it. Returns the chosen address.
	pub fn place<M, C, R>(
		&mut self,
		space: &mut AddressSpace<M, C>,
		rng: &mut R,
		size: u64,
		align: u64,
	) -> Result<u64, MmError>
	where
		M: PageTables + VirtMemory,
		C: Cpu,
		R: RandomSource + ?Sized,
	{
		if self.slots.iter().all(Option::is_some) {
			return Err(MmError::SlotsExhausted);
		}

		let va = self.choose(rng, size, align)?;
		self.register(va, size)?;
		space.ensure_mapped(va, va + size);

		log::debug!("mm: placed {size:#x} bytes at {va:#018x}");
		Ok(va)
	}
}
