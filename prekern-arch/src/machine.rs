//! The seams between the loader and the machine it runs on.

use crate::paging::{Level, PageTableEntry};

/// Indexed access to the live page-table hierarchy.
///
/// Entries are addressed by level and *linear* index (see
/// [`Level::linear_index`]); callers never see how the tables are
/// reached.
///
/// # Safety
/// Implementors must read and write the entries the hardware actually
/// walks for the current address space. Reading or writing an entry whose
/// parent entries are not present is a fault on real hardware and must
/// not silently succeed.
pub unsafe trait PageTables {
	/// Reads the entry at `index` of `level`.
	fn entry(&self, level: Level, index: u64) -> PageTableEntry;

	/// Overwrites the entry at `index` of `level`.
	///
	/// Does **not** invalidate any cached translations.
	fn set_entry(&mut self, level: Level, index: u64, entry: PageTableEntry);
}

/// Byte access to virtual memory in the address space under construction.
///
/// # Safety
/// Implementors must access memory through the current translation,
/// such that a mapping installed via [`PageTables`] (and invalidated)
/// is observed by the next access.
pub unsafe trait VirtMemory {
	/// Copies `buf.len()` bytes starting at `va` into `buf`.
	fn read(&self, va: u64, buf: &mut [u8]);

	/// Copies `data` to memory starting at `va`.
	fn write(&mut self, va: u64, data: &[u8]);

	/// Sets `len` bytes starting at `va` to `byte`.
	fn fill(&mut self, va: u64, byte: u8, len: u64);

	/// Reads a single byte.
	#[inline]
	fn read_u8(&self, va: u64) -> u8 {
		let mut b = [0; 1];
		self.read(va, &mut b);
		b[0]
	}

	/// Reads a little-endian `u16`.
	#[inline]
	fn read_u16(&self, va: u64) -> u16 {
		let mut b = [0; 2];
		self.read(va, &mut b);
		u16::from_le_bytes(b)
	}

	/// Reads a little-endian `u32`.
	#[inline]
	fn read_u32(&self, va: u64) -> u32 {
		let mut b = [0; 4];
		self.read(va, &mut b);
		u32::from_le_bytes(b)
	}

	/// Reads a little-endian `u64`.
	#[inline]
	fn read_u64(&self, va: u64) -> u64 {
		let mut b = [0; 8];
		self.read(va, &mut b);
		u64::from_le_bytes(b)
	}

	/// Writes a little-endian `u32`.
	#[inline]
	fn write_u32(&mut self, va: u64, value: u32) {
		self.write(va, &value.to_le_bytes());
	}

	/// Writes a little-endian `u64`.
	#[inline]
	fn write_u64(&mut self, va: u64, value: u64) {
		self.write(va, &value.to_le_bytes());
	}
}

/// CPU leaves the loader depends on.
pub trait Cpu {
	/// Reads the cycle counter.
	fn cycle_counter(&self) -> u64;

	/// Whether the CPU advertises a hardware random number instruction.
	fn has_hw_rng(&self) -> bool;

	/// Draws one word from the hardware RNG. `None` if the draw failed
	/// (or no hardware RNG exists).
	fn hw_rng(&self) -> Option<u64>;

	/// Whether leaf entries may carry the no-execute bit.
	fn has_no_exec(&self) -> bool;

	/// Drops any cached translation for `va`.
	fn invalidate(&self, va: u64);
}

impl<T: Cpu + ?Sized> Cpu for &T {
	#[inline]
	fn cycle_counter(&self) -> u64 {
		(**self).cycle_counter()
	}

	#[inline]
	fn has_hw_rng(&self) -> bool {
		(**self).has_hw_rng()
	}

	#[inline]
	fn hw_rng(&self) -> Option<u64> {
		(**self).hw_rng()
	}

	#[inline]
	fn has_no_exec(&self) -> bool {
		(**self).has_no_exec()
	}

	#[inline]
	fn invalidate(&self, va: u64) {
		(**self).invalidate(va);
	}
}
