//! Access to the live address space through the recursive slot.
//!
//! The earlier boot stage points top-level entry [`RECURSIVE_SLOT`] back at
//! the top-level table itself. Walking through that slot `n` extra times
//! exposes every table at level `n + 1` as ordinary memory, laid out by
//! linear index.

use crate::{
	PageTables, VirtMemory,
	paging::{Level, PageTableEntry},
};

/// Top-level index that maps the table hierarchy onto itself.
pub const RECURSIVE_SLOT: u64 = 255;

/// Base virtual address of the L1 entries.
const L1_BASE: u64 = RECURSIVE_SLOT << 39;
/// Base virtual address of the L2 entries.
const L2_BASE: u64 = L1_BASE + (RECURSIVE_SLOT << 30);
/// Base virtual address of the L3 entries.
const L3_BASE: u64 = L2_BASE + (RECURSIVE_SLOT << 21);
/// Base virtual address of the L4 entries.
const L4_BASE: u64 = L3_BASE + (RECURSIVE_SLOT << 12);

/// The address space currently loaded in `cr3`.
#[derive(Debug)]
pub struct ActiveSpace(());

impl ActiveSpace {
	/// Wraps the current address space.
	///
	/// # Safety
	/// The recursive slot must be installed in the current top-level table,
	/// and only one `ActiveSpace` may exist at a time.
	#[must_use]
	pub unsafe fn new() -> Self {
		Self(())
	}

	/// The address of the entry at `index` of `level`.
	#[inline]
	const fn entry_ptr(level: Level, index: u64) -> *mut u64 {
		let base = match level {
			Level::L1 => L1_BASE,
			Level::L2 => L2_BASE,
			Level::L3 => L3_BASE,
			Level::L4 => L4_BASE,
		};
		(base + index * 8) as *mut u64
	}
}

// SAFETY: Entries are accessed through the recursive slot, i.e. exactly the
// SAFETY: words the MMU walks.
unsafe impl PageTables for ActiveSpace {
	#[inline]
	fn entry(&self, level: Level, index: u64) -> PageTableEntry {
		// SAFETY: The recursive slot is guaranteed by `new()`; parents of the
		// SAFETY: requested entry are the caller's responsibility, as on hardware.
		PageTableEntry::from_raw(unsafe { Self::entry_ptr(level, index).read_volatile() })
	}

	#[inline]
	fn set_entry(&mut self, level: Level, index: u64, entry: PageTableEntry) {
		// SAFETY: See `entry()`.
		unsafe {
			Self::entry_ptr(level, index).write_volatile(entry.raw());
		}
	}
}

// SAFETY: Plain loads and stores go through the current translation.
unsafe impl VirtMemory for ActiveSpace {
	fn read(&self, va: u64, buf: &mut [u8]) {
		// SAFETY: The loader only reads ranges it has mapped (or that are
		// SAFETY: identity mapped by the earlier stage).
		unsafe {
			core::ptr::copy_nonoverlapping(va as *const u8, buf.as_mut_ptr(), buf.len());
		}
	}

	fn write(&mut self, va: u64, data: &[u8]) {
		// SAFETY: The loader only writes ranges it has mapped writable.
		unsafe {
			core::ptr::copy_nonoverlapping(data.as_ptr(), va as *mut u8, data.len());
		}
	}

	fn fill(&mut self, va: u64, byte: u8, len: u64) {
		// SAFETY: See `write()`.
		unsafe {
			core::ptr::write_bytes(va as *mut u8, byte, len as usize);
		}
	}
}
