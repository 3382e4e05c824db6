//! Four-level paging geometry and the raw page-table entry.

/// Size of a single page, in bytes.
pub const PAGE_SIZE: u64 = 4096;

/// Number of entries held by one page table.
pub const ENTRIES_PER_TABLE: u64 = 512;

/// Mask applied to a virtual address before deriving linear indices,
/// dropping the sign-extended upper bits.
pub const VA_SIGN_POS_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

/// Bits of an entry that hold the page frame address.
pub const FRAME_MASK: u64 = 0x000F_FFFF_FFFF_F000;

/// Rounds `value` down to a multiple of `align` (a power of two).
#[inline]
#[must_use]
pub const fn round_down(value: u64, align: u64) -> u64 {
	value & !(align - 1)
}

/// Rounds `value` up to a multiple of `align` (a power of two).
#[inline]
#[must_use]
pub const fn round_up(value: u64, align: u64) -> u64 {
	(value + align - 1) & !(align - 1)
}

/// One of the four paging levels. `L1` holds leaf entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
	/// Page table; each entry maps 4KiB.
	L1,
	/// Page directory; each entry covers 2MiB.
	L2,
	/// Page directory pointer table; each entry covers 1GiB.
	L3,
	/// Top level; each entry covers 512GiB.
	L4,
}

impl Level {
	/// All levels, top-down.
	pub const TOP_DOWN: [Self; 4] = [Self::L4, Self::L3, Self::L2, Self::L1];

	/// The number of address bits below this level's index.
	#[inline]
	#[must_use]
	pub const fn shift(self) -> u32 {
		match self {
			Self::L1 => 12,
			Self::L2 => 21,
			Self::L3 => 30,
			Self::L4 => 39,
		}
	}

	/// The number of bytes a single entry at this level covers.
	#[inline]
	#[must_use]
	pub const fn span(self) -> u64 {
		1 << self.shift()
	}

	/// The linear index of the entry covering `va` at this level.
	///
	/// Linear indices concatenate the table indices of every level
	/// above and including this one, so the entry for `va` at level
	/// `L` lives in the table pointed to by the entry at
	/// `linear_index >> 9` one level up.
	#[inline]
	#[must_use]
	pub const fn linear_index(self, va: u64) -> u64 {
		(va & VA_SIGN_POS_MASK) >> self.shift()
	}

	/// The next level up, if any.
	#[inline]
	#[must_use]
	pub const fn parent(self) -> Option<Self> {
		match self {
			Self::L1 => Some(Self::L2),
			Self::L2 => Some(Self::L3),
			Self::L3 => Some(Self::L4),
			Self::L4 => None,
		}
	}

	/// The number of entries at this level needed to cover `[start, end)`.
	///
	/// Neither bound needs to be aligned; the start is rounded down and the
	/// end rounded up to this level's span.
	#[must_use]
	pub const fn entries_for_range(self, start: u64, end: u64) -> u64 {
		let per = self.span() / PAGE_SIZE;
		let first = round_down(start / PAGE_SIZE, per);
		let last = round_up(end.div_ceil(PAGE_SIZE), per);
		(last - first) / per
	}
}

/// A raw 64-bit page-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct PageTableEntry(u64);

static_assertions::const_assert_eq!(::core::mem::size_of::<PageTableEntry>(), 8);

impl PageTableEntry {
	/// The present (valid) bit.
	pub const PRESENT: u64 = 1;
	/// The writable bit.
	pub const WRITABLE: u64 = 1 << 1;
	/// The no-execute bit.
	pub const NO_EXEC: u64 = 1 << 63;

	/// Creates an empty, non-present entry.
	#[inline]
	#[must_use]
	pub const fn new() -> Self {
		Self(0)
	}

	/// Wraps a raw entry value.
	#[inline]
	#[must_use]
	pub const fn from_raw(raw: u64) -> Self {
		Self(raw)
	}

	/// Returns the raw entry value.
	#[inline]
	#[must_use]
	pub const fn raw(self) -> u64 {
		self.0
	}

	/// Builds the entry an intermediate table slot needs: present,
	/// writable, pointing at `frame`.
	#[inline]
	#[must_use]
	pub const fn table(frame: u64) -> Self {
		Self::new().with_address(frame).with_present().with_writable()
	}

	/// Builds a present leaf entry mapping `frame` with `prot`.
	#[inline]
	#[must_use]
	pub const fn leaf(frame: u64, prot: Protection, no_exec_supported: bool) -> Self {
		Self(Self::new().with_address(frame).with_present().0 | prot.bits(no_exec_supported))
	}

	/// Checks if the entry is present.
	#[inline]
	#[must_use]
	pub const fn present(self) -> bool {
		(self.0 & Self::PRESENT) != 0
	}

	/// Sets the present flag, returning a new entry.
	#[inline]
	#[must_use]
	pub const fn with_present(self) -> Self {
		Self(self.0 | Self::PRESENT)
	}

	/// Checks if the entry is writable.
	#[inline]
	#[must_use]
	pub const fn writable(self) -> bool {
		(self.0 & Self::WRITABLE) != 0
	}

	/// Sets the writable flag, returning a new entry.
	#[inline]
	#[must_use]
	pub const fn with_writable(self) -> Self {
		Self(self.0 | Self::WRITABLE)
	}

	/// Checks if the no-execute bit is set.
	#[inline]
	#[must_use]
	pub const fn no_exec(self) -> bool {
		(self.0 & Self::NO_EXEC) != 0
	}

	/// Sets the no-execute flag, returning a new entry.
	#[inline]
	#[must_use]
	pub const fn with_no_exec(self) -> Self {
		Self(self.0 | Self::NO_EXEC)
	}

	/// Returns the frame address the entry points to.
	#[inline]
	#[must_use]
	pub const fn address(self) -> u64 {
		self.0 & FRAME_MASK
	}

	/// Replaces the frame address, returning a new entry.
	#[inline]
	#[must_use]
	pub const fn with_address(self, frame: u64) -> Self {
		Self((self.0 & !FRAME_MASK) | (frame & FRAME_MASK))
	}
}

/// Final access rights of a leaf mapping.
///
/// There is no read-write-execute combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
	/// Read-only, no-execute.
	Read,
	/// Read-write, no-execute.
	ReadWrite,
	/// Read-only, executable.
	ReadExec,
}

impl Protection {
	/// The entry bits this protection contributes on top of the
	/// present bit and frame address.
	///
	/// The no-execute bit is only emitted when the CPU supports it;
	/// setting it otherwise would be a reserved-bit fault.
	#[inline]
	#[must_use]
	pub const fn bits(self, no_exec_supported: bool) -> u64 {
		let nx = if no_exec_supported {
			PageTableEntry::NO_EXEC
		} else {
			0
		};

		match self {
			Self::Read => nx,
			Self::ReadWrite => PageTableEntry::WRITABLE | nx,
			Self::ReadExec => 0,
		}
	}
}

/// `IA32_EFER`, the extended feature enable MSR.
pub const IA32_EFER: u32 = 0xC000_0080;

/// `EFER.NXE`. While clear, a leaf with [`PageTableEntry::NO_EXEC`] set
/// is a reserved-bit fault.
pub const EFER_NXE: u64 = 1 << 11;

/// The `EFER` value under which leaves may carry the no-execute bit,
/// given the current `efer` and whether CPUID reports no-execute at all.
/// `None` if they may not.
#[inline]
#[must_use]
pub const fn efer_for_no_exec(efer: u64, cpu_has_nx: bool) -> Option<u64> {
	if cpu_has_nx { Some(efer | EFER_NXE) } else { None }
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn linear_indices_drop_sign_extension() {
		let va = 0xFFFF_FFFF_8000_0000;
		assert_eq!(Level::L4.linear_index(va), 511);
		assert_eq!(Level::L3.linear_index(va), 511 * 512 + 510);
		assert_eq!(Level::L1.linear_index(va) & 0x1FF, 0);
		assert_eq!(Level::L1.linear_index(0x1000), 1);
	}

	#[test]
	fn entry_counts_round_outward() {
		// One byte on either side of a 2MiB boundary needs two L2 entries
		// but only a single L3 entry.
		let start = 0xFFFF_FFFF_801F_FFFF;
		let end = 0xFFFF_FFFF_8020_0001;
		assert_eq!(Level::L2.entries_for_range(start, end), 2);
		assert_eq!(Level::L3.entries_for_range(start, end), 1);
		assert_eq!(Level::L1.entries_for_range(0x1000, 0x3000), 2);
		assert_eq!(Level::L1.entries_for_range(0x1001, 0x3001), 3);
	}

	#[test]
	fn protection_bits() {
		assert_eq!(Protection::Read.bits(true), PageTableEntry::NO_EXEC);
		assert_eq!(
			Protection::ReadWrite.bits(true),
			PageTableEntry::WRITABLE | PageTableEntry::NO_EXEC
		);
		assert_eq!(Protection::ReadExec.bits(true), 0);
		assert_eq!(Protection::ReadWrite.bits(false), PageTableEntry::WRITABLE);
	}

	#[test]
	fn no_exec_turns_on_nxe_and_keeps_long_mode() {
		// LME | LMA | SCE, as a 64-bit earlier stage leaves it.
		let efer = (1 << 10) | (1 << 8) | 1;
		assert_eq!(efer_for_no_exec(efer, true), Some(efer | EFER_NXE));
		assert_eq!(efer_for_no_exec(efer | EFER_NXE, true), Some(efer | EFER_NXE));
		assert_eq!(efer_for_no_exec(efer, false), None);
		assert_eq!(EFER_NXE, 0x800);
	}

	#[test]
	fn leaf_keeps_frame_separate_from_bits() {
		let pte = PageTableEntry::leaf(0x0012_3456_7000, Protection::ReadWrite, true);
		assert!(pte.present());
		assert!(pte.writable());
		assert!(pte.no_exec());
		assert_eq!(pte.address(), 0x0012_3456_7000);

		let pte = pte.with_address(0x5000);
		assert_eq!(pte.address(), 0x5000);
		assert!(pte.no_exec());
	}
}
