//! # Prekern Boot Protocol
//! Byte-exact records exchanged by the three parties of a randomized boot:
//!
//! - the earlier boot stage hands the prekern a [`BootHandoff`] and a
//!   tagged boot-info list (see [`bootinfo`]), which may carry random
//!   seed blobs (see [`seed`]);
//! - the prekern hands the kernel a [`KernelArgs`] block, which embeds
//!   the [`Bootspace`] layout record describing where every region of
//!   the kernel ended up.
//!
//! The kernel and the prekern are built independently, so every record
//! here is `#[repr(C)]` with its size pinned by a compile-time assertion.
//! Changing any of them is a protocol break.
#![cfg_attr(not(test), no_std)]

pub mod bootinfo;
pub mod seed;

/// One region of the randomized kernel image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Region {
	/// Virtual base.
	pub va: u64,
	/// Physical base.
	pub pa: u64,
	/// Size in bytes.
	pub sz: u64,
}

static_assertions::const_assert_eq!(size_of::<Region>(), 24);

impl Region {
	/// One past the last virtual address.
	#[inline]
	#[must_use]
	pub const fn end_va(&self) -> u64 {
		self.va + self.sz
	}

	/// One past the last physical address.
	#[inline]
	#[must_use]
	pub const fn end_pa(&self) -> u64 {
		self.pa + self.sz
	}

	/// Whether the region has been populated.
	#[inline]
	#[must_use]
	pub const fn is_populated(&self) -> bool {
		self.sz != 0
	}

	/// Whether `va` falls inside the region's virtual range.
	#[inline]
	#[must_use]
	pub const fn contains_va(&self, va: u64) -> bool {
		va >= self.va && va < self.end_va()
	}
}

/// Where every part of the kernel ended up.
///
/// Read by the kernel after the jump.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Bootspace {
	/// ELF header and section headers.
	pub head:       Region,
	/// Executable sections.
	pub text:       Region,
	/// Read-only sections.
	pub rodata:     Region,
	/// Writable and zero-filled sections.
	pub data:       Region,
	/// Symbol, string and relocation tables, plus everything the
	/// prekern allocated after the kernel image (page tables included).
	pub boot:       Region,
	/// A spare page-directory's worth of virtual space after the boot
	/// reservation.
	pub spare_va:   u64,
	/// Virtual address of the top-level page table.
	pub pdir_va:    u64,
	/// End of the early-module area that follows the boot region.
	pub emodule_va: u64,
}

static_assertions::const_assert_eq!(size_of::<Bootspace>(), 144);

impl Bootspace {
	/// The five regions, head first.
	#[must_use]
	pub const fn regions(&self) -> [Region; 5] {
		[self.head, self.text, self.rodata, self.data, self.boot]
	}
}

/// What the earlier boot stage tells the prekern on entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct BootHandoff {
	/// First physical byte of the kernel image.
	pub kernel_pa_start: u64,
	/// One past the last physical byte of the kernel image.
	pub kernel_pa_end:   u64,
	/// First physical byte not used by the kernel image or by the
	/// earlier stage's bootstrap page tables.
	pub first_avail:     u64,
	/// Physical address of the live top-level page table.
	pub pdir_pa:         u64,
	/// Virtual page reserved for the prekern's transient mappings.
	/// Its intermediate tables must already exist.
	pub scratch_va:      u64,
	/// Identity-mapped address of the boot-info list, or zero.
	pub bootinfo:        u64,
	/// Boot flags, passed through.
	pub boot_howto:      i32,
	/// End of the symbol table loaded by the bootloader, passed through.
	pub esym:            i32,
	/// Extended memory size in KiB, passed through.
	pub ext_mem_kib:     i32,
	/// Base memory size in KiB, passed through.
	pub base_mem_kib:    i32,
	/// Highest basic `cpuid` leaf, passed through.
	pub cpuid_level:     i32,
	/// Reserved, zero.
	pub reserved:        u32,
}

static_assertions::const_assert_eq!(size_of::<BootHandoff>(), 72);

/// The argument block the kernel entry point receives in `rdi`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct KernelArgs {
	/// The earlier stage's boot-info list.
	pub bootinfo:     u64,
	/// Final layout.
	pub bootspace:    Bootspace,
	/// Boot flags.
	pub boot_howto:   i32,
	/// End of the bootloader-loaded symbol table.
	pub esym:         i32,
	/// Extended memory size in KiB.
	pub ext_mem_kib:  i32,
	/// Base memory size in KiB.
	pub base_mem_kib: i32,
	/// Highest basic `cpuid` leaf.
	pub cpuid_level:  i32,
	/// Nonzero if leaf entries carry the no-execute bit.
	pub nx_flag:      u32,
	/// Physical address of the top-level page table.
	pub pdir_pa:      u64,
	/// Virtual base of the kernel's initial stack.
	pub stack_va:     u64,
	/// First physical byte the kernel may allocate.
	pub first_avail:  u64,
}

static_assertions::const_assert_eq!(size_of::<KernelArgs>(), 200);
static_assertions::const_assert_eq!(core::mem::offset_of!(KernelArgs, boot_howto), 152);
static_assertions::const_assert_eq!(core::mem::offset_of!(KernelArgs, pdir_pa), 176);

impl KernelArgs {
	/// Size of the block in bytes.
	pub const SIZE: usize = size_of::<Self>();

	/// The block exactly as the kernel reads it.
	#[must_use]
	pub fn as_bytes(&self) -> &[u8; Self::SIZE] {
		// SAFETY: `KernelArgs` is `repr(C)`, made only of integers, and its
		// SAFETY: size equals the sum of its fields (asserted above), so there
		// SAFETY: is no padding and every byte is initialized.
		unsafe { &*core::ptr::from_ref(self).cast::<[u8; Self::SIZE]>() }
	}

	/// Decodes a block previously produced by [`Self::as_bytes`].
	#[must_use]
	pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
		// SAFETY: Every bit pattern is a valid `KernelArgs`; the read is
		// SAFETY: unaligned since `bytes` carries no alignment guarantee.
		unsafe { core::ptr::read_unaligned(bytes.as_ptr().cast::<Self>()) }
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn region_bounds_are_half_open() {
		let r = Region {
			va: 0x1000,
			pa: 0x20_0000,
			sz: 0x2000,
		};
		assert!(r.contains_va(0x1000));
		assert!(r.contains_va(0x2FFF));
		assert!(!r.contains_va(0x3000));
		assert_eq!(r.end_pa(), 0x20_2000);
	}

	#[test]
	fn kernel_args_bytes_follow_field_offsets() {
		let args = KernelArgs {
			bootinfo: 0x5_0000,
			boot_howto: 4,
			pdir_pa: 0x20_5000,
			first_avail: 0x40_0000,
			..KernelArgs::default()
		};
		let bytes = args.as_bytes();
		assert_eq!(bytes[..8], 0x5_0000_u64.to_le_bytes());
		assert_eq!(bytes[152..156], 4_i32.to_le_bytes());
		assert_eq!(bytes[176..184], 0x20_5000_u64.to_le_bytes());
		assert_eq!(KernelArgs::from_bytes(bytes), args);
	}

	#[test]
	fn unpopulated_by_default() {
		let bs = Bootspace::default();
		assert!(bs.regions().iter().all(|r| !r.is_populated()));
	}
}
