//! The loader's global descriptor table.
//!
//! Kernel code and data, plus the TSS whose IST1 slot carries the
//! dedicated fault stack.

use core::arch::asm;

use super::tss::Tss;

/// Kernel code segment selector.
pub const KERNEL_CS: u16 = 0x08;
/// Kernel data segment selector.
pub const KERNEL_DS: u16 = 0x10;
/// Task state segment selector.
pub const TSS_SELECTOR: u16 = 0x18;

/// A global descriptor table (GDT) entry.
#[derive(Debug, Clone, Copy)]
#[repr(transparent)]
pub struct GdtEntry(u64);

// NOTE(qix-): Most fields are ignored in 64-bit mode, so
// NOTE(qix-): mutators aren't added here.
impl GdtEntry {
	/// Returns a null descriptor, used as the first
	/// entry in the GDT.
	#[must_use]
	pub const fn null_descriptor() -> Self {
		Self(0)
	}

	/// Returns the kernel code segment descriptor.
	#[must_use]
	pub const fn kernel_code_segment() -> Self {
		Self(0)
			.with_present()
			.with_accessed()
			.with_user()
			.with_long_mode()
			.with_executable()
	}

	/// Returns the kernel data segment descriptor.
	#[must_use]
	pub const fn kernel_data_segment() -> Self {
		Self(0)
			.with_present()
			.with_accessed()
			.with_user()
			.with_writable()
			.with_long_mode()
	}

	/// Returns the two halves of a 64-bit available-TSS system descriptor
	/// for the TSS at `base`.
	#[must_use]
	pub const fn tss_descriptor(base: u64) -> [Self; 2] {
		let limit = (size_of::<Tss>() - 1) as u64;
		let low = (limit & 0xFFFF)
			| ((base & 0xFF_FFFF) << 16)
			| (0x9 << 40)
			| ((limit >> 16) & 0xF) << 48
			| ((base >> 24) & 0xFF) << 56;
		[Self(low).with_present(), Self(base >> 32)]
	}

	/// Setting this flag will prevents the GDT from
	/// writing to the segment on first use.
	const fn with_accessed(self) -> Self {
		Self(self.0 | 1 << 40)
	}

	/// Setting this flag allows the segment to be
	/// written to.
	const fn with_writable(self) -> Self {
		Self(self.0 | 1 << 41)
	}

	/// Setting this flag allows the segment to be
	/// executed. Must be set for CS and unset for DS.
	const fn with_executable(self) -> Self {
		Self(self.0 | 1 << 43)
	}

	/// Must be set for code/data segments.
	const fn with_user(self) -> Self {
		Self(self.0 | 1 << 44)
	}

	/// Sets the present bit for the descriptor.
	const fn with_present(self) -> Self {
		Self(self.0 | 1 << 47)
	}

	/// Sets the long mode bit for the descriptor.
	const fn with_long_mode(self) -> Self {
		Self(self.0 | 1 << 53)
	}
}

/// Loads `gdt`, reloads every segment register and loads the task register.
///
/// `gdt` must be laid out as null, kernel code, kernel data, then the two
/// TSS descriptor halves.
///
/// # Safety
/// `gdt` and the TSS it describes must live for the rest of the boot.
pub unsafe fn install_gdt(gdt: &'static [GdtEntry; 5]) {
	/// A GDT descriptor. Used exclusively by the `lgdt` instruction.
	#[repr(C, packed(2))]
	struct GdtDescriptor {
		/// The limit. First, due to little-endian architecture.
		limit: u16,
		/// The base address of the GDT.
		base:  u64,
	}

	let gdt_descriptor = GdtDescriptor {
		limit: (size_of_val(gdt) - 1) as u16,
		base:  gdt.as_ptr() as u64,
	};

	// SAFETY: The GDT is static, and its code/data selectors match the
	// SAFETY: constants used below.
	unsafe {
		asm! {
			"lgdt [{desc}]",
			// CS can't be moved into directly; return into it instead.
			"sub rsp, 16",
			"mov qword ptr[rsp + 8], {cs}",
			"lea rax, [rip + 2f]",
			"mov qword ptr[rsp], rax",
			"retfq",
			"2:",
			"mov ax, {ds}",
			"mov ds, ax",
			"mov es, ax",
			"mov fs, ax",
			"mov gs, ax",
			"mov ss, ax",
			"mov ax, {tss}",
			"ltr ax",
			desc = in(reg) &raw const gdt_descriptor,
			cs = const KERNEL_CS,
			ds = const KERNEL_DS,
			tss = const TSS_SELECTOR,
			out("rax") _,
		};
	}
}
