//! Interrupt gates for the exceptions the loader catches.

use core::arch::asm;

use super::gdt::KERNEL_CS;

/// One 16-byte gate descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C, packed)]
pub struct IdtEntry {
	/// Handler bits 0..16.
	offset_low:  u16,
	/// Code segment the handler runs in.
	selector:    u16,
	/// Interrupt stack table slot, 0 for none.
	ist:         u8,
	/// Present bit, privilege and gate type.
	type_attr:   u8,
	/// Handler bits 16..32.
	offset_mid:  u16,
	/// Handler bits 32..64.
	offset_high: u32,
	/// Must be zero.
	_zero:       u32,
}

static_assertions::const_assert_eq!(size_of::<IdtEntry>(), 16);

impl IdtEntry {
	/// Present, DPL 0, 64-bit interrupt gate (interrupts stay masked).
	const INTERRUPT_GATE: u8 = 0x8E;

	/// An interrupt gate to `handler` in the loader's code segment,
	/// switching to IST slot `ist` (1-7, or 0 to stay on the current stack).
	///
	/// # Safety
	/// `handler` must be the address of code that can take the exception
	/// frame this gate produces.
	#[must_use]
	pub const unsafe fn interrupt_gate(handler: u64, ist: u8) -> Self {
		Self {
			offset_low:  handler as u16,
			selector:    KERNEL_CS,
			ist:         ist & 0x7,
			type_attr:   Self::INTERRUPT_GATE,
			offset_mid:  (handler >> 16) as u16,
			offset_high: (handler >> 32) as u32,
			_zero:       0,
		}
	}
}

/// Points `lidt` at `idt`.
///
/// # Safety
/// Every present gate in `idt` must lead to a valid handler, and no
/// exception may be taken while the table is half built.
pub unsafe fn install_idt(idt: &'static [IdtEntry]) {
	/// Operand of `lidt`.
	#[repr(C, packed)]
	struct Pointer {
		/// Table size in bytes, minus one.
		limit: u16,
		/// First gate.
		base:  *const IdtEntry,
	}

	debug_assert!(
		!idt.is_empty() && idt.len() <= 256,
		"an IDT holds 1 to 256 gates"
	);

	let pointer = Pointer {
		limit: (size_of_val(idt) - 1) as u16,
		base:  idt.as_ptr(),
	};

	// SAFETY: The table is 'static and its gates are valid per the caller.
	unsafe {
		asm!(
			"lidt [{}]",
			in(reg) &raw const pointer,
			options(nostack, preserves_flags)
		);
	}
}
