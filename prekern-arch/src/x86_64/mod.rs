//! Bare-metal `x86_64` implementations of the machine seams,
//! plus the descriptor tables and control transfer the loader needs.

pub mod asm;
pub mod gdt;
pub mod idt;
pub mod tss;

mod cpu;
mod recursive;

pub use self::{cpu::X86Cpu, recursive::ActiveSpace};

/// Hands control to the kernel. Never returns.
///
/// `args` is passed in `rdi` per the System V calling convention. The stack
/// pointer is switched to `stack_top` and a null return address is pushed,
/// so the kernel sees a conventionally aligned frame with nowhere to return.
///
/// # Safety
/// `entry` must be the kernel's mapped, executable entry point, `stack_top`
/// the 16-byte aligned top of a mapped, writable stack, and `args` a pointer
/// the kernel can dereference.
pub unsafe fn jump_to_kernel(entry: u64, args: u64, stack_top: u64) -> ! {
	// SAFETY: The caller guarantees all three addresses are valid in the
	// SAFETY: current address space. Nothing after the jump returns here.
	unsafe {
		core::arch::asm!(
			"cli",
			"mov rsp, {stack}",
			"push 0",
			"jmp {entry}",
			stack = in(reg) stack_top,
			entry = in(reg) entry,
			in("rdi") args,
			options(noreturn)
		);
	}
}
