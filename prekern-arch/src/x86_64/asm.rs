//! Assembly instruction stubs for the x86_64 architecture.
#![expect(clippy::inline_always)]

use core::arch::asm;

/// Invalidates a single page in the Translation Lookaside Buffer (TLB)
/// given a `virtual_address`.
#[inline(always)]
pub fn invlpg(virtual_address: u64) {
	// SAFETY: Invalidating a translation has no effect other than
	// SAFETY: forcing the next access to re-walk the tables.
	unsafe {
		asm!(
			"invlpg [{}]",
			in(reg) virtual_address,
			options(nostack, preserves_flags)
		);
	}
}

/// Reads the time-stamp counter, serialized against earlier loads.
#[inline(always)]
#[must_use]
pub fn rdtsc() -> u64 {
	let lo: u32;
	let hi: u32;
	// SAFETY: `rdtsc` is available on every x86_64 CPU and has no side effects.
	unsafe {
		asm!(
			"lfence",
			"rdtsc",
			out("eax") lo,
			out("edx") hi,
			options(nomem, nostack, preserves_flags)
		);
	}
	(u64::from(hi) << 32) | u64::from(lo)
}

/// Draws a 64-bit word from `rdrand`. Returns `None` if the CPU
/// reported the draw as failed (carry clear).
///
/// Must only be called after checking [`cpuid`] leaf 1, ECX bit 30.
#[inline(always)]
#[must_use]
pub fn rdrand64() -> Option<u64> {
	let value: u64;
	let ok: u8;
	// SAFETY: Callers check for `rdrand` support before calling.
	unsafe {
		asm!(
			"rdrand {value}",
			"setc {ok}",
			value = out(reg) value,
			ok = out(reg_byte) ok,
			options(nomem, nostack)
		);
	}
	(ok != 0).then_some(value)
}

/// The four output registers of a `cpuid` query.
#[derive(Debug, Clone, Copy)]
#[expect(missing_docs)]
pub struct CpuidResult {
	pub eax: u32,
	pub ebx: u32,
	pub ecx: u32,
	pub edx: u32,
}

/// Executes `cpuid` for `leaf` / `subleaf`.
#[inline(always)]
#[must_use]
pub fn cpuid(leaf: u32, subleaf: u32) -> CpuidResult {
	let eax: u32;
	let rbx: u64;
	let ecx: u32;
	let edx: u32;
	// SAFETY: `cpuid` is unprivileged and side-effect free. RBX is reserved
	// SAFETY: by LLVM, so it is shuffled through a scratch register.
	unsafe {
		asm!(
			"mov {tmp}, rbx",
			"cpuid",
			"xchg {tmp}, rbx",
			tmp = out(reg) rbx,
			inout("eax") leaf => eax,
			inout("ecx") subleaf => ecx,
			out("edx") edx,
			options(nomem, nostack, preserves_flags)
		);
	}
	CpuidResult {
		eax,
		ebx: rbx as u32,
		ecx,
		edx,
	}
}

/// Reads the model-specific register `msr`.
///
/// # Safety
/// Ring 0 only, and `msr` must exist on this CPU.
#[inline(always)]
#[must_use]
pub unsafe fn rdmsr(msr: u32) -> u64 {
	let lo: u32;
	let hi: u32;
	// SAFETY: Guaranteed by the caller.
	unsafe {
		asm!(
			"rdmsr",
			in("ecx") msr,
			out("eax") lo,
			out("edx") hi,
			options(nomem, nostack, preserves_flags)
		);
	}
	(u64::from(hi) << 32) | u64::from(lo)
}

/// Writes `value` to the model-specific register `msr`.
///
/// # Safety
/// Ring 0 only, `msr` must exist on this CPU and `value` must be valid
/// for it.
#[inline(always)]
pub unsafe fn wrmsr(msr: u32, value: u64) {
	// SAFETY: Guaranteed by the caller.
	unsafe {
		asm!(
			"wrmsr",
			in("ecx") msr,
			in("eax") value as u32,
			in("edx") (value >> 32) as u32,
			options(nostack, preserves_flags)
		);
	}
}

/// Halts the CPU forever with interrupts disabled.
#[inline(always)]
pub fn halt_forever() -> ! {
	loop {
		// SAFETY: Inline assembly is required to halt the CPU.
		unsafe {
			asm!("cli", "hlt", options(nomem, nostack));
		}
	}
}
