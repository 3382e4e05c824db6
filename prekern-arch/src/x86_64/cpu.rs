use super::asm;
use crate::{
	Cpu,
	paging::{IA32_EFER, efer_for_no_exec},
};

/// The bootstrap processor, with its feature bits read once.
#[derive(Debug, Clone, Copy)]
pub struct X86Cpu {
	/// `rdrand` is available.
	rdrand: bool,
	/// `EFER.NXE` is set, so leaves may carry the no-execute bit.
	no_exec: bool,
}

impl X86Cpu {
	/// Reads the CPU's feature bits and, if the CPU supports no-execute,
	/// turns on `EFER.NXE` so that leaves may carry the bit.
	///
	/// # Safety
	/// Must run in ring 0.
	#[must_use]
	pub unsafe fn detect() -> Self {
		let rdrand = asm::cpuid(1, 0).ecx & (1 << 30) != 0;
		let cpu_has_nx = asm::cpuid(0x8000_0000, 0).eax >= 0x8000_0001
			&& asm::cpuid(0x8000_0001, 0).edx & (1 << 20) != 0;

		// SAFETY: Ring 0 per the caller; EFER exists on every x86_64 CPU.
		let efer = unsafe { asm::rdmsr(IA32_EFER) };
		let no_exec = match efer_for_no_exec(efer, cpu_has_nx) {
			Some(wanted) => {
				if wanted != efer {
					// SAFETY: Only NXE changes, which CPUID says is supported.
					unsafe { asm::wrmsr(IA32_EFER, wanted) };
				}
				true
			}
			None => false,
		};

		Self { rdrand, no_exec }
	}
}

impl Cpu for X86Cpu {
	#[inline]
	fn cycle_counter(&self) -> u64 {
		asm::rdtsc()
	}

	#[inline]
	fn has_hw_rng(&self) -> bool {
		self.rdrand
	}

	#[inline]
	fn hw_rng(&self) -> Option<u64> {
		if self.rdrand { asm::rdrand64() } else { None }
	}

	#[inline]
	fn has_no_exec(&self) -> bool {
		self.no_exec
	}

	#[inline]
	fn invalidate(&self, va: u64) {
		asm::invlpg(va);
	}
}
