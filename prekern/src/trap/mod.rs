//! Catches CPU exceptions while the loader runs.
//!
//! Nothing is recovered: every exception prints what happened and halts,
//! so that a loader bug shows up as a message rather than a triple fault.

use core::fmt;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
mod x86_64;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub use self::x86_64::install;

/// Number of architecturally defined exception vectors.
pub const VECTORS: usize = 32;

/// Exceptions that push an error code.
pub const HAS_ERROR_CODE: [u8; 10] = [8, 10, 11, 12, 13, 14, 17, 21, 29, 30];

/// What the stubs leave on the fault stack, lowest address first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct TrapFrame {
	/// Vector number, pushed by the stub.
	pub vector: u64,
	/// Error code; zero for vectors without one.
	pub error:  u64,
	/// Faulting instruction.
	pub rip:    u64,
	/// Code segment.
	pub cs:     u64,
	/// Flags.
	pub rflags: u64,
	/// Interrupted stack pointer.
	pub rsp:    u64,
	/// Stack segment.
	pub ss:     u64,
}

/// Mnemonic and description of `vector`.
#[must_use]
pub const fn exception_name(vector: u64) -> (&'static str, &'static str) {
	match vector {
		0 => ("#DE", "divide error"),
		1 => ("#DB", "debug"),
		2 => ("NMI", "non-maskable interrupt"),
		3 => ("#BP", "breakpoint"),
		4 => ("#OF", "overflow"),
		5 => ("#BR", "bound range exceeded"),
		6 => ("#UD", "invalid opcode"),
		7 => ("#NM", "device not available"),
		8 => ("#DF", "double fault"),
		9 => ("#CSO", "coprocessor segment overrun"),
		10 => ("#TS", "invalid TSS"),
		11 => ("#NP", "segment not present"),
		12 => ("#SS", "stack-segment fault"),
		13 => ("#GP", "general protection fault"),
		14 => ("#PF", "page fault"),
		16 => ("#MF", "x87 floating-point error"),
		17 => ("#AC", "alignment check"),
		18 => ("#MC", "machine check"),
		19 => ("#XM", "SIMD floating-point error"),
		20 => ("#VE", "virtualization exception"),
		21 => ("#CP", "control protection"),
		28 => ("#HV", "hypervisor injection"),
		29 => ("#VC", "VMM communication"),
		30 => ("#SX", "security exception"),
		_ => ("#??", "reserved"),
	}
}

impl fmt::Display for TrapFrame {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let (mnemonic, name) = exception_name(self.vector);
		write!(
			f,
			"trap {mnemonic} ({name}, vector {}), error {:#x}, rip {:#018x}",
			self.vector, self.error, self.rip
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn frame_layout_matches_the_stubs() {
		assert_eq!(size_of::<TrapFrame>(), 7 * 8);
		assert_eq!(core::mem::offset_of!(TrapFrame, rip), 16);
	}

	#[test]
	fn report_names_the_exception() {
		let frame = TrapFrame {
			vector: 14,
			error:  0x2,
			rip:    0xFFFF_FFFF_8000_1234,
			cs:     0x08,
			rflags: 0x2,
			rsp:    0,
			ss:     0x10,
		};
		assert_eq!(
			frame.to_string(),
			"trap #PF (page fault, vector 14), error 0x2, rip 0xffffffff80001234"
		);
	}

	#[test]
	fn reserved_vectors_still_report() {
		assert_eq!(exception_name(15).1, "reserved");
		assert_eq!(exception_name(31).0, "#??");
		assert!(HAS_ERROR_CODE.iter().all(|&v| exception_name(u64::from(v)).1 != "reserved"));
	}
}
