//! The prekern: loads the kernel at a random virtual address.
//!
//! The earlier boot stage leaves the kernel in physical memory as a
//! relocatable object and jumps here with a [`BootHandoff`]. The prekern
//! then
//!
//! 1. checks the handoff and starts allocating after the kernel,
//! 2. installs trap handlers so that its own bugs halt with a message,
//! 3. seeds its random generator,
//! 4. places the head, text, rodata, data and boot regions at random,
//!    non-overlapping addresses in the top of the address space,
//! 5. rebases every symbol and applies every relocation in place,
//! 6. downgrades text and rodata to their final protections,
//! 7. writes the kernel's argument block and jumps to `start`.
//!
//! Everything up to the jump is [`Prekern::load`], which runs against the
//! machine seams of `prekern-arch` and therefore also on the host under
//! test. Any failure is fatal: [`boot`] prints it and halts.
#![cfg_attr(not(test), no_std)]

pub mod console;
mod handoff;
mod loader;
pub mod logger;
pub mod trap;

use prekern_elf::ElfError;
use prekern_mm::MmError;
pub use prekern_protocol::BootHandoff;
use prekern_rng::RngError;

pub use self::{
	handoff::{HandoffError, validate},
	loader::{BOOT_MAX, BOOT_RESERVE, KIMG_L2_ENTRIES, Loaded, Prekern, STACK_PAGES},
};

/// Anything that stops the boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
	/// The earlier stage's handoff is unusable.
	#[error(transparent)]
	Handoff(#[from] HandoffError),
	/// Entropy could not be gathered.
	#[error(transparent)]
	Rng(#[from] RngError),
	/// Placement or mapping failed.
	#[error(transparent)]
	Mm(#[from] MmError),
	/// The kernel image is unusable.
	#[error(transparent)]
	Elf(#[from] ElfError),
	/// Everything allocated after the kernel does not fit the kernel's
	/// image slots.
	#[error("boot region of {size:#x} bytes exceeds {max:#x}", max = BOOT_MAX)]
	BootTooLarge {
		/// Bytes that would have been mapped.
		size: u64,
	},
}

/// Runs the loader and enters the kernel.
///
/// # Safety
/// Must be called exactly once, in ring 0 on the bootstrap processor, with
/// interrupts disabled, the recursive slot installed in the live
/// top-level table and low physical memory identity mapped.
///
/// `EFER.NXE` may be in either state: it is turned on here whenever the
/// CPU supports no-execute, before the first leaf is written.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub unsafe fn boot(handoff: &BootHandoff) -> ! {
	use prekern_arch::x86_64::{ActiveSpace, X86Cpu, jump_to_kernel};

	logger::init();
	log::info!("prekern starting");

	// SAFETY: Guaranteed by the caller; this is the only `ActiveSpace`.
	let mach = unsafe { ActiveSpace::new() };
	// SAFETY: Ring 0 per the caller.
	let cpu = unsafe { X86Cpu::detect() };
	let mut prekern = match Prekern::new(mach, cpu, *handoff) {
		Ok(prekern) => prekern,
		Err(err) => fatal(&err),
	};

	// SAFETY: Called once, single core, interrupts off.
	unsafe {
		trap::install();
	}

	match prekern.load() {
		Ok(loaded) => {
			log::info!("entering kernel at {:#018x}", loaded.entry);
			// SAFETY: The entry was resolved inside the text region, the
			// SAFETY: stack and argument block are mapped in the boot region.
			unsafe { jump_to_kernel(loaded.entry, loaded.args_va, loaded.stack_top) }
		}
		Err(err) => fatal(&err),
	}
}

/// Prints `err` and halts forever.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
#[cold]
pub fn fatal(err: &Error) -> ! {
	log::error!("{err}");
	prekern_arch::x86_64::asm::halt_forever()
}

/// Panic handler for the prekern.
///
/// # Safety
/// Do **NOT** call this function directly.
/// It is only called by the architecture-specific binaries.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
#[cold]
pub unsafe fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
	// SAFETY: A panic never returns to whatever held the console.
	unsafe {
		logger::take_over();
	}
	log::error!("panic: {info}");
	prekern_arch::x86_64::asm::halt_forever()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn errors_print_their_source() {
		let err = Error::from(ElfError::EntryMissing);
		assert_eq!(err.to_string(), "entry point not found");
		let err = Error::from(MmError::PlacementExhausted(4096));
		assert_eq!(
			err.to_string(),
			"no free virtual range found after 4096 attempts"
		);
	}

	#[test]
	fn boot_too_large_names_the_limit() {
		let err = Error::BootTooLarge { size: 0x700_0000 };
		assert_eq!(
			err.to_string(),
			"boot region of 0x7000000 bytes exceeds 0x6000000"
		);
	}
}
