//! Bare-metal entry point of the prekern on `x86_64`.
#![no_std]
#![no_main]

use core::{arch::global_asm, cell::UnsafeCell};

use prekern_protocol::BootHandoff;

/// Size of the stack the prekern itself runs on.
const BOOT_STACK_SIZE: usize = 64 * 1024;

/// The prekern's own stack.
#[repr(C, align(16))]
struct BootStack(UnsafeCell<[u8; BOOT_STACK_SIZE]>);

// SAFETY: Only ever touched by the CPU through `rsp`.
unsafe impl Sync for BootStack {}

/// Backing for `rsp` from `_start` onward.
static BOOT_STACK: BootStack = BootStack(UnsafeCell::new([0; BOOT_STACK_SIZE]));

// The bootloader jumps here with interrupts off and a pointer to the
// handoff record in `rdi`, which is passed through untouched.
global_asm! {
	".section .text.entry, \"ax\"",
	".global _start",
	"_start:",
	"cli",
	"cld",
	"lea rsp, [rip + {stack} + {size}]",
	"xor ebp, ebp",
	"call {main}",
	"ud2",
	stack = sym BOOT_STACK,
	size = const BOOT_STACK_SIZE,
	main = sym main,
}

/// Panic handler for the prekern.
#[inline(never)]
#[cold]
#[panic_handler]
fn panic(info: &::core::panic::PanicInfo<'_>) -> ! {
	// SAFETY: This is the architecture-specific panic handler, the
	// SAFETY: only allowed place to call this function.
	unsafe { ::prekern::panic(info) }
}

/// Runs the loader on the prekern's own stack.
///
/// # Safety
/// Do **NOT** call this function directly. It is only called by `_start`.
#[inline(never)]
#[cold]
unsafe extern "C" fn main(handoff: *const BootHandoff) -> ! {
	// SAFETY: The bootloader passes a valid, identity-mapped handoff record
	// SAFETY: that outlives the prekern.
	unsafe { ::prekern::boot(&*handoff) }
}
