//! Descriptor tables, exception stubs and the fatal handler.

use core::{arch::global_asm, cell::UnsafeCell};

use prekern_arch::x86_64::{
	asm::halt_forever,
	gdt::{GdtEntry, install_gdt},
	idt::{IdtEntry, install_idt},
	tss::Tss,
};

use super::{TrapFrame, VECTORS};

/// Size of the dedicated fault stack.
const FAULT_STACK_SIZE: usize = 16 * 1024;

/// Distance between consecutive stubs.
const STUB_SIZE: u64 = 16;

/// IST slot the fault stack is installed in.
const FAULT_IST: u8 = 1;

/// The stack every exception switches to.
#[repr(C, align(16))]
struct FaultStack(UnsafeCell<[u8; FAULT_STACK_SIZE]>);

// SAFETY: Only ever touched by the CPU through `rsp`.
unsafe impl Sync for FaultStack {}

/// Backing for IST1.
static FAULT_STACK: FaultStack = FaultStack(UnsafeCell::new([0; FAULT_STACK_SIZE]));

/// The task state segment; only its IST1 slot is used.
static TSS: spin::Once<Tss> = spin::Once::new();
/// Null, kernel code, kernel data, then the TSS descriptor.
static GDT: spin::Once<[GdtEntry; 5]> = spin::Once::new();
/// One interrupt gate per exception vector.
static IDT: spin::Once<[IdtEntry; VECTORS]> = spin::Once::new();

unsafe extern "C" {
	/// First of [`VECTORS`] stubs, each [`STUB_SIZE`] bytes apart.
	fn prekern_isr_stubs();
}

// Every stub is 16-byte aligned and leaves `vector, error` on the stack;
// the ones whose vector has no error code push a zero in its place.
global_asm! {
	".macro ISR_NOERR vector",
	"	.balign {stub}",
	"	push 0",
	"	push \\vector",
	"	jmp prekern_isr_common",
	".endm",
	".macro ISR_ERR vector",
	"	.balign {stub}",
	"	push \\vector",
	"	jmp prekern_isr_common",
	".endm",
	"",
	".section .text",
	".balign {stub}",
	".global prekern_isr_stubs",
	"prekern_isr_stubs:",
	"ISR_NOERR 0",
	"ISR_NOERR 1",
	"ISR_NOERR 2",
	"ISR_NOERR 3",
	"ISR_NOERR 4",
	"ISR_NOERR 5",
	"ISR_NOERR 6",
	"ISR_NOERR 7",
	"ISR_ERR 8",
	"ISR_NOERR 9",
	"ISR_ERR 10",
	"ISR_ERR 11",
	"ISR_ERR 12",
	"ISR_ERR 13",
	"ISR_ERR 14",
	"ISR_NOERR 15",
	"ISR_NOERR 16",
	"ISR_ERR 17",
	"ISR_NOERR 18",
	"ISR_NOERR 19",
	"ISR_NOERR 20",
	"ISR_ERR 21",
	"ISR_NOERR 22",
	"ISR_NOERR 23",
	"ISR_NOERR 24",
	"ISR_NOERR 25",
	"ISR_NOERR 26",
	"ISR_NOERR 27",
	"ISR_NOERR 28",
	"ISR_ERR 29",
	"ISR_ERR 30",
	"ISR_NOERR 31",
	"",
	"prekern_isr_common:",
	"	mov rdi, rsp",
	"	and rsp, -16",
	"	call {handler}",
	"	ud2",
	stub = const STUB_SIZE,
	handler = sym prekern_trap,
}

/// Loads the GDT, TSS and IDT.
///
/// # Safety
/// Must be called once, on the bootstrap processor, with interrupts
/// disabled.
pub unsafe fn install() {
	let tss = TSS.call_once(|| {
		Tss::with_ist(FAULT_IST, FAULT_STACK.0.get() as u64 + FAULT_STACK_SIZE as u64)
	});

	let gdt = GDT.call_once(|| {
		let [tss_low, tss_high] = GdtEntry::tss_descriptor(core::ptr::from_ref(tss) as u64);
		[
			GdtEntry::null_descriptor(),
			GdtEntry::kernel_code_segment(),
			GdtEntry::kernel_data_segment(),
			tss_low,
			tss_high,
		]
	});

	let idt = IDT.call_once(|| {
		let stubs = prekern_isr_stubs as usize as u64;
		core::array::from_fn(|vector| {
			// SAFETY: Each address is the start of one of the stubs above.
			unsafe { IdtEntry::interrupt_gate(stubs + vector as u64 * STUB_SIZE, FAULT_IST) }
		})
	});

	// SAFETY: The tables are static and fully built; the caller guarantees
	// SAFETY: we are single threaded with interrupts off.
	unsafe {
		install_gdt(gdt);
		install_idt(idt);
	}

	log::debug!("traps installed, fault stack at {:#x}", FAULT_STACK.0.get() as u64);
}

/// Reports an exception and halts.
#[unsafe(no_mangle)]
extern "C" fn prekern_trap(frame: *const TrapFrame) -> ! {
	// SAFETY: The common stub passes the frame it just built on the fault
	// SAFETY: stack, and this path never returns to whatever held the console.
	let frame = unsafe {
		crate::logger::take_over();
		&*frame
	};
	log::error!("{frame}");
	halt_forever()
}
