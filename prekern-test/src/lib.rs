//! Host-side stand-ins for the machine the prekern runs on.
//!
//! [`SimMachine`] is a sparse physical memory with a real four-level
//! page walk; it panics wherever the hardware would fault. [`ScriptedCpu`]
//! replaces the CPU leaves with deterministic, observable ones.
//! [`ElfBuilder`] and [`BootInfoBuilder`] produce the byte images the
//! earlier boot stage would have left in memory.
#![expect(
	clippy::missing_panics_doc,
	clippy::panic,
	reason = "test utilities panic on misuse by design"
)]

mod bootinfo;
mod cpu;
mod elf;
mod sim;

use prekern_protocol::BootHandoff;

pub use self::{
	bootinfo::{BootInfoBuilder, seed_blob_bytes},
	cpu::ScriptedCpu,
	elf::{BuiltElf, ElfBuilder, SectionId, SectionKind, SymbolId, SymbolKind},
	sim::{IDENTITY_LIMIT, SCRATCH_VA, SimMachine, TABLE_PAGES},
};

/// Where [`boot_environment`] loads the kernel image.
pub const KERNEL_PA: u64 = 0x20_0000;

/// Where [`boot_environment`] loads the boot-info list.
pub const BOOTINFO_PA: u64 = 0x5_0000;

/// Lays out memory the way the earlier boot stage would: the kernel image
/// at [`KERNEL_PA`], the bootstrap tables right after it, and the optional
/// boot-info list at [`BOOTINFO_PA`].
#[must_use]
pub fn boot_environment(image: &[u8], bootinfo: Option<&[u8]>) -> (SimMachine, BootHandoff) {
	assert!(image.len() % 4096 == 0, "kernel image must be page sized");

	let kernel_end = KERNEL_PA + image.len() as u64;
	let mut sim = SimMachine::with_tables_at(kernel_end);
	sim.load(KERNEL_PA, image);
	if let Some(list) = bootinfo {
		sim.load(BOOTINFO_PA, list);
	}

	let handoff = BootHandoff {
		kernel_pa_start: KERNEL_PA,
		kernel_pa_end: kernel_end,
		first_avail: kernel_end + TABLE_PAGES * 4096,
		pdir_pa: sim.root(),
		scratch_va: SCRATCH_VA,
		bootinfo: if bootinfo.is_some() { BOOTINFO_PA } else { 0 },
		boot_howto: 0x4,
		esym: 0,
		ext_mem_kib: 0x3_FC00,
		base_mem_kib: 639,
		cpuid_level: 0xD,
		reserved: 0,
	};

	(sim, handoff)
}
