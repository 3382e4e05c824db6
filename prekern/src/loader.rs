//! The load sequence, from a validated handoff to a relocated kernel.

use prekern_arch::{
	Cpu, PageTables, Protection, VirtMemory,
	paging::{Level, PAGE_SIZE},
};
use prekern_elf::{ElfImage, SegmentClass, head_size};
use prekern_mm::{AddressSpace, HEAD_WINDOW, KASLR_WINDOW, Placer};
use prekern_protocol::{BootHandoff, Bootspace, KernelArgs, Region};
use prekern_rng::{Rng, SeedBlobs};

use crate::{Error, handoff};

/// Pages of kernel stack handed to the kernel.
pub const STACK_PAGES: u64 = 4;

/// Large-page slots the kernel reserves for its own image.
pub const KIMG_L2_ENTRIES: u64 = 48;

/// Virtual space reserved for the boot region: the kernel image slots
/// plus one spare page directory's worth.
pub const BOOT_RESERVE: u64 = (KIMG_L2_ENTRIES + 1) * Level::L2.span();

/// Most the boot region may actually populate.
pub const BOOT_MAX: u64 = KIMG_L2_ENTRIES * Level::L2.span();

/// Where the kernel was put and how to enter it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Loaded {
	/// Resolved entry point.
	pub entry:     u64,
	/// Virtual address of the argument block.
	pub args_va:   u64,
	/// Top of the kernel stack.
	pub stack_top: u64,
	/// The argument block as written.
	pub args:      KernelArgs,
}

/// One boot attempt.
#[derive(Debug)]
pub struct Prekern<M, C> {
	/// The address space being built.
	space:   AddressSpace<M, C>,
	/// What the earlier stage handed over.
	handoff: BootHandoff,
}

impl<M: PageTables + VirtMemory, C: Cpu + Clone> Prekern<M, C> {
	/// Validates the handoff and takes over the machine, allocating from
	/// the handoff's first free page.
	pub fn new(mach: M, cpu: C, handoff: BootHandoff) -> Result<Self, Error> {
		handoff::validate(&handoff)?;
		log::debug!(
			"kernel at {:#x}..{:#x}, first free {:#x}",
			handoff.kernel_pa_start,
			handoff.kernel_pa_end,
			handoff.first_avail
		);

		Ok(Self {
			space: AddressSpace::new(mach, cpu, handoff.first_avail, handoff.scratch_va),
			handoff,
		})
	}

	/// The address space being built.
	pub fn space(&self) -> &AddressSpace<M, C> {
		&self.space
	}

	/// Places, maps and relocates the kernel, then writes its argument
	/// block. The kernel is ready to be entered once this returns.
	pub fn load(&mut self) -> Result<Loaded, Error> {
		let h = self.handoff;

		let mut rng = Rng::new(
			self.space.cpu().clone(),
			SeedBlobs::new(self.space.mem(), h.bootinfo),
		)?;
		log::info!("entropy initialized");

		let mut bootspace = Bootspace::default();

		// Head: file header and section headers, in a window of its own.
		let image_sz = h.kernel_pa_end - h.kernel_pa_start;
		let head_sz = head_size(self.space.mem(), h.kernel_pa_start, image_sz)?;
		let head_va =
			Placer::new(HEAD_WINDOW).place(&mut self.space, &mut rng, head_sz, PAGE_SIZE)?;
		self.space
			.enter_range(h.kernel_pa_start, head_va, head_sz, Protection::ReadWrite)?;
		let mut image = ElfImage::new(self.space.mem(), head_va, h.kernel_pa_start, image_sz)?;
		bootspace.head = Region {
			va: head_va,
			pa: h.kernel_pa_start,
			sz: head_sz,
		};
		log::info!("head mapped at {head_va:#018x}");

		// Segments. The boot region starts where the last one ends.
		let mut placer = Placer::new(KASLR_WINDOW);
		let mut boot_pa = h.kernel_pa_start + head_sz;
		for class in SegmentClass::ALL {
			let region = if let Some(seg) = image.segment(self.space.mem(), class)? {
				let va = placer.place(&mut self.space, &mut rng, seg.size, seg.align)?;
				self.space
					.enter_range(seg.pa, va, seg.size, Protection::ReadWrite)?;
				image.assign_segment(self.space.mem_mut(), class, seg, va)?;
				boot_pa = boot_pa.max(seg.pa + seg.size);
				Region {
					va,
					pa: seg.pa,
					sz: seg.size,
				}
			} else {
				let pa = self.space.allocate(1);
				let va = placer.place(&mut self.space, &mut rng, PAGE_SIZE, PAGE_SIZE)?;
				self.space
					.enter_range(pa, va, PAGE_SIZE, Protection::ReadWrite)?;
				Region {
					va,
					pa,
					sz: PAGE_SIZE,
				}
			};
			*class_region(&mut bootspace, class) = region;
		}
		log::info!("segments mapped");

		// Allocated before the boot region is sized so that both land
		// inside it.
		let stack_pa = self.space.allocate(STACK_PAGES);
		let args_pa = self.space.allocate(1);

		// Placing builds the tables under the reservation, so the boot
		// region is sized only afterwards.
		let boot_va = placer.place(&mut self.space, &mut rng, BOOT_RESERVE, PAGE_SIZE)?;
		let boot_sz = self.space.mark() - boot_pa;
		if boot_sz > BOOT_MAX {
			return Err(Error::BootTooLarge { size: boot_sz });
		}
		self.space
			.enter_range(boot_pa, boot_va, boot_sz, Protection::ReadWrite)?;
		image.build_boot(self.space.mem_mut(), boot_va, boot_pa, boot_sz)?;
		bootspace.boot = Region {
			va: boot_va,
			pa: boot_pa,
			sz: boot_sz,
		};
		bootspace.spare_va = boot_va + BOOT_MAX;
		bootspace.pdir_va = boot_va + (h.pdir_pa - boot_pa);
		bootspace.emodule_va = boot_va + BOOT_MAX;
		log::info!("boot region mapped at {boot_va:#018x}");

		let rebased = image.rebase_symbols(self.space.mem_mut())?;
		let relocated = image.relocate(self.space.mem_mut())?;
		let entry = image.entry_point(self.space.mem())?;
		log::info!("{rebased} symbol(s) rebased, {relocated} relocation(s) applied");

		self.space
			.reprotect_range(bootspace.text.va, bootspace.text.sz, Protection::ReadExec);
		self.space
			.reprotect_range(bootspace.rodata.va, bootspace.rodata.sz, Protection::Read);
		log::info!("protections applied");

		let stack_va = boot_va + (stack_pa - boot_pa);
		let args_va = boot_va + (args_pa - boot_pa);
		let args = KernelArgs {
			bootinfo: h.bootinfo,
			bootspace,
			boot_howto: h.boot_howto,
			esym: h.esym,
			ext_mem_kib: h.ext_mem_kib,
			base_mem_kib: h.base_mem_kib,
			cpuid_level: h.cpuid_level,
			nx_flag: u32::from(self.space.no_exec()),
			pdir_pa: h.pdir_pa,
			stack_va,
			first_avail: self.space.mark(),
		};
		self.space.mem_mut().write(args_va, args.as_bytes());

		Ok(Loaded {
			entry,
			args_va,
			stack_top: stack_va + STACK_PAGES * PAGE_SIZE,
			args,
		})
	}
}

/// The layout record's slot for `class`.
fn class_region(bootspace: &mut Bootspace, class: SegmentClass) -> &mut Region {
	match class {
		SegmentClass::Text => &mut bootspace.text,
		SegmentClass::Rodata => &mut bootspace.rodata,
		SegmentClass::Data => &mut bootspace.data,
	}
}

#[cfg(test)]
mod tests {
	use prekern_test::{ElfBuilder, ScriptedCpu, SectionKind, SimMachine, SymbolKind, boot_environment};

	use super::*;

	fn prekern<'c>(b: &ElfBuilder, cpu: &'c ScriptedCpu) -> Prekern<SimMachine, &'c ScriptedCpu> {
		let (sim, handoff) = boot_environment(&b.build().bytes, None);
		Prekern::new(sim, cpu, handoff).unwrap()
	}

	fn text_only() -> ElfBuilder {
		let mut b = ElfBuilder::new();
		let text = b.section(".text", SectionKind::Text, &[0xC3; 32], 16);
		b.symbol("start", text, 0, SymbolKind::Func);
		b
	}

	#[test]
	fn reservation_geometry() {
		assert_eq!(BOOT_MAX, 48 * 0x20_0000);
		assert_eq!(BOOT_RESERVE, BOOT_MAX + 0x20_0000);
	}

	#[test]
	fn empty_classes_get_a_zeroed_page() {
		let cpu = ScriptedCpu::new();
		let mut p = prekern(&text_only(), &cpu);
		let loaded = p.load().unwrap();

		let bs = loaded.args.bootspace;
		for region in [bs.rodata, bs.data] {
			assert_eq!(region.sz, PAGE_SIZE);
			assert_eq!(p.space().mem().translate(region.va), Some(region.pa));
			assert_eq!(p.space().mem().read_u64(region.va), 0);
		}
	}

	#[test]
	fn stack_and_args_live_in_the_boot_region() {
		let cpu = ScriptedCpu::new();
		let mut p = prekern(&text_only(), &cpu);
		let loaded = p.load().unwrap();

		let boot = loaded.args.bootspace.boot;
		assert!(boot.contains_va(loaded.args.stack_va));
		assert!(boot.contains_va(loaded.stack_top - 1));
		assert!(boot.contains_va(loaded.args_va));
		assert_eq!(loaded.stack_top % 16, 0);
		// Nothing was allocated after the boot region was sized.
		assert_eq!(boot.end_pa(), loaded.args.first_avail);
	}

	#[test]
	fn argument_block_is_written_and_inherits_the_handoff() {
		let cpu = ScriptedCpu::new();
		let b = text_only();
		let (sim, handoff) = boot_environment(&b.build().bytes, None);
		let mut p = Prekern::new(sim, &cpu, handoff).unwrap();
		let loaded = p.load().unwrap();

		let mut bytes = [0; KernelArgs::SIZE];
		p.space().mem().read(loaded.args_va, &mut bytes);
		let args = KernelArgs::from_bytes(&bytes);
		assert_eq!(args, loaded.args);
		assert_eq!(args.boot_howto, handoff.boot_howto);
		assert_eq!(args.ext_mem_kib, handoff.ext_mem_kib);
		assert_eq!(args.base_mem_kib, handoff.base_mem_kib);
		assert_eq!(args.cpuid_level, handoff.cpuid_level);
		assert_eq!(args.pdir_pa, handoff.pdir_pa);
		assert_eq!(args.nx_flag, 1);
	}

	#[test]
	fn derived_addresses_follow_the_boot_region() {
		let cpu = ScriptedCpu::new();
		let b = text_only();
		let (sim, handoff) = boot_environment(&b.build().bytes, None);
		let mut p = Prekern::new(sim, &cpu, handoff).unwrap();
		let bs = p.load().unwrap().args.bootspace;

		assert_eq!(bs.spare_va, bs.boot.va + BOOT_MAX);
		assert_eq!(bs.emodule_va, bs.boot.va + BOOT_MAX);
		assert_eq!(bs.pdir_va, bs.boot.va + (handoff.pdir_pa - bs.boot.pa));
		// The live top-level table is readable where the kernel will look.
		assert_eq!(
			p.space().mem().translate(bs.pdir_va),
			Some(handoff.pdir_pa)
		);
	}

	#[test]
	fn oversized_boot_region_is_refused() {
		let bytes = text_only().build().bytes;

		// The same entropy places the boot region at the same address.
		let cpu = ScriptedCpu::new();
		let (sim, handoff) = boot_environment(&bytes, None);
		let mut p = Prekern::new(sim, &cpu, handoff).unwrap();
		let boot_va = p.load().unwrap().args.bootspace.boot.va;

		// The earlier stage used up more than the kernel's image slots.
		let cpu = ScriptedCpu::new();
		let (sim, handoff) = boot_environment(&bytes, None);
		let crowded = BootHandoff {
			first_avail: handoff.first_avail + BOOT_MAX,
			..handoff
		};
		let mut p = Prekern::new(sim, &cpu, crowded).unwrap();
		assert!(matches!(
			p.load(),
			Err(Error::BootTooLarge { size }) if size > BOOT_MAX
		));
		assert_eq!(p.space().mem().translate(boot_va), None);
	}

	#[test]
	fn final_protections() {
		let cpu = ScriptedCpu::new();
		let mut b = text_only();
		b.section(".rodata", SectionKind::Rodata, &[1; 16], 8);
		b.section(".data", SectionKind::Data, &[2; 16], 8);
		let mut p = prekern(&b, &cpu);
		let bs = p.load().unwrap().args.bootspace;

		let leaf = |va| p.space().mem().leaf(va).unwrap();
		assert!(!leaf(bs.text.va).writable() && !leaf(bs.text.va).no_exec());
		assert!(!leaf(bs.rodata.va).writable() && leaf(bs.rodata.va).no_exec());
		assert!(leaf(bs.data.va).writable() && leaf(bs.data.va).no_exec());
		assert!(leaf(bs.boot.va).writable());
		assert!(leaf(bs.head.va).writable());
	}

	#[test]
	fn nx_flag_follows_the_cpu() {
		let cpu = ScriptedCpu::new().without_no_exec();
		let mut p = prekern(&text_only(), &cpu);
		assert_eq!(p.load().unwrap().args.nx_flag, 0);
	}

	#[test]
	fn missing_entry_point_is_reported() {
		let mut b = ElfBuilder::new();
		let text = b.section(".text", SectionKind::Text, &[0xC3; 32], 16);
		b.symbol("not_start", text, 0, SymbolKind::Func);

		let cpu = ScriptedCpu::new();
		let mut p = prekern(&b, &cpu);
		assert_eq!(
			p.load(),
			Err(Error::Elf(prekern_elf::ElfError::EntryMissing))
		);
	}

	#[test]
	fn bad_handoff_is_refused_before_anything_is_allocated() {
		let cpu = ScriptedCpu::new();
		let (sim, handoff) = boot_environment(&text_only().build().bytes, None);
		let bad = BootHandoff {
			kernel_pa_start: 0,
			..handoff
		};
		assert!(matches!(
			Prekern::new(sim, &cpu, bad),
			Err(Error::Handoff(handoff::HandoffError::KernelUnknown))
		));
	}
}
