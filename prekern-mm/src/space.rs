//! The address space under construction.

use prekern_arch::{
	Cpu, Level, PageTableEntry, PageTables, Protection, VirtMemory,
	paging::{PAGE_SIZE, round_down},
};

use crate::{MmError, PhysAlloc};

/// The live page tables, the memory behind them, and the physical
/// allocator that feeds both.
#[derive(Debug)]
pub struct AddressSpace<M, C> {
	/// Table and memory access.
	mach:       M,
	/// CPU leaves (TLB invalidation).
	cpu:        C,
	/// Where new pages come from.
	alloc:      PhysAlloc,
	/// Page used to reach freshly allocated frames while zeroing them.
	scratch_va: u64,
	/// Whether leaves may carry the no-execute bit.
	no_exec:    bool,
}

impl<M: PageTables + VirtMemory, C: Cpu> AddressSpace<M, C> {
	/// Takes over the address space.
	///
	/// `scratch_va` must be a page whose intermediate tables already exist.
	pub fn new(mach: M, cpu: C, first_avail: u64, scratch_va: u64) -> Self {
		let no_exec = cpu.has_no_exec();
		Self {
			mach,
			cpu,
			alloc: PhysAlloc::new(first_avail),
			scratch_va: round_down(scratch_va, PAGE_SIZE),
			no_exec,
		}
	}

	/// Memory in the address space.
	#[inline]
	pub fn mem(&self) -> &M {
		&self.mach
	}

	/// Memory in the address space, writable.
	#[inline]
	pub fn mem_mut(&mut self) -> &mut M {
		&mut self.mach
	}

	/// The CPU.
	#[inline]
	pub fn cpu(&self) -> &C {
		&self.cpu
	}

	/// The physical allocator's current mark.
	#[inline]
	pub fn mark(&self) -> u64 {
		self.alloc.mark()
	}

	/// Whether leaves carry the no-execute bit.
	#[inline]
	pub fn no_exec(&self) -> bool {
		self.no_exec
	}

	/// Allocates `npages` contiguous physical pages and zeroes them.
	///
	/// Each page is zeroed through the scratch page, whose mapping is torn
	/// down again afterwards.
	pub fn allocate(&mut self, npages: u64) -> u64 {
		let pa = self.alloc.bump(npages);
		let scratch = Level::L1.linear_index(self.scratch_va);

		for page in 0..npages {
			self.map_page(pa + page * PAGE_SIZE, self.scratch_va, Protection::ReadWrite);
			self.mach.fill(self.scratch_va, 0, PAGE_SIZE);
		}

		self.mach.set_entry(Level::L1, scratch, PageTableEntry::new());
		self.cpu.invalidate(self.scratch_va);

		pa
	}

	/// Makes sure every intermediate table covering `[start, end)` exists,
	/// allocating zeroed tables top-down where they don't.
	pub fn ensure_mapped(&mut self, start: u64, end: u64) {
		for level in [Level::L4, Level::L3, Level::L2] {
			let first = level.linear_index(start);
			let count = level.entries_for_range(start, end);

			for index in first..first + count {
				if self.mach.entry(level, index).present() {
					continue;
				}
				let table = self.allocate(1);
				self.mach.set_entry(level, index, PageTableEntry::table(table));
			}
		}
	}

	/// Installs (or overwrites) the leaf for `va`, then invalidates it.
	pub fn map_page(&mut self, pa: u64, va: u64, prot: Protection) {
		self.mach.set_entry(
			Level::L1,
			Level::L1.linear_index(va),
			PageTableEntry::leaf(pa, prot, self.no_exec),
		);
		self.cpu.invalidate(va);
	}

	/// Like [`Self::map_page`], but refuses to replace a valid leaf.
	pub fn enter_page(&mut self, pa: u64, va: u64, prot: Protection) -> Result<(), MmError> {
		if self.mach.entry(Level::L1, Level::L1.linear_index(va)).present() {
			return Err(MmError::AlreadyMapped { va });
		}
		self.map_page(pa, va, prot);
		Ok(())
	}

	/// Enters `size` bytes (rounded up to pages) of physical memory at
	/// `pa` to `va`.
	pub fn enter_range(&mut self, pa: u64, va: u64, size: u64, prot: Protection) -> Result<(), MmError> {
		for page in 0..size.div_ceil(PAGE_SIZE) {
			self.enter_page(pa + page * PAGE_SIZE, va + page * PAGE_SIZE, prot)?;
		}
		Ok(())
	}

	/// Rewrites every leaf over `[va, va + size)` with `prot`, keeping each
	/// leaf's frame.
	pub fn reprotect_range(&mut self, va: u64, size: u64, prot: Protection) {
		for page in 0..size.div_ceil(PAGE_SIZE) {
			let va = va + page * PAGE_SIZE;
			let index = Level::L1.linear_index(va);
			let frame = self.mach.entry(Level::L1, index).address();
			self.mach.set_entry(
				Level::L1,
				index,
				PageTableEntry::leaf(frame, prot, self.no_exec),
			);
			self.cpu.invalidate(va);
		}
	}
}

#[cfg(test)]
mod tests {
	use prekern_test::{SCRATCH_VA, ScriptedCpu, SimMachine};

	use super::*;

	const FIRST: u64 = 0x40_0000;
	const VA: u64 = 0xFFFF_FFFF_8000_0000;

	fn space(cpu: &ScriptedCpu) -> AddressSpace<SimMachine, &ScriptedCpu> {
		AddressSpace::new(SimMachine::new(), cpu, FIRST, SCRATCH_VA)
	}

	#[test]
	fn allocation_is_monotonic_and_zeroed() {
		let cpu = ScriptedCpu::new();
		let mut sim = SimMachine::new();
		sim.load(FIRST, &[0xAA; 3 * 4096]);
		let mut space = AddressSpace::new(sim, &cpu, FIRST, SCRATCH_VA);

		assert_eq!(space.allocate(2), FIRST);
		assert_eq!(space.allocate(1), FIRST + 0x2000);
		assert_eq!(space.mark(), FIRST + 0x3000);

		let mut page = [0xFF; 3 * 4096];
		space.mem().phys_read(FIRST, &mut page);
		assert!(page.iter().all(|&b| b == 0));

		// The scratch mapping does not outlive the allocation.
		assert!(space.mem().leaf(SCRATCH_VA).is_none());
	}

	#[test]
	fn ensure_mapped_builds_each_level_once() {
		let cpu = ScriptedCpu::new();
		let mut space = space(&cpu);

		space.ensure_mapped(VA, VA + 0x3000);
		// L3, L2 and L1 tables.
		assert_eq!(space.mark(), FIRST + 3 * 4096);

		space.ensure_mapped(VA + 0x1000, VA + 0x2000);
		assert_eq!(space.mark(), FIRST + 3 * 4096);

		// Straddling a 2MiB boundary by a single byte costs one more L1.
		space.ensure_mapped(VA + 0x1F_FFFF, VA + 0x20_0001);
		assert_eq!(space.mark(), FIRST + 4 * 4096);
	}

	#[test]
	fn enter_refuses_to_overwrite() {
		let cpu = ScriptedCpu::new();
		let mut space = space(&cpu);
		space.ensure_mapped(VA, VA + 0x1000);

		space.enter_page(0x80_0000, VA, Protection::ReadWrite).unwrap();
		assert_eq!(
			space.enter_page(0x90_0000, VA, Protection::ReadWrite),
			Err(MmError::AlreadyMapped { va: VA })
		);
		assert_eq!(space.mem().translate(VA), Some(0x80_0000));

		// `map_page` is the overwriting form.
		space.map_page(0x90_0000, VA, Protection::Read);
		assert_eq!(space.mem().translate(VA), Some(0x90_0000));
		assert!(cpu.invalidations().contains(&VA));
	}

	#[test]
	fn reprotection_keeps_frames() {
		let cpu = ScriptedCpu::new();
		let mut space = space(&cpu);
		space.ensure_mapped(VA, VA + 0x4000);
		space
			.enter_range(0x80_0000, VA, 0x4000, Protection::ReadWrite)
			.unwrap();

		let leaves = |space: &AddressSpace<SimMachine, &ScriptedCpu>| {
			(0..4)
				.map(|i| space.mem().leaf(VA + i * 4096).unwrap())
				.collect::<Vec<_>>()
		};
		let before = leaves(&space);

		space.reprotect_range(VA, 0x4000, Protection::ReadExec);
		let after = leaves(&space);
		space.reprotect_range(VA, 0x4000, Protection::ReadExec);
		let again = leaves(&space);

		for ((b, a), g) in before.iter().zip(&after).zip(&again) {
			assert_eq!(b.address(), a.address());
			assert!(b.writable() && b.no_exec());
			assert!(!a.writable() && !a.no_exec());
			assert_eq!(a, g);
		}
	}

	#[test]
	fn no_exec_bit_follows_the_cpu() {
		let cpu = ScriptedCpu::new().without_no_exec();
		let mut space = space(&cpu);
		space.ensure_mapped(VA, VA + 0x1000);
		space.enter_page(0x80_0000, VA, Protection::Read).unwrap();
		let leaf = space.mem().leaf(VA).unwrap();
		assert!(!leaf.no_exec());
		assert!(!leaf.writable());
	}
}
