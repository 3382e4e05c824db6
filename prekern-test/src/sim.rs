use std::collections::BTreeMap;

use prekern_arch::{
	Level, PageTableEntry, PageTables, VirtMemory,
	paging::{ENTRIES_PER_TABLE, PAGE_SIZE},
};

/// Virtual addresses below this are identity mapped, as the earlier boot
/// stage leaves low memory.
pub const IDENTITY_LIMIT: u64 = 1 << 32;

/// The scratch page whose intermediate tables [`SimMachine`] pre-builds.
pub const SCRATCH_VA: u64 = 0xFFFF_FF00_0000_0000;

/// Pages of bootstrap tables [`SimMachine::with_tables_at`] occupies:
/// the top-level table and the scratch page's L3, L2 and L1 tables.
pub const TABLE_PAGES: u64 = 4;

/// A sparse physical memory with a four-level page walk.
#[derive(Debug, Clone)]
pub struct SimMachine {
	/// Physical frames that have ever been written, by base address.
	frames: BTreeMap<u64, Box<[u8; PAGE_SIZE as usize]>>,
	/// Physical address of the top-level table.
	root:   u64,
}

impl Default for SimMachine {
	fn default() -> Self {
		Self::new()
	}
}

impl SimMachine {
	/// A machine whose bootstrap tables live at physical `0x1000`.
	#[must_use]
	pub fn new() -> Self {
		Self::with_tables_at(0x1000)
	}

	/// A machine whose bootstrap tables occupy [`TABLE_PAGES`] pages
	/// starting at physical `base`.
	#[must_use]
	pub fn with_tables_at(base: u64) -> Self {
		let mut sim = Self {
			frames: BTreeMap::new(),
			root:   base,
		};

		let mut table = base;
		for level in [Level::L4, Level::L3, Level::L2] {
			let next = table + PAGE_SIZE;
			let slot = (SCRATCH_VA >> level.shift()) % ENTRIES_PER_TABLE;
			sim.phys_write(table + slot * 8, &PageTableEntry::table(next).raw().to_le_bytes());
			table = next;
		}

		sim
	}

	/// Physical address of the top-level table.
	#[must_use]
	pub fn root(&self) -> u64 {
		self.root
	}

	/// Copies `bytes` into physical memory at `pa`.
	pub fn load(&mut self, pa: u64, bytes: &[u8]) {
		self.phys_write(pa, bytes);
	}

	/// Reads physical memory. Never-written memory reads as zero.
	pub fn phys_read(&self, pa: u64, buf: &mut [u8]) {
		let mut done = 0;
		while done < buf.len() {
			let cur = pa + done as u64;
			let off = (cur % PAGE_SIZE) as usize;
			let n = (buf.len() - done).min(PAGE_SIZE as usize - off);
			match self.frames.get(&(cur - off as u64)) {
				Some(frame) => buf[done..done + n].copy_from_slice(&frame[off..off + n]),
				None => buf[done..done + n].fill(0),
			}
			done += n;
		}
	}

	/// Writes physical memory.
	pub fn phys_write(&mut self, pa: u64, data: &[u8]) {
		let mut done = 0;
		while done < data.len() {
			let cur = pa + done as u64;
			let off = (cur % PAGE_SIZE) as usize;
			let n = (data.len() - done).min(PAGE_SIZE as usize - off);
			let frame = self
				.frames
				.entry(cur - off as u64)
				.or_insert_with(|| Box::new([0; PAGE_SIZE as usize]));
			frame[off..off + n].copy_from_slice(&data[done..done + n]);
			done += n;
		}
	}

	/// Reads a physical little-endian `u64`.
	#[must_use]
	pub fn phys_read_u64(&self, pa: u64) -> u64 {
		let mut b = [0; 8];
		self.phys_read(pa, &mut b);
		u64::from_le_bytes(b)
	}

	/// Walks the tables for `va`, returning the leaf entry or the level at
	/// which the walk hit a non-present entry.
	fn walk(&self, va: u64) -> Result<PageTableEntry, Level> {
		let mut table = self.root;
		for level in Level::TOP_DOWN {
			let slot = (va >> level.shift()) % ENTRIES_PER_TABLE;
			let entry = PageTableEntry::from_raw(self.phys_read_u64(table + slot * 8));
			if !entry.present() {
				return Err(level);
			}
			if level == Level::L1 {
				return Ok(entry);
			}
			table = entry.address();
		}
		unreachable!()
	}

	/// The leaf entry mapping `va`, if the whole walk is present.
	#[must_use]
	pub fn leaf(&self, va: u64) -> Option<PageTableEntry> {
		self.walk(va).ok()
	}

	/// The physical address `va` translates to, without faulting.
	#[must_use]
	pub fn translate(&self, va: u64) -> Option<u64> {
		if va < IDENTITY_LIMIT {
			return Some(va);
		}
		self.leaf(va).map(|e| e.address() + va % PAGE_SIZE)
	}

	/// Translates `va`, panicking the way the MMU would fault.
	fn resolve(&self, va: u64, write: bool) -> u64 {
		if va < IDENTITY_LIMIT {
			return va;
		}
		match self.walk(va) {
			Ok(entry) => {
				assert!(
					!write || entry.writable(),
					"page fault: write to read-only page {va:#018x}"
				);
				entry.address() + va % PAGE_SIZE
			}
			Err(level) => panic!("page fault: {va:#018x} has no {level:?} entry"),
		}
	}

	/// The physical address of the table holding entry `index` of `level`.
	fn table_of(&self, level: Level, index: u64) -> u64 {
		match level.parent() {
			None => self.root,
			Some(parent) => {
				let entry = self.entry(parent, index >> 9);
				assert!(
					entry.present(),
					"page fault: {level:?} entry {index:#x} has no parent table"
				);
				entry.address()
			}
		}
	}

	/// Walks `len` bytes starting at `va` in page-bounded chunks.
	fn chunks(va: u64, len: usize) -> impl Iterator<Item = (u64, core::ops::Range<usize>)> {
		let mut done = 0;
		core::iter::from_fn(move || {
			if done >= len {
				return None;
			}
			let cur = va.wrapping_add(done as u64);
			let n = (len - done).min((PAGE_SIZE - cur % PAGE_SIZE) as usize);
			let range = done..done + n;
			done += n;
			Some((cur, range))
		})
	}
}

// SAFETY: Entries are read from and written to the same frames `walk()`
// SAFETY: consults, and a missing parent panics like a hardware fault.
unsafe impl PageTables for SimMachine {
	fn entry(&self, level: Level, index: u64) -> PageTableEntry {
		let table = self.table_of(level, index);
		PageTableEntry::from_raw(self.phys_read_u64(table + (index % ENTRIES_PER_TABLE) * 8))
	}

	fn set_entry(&mut self, level: Level, index: u64, entry: PageTableEntry) {
		let table = self.table_of(level, index);
		self.phys_write(
			table + (index % ENTRIES_PER_TABLE) * 8,
			&entry.raw().to_le_bytes(),
		);
	}
}

// SAFETY: Every access is translated through the current tables. There is
// SAFETY: no TLB, so invalidation is trivially observed.
unsafe impl VirtMemory for SimMachine {
	fn read(&self, va: u64, buf: &mut [u8]) {
		for (cur, range) in Self::chunks(va, buf.len()) {
			let pa = self.resolve(cur, false);
			self.phys_read(pa, &mut buf[range]);
		}
	}

	fn write(&mut self, va: u64, data: &[u8]) {
		for (cur, range) in Self::chunks(va, data.len()) {
			let pa = self.resolve(cur, true);
			self.phys_write(pa, &data[range]);
		}
	}

	fn fill(&mut self, va: u64, byte: u8, len: u64) {
		let bytes = vec![byte; len as usize];
		self.write(va, &bytes);
	}
}

#[cfg(test)]
mod tests {
	use prekern_arch::Protection;

	use super::*;

	#[test]
	fn scratch_chain_is_prebuilt() {
		let mut sim = SimMachine::new();
		let idx = Level::L1.linear_index(SCRATCH_VA);
		assert!(!sim.entry(Level::L1, idx).present());

		sim.set_entry(
			Level::L1,
			idx,
			PageTableEntry::leaf(0x8000, Protection::ReadWrite, true),
		);
		sim.write_u64(SCRATCH_VA + 8, 0xDEAD_BEEF);
		assert_eq!(sim.phys_read_u64(0x8008), 0xDEAD_BEEF);
		assert_eq!(sim.translate(SCRATCH_VA + 8), Some(0x8008));
	}

	#[test]
	#[should_panic(expected = "page fault")]
	fn unmapped_access_faults() {
		let sim = SimMachine::new();
		let _ = sim.read_u64(0xFFFF_FFFF_8000_0000);
	}

	#[test]
	#[should_panic(expected = "read-only")]
	fn read_only_write_faults() {
		let mut sim = SimMachine::new();
		let idx = Level::L1.linear_index(SCRATCH_VA);
		sim.set_entry(
			Level::L1,
			idx,
			PageTableEntry::leaf(0x8000, Protection::Read, true),
		);
		sim.write_u32(SCRATCH_VA, 1);
	}
}
