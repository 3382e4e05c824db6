//! Relocation processing.

use prekern_arch::VirtMemory;

use crate::{
	ElfError, ElfImage,
	header::{SHT_REL, SHT_RELA},
};

/// `R_X86_64_NONE`
const R_NONE: u32 = 0;
/// `R_X86_64_64`: S + A
const R_64: u32 = 1;
/// `R_X86_64_PC32`: S + A - P, 32 bits
const R_PC32: u32 = 2;
/// `R_X86_64_GLOB_DAT`: S
const R_GLOB_DAT: u32 = 6;
/// `R_X86_64_JUMP_SLOT`: S
const R_JUMP_SLOT: u32 = 7;
/// `R_X86_64_RELATIVE`: B + A
const R_RELATIVE: u32 = 8;
/// `R_X86_64_32`: S + A, 32 bits
const R_32: u32 = 10;
/// `R_X86_64_32S`: S + A, 32 bits sign-extended
const R_32S: u32 = 11;

/// One relocation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relocation {
	/// From an `SHT_RELA` table.
	WithAddend {
		/// Offset of the patched location in the target section.
		offset: u64,
		/// Symbol index.
		sym:    u32,
		/// `R_X86_64_*`.
		ty:     u32,
		/// Explicit addend.
		addend: i64,
	},
	/// From an `SHT_REL` table; the addend is whatever the patched
	/// location holds beforehand.
	AddendFromBytes {
		/// Offset of the patched location in the target section.
		offset: u64,
		/// Symbol index.
		sym:    u32,
		/// `R_X86_64_*`.
		ty:     u32,
	},
}

impl Relocation {
	/// Size of an `Elf64_Rel`.
	pub const REL_SIZE: u64 = 16;
	/// Size of an `Elf64_Rela`.
	pub const RELA_SIZE: u64 = 24;

	/// Reads the `Elf64_Rel` at `va`.
	pub fn read_rel<M: VirtMemory + ?Sized>(mem: &M, va: u64) -> Self {
		let info = mem.read_u64(va + 8);
		Self::AddendFromBytes {
			offset: mem.read_u64(va),
			sym:    (info >> 32) as u32,
			ty:     info as u32,
		}
	}

	/// Reads the `Elf64_Rela` at `va`.
	pub fn read_rela<M: VirtMemory + ?Sized>(mem: &M, va: u64) -> Self {
		let info = mem.read_u64(va + 8);
		Self::WithAddend {
			offset: mem.read_u64(va),
			sym:    (info >> 32) as u32,
			ty:     info as u32,
			addend: mem.read_u64(va + 16) as i64,
		}
	}

	/// Offset of the patched location in the target section.
	#[must_use]
	pub const fn offset(&self) -> u64 {
		match *self {
			Self::WithAddend { offset, .. } | Self::AddendFromBytes { offset, .. } => offset,
		}
	}

	/// Symbol index.
	#[must_use]
	pub const fn sym(&self) -> u32 {
		match *self {
			Self::WithAddend { sym, .. } | Self::AddendFromBytes { sym, .. } => sym,
		}
	}

	/// Relocation type.
	#[must_use]
	pub const fn ty(&self) -> u32 {
		match *self {
			Self::WithAddend { ty, .. } | Self::AddendFromBytes { ty, .. } => ty,
		}
	}

	/// The addend, reading it from the patched location `at` if the entry
	/// carries none. The 32-bit kinds only own the low four bytes there.
	fn addend<M: VirtMemory + ?Sized>(&self, mem: &M, at: u64) -> i64 {
		match *self {
			Self::WithAddend { addend, .. } => addend,
			Self::AddendFromBytes { ty, .. } => {
				if matches!(ty, R_PC32 | R_32 | R_32S) {
					i64::from(mem.read_u32(at) as i32)
				} else {
					mem.read_u64(at) as i64
				}
			}
		}
	}
}

impl ElfImage {
	/// Applies every relocation: first all `SHT_REL` tables, then all
	/// `SHT_RELA` tables. Symbols must already be rebased. Returns the
	/// number of entries processed.
	pub fn relocate<M: VirtMemory + ?Sized>(&self, mem: &mut M) -> Result<usize, ElfError> {
		let mut applied = 0;

		for (kind, entsize) in [
			(SHT_REL, Relocation::REL_SIZE),
			(SHT_RELA, Relocation::RELA_SIZE),
		] {
			for index in 0..self.section_count() {
				let table = self.section(mem, index);
				if table.ty != kind {
					continue;
				}

				let target = u16::try_from(table.info)
					.ok()
					.filter(|&t| t < self.section_count())
					.ok_or(ElfError::BadRelocTarget(index))?;
				let target = self.section(mem, target);
				if !target.is_content() {
					continue;
				}

				let base = self.section_va(&target);
				let entries = self.section_va(&table);
				for i in 0..table.size / entsize {
					let va = entries + i * entsize;
					let reloc = if kind == SHT_RELA {
						Relocation::read_rela(mem, va)
					} else {
						Relocation::read_rel(mem, va)
					};
					self.apply(mem, base, reloc)?;
					applied += 1;
				}
			}
		}

		log::debug!("elf: applied {applied} relocation(s)");
		Ok(applied)
	}

	/// Patches one location inside the section placed at `base`.
	fn apply<M: VirtMemory + ?Sized>(
		&self,
		mem: &mut M,
		base: u64,
		reloc: Relocation,
	) -> Result<(), ElfError> {
		let at = base.wrapping_add(reloc.offset());
		let addend = reloc.addend(mem, at);

		match reloc.ty() {
			R_NONE => {}
			R_64 => {
				let sym = self.sym_lookup(mem, reloc.sym())?;
				mem.write_u64(at, sym.wrapping_add_signed(addend));
			}
			R_GLOB_DAT | R_JUMP_SLOT => {
				let sym = self.sym_lookup(mem, reloc.sym())?;
				mem.write_u64(at, sym);
			}
			R_PC32 => {
				let sym = self.sym_lookup(mem, reloc.sym())?;
				mem.write_u32(at, sym.wrapping_add_signed(addend).wrapping_sub(at) as u32);
			}
			R_32 | R_32S => {
				let sym = self.sym_lookup(mem, reloc.sym())?;
				mem.write_u32(at, sym.wrapping_add_signed(addend) as u32);
			}
			R_RELATIVE => {
				mem.write_u64(at, base.wrapping_add_signed(addend));
			}
			ty => return Err(ElfError::UnknownRelocType(ty)),
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use prekern_test::{ElfBuilder, SectionId, SectionKind, SymbolId, SymbolKind};

	use super::*;
	use crate::{
		SegmentClass,
		fixture::{self, segment_va},
	};

	/// `.text` with `start`, `.data` with `table` at 0x10.
	fn base() -> (ElfBuilder, SectionId, SectionId, SymbolId) {
		let mut b = ElfBuilder::new();
		let text = b.section(".text", SectionKind::Text, &[0x90; 64], 16);
		b.symbol("start", text, 0, SymbolKind::Func);
		let data = b.section(".data", SectionKind::Data, &[0; 64], 8);
		let table = b.symbol("table", data, 0x10, SymbolKind::Object);
		(b, text, data, table)
	}

	fn read_in(loaded: &fixture::Loaded, section: SectionId, offset: u64) -> u64 {
		let shdr = loaded.image.section(loaded.space.mem(), section.0);
		loaded
			.space
			.mem()
			.read_u64(loaded.image.section_va(&shdr) + offset)
	}

	fn relocate_in_place(b: &ElfBuilder) -> Result<fixture::Loaded, ElfError> {
		let mut loaded = fixture::rebased(&b.build())?;
		loaded.image.relocate(loaded.space.mem_mut())?;
		Ok(loaded)
	}

	#[test]
	fn relative_uses_the_rebased_section() {
		let (mut b, _, data, table) = base();
		b.rela(data, 0x30, table, R_RELATIVE, 0x18);
		let loaded = relocate_in_place(&b).unwrap();
		assert_eq!(read_in(&loaded, data, 0x30), segment_va(SegmentClass::Data) + 0x18);
	}

	#[test]
	fn absolute_and_pc_relative() {
		let (mut b, text, data, table) = base();
		b.rela(data, 0x00, table, R_64, 8);
		b.rela(text, 0x20, table, R_PC32, -4);
		b.rela(text, 0x28, table, R_32S, 0);
		let loaded = relocate_in_place(&b).unwrap();

		let table_va = segment_va(SegmentClass::Data) + 0x10;
		let text_va = segment_va(SegmentClass::Text);
		assert_eq!(read_in(&loaded, data, 0), table_va + 8);

		let pc32 = read_in(&loaded, text, 0x20) as u32;
		assert_eq!(pc32, table_va.wrapping_sub(4).wrapping_sub(text_va + 0x20) as u32);

		let abs32 = read_in(&loaded, text, 0x28) as u32;
		assert_eq!(abs32, table_va as u32);
		// Only four bytes are written for the 32-bit kinds.
		assert_eq!(read_in(&loaded, text, 0x2C) as u32, 0x9090_9090);
	}

	#[test]
	fn implicit_addends_come_from_the_target() {
		let (mut b, text, data, table) = base();
		b.rel(data, 0x08, table, R_64, 0x40);
		b.rel(text, 0x10, table, R_32, 0x4);
		let loaded = relocate_in_place(&b).unwrap();

		let table_va = segment_va(SegmentClass::Data) + 0x10;
		assert_eq!(read_in(&loaded, data, 0x08), table_va + 0x40);
		assert_eq!(read_in(&loaded, text, 0x10) as u32, (table_va + 4) as u32);
	}

	#[test]
	fn got_style_entries_ignore_the_addend() {
		let (mut b, _, data, table) = base();
		b.rela(data, 0x20, table, R_GLOB_DAT, 0x99);
		b.rela(data, 0x28, table, R_JUMP_SLOT, 0x99);
		let loaded = relocate_in_place(&b).unwrap();

		let table_va = segment_va(SegmentClass::Data) + 0x10;
		assert_eq!(read_in(&loaded, data, 0x20), table_va);
		assert_eq!(read_in(&loaded, data, 0x28), table_va);
	}

	#[test]
	fn unknown_types_are_fatal() {
		let (mut b, _, data, table) = base();
		b.rela(data, 0, table, 37, 0);
		assert_eq!(
			relocate_in_place(&b).err(),
			Some(ElfError::UnknownRelocType(37))
		);
	}

	#[test]
	fn unresolved_symbols_are_fatal() {
		let (mut b, _, data, _) = base();
		let ext = b.undefined("memcpy");
		b.rela(data, 0, ext, R_64, 0);
		assert_eq!(
			relocate_in_place(&b).err(),
			Some(ElfError::UndefinedSymbol(ext.0))
		);
	}

	#[test]
	fn tables_on_unloaded_sections_are_skipped() {
		let (mut b, _, _, table) = base();
		let debug = b.section(".debug_info", SectionKind::Unallocated, &[0; 16], 1);
		b.rela(debug, 0, table, 37, 0);
		assert_eq!(relocate_in_place(&b).map(|_| ()), Ok(()));
	}

	#[test]
	fn bad_target_index_is_fatal() {
		let (mut b, _, data, table) = base();
		b.rela(data, 0, table, R_64, 0);
		// .rela.data is index 3; point its sh_info past the end.
		b.patch_header(64 + 3 * 64 + 44, &200_u32.to_le_bytes());
		assert_eq!(
			relocate_in_place(&b).err(),
			Some(ElfError::BadRelocTarget(3))
		);
	}

	#[test]
	fn relocating_before_rebasing_gives_file_relative_values() {
		let (mut b, _, data, table) = base();
		b.rela(data, 0, table, R_64, 0);
		let elf = b.build();

		let mut loaded = fixture::load(&elf).unwrap();
		loaded.image.relocate(loaded.space.mem_mut()).unwrap();
		assert_eq!(read_in(&loaded, data, 0), 0x10);
	}
}
