//! The image descriptor: section placement, the boot tables and symbols.

use prekern_arch::{
	VirtMemory,
	paging::{PAGE_SIZE, round_down, round_up},
};

use crate::{
	ENTRY_SYMBOL, ElfError,
	header::{
		E_SHNUM, E_SHOFF, E_SHSTRNDX, SHF_EXECINSTR, SHF_WRITE, SHN_UNDEF, SHT_NOBITS,
		SHT_PROGBITS, SHT_STRTAB, SHT_SYMTAB, STT_FUNC, SectionHeader, Symbol, check_header,
	},
	strtab::{Name, StrTable},
};

/// Size of the head region (file header through the end of the section
/// header array, page rounded) of the `image_size`-byte image at
/// `kernel_pa`.
///
/// The image must be readable at its physical address.
pub fn head_size<M: VirtMemory + ?Sized>(
	mem: &M,
	kernel_pa: u64,
	image_size: u64,
) -> Result<u64, ElfError> {
	check_header(mem, kernel_pa)?;
	let end = header_end(
		mem.read_u64(kernel_pa + E_SHOFF),
		mem.read_u16(kernel_pa + E_SHNUM),
		image_size,
	)?;
	Ok(round_up(end, PAGE_SIZE))
}

/// End of the section header array, which must lie inside the image.
fn header_end(shoff: u64, shnum: u16, image_size: u64) -> Result<u64, ElfError> {
	u64::from(shnum)
		.checked_mul(SectionHeader::SIZE)
		.and_then(|len| shoff.checked_add(len))
		.filter(|&end| end <= image_size)
		.ok_or(ElfError::HeaderOutsideImage { shoff, shnum })
}

/// The three classes of kernel content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentClass {
	/// Executable.
	Text,
	/// Neither writable nor executable.
	Rodata,
	/// Writable, including zero-filled sections.
	Data,
}

impl SegmentClass {
	/// Every class, in placement order.
	pub const ALL: [Self; 3] = [Self::Text, Self::Rodata, Self::Data];

	/// The class of section `index`, or `None` if it is not content.
	fn of(index: u16, shdr: &SectionHeader) -> Result<Option<Self>, ElfError> {
		if !shdr.is_content() {
			return Ok(None);
		}

		let write = (shdr.flags & SHF_WRITE) != 0;
		let exec = (shdr.flags & SHF_EXECINSTR) != 0;
		match (shdr.ty, write, exec) {
			(SHT_PROGBITS, false, true) => Ok(Some(Self::Text)),
			(SHT_PROGBITS, false, false) => Ok(Some(Self::Rodata)),
			(SHT_PROGBITS | SHT_NOBITS, true, false) => Ok(Some(Self::Data)),
			_ => Err(ElfError::UnsupportedSection(index)),
		}
	}
}

/// The page-rounded physical span of one class of sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
	/// First physical address.
	pub pa:    u64,
	/// Size in bytes, a multiple of the page size.
	pub size:  u64,
	/// Alignment the virtual base needs: a page, or the largest section
	/// alignment if that is bigger.
	pub align: u64,
}

/// The tables located by [`ElfImage::build_boot`].
#[derive(Debug, Clone, Copy)]
struct Tables {
	/// Section names.
	shstrtab: StrTable,
	/// Symbol names.
	strtab:   StrTable,
	/// Address of the symbol table.
	symtab:   u64,
	/// Number of symbols.
	nsyms:    u64,
}

/// The kernel image, reached through its head region.
#[derive(Debug, Clone)]
pub struct ElfImage {
	/// Virtual base of the head region.
	head_va:    u64,
	/// Physical base of the image.
	kernel_pa:  u64,
	/// Bytes the earlier stage loaded.
	image_size: u64,
	/// Offset of the section header array from the head.
	shoff:      u64,
	/// Number of section headers.
	shnum:      u16,
	/// Index of the section-name table.
	shstrndx:   u16,
	/// Set once the boot region is built.
	tables:     Option<Tables>,
}

impl ElfImage {
	/// Validates the header mapped at `head_va` and takes hold of the
	/// `image_size`-byte image whose first byte is at physical `kernel_pa`.
	pub fn new<M: VirtMemory + ?Sized>(
		mem: &M,
		head_va: u64,
		kernel_pa: u64,
		image_size: u64,
	) -> Result<Self, ElfError> {
		check_header(mem, head_va)?;
		let shoff = mem.read_u64(head_va + E_SHOFF);
		let shnum = mem.read_u16(head_va + E_SHNUM);
		header_end(shoff, shnum, image_size)?;
		Ok(Self {
			head_va,
			kernel_pa,
			image_size,
			shoff,
			shnum,
			shstrndx: mem.read_u16(head_va + E_SHSTRNDX),
			tables: None,
		})
	}

	/// Virtual base of the head region.
	#[must_use]
	pub const fn head_va(&self) -> u64 {
		self.head_va
	}

	/// Number of section headers.
	#[must_use]
	pub const fn section_count(&self) -> u16 {
		self.shnum
	}

	/// Address of the header of section `index`.
	const fn shdr_va(&self, index: u16) -> u64 {
		self.head_va + self.shoff + index as u64 * SectionHeader::SIZE
	}

	/// Reads the header of section `index` (which must be in range).
	pub fn section<M: VirtMemory + ?Sized>(&self, mem: &M, index: u16) -> SectionHeader {
		debug_assert!(index < self.shnum);
		SectionHeader::read(mem, self.shdr_va(index))
	}

	/// Physical span of a section's contents, which must lie inside the
	/// image.
	fn section_pa(&self, index: u16, shdr: &SectionHeader) -> Result<(u64, u64), ElfError> {
		shdr.offset
			.checked_add(shdr.size)
			.filter(|&end| end <= self.image_size)
			.map(|end| (self.kernel_pa + shdr.offset, self.kernel_pa + end))
			.ok_or(ElfError::SectionOutsideImage(index))
	}

	/// Where a section's contents are, once placed.
	#[must_use]
	pub const fn section_va(&self, shdr: &SectionHeader) -> u64 {
		self.head_va.wrapping_add(shdr.offset)
	}

	/// The physical span of every section of `class`, or `None` if the
	/// image has none.
	pub fn segment<M: VirtMemory + ?Sized>(
		&self,
		mem: &M,
		class: SegmentClass,
	) -> Result<Option<Segment>, ElfError> {
		let mut span: Option<(u64, u64)> = None;
		let mut align = PAGE_SIZE;

		for index in 0..self.shnum {
			let shdr = self.section(mem, index);
			if SegmentClass::of(index, &shdr)? != Some(class) {
				continue;
			}

			let (start, end) = self.section_pa(index, &shdr)?;
			span = Some(match span {
				None => (start, end),
				Some((lo, hi)) => (lo.min(start), hi.max(end)),
			});
			align = align.max(shdr.align());
		}

		Ok(span.map(|(lo, hi)| {
			let pa = round_down(lo, PAGE_SIZE);
			Segment {
				pa,
				size: (round_up(hi, PAGE_SIZE) - pa).max(PAGE_SIZE),
				align,
			}
		}))
	}

	/// Points every section of `class` at the segment now mapped at `va`,
	/// zeroing the zero-filled ones. Returns the number of sections moved.
	pub fn assign_segment<M: VirtMemory + ?Sized>(
		&self,
		mem: &mut M,
		class: SegmentClass,
		segment: Segment,
		va: u64,
	) -> Result<usize, ElfError> {
		let mut moved = 0;

		for index in 0..self.shnum {
			let shdr = self.section(mem, index);
			if SegmentClass::of(index, &shdr)? != Some(class) {
				continue;
			}

			let (pa, _) = self.section_pa(index, &shdr)?;
			let sec_va = va + (pa - segment.pa);
			if sec_va % shdr.align() != 0 {
				return Err(ElfError::MisalignedSection { index, va: sec_va });
			}

			if shdr.ty == SHT_NOBITS {
				mem.fill(sec_va, 0, shdr.size);
			}

			SectionHeader::write_offset(mem, self.shdr_va(index), sec_va.wrapping_sub(self.head_va));
			moved += 1;
		}

		log::debug!("elf: {class:?}: {moved} section(s) at {va:#018x}");
		Ok(moved)
	}

	/// Points the string, symbol and relocation tables into the boot
	/// region (`boot_size` bytes of physical `boot_pa` mapped at
	/// `boot_va`), then locates the section-name, symbol and symbol-name
	/// tables.
	pub fn build_boot<M: VirtMemory + ?Sized>(
		&mut self,
		mem: &mut M,
		boot_va: u64,
		boot_pa: u64,
		boot_size: u64,
	) -> Result<(), ElfError> {
		for index in 0..self.shnum {
			let shdr = self.section(mem, index);
			if !shdr.is_metadata() || shdr.offset == 0 {
				continue;
			}

			let (pa, end) = self.section_pa(index, &shdr)?;
			if pa < boot_pa || end > boot_pa + boot_size {
				return Err(ElfError::OutsideBoot(index));
			}

			let va = boot_va + (pa - boot_pa);
			SectionHeader::write_offset(mem, self.shdr_va(index), va.wrapping_sub(self.head_va));
		}

		if self.shstrndx == SHN_UNDEF || self.shstrndx >= self.shnum {
			return Err(ElfError::MissingShstrtab);
		}
		let shstrtab = self.section(mem, self.shstrndx);
		if shstrtab.ty != SHT_STRTAB || shstrtab.offset == 0 {
			return Err(ElfError::MissingShstrtab);
		}

		let symtab = (0..self.shnum)
			.map(|i| self.section(mem, i))
			.find(|s| s.ty == SHT_SYMTAB && s.offset != 0)
			.ok_or(ElfError::MissingSymtab)?;

		let strtab = u16::try_from(symtab.link)
			.ok()
			.filter(|&i| i != SHN_UNDEF && i < self.shnum)
			.map(|i| self.section(mem, i))
			.filter(|s| s.ty == SHT_STRTAB && s.offset != 0)
			.ok_or(ElfError::MissingStrtab)?;

		let tables = Tables {
			shstrtab: StrTable {
				va:   self.section_va(&shstrtab),
				size: shstrtab.size,
			},
			strtab:   StrTable {
				va:   self.section_va(&strtab),
				size: strtab.size,
			},
			symtab:   self.section_va(&symtab),
			nsyms:    symtab.size / Symbol::SIZE,
		};
		log::debug!("elf: {} symbol(s), boot at {boot_va:#018x}", tables.nsyms);
		self.tables = Some(tables);
		Ok(())
	}

	/// The tables, or an error if the boot region was never built.
	fn tables(&self) -> Result<Tables, ElfError> {
		self.tables.ok_or(ElfError::MissingSymtab)
	}

	/// Adds the final address of its section to every symbol defined in a
	/// content section. Must run exactly once, after every segment is
	/// assigned and before any relocation. Returns the number of symbols
	/// rebased.
	pub fn rebase_symbols<M: VirtMemory + ?Sized>(&self, mem: &mut M) -> Result<usize, ElfError> {
		let tables = self.tables()?;
		let mut rebased = 0;

		for i in 0..tables.nsyms {
			let va = tables.symtab + i * Symbol::SIZE;
			let sym = Symbol::read(mem, va);
			if sym.is_undefined() || sym.shndx >= self.shnum {
				continue;
			}

			let shdr = self.section(mem, sym.shndx);
			if !shdr.is_content() {
				continue;
			}

			Symbol::write_value(mem, va, sym.value.wrapping_add(self.section_va(&shdr)));
			rebased += 1;
		}

		log::debug!("elf: rebased {rebased} symbol(s)");
		Ok(rebased)
	}

	/// Reads symbol `index`.
	pub fn symbol<M: VirtMemory + ?Sized>(&self, mem: &M, index: u32) -> Result<Symbol, ElfError> {
		let tables = self.tables()?;
		if u64::from(index) >= tables.nsyms {
			return Err(ElfError::BadSymbolIndex(index));
		}
		Ok(Symbol::read(
			mem,
			tables.symtab + u64::from(index) * Symbol::SIZE,
		))
	}

	/// Resolves symbol `index` to an address.
	///
	/// Undefined symbols only resolve if they bound a link set:
	/// `__start_link_set_*` to the start of the section of the same name
	/// minus `__start_`, `__stop_link_set_*` to the end of the section
	/// named without `__stop_`.
	pub fn sym_lookup<M: VirtMemory + ?Sized>(&self, mem: &M, index: u32) -> Result<u64, ElfError> {
		let tables = self.tables()?;
		let sym = self.symbol(mem, index)?;

		if !sym.is_undefined() {
			if sym.value == 0 {
				return Err(ElfError::ZeroSymbol(index));
			}
			return Ok(sym.value);
		}

		let name = tables.strtab.name(mem, sym.name)?;
		for (prefix, at_end) in [(&b"__start_"[..], false), (&b"__stop_"[..], true)] {
			let Some(section) = name.clone().strip_prefix(prefix)? else {
				continue;
			};
			if section.clone().strip_prefix(b"link_set")?.is_none() {
				continue;
			}

			let shdr = self
				.find_section(mem, &tables, section)?
				.ok_or(ElfError::MissingLinkSet(index))?;
			let base = self.section_va(&shdr);
			return Ok(if at_end { base + shdr.size } else { base });
		}

		Err(ElfError::UndefinedSymbol(index))
	}

	/// The section whose name is exactly `name`.
	fn find_section<M: VirtMemory + ?Sized>(
		&self,
		mem: &M,
		tables: &Tables,
		name: Name<'_, M>,
	) -> Result<Option<SectionHeader>, ElfError> {
		for index in 0..self.shnum {
			let shdr = self.section(mem, index);
			if tables.shstrtab.name(mem, shdr.name)?.eq_name(name.clone())? {
				return Ok(Some(shdr));
			}
		}
		Ok(None)
	}

	/// The address of the defined function symbol named `start`.
	pub fn entry_point<M: VirtMemory + ?Sized>(&self, mem: &M) -> Result<u64, ElfError> {
		let tables = self.tables()?;

		for i in 0..tables.nsyms {
			let sym = Symbol::read(mem, tables.symtab + i * Symbol::SIZE);
			if sym.kind() != STT_FUNC || sym.name == 0 || sym.is_undefined() {
				continue;
			}
			if tables.strtab.name(mem, sym.name)?.is(ENTRY_SYMBOL)? {
				return Ok(sym.value);
			}
		}

		Err(ElfError::EntryMissing)
	}
}

#[cfg(test)]
mod tests {
	use prekern_arch::VirtMemory;
	use prekern_test::{ElfBuilder, KERNEL_PA, SectionKind, SimMachine, SymbolKind};

	use super::*;
	use crate::fixture::{self, HEAD_VA, segment_va};

	fn simple() -> ElfBuilder {
		let mut b = ElfBuilder::new();
		let text = b.section(".text", SectionKind::Text, &[0x90; 32], 16);
		b.symbol("start", text, 0x10, SymbolKind::Func);
		b
	}

	fn loaded_physically(bytes: &[u8]) -> SimMachine {
		let mut sim = SimMachine::new();
		sim.load(KERNEL_PA, bytes);
		sim
	}

	#[test]
	fn head_covers_the_section_headers() {
		let elf = simple().build();
		let sim = loaded_physically(&elf.bytes);
		// Null, .text, .symtab, .strtab, .shstrtab.
		assert_eq!(elf.section_count(), 5);
		assert_eq!(head_size(&sim, KERNEL_PA, elf.bytes.len() as u64), Ok(4096));
	}

	#[test]
	fn rejects_foreign_headers() {
		for (at, patch, err) in [
			(0, &b"\x7FELG"[..], ElfError::BadMagic),
			(4, &[1][..], ElfError::BadClass(1)),
			(16, &[2, 0][..], ElfError::NotRelocatable(2)),
			(58, &[40, 0][..], ElfError::BadSectionHeaderSize(40)),
		] {
			let mut b = simple();
			b.patch_header(at, patch);
			let elf = b.build();
			let sim = loaded_physically(&elf.bytes);
			assert_eq!(head_size(&sim, KERNEL_PA, elf.bytes.len() as u64), Err(err));
		}
	}

	#[test]
	fn section_headers_must_lie_inside_the_image() {
		for shoff in [u64::MAX - 0x10, 0x10_0000] {
			let mut b = simple();
			b.patch_header(40, &shoff.to_le_bytes());
			let elf = b.build();
			let sim = loaded_physically(&elf.bytes);
			assert_eq!(
				head_size(&sim, KERNEL_PA, elf.bytes.len() as u64),
				Err(ElfError::HeaderOutsideImage { shoff, shnum: 5 })
			);
		}
	}

	#[test]
	fn section_contents_must_lie_inside_the_image() {
		for size in [u64::MAX, 0x10_0000] {
			let mut b = simple();
			// `sh_size` of section 1, `.text`.
			b.patch_header(64 + 64 + 32, &size.to_le_bytes());
			let elf = b.build();
			let (space, image, _) = fixture::map_head(&elf).unwrap();
			assert_eq!(
				image.segment(space.mem(), SegmentClass::Text),
				Err(ElfError::SectionOutsideImage(1))
			);
		}
	}

	#[test]
	fn classes_aggregate_into_segments() {
		let mut b = simple();
		b.section(".text.cold", SectionKind::Text, &[0xCC; 8], 8);
		b.section(".rodata", SectionKind::Rodata, b"hello", 1);
		b.section(".comment", SectionKind::Unallocated, b"cc", 1);
		let elf = b.build();

		let loaded = fixture::load(&elf).unwrap();
		let mem = loaded.space.mem();

		let text = loaded.image.segment(mem, SegmentClass::Text).unwrap();
		assert_eq!(text, Some(Segment {
			pa:    KERNEL_PA + elf.offsets[1],
			size:  0x2000,
			align: PAGE_SIZE,
		}));
		assert_eq!(loaded.image.segment(mem, SegmentClass::Data), Ok(None));

		// Each section sits at the same distance from its segment base as
		// it did physically, and is reachable from the head.
		let cold = loaded.image.section(mem, 2);
		let cold_va = loaded.image.section_va(&cold);
		assert_eq!(cold_va, segment_va(SegmentClass::Text) + 0x1000);
		assert_eq!(mem.read_u8(cold_va), 0xCC);

		let rodata = loaded.image.section(mem, 3);
		let mut hello = [0; 5];
		mem.read(loaded.image.section_va(&rodata), &mut hello);
		assert_eq!(&hello, b"hello");

		// Unallocated sections keep their file offset.
		assert_eq!(loaded.image.section(mem, 4).offset, elf.offsets[4]);
	}

	#[test]
	fn zero_filled_sections_are_cleared() {
		let mut b = simple();
		let bss = b.section(".bss", SectionKind::Bss, &[0; 64], 8);
		let elf = b.build();

		let (mut space, image, _) = fixture::map_head(&elf).unwrap();
		space.mem_mut().load(KERNEL_PA + elf.offset(bss), &[0xAA; 64]);
		let seg = image
			.segment(space.mem(), SegmentClass::Data)
			.unwrap()
			.unwrap();
		fixture::map_segment(&mut space, &image, SegmentClass::Data, seg).unwrap();

		let va = image.section_va(&image.section(space.mem(), bss.0));
		let mut contents = [0xFF; 64];
		space.mem().read(va, &mut contents);
		assert_eq!(contents, [0; 64]);
	}

	#[test]
	fn unsupported_flag_combinations_fail() {
		let mut b = simple();
		// .text made writable.
		b.patch_header(64 + 64 + 8, &0x7_u64.to_le_bytes());
		let elf = b.build();
		let (space, image, _) = fixture::map_head(&elf).unwrap();
		assert_eq!(
			image.segment(space.mem(), SegmentClass::Text),
			Err(ElfError::UnsupportedSection(1))
		);
	}

	#[test]
	fn missing_tables_fail() {
		// .symtab (index 2) turned into an unloaded note.
		let mut b = simple();
		b.patch_header(64 + 2 * 64 + 4, &7_u32.to_le_bytes());
		assert_eq!(
			fixture::load(&b.build()).err(),
			Some(ElfError::MissingSymtab)
		);

		// Section-name table index out of range.
		let mut b = simple();
		b.patch_header(62, &99_u16.to_le_bytes());
		assert_eq!(
			fixture::load(&b.build()).err(),
			Some(ElfError::MissingShstrtab)
		);

		// Symbol table linked to itself.
		let mut b = simple();
		b.patch_header(64 + 2 * 64 + 40, &2_u32.to_le_bytes());
		assert_eq!(
			fixture::load(&b.build()).err(),
			Some(ElfError::MissingStrtab)
		);
	}

	#[test]
	fn entry_point_is_the_rebased_start() {
		let loaded = fixture::rebased(&simple().build()).unwrap();
		assert_eq!(
			loaded.image.entry_point(loaded.space.mem()),
			Ok(segment_va(SegmentClass::Text) + 0x10)
		);
	}

	#[test]
	fn entry_point_must_be_a_function() {
		let mut b = ElfBuilder::new();
		let text = b.section(".text", SectionKind::Text, &[0x90; 32], 16);
		b.symbol("start", text, 0x10, SymbolKind::Object);
		b.symbol("startup", text, 0x0, SymbolKind::Func);
		let loaded = fixture::rebased(&b.build()).unwrap();
		assert_eq!(
			loaded.image.entry_point(loaded.space.mem()),
			Err(ElfError::EntryMissing)
		);
	}

	#[test]
	fn link_sets_resolve_to_section_bounds() {
		let mut b = simple();
		let set = b.section("link_set_modules", SectionKind::Rodata, &[0x11; 24], 8);
		let start = b.undefined("__start_link_set_modules");
		let stop = b.undefined("__stop_link_set_modules");
		let absent = b.undefined("__start_link_set_absent");
		let external = b.undefined("printf");
		let elf = b.build();

		let loaded = fixture::rebased(&elf).unwrap();
		let (mem, image) = (loaded.space.mem(), &loaded.image);
		let base = image.section_va(&image.section(mem, set.0));
		assert_eq!(base, segment_va(SegmentClass::Rodata));

		assert_eq!(image.sym_lookup(mem, start.0), Ok(base));
		assert_eq!(image.sym_lookup(mem, stop.0), Ok(base + 24));
		assert_eq!(
			image.sym_lookup(mem, absent.0),
			Err(ElfError::MissingLinkSet(absent.0))
		);
		assert_eq!(
			image.sym_lookup(mem, external.0),
			Err(ElfError::UndefinedSymbol(external.0))
		);
		assert_eq!(
			image.sym_lookup(mem, 99),
			Err(ElfError::BadSymbolIndex(99))
		);
	}

	#[test]
	fn unrebased_symbols_are_rejected() {
		let mut b = simple();
		let note = b.section(".note", SectionKind::Unallocated, &[0; 8], 1);
		let zero = b.symbol("orphan", note, 0, SymbolKind::Object);
		let loaded = fixture::rebased(&b.build()).unwrap();
		assert_eq!(
			loaded.image.sym_lookup(loaded.space.mem(), zero.0),
			Err(ElfError::ZeroSymbol(zero.0))
		);
	}

	#[test]
	fn symbols_follow_their_section() {
		let mut b = simple();
		let data = b.section(".data", SectionKind::Data, &[0; 64], 8);
		let counter = b.symbol("counter", data, 0x28, SymbolKind::Object);
		let loaded = fixture::rebased(&b.build()).unwrap();
		assert_eq!(
			loaded.image.sym_lookup(loaded.space.mem(), counter.0),
			Ok(segment_va(SegmentClass::Data) + 0x28)
		);
		assert_eq!(loaded.image.head_va(), HEAD_VA);
	}
}
