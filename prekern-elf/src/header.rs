//! Raw ELF64 structures, read and written in place.

use prekern_arch::VirtMemory;

use crate::ElfError;

pub(crate) const ELFMAG: [u8; 4] = [0x7F, b'E', b'L', b'F'];
pub(crate) const EI_CLASS: u64 = 4;
pub(crate) const ELFCLASS64: u8 = 2;
pub(crate) const ET_REL: u16 = 1;

pub(crate) const E_TYPE: u64 = 16;
pub(crate) const E_SHOFF: u64 = 40;
pub(crate) const E_SHENTSIZE: u64 = 58;
pub(crate) const E_SHNUM: u64 = 60;
pub(crate) const E_SHSTRNDX: u64 = 62;

pub(crate) const SHT_PROGBITS: u32 = 1;
pub(crate) const SHT_SYMTAB: u32 = 2;
pub(crate) const SHT_STRTAB: u32 = 3;
pub(crate) const SHT_RELA: u32 = 4;
pub(crate) const SHT_NOBITS: u32 = 8;
pub(crate) const SHT_REL: u32 = 9;

pub(crate) const SHF_WRITE: u64 = 0x1;
pub(crate) const SHF_ALLOC: u64 = 0x2;
pub(crate) const SHF_EXECINSTR: u64 = 0x4;

pub(crate) const SHN_UNDEF: u16 = 0;

pub(crate) const STT_FUNC: u8 = 2;

/// Checks the identification and type of the header at `va`.
pub(crate) fn check_header<M: VirtMemory + ?Sized>(mem: &M, va: u64) -> Result<(), ElfError> {
	let mut magic = [0; 4];
	mem.read(va, &mut magic);
	if magic != ELFMAG {
		return Err(ElfError::BadMagic);
	}

	let class = mem.read_u8(va + EI_CLASS);
	if class != ELFCLASS64 {
		return Err(ElfError::BadClass(class));
	}

	let ty = mem.read_u16(va + E_TYPE);
	if ty != ET_REL {
		return Err(ElfError::NotRelocatable(ty));
	}

	let shentsize = mem.read_u16(va + E_SHENTSIZE);
	if u64::from(shentsize) != SectionHeader::SIZE {
		return Err(ElfError::BadSectionHeaderSize(shentsize));
	}

	Ok(())
}

/// An `Elf64_Shdr`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SectionHeader {
	/// Name offset in the section-name table.
	pub name:      u32,
	/// `SHT_*`.
	pub ty:        u32,
	/// `SHF_*`.
	pub flags:     u64,
	/// Offset from the head (from the file start before placement).
	pub offset:    u64,
	/// Size in bytes.
	pub size:      u64,
	/// Linked section.
	pub link:      u32,
	/// Extra information; the target section for relocation tables.
	pub info:      u32,
	/// Required alignment; zero means none.
	pub addralign: u64,
}

impl SectionHeader {
	/// Size of one header.
	pub const SIZE: u64 = 64;

	/// Reads the header at `va`.
	pub fn read<M: VirtMemory + ?Sized>(mem: &M, va: u64) -> Self {
		Self {
			name:      mem.read_u32(va),
			ty:        mem.read_u32(va + 4),
			flags:     mem.read_u64(va + 8),
			offset:    mem.read_u64(va + 24),
			size:      mem.read_u64(va + 32),
			link:      mem.read_u32(va + 40),
			info:      mem.read_u32(va + 44),
			addralign: mem.read_u64(va + 48),
		}
	}

	/// Rewrites the offset of the header at `va`.
	pub(crate) fn write_offset<M: VirtMemory + ?Sized>(mem: &mut M, va: u64, offset: u64) {
		mem.write_u64(va + 24, offset);
	}

	/// Whether the section occupies memory and has contents or is
	/// zero-filled.
	#[must_use]
	pub const fn is_content(&self) -> bool {
		(self.flags & SHF_ALLOC) != 0 && (self.ty == SHT_PROGBITS || self.ty == SHT_NOBITS)
	}

	/// Whether this is one of the tables the boot region carries.
	#[must_use]
	pub const fn is_metadata(&self) -> bool {
		matches!(self.ty, SHT_STRTAB | SHT_REL | SHT_RELA | SHT_SYMTAB)
	}

	/// The alignment the section needs, at least one.
	#[must_use]
	pub const fn align(&self) -> u64 {
		if self.addralign == 0 { 1 } else { self.addralign }
	}
}

/// An `Elf64_Sym`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Symbol {
	/// Name offset in the symbol string table.
	pub name:  u32,
	/// Binding and type.
	pub info:  u8,
	/// Owning section.
	pub shndx: u16,
	/// Value; the address once rebased.
	pub value: u64,
}

impl Symbol {
	/// Size of one symbol.
	pub const SIZE: u64 = 24;

	/// Reads the symbol at `va`.
	pub fn read<M: VirtMemory + ?Sized>(mem: &M, va: u64) -> Self {
		Self {
			name:  mem.read_u32(va),
			info:  mem.read_u8(va + 4),
			shndx: mem.read_u16(va + 6),
			value: mem.read_u64(va + 8),
		}
	}

	/// Rewrites the value of the symbol at `va`.
	pub(crate) fn write_value<M: VirtMemory + ?Sized>(mem: &mut M, va: u64, value: u64) {
		mem.write_u64(va + 8, value);
	}

	/// `STT_*`.
	#[must_use]
	pub const fn kind(&self) -> u8 {
		self.info & 0xF
	}

	/// Whether the symbol is undefined.
	#[must_use]
	pub const fn is_undefined(&self) -> bool {
		self.shndx == SHN_UNDEF
	}
}
