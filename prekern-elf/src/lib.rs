//! The kernel's relocatable ELF image, seen through memory.
//!
//! The earlier boot stage leaves the kernel in physical memory as an
//! `ET_REL` object laid out as: file header, section headers, then the
//! section contents. Nothing is copied; each content section is reached at
//! its new virtual address by rewriting its header's `sh_offset` to the
//! distance from the head region's base. From then on `head_va +
//! sh_offset` is the section's address, for the loader and the kernel
//! alike.
//!
//! The usual sequence is:
//!
//! 1. [`head_size`] on the physical image, to size the head region.
//! 2. [`ElfImage::new`] on the mapped head.
//! 3. [`ElfImage::segment`] / [`ElfImage::assign_segment`] per class.
//! 4. [`ElfImage::build_boot`] once the boot region is mapped.
//! 5. [`ElfImage::rebase_symbols`], then [`ElfImage::relocate`].
//! 6. [`ElfImage::entry_point`].
#![cfg_attr(not(test), no_std)]

#[cfg(test)]
mod fixture;
mod header;
mod image;
mod reloc;
mod strtab;

pub use self::{
	header::{SectionHeader, Symbol},
	image::{ElfImage, Segment, SegmentClass, head_size},
	reloc::Relocation,
};

/// Name of the kernel's entry symbol.
pub const ENTRY_SYMBOL: &[u8] = b"start";

/// ELF engine errors. All of them are fatal at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ElfError {
	/// The identification bytes are not `\x7FELF`.
	#[error("wrong kernel ELF header: bad magic")]
	BadMagic,
	/// Not a 64-bit object.
	#[error("wrong kernel ELF header: class {0} is not ELFCLASS64")]
	BadClass(u8),
	/// Not a relocatable object.
	#[error("wrong kernel ELF header: type {0} is not ET_REL")]
	NotRelocatable(u16),
	/// Section headers are not `Elf64_Shdr` sized.
	#[error("wrong kernel ELF header: section header size {0}")]
	BadSectionHeaderSize(u16),
	/// The section header array runs past the end of the loaded image.
	#[error("wrong kernel ELF header: {shnum} section header(s) at {shoff:#x} outside the image")]
	HeaderOutsideImage {
		/// `e_shoff`.
		shoff: u64,
		/// `e_shnum`.
		shnum: u16,
	},
	/// A section's contents run past the end of the loaded image.
	#[error("section {0} lies outside the image")]
	SectionOutsideImage(u16),
	/// An allocated section fits none of text, rodata or data.
	#[error("section {0}: unsupported type/flags combination")]
	UnsupportedSection(u16),
	/// A section's new address breaks its alignment.
	#[error("section {index}: {va:#x} breaks its alignment")]
	MisalignedSection {
		/// Section index.
		index: u16,
		/// The address it would have had.
		va:    u64,
	},
	/// A metadata table does not lie inside the boot region.
	#[error("section {0} lies outside the boot region")]
	OutsideBoot(u16),
	/// The section-name string table is undefined or out of range.
	#[error("section-name string table not found")]
	MissingShstrtab,
	/// No loaded symbol table.
	#[error("symbol table not found")]
	MissingSymtab,
	/// The symbol table's string table is unusable.
	#[error("symbol string table not found")]
	MissingStrtab,
	/// A name offset lies past the end of its string table.
	#[error("name offset {0:#x} outside its string table")]
	NameOffset(u32),
	/// A name runs off the end of its string table.
	#[error("name runs off the end of its string table")]
	NameOverflow,
	/// A symbol index past the end of the symbol table.
	#[error("symbol index {0} out of range")]
	BadSymbolIndex(u32),
	/// An undefined symbol other than a link-set boundary.
	#[error("symbol {0}: external symbol")]
	UndefinedSymbol(u32),
	/// A link-set boundary symbol with no matching section.
	#[error("symbol {0}: link set not found")]
	MissingLinkSet(u32),
	/// A defined symbol whose value was never rebased.
	#[error("symbol {0}: zero value")]
	ZeroSymbol(u32),
	/// No defined function symbol named `start`.
	#[error("entry point not found")]
	EntryMissing,
	/// A relocation table names a nonexistent target section.
	#[error("relocation table {0}: wrong target section")]
	BadRelocTarget(u16),
	/// A relocation type the loader does not implement.
	#[error("unknown relocation type {0}")]
	UnknownRelocType(u32),
}
