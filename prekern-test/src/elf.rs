//! A tiny writer for ELF64 relocatable objects, laid out the way the
//! bootloader leaves a kernel in memory: header and section headers first,
//! then each allocated section on its own pages, then the symbol, string
//! and relocation tables.

/// Section flag: writable.
const SHF_WRITE: u64 = 0x1;
/// Section flag: occupies memory.
const SHF_ALLOC: u64 = 0x2;
/// Section flag: executable.
const SHF_EXECINSTR: u64 = 0x4;

/// The kinds of section the builder can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
	/// Allocated, executable contents.
	Text,
	/// Allocated, read-only contents.
	Rodata,
	/// Allocated, writable contents.
	Data,
	/// Allocated, writable, zero-filled.
	Bss,
	/// Contents that are not loaded (e.g. a comment section).
	Unallocated,
}

impl SectionKind {
	/// `(sh_type, sh_flags)` for this kind.
	const fn encoding(self) -> (u32, u64) {
		match self {
			Self::Text => (1, SHF_ALLOC | SHF_EXECINSTR),
			Self::Rodata => (1, SHF_ALLOC),
			Self::Data => (1, SHF_ALLOC | SHF_WRITE),
			Self::Bss => (8, SHF_ALLOC | SHF_WRITE),
			Self::Unallocated => (1, 0),
		}
	}
}

/// Symbol types the builder can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
	/// `STT_NOTYPE`.
	NoType,
	/// `STT_OBJECT`.
	Object,
	/// `STT_FUNC`.
	Func,
}

/// Index of a section in the built object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionId(pub u16);

/// Index of a symbol in the built object's symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolId(pub u32);

/// A section queued for output.
#[derive(Debug)]
struct Section {
	/// Name.
	name:  String,
	/// Kind.
	kind:  SectionKind,
	/// Contents (for `Bss`, only the length matters).
	bytes: Vec<u8>,
	/// Required alignment.
	align: u64,
}

/// A symbol queued for output.
#[derive(Debug)]
struct Symbol {
	/// Name.
	name:  String,
	/// Owning section index; zero for undefined.
	shndx: u16,
	/// Value (section-relative).
	value: u64,
	/// Type.
	kind:  SymbolKind,
}

/// A relocation queued for output.
#[derive(Debug, Clone, Copy)]
struct Reloc {
	/// Section patched.
	target: u16,
	/// Offset inside `target`.
	offset: u64,
	/// Symbol index.
	sym:    u32,
	/// Relocation type.
	ty:     u32,
	/// Addend.
	addend: i64,
	/// Emit into a `SHT_RELA` table (otherwise `SHT_REL`).
	rela:   bool,
}

/// The output of [`ElfBuilder::build`].
#[derive(Debug, Clone)]
pub struct BuiltElf {
	/// The whole image, page sized.
	pub bytes:   Vec<u8>,
	/// File offset of every section, by index.
	pub offsets: Vec<u64>,
	/// Size of every section, by index.
	pub sizes:   Vec<u64>,
}

impl BuiltElf {
	/// File offset of `section`.
	#[must_use]
	pub fn offset(&self, section: SectionId) -> u64 {
		self.offsets[usize::from(section.0)]
	}

	/// Reads a little-endian `u64` at `offset` within `section`.
	#[must_use]
	pub fn read_u64(&self, section: SectionId, offset: u64) -> u64 {
		let at = (self.offset(section) + offset) as usize;
		u64::from_le_bytes(self.bytes[at..at + 8].try_into().unwrap())
	}

	/// Number of section headers.
	#[must_use]
	pub fn section_count(&self) -> usize {
		self.offsets.len()
	}
}

/// Builds a relocatable object.
#[derive(Debug, Default)]
pub struct ElfBuilder {
	/// Queued sections, index 1 onward.
	sections: Vec<Section>,
	/// Queued symbols, index 1 onward.
	symbols:  Vec<Symbol>,
	/// Queued relocations.
	relocs:   Vec<Reloc>,
	/// Overrides applied to the header after layout.
	patches:  Vec<(usize, Vec<u8>)>,
}

/// Rounds `v` up to a multiple of `align` (a power of two).
const fn round_up(v: u64, align: u64) -> u64 {
	(v + align - 1) & !(align - 1)
}

impl ElfBuilder {
	/// An empty object.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds a section. Alignment must not exceed a page.
	pub fn section(&mut self, name: &str, kind: SectionKind, bytes: &[u8], align: u64) -> SectionId {
		assert!(align <= 4096, "builder only supports up to page alignment");
		self.sections.push(Section {
			name: name.into(),
			kind,
			bytes: bytes.to_vec(),
			align,
		});
		SectionId(self.sections.len() as u16)
	}

	/// Adds a symbol defined at `value` within `section`.
	pub fn symbol(&mut self, name: &str, section: SectionId, value: u64, kind: SymbolKind) -> SymbolId {
		self.symbols.push(Symbol {
			name: name.into(),
			shndx: section.0,
			value,
			kind,
		});
		SymbolId(self.symbols.len() as u32)
	}

	/// Adds an undefined symbol.
	pub fn undefined(&mut self, name: &str) -> SymbolId {
		self.symbols.push(Symbol {
			name:  name.into(),
			shndx: 0,
			value: 0,
			kind:  SymbolKind::NoType,
		});
		SymbolId(self.symbols.len() as u32)
	}

	/// Adds a relocation with an explicit addend.
	pub fn rela(&mut self, target: SectionId, offset: u64, sym: SymbolId, ty: u32, addend: i64) {
		self.relocs.push(Reloc {
			target: target.0,
			offset,
			sym: sym.0,
			ty,
			addend,
			rela: true,
		});
	}

	/// Adds a relocation whose addend is stored in the patched bytes
	/// (four bytes for the 32-bit kinds, eight otherwise).
	pub fn rel(&mut self, target: SectionId, offset: u64, sym: SymbolId, ty: u32, addend: i64) {
		let bytes = &mut self.sections[usize::from(target.0) - 1].bytes;
		let at = offset as usize;
		if matches!(ty, 2 | 10 | 11) {
			bytes[at..at + 4].copy_from_slice(&(addend as i32).to_le_bytes());
		} else {
			bytes[at..at + 8].copy_from_slice(&addend.to_le_bytes());
		}
		self.relocs.push(Reloc {
			target: target.0,
			offset,
			sym: sym.0,
			ty,
			addend: 0,
			rela: false,
		});
	}

	/// Overwrites header bytes after layout, to build malformed objects.
	pub fn patch_header(&mut self, offset: usize, bytes: &[u8]) {
		self.patches.push((offset, bytes.to_vec()));
	}

	/// Lays out and encodes the object.
	#[must_use]
	pub fn build(&self) -> BuiltElf {
		// Section order: null, content, relocation tables, .symtab,
		// .strtab, .shstrtab.
		let mut reloc_tables: Vec<(u16, bool)> = Vec::new();
		for r in &self.relocs {
			if !reloc_tables.contains(&(r.target, r.rela)) {
				reloc_tables.push((r.target, r.rela));
			}
		}

		let content = self.sections.len();
		let symtab_idx = content + reloc_tables.len() + 1;
		let strtab_idx = symtab_idx + 1;
		let shstrtab_idx = strtab_idx + 1;
		let shnum = shstrtab_idx + 1;

		// Names.
		let mut shstrtab = vec![0_u8];
		fn add_name(table: &mut Vec<u8>, name: &str) -> u32 {
			let at = table.len() as u32;
			table.extend_from_slice(name.as_bytes());
			table.push(0);
			at
		}

		let mut sh_names = vec![0_u32];
		for s in &self.sections {
			sh_names.push(add_name(&mut shstrtab, &s.name));
		}
		for &(target, rela) in &reloc_tables {
			let base = &self.sections[usize::from(target) - 1].name;
			let name = if rela {
				format!(".rela{base}")
			} else {
				format!(".rel{base}")
			};
			sh_names.push(add_name(&mut shstrtab, &name));
		}
		sh_names.push(add_name(&mut shstrtab, ".symtab"));
		sh_names.push(add_name(&mut shstrtab, ".strtab"));
		sh_names.push(add_name(&mut shstrtab, ".shstrtab"));

		// Symbols.
		let mut strtab = vec![0_u8];
		let mut symtab = vec![0_u8; 24];
		for s in &self.symbols {
			let name = add_name(&mut strtab, &s.name);
			let ty = match s.kind {
				SymbolKind::NoType => 0,
				SymbolKind::Object => 1,
				SymbolKind::Func => 2,
			};
			symtab.extend_from_slice(&name.to_le_bytes());
			symtab.push((1 << 4) | ty);
			symtab.push(0);
			symtab.extend_from_slice(&s.shndx.to_le_bytes());
			symtab.extend_from_slice(&s.value.to_le_bytes());
			symtab.extend_from_slice(&0_u64.to_le_bytes());
		}

		// Relocation tables.
		let reloc_bytes: Vec<Vec<u8>> = reloc_tables
			.iter()
			.map(|&(target, rela)| {
				let mut out = Vec::new();
				for r in self.relocs.iter().filter(|r| r.target == target && r.rela == rela) {
					out.extend_from_slice(&r.offset.to_le_bytes());
					out.extend_from_slice(&((u64::from(r.sym) << 32) | u64::from(r.ty)).to_le_bytes());
					if rela {
						out.extend_from_slice(&r.addend.to_le_bytes());
					}
				}
				out
			})
			.collect();

		// Layout.
		let mut offsets = vec![0_u64; shnum];
		let mut sizes = vec![0_u64; shnum];
		let mut cursor = round_up(64 + 64 * shnum as u64, 4096);
		for (i, s) in self.sections.iter().enumerate() {
			offsets[i + 1] = cursor;
			sizes[i + 1] = s.bytes.len() as u64;
			cursor = round_up(cursor + s.bytes.len().max(1) as u64, 4096);
		}
		let tails: Vec<(usize, &[u8])> = reloc_bytes
			.iter()
			.enumerate()
			.map(|(i, b)| (content + 1 + i, b.as_slice()))
			.chain([
				(symtab_idx, symtab.as_slice()),
				(strtab_idx, strtab.as_slice()),
				(shstrtab_idx, shstrtab.as_slice()),
			])
			.collect();
		for &(idx, bytes) in &tails {
			cursor = round_up(cursor, 8);
			offsets[idx] = cursor;
			sizes[idx] = bytes.len() as u64;
			cursor += bytes.len() as u64;
		}
		let total = round_up(cursor, 4096) as usize;

		let mut out = vec![0_u8; total];
		let put = |out: &mut Vec<u8>, at: u64, bytes: &[u8]| {
			out[at as usize..at as usize + bytes.len()].copy_from_slice(bytes);
		};

		// File header.
		put(&mut out, 0, &[0x7F, b'E', b'L', b'F', 2, 1, 1]);
		put(&mut out, 16, &1_u16.to_le_bytes());
		put(&mut out, 18, &62_u16.to_le_bytes());
		put(&mut out, 20, &1_u32.to_le_bytes());
		put(&mut out, 40, &64_u64.to_le_bytes());
		put(&mut out, 52, &64_u16.to_le_bytes());
		put(&mut out, 58, &64_u16.to_le_bytes());
		put(&mut out, 60, &(shnum as u16).to_le_bytes());
		put(&mut out, 62, &(shstrtab_idx as u16).to_le_bytes());

		// Section headers.
		let shdr = |out: &mut Vec<u8>, idx: usize, ty: u32, flags: u64, link: u32, info: u32, align: u64, entsize: u64| {
			let at = 64 + 64 * idx as u64;
			put(out, at, &sh_names[idx].to_le_bytes());
			put(out, at + 4, &ty.to_le_bytes());
			put(out, at + 8, &flags.to_le_bytes());
			put(out, at + 24, &offsets[idx].to_le_bytes());
			put(out, at + 32, &sizes[idx].to_le_bytes());
			put(out, at + 40, &link.to_le_bytes());
			put(out, at + 44, &info.to_le_bytes());
			put(out, at + 48, &align.to_le_bytes());
			put(out, at + 56, &entsize.to_le_bytes());
		};
		for (i, s) in self.sections.iter().enumerate() {
			let (ty, flags) = s.kind.encoding();
			shdr(&mut out, i + 1, ty, flags, 0, 0, s.align, 0);
		}
		for (i, &(target, rela)) in reloc_tables.iter().enumerate() {
			let (ty, entsize) = if rela { (4, 24) } else { (9, 16) };
			shdr(&mut out, content + 1 + i, ty, 0x40, symtab_idx as u32, u32::from(target), 8, entsize);
		}
		shdr(&mut out, symtab_idx, 2, 0, strtab_idx as u32, 1, 8, 24);
		shdr(&mut out, strtab_idx, 3, 0, 0, 0, 1, 0);
		shdr(&mut out, shstrtab_idx, 3, 0, 0, 0, 1, 0);

		// Contents.
		for (i, s) in self.sections.iter().enumerate() {
			if s.kind != SectionKind::Bss {
				put(&mut out, offsets[i + 1], &s.bytes);
			}
		}
		for &(idx, bytes) in &tails {
			put(&mut out, offsets[idx], bytes);
		}

		for (at, bytes) in &self.patches {
			out[*at..*at + bytes.len()].copy_from_slice(bytes);
		}

		BuiltElf {
			bytes: out,
			offsets,
			sizes,
		}
	}
}
