//! The tagged boot-info list left behind by the bootloader.
//!
//! ```text
//! u32 count; u32 unused;
//! count x { i32 len; i32 type; <type-specific, len - 8 bytes> }
//! ```
//!
//! Entries are walked by adding each entry's `len`. All values are
//! little-endian.

/// Size of the list header.
pub const HEADER_SIZE: u64 = 8;

/// Size of the `{len, type}` header every entry starts with.
pub const ENTRY_HEADER_SIZE: u64 = 8;

/// Known entry types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
#[expect(missing_docs)]
pub enum EntryType {
	BootPath    = 0,
	RootDevice  = 1,
	BootDisk    = 3,
	NetIf       = 4,
	Console     = 6,
	BiosGeom    = 7,
	Symtab      = 8,
	MemMap      = 9,
	BootWedge   = 10,
	ModuleList  = 11,
	Framebuffer = 12,
	UserConfig  = 13,
	Efi         = 14,
	EfiMemMap   = 15,
	Prekern     = 16,
}

impl EntryType {
	/// Decodes a raw type value.
	#[must_use]
	pub const fn from_raw(raw: i32) -> Option<Self> {
		Some(match raw {
			0 => Self::BootPath,
			1 => Self::RootDevice,
			3 => Self::BootDisk,
			4 => Self::NetIf,
			6 => Self::Console,
			7 => Self::BiosGeom,
			8 => Self::Symtab,
			9 => Self::MemMap,
			10 => Self::BootWedge,
			11 => Self::ModuleList,
			12 => Self::Framebuffer,
			13 => Self::UserConfig,
			14 => Self::Efi,
			15 => Self::EfiMemMap,
			16 => Self::Prekern,
			_ => return None,
		})
	}
}

/// A module-list entry body, following the entry header:
/// `{i32 num; u32 endpa}`, then `num` module records.
pub const MODULE_LIST_BODY_SIZE: u64 = 8;

/// Length of a module record's NUL-padded path.
pub const MODULE_PATH_LEN: u64 = 80;

/// A module record: `{char path[80]; i32 type; i32 len; u32 base}`.
pub const MODULE_RECORD_SIZE: u64 = MODULE_PATH_LEN + 12;

/// Offset of the module type within a module record.
pub const MODULE_TYPE_OFFSET: u64 = MODULE_PATH_LEN;
/// Offset of the module length within a module record.
pub const MODULE_LEN_OFFSET: u64 = MODULE_PATH_LEN + 4;
/// Offset of the module's physical base within a module record.
pub const MODULE_BASE_OFFSET: u64 = MODULE_PATH_LEN + 8;

/// Module record type of a random seed blob.
pub const MODULE_TYPE_RANDOM: i32 = 3;
