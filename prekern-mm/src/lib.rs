//! Memory management for the prekern: it only ever grows.
//!
//! Physical pages come from a bump allocator that never frees. Page
//! tables are built on demand over the ranges the placer hands out, and
//! every leaf is mapped read/write until the final protection pass.
#![cfg_attr(not(test), no_std)]

mod alloc;
mod place;
mod space;

pub use self::{
	alloc::PhysAlloc,
	place::{HEAD_WINDOW, KASLR_WINDOW, MAX_ATTEMPTS, MAX_REGIONS, Placer, VirtRange, Window},
	space::AddressSpace,
};

/// Memory management errors. All of them are fatal at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MmError {
	/// A leaf that must have been empty was already valid.
	#[error("mapping already present at {va:#x}")]
	AlreadyMapped {
		/// The virtual address.
		va: u64,
	},
	/// A region cannot fit its window at all.
	#[error("region of {size:#x} bytes does not fit a {window:#x}-byte window")]
	RegionTooLarge {
		/// Requested size.
		size:   u64,
		/// Window size.
		window: u64,
	},
	/// Alignment is not a power of two of at least a page.
	#[error("bad region alignment {0:#x}")]
	BadAlignment(u64),
	/// Every registration slot is taken.
	#[error("all {} region slots are in use", MAX_REGIONS)]
	SlotsExhausted,
	/// Every random draw overlapped an existing region.
	#[error("no free virtual range found after {0} attempts")]
	PlacementExhausted(u32),
}
