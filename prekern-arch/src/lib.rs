//! Paging model and machine access for the prekern.
//!
//! Everything the loader needs from the machine goes through the
//! three seams in this crate:
//!
//! - [`PageTables`], indexed entry access by paging level and linear index,
//! - [`VirtMemory`], byte access to the address space under construction,
//! - [`Cpu`], the handful of CPU leaves (cycle counter, hardware RNG,
//!   feature bits, TLB invalidation).
//!
//! On bare-metal `x86_64` the [`x86_64`] module implements them on top of
//! the recursive page-table slot. Host tests implement them with a
//! simulated machine instead.
#![cfg_attr(not(test), no_std)]

mod machine;
pub mod paging;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod x86_64;

pub use self::{
	machine::{Cpu, PageTables, VirtMemory},
	paging::{Level, PageTableEntry, Protection},
};
