//! Sanity checks on what the earlier boot stage handed over.

use prekern_arch::paging::PAGE_SIZE;
use prekern_protocol::BootHandoff;

/// The earlier stage left the machine in a state the loader cannot use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HandoffError {
	/// The kernel's physical start or end is zero.
	#[error("kernel physical range unknown")]
	KernelUnknown,
	/// The kernel's physical start or end is not page aligned.
	#[error("kernel physical range {start:#x}..{end:#x} is not page aligned")]
	KernelMisaligned {
		/// First byte.
		start: u64,
		/// One past the last byte.
		end:   u64,
	},
	/// The kernel's physical range is empty or inverted.
	#[error("kernel physical range {start:#x}..{end:#x} is empty")]
	KernelEmpty {
		/// First byte.
		start: u64,
		/// One past the last byte.
		end:   u64,
	},
	/// The first free physical page lies inside the kernel.
	#[error("first free page {first_avail:#x} overlaps the kernel (ends at {end:#x})")]
	FreeOverlapsKernel {
		/// First free physical byte.
		first_avail: u64,
		/// End of the kernel.
		end:         u64,
	},
	/// The top-level page table is not among the earlier stage's
	/// bootstrap tables.
	#[error("top-level page table {0:#x} is outside the bootstrap tables")]
	PdirOutside(u64),
}

/// Checks the handoff before anything is allocated from it.
pub fn validate(handoff: &BootHandoff) -> Result<(), HandoffError> {
	let start = handoff.kernel_pa_start;
	let end = handoff.kernel_pa_end;

	if start == 0 || end == 0 {
		return Err(HandoffError::KernelUnknown);
	}
	if start % PAGE_SIZE != 0 || end % PAGE_SIZE != 0 {
		return Err(HandoffError::KernelMisaligned { start, end });
	}
	if end <= start {
		return Err(HandoffError::KernelEmpty { start, end });
	}
	if handoff.first_avail < end {
		return Err(HandoffError::FreeOverlapsKernel {
			first_avail: handoff.first_avail,
			end,
		});
	}
	if !(end..handoff.first_avail).contains(&handoff.pdir_pa) {
		return Err(HandoffError::PdirOutside(handoff.pdir_pa));
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn good() -> BootHandoff {
		BootHandoff {
			kernel_pa_start: 0x20_0000,
			kernel_pa_end: 0x30_0000,
			first_avail: 0x30_4000,
			pdir_pa: 0x30_0000,
			..BootHandoff::default()
		}
	}

	#[test]
	fn accepts_a_sane_layout() {
		assert_eq!(validate(&good()), Ok(()));
	}

	#[test]
	fn rejects_unknown_and_misaligned_ranges() {
		let h = BootHandoff {
			kernel_pa_end: 0,
			..good()
		};
		assert_eq!(validate(&h), Err(HandoffError::KernelUnknown));

		let h = BootHandoff {
			kernel_pa_start: 0x20_0800,
			..good()
		};
		assert!(matches!(
			validate(&h),
			Err(HandoffError::KernelMisaligned { start: 0x20_0800, .. })
		));
	}

	#[test]
	fn rejects_empty_ranges() {
		let h = BootHandoff {
			kernel_pa_end: 0x20_0000,
			..good()
		};
		assert!(matches!(validate(&h), Err(HandoffError::KernelEmpty { .. })));
	}

	#[test]
	fn rejects_free_memory_inside_the_kernel() {
		let h = BootHandoff {
			first_avail: 0x2F_F000,
			..good()
		};
		assert!(matches!(
			validate(&h),
			Err(HandoffError::FreeOverlapsKernel { .. })
		));
	}

	#[test]
	fn top_level_table_must_sit_in_the_bootstrap_tables() {
		for pdir in [0x1000, 0x2F_F000, 0x30_4000] {
			let h = BootHandoff {
				pdir_pa: pdir,
				..good()
			};
			assert_eq!(validate(&h), Err(HandoffError::PdirOutside(pdir)));
		}
	}
}
