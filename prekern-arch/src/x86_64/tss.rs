//! The 64-bit task state segment. The loader never switches privilege
//! levels, so only the interrupt stack table is ever filled in.

/// A stack address split the way the TSS stores it (4-byte aligned
/// halves, so the record has no padding).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(C, align(4))]
pub struct StackPtr {
	/// Bits 0..32.
	low:  u32,
	/// Bits 32..64.
	high: u32,
}

impl StackPtr {
	/// No stack.
	pub const NONE: Self = Self { low: 0, high: 0 };

	/// The stack whose top is `top`.
	#[must_use]
	pub const fn new(top: u64) -> Self {
		Self {
			low:  top as u32,
			high: (top >> 32) as u32,
		}
	}
}

/// Task state segment as the CPU reads it.
#[derive(Debug)]
#[repr(C)]
pub struct Tss {
	/// Reserved.
	_reserved0:      u32,
	/// Stacks loaded on a privilege change to rings 0-2. Unused.
	_privileged:     [StackPtr; 3],
	/// Reserved.
	_reserved1:      [u32; 2],
	/// Interrupt stack table; gate IST index `n` selects `ist[n - 1]`.
	pub ist:         [StackPtr; 7],
	/// Reserved.
	_reserved2:      [u32; 2],
	/// Reserved.
	_reserved3:      u16,
	/// Offset of the I/O permission bitmap. Set past the end of the
	/// segment, so there is none.
	pub iopb_offset: u16,
}

static_assertions::const_assert_eq!(size_of::<Tss>(), 104);
static_assertions::const_assert_eq!(core::mem::offset_of!(Tss, ist), 36);

impl Tss {
	/// A TSS whose IST slot `ist` (1-7) points at `stack_top` and whose
	/// other stacks are empty.
	#[must_use]
	pub const fn with_ist(ist: u8, stack_top: u64) -> Self {
		let mut stacks = [StackPtr::NONE; 7];
		stacks[(ist.wrapping_sub(1) % 7) as usize] = StackPtr::new(stack_top);
		Self {
			_reserved0:  0,
			_privileged: [StackPtr::NONE; 3],
			_reserved1:  [0; 2],
			ist:         stacks,
			_reserved2:  [0; 2],
			_reserved3:  0,
			iopb_offset: size_of::<Self>() as u16,
		}
	}
}
