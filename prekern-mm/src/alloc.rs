use prekern_arch::paging::PAGE_SIZE;

/// A simple, allocate-only physical page allocator.
///
/// Hands out pages upward from the first free physical address the
/// earlier boot stage reported. Nothing is ever freed; the current mark
/// is the end of everything the prekern allocated.
///
/// Zeroing needs a mapping and is done by
/// [`AddressSpace::allocate`](crate::AddressSpace::allocate).
#[derive(Debug, Clone)]
pub struct PhysAlloc {
	/// The next physical address to hand out.
	mark: u64,
}

impl PhysAlloc {
	/// Starts allocating at `first_avail`, which must be page aligned.
	#[must_use]
	pub const fn new(first_avail: u64) -> Self {
		Self { mark: first_avail }
	}

	/// The next physical address that would be handed out.
	#[must_use]
	pub const fn mark(&self) -> u64 {
		self.mark
	}

	/// Reserves `npages` contiguous pages, returning their base.
	pub fn bump(&mut self, npages: u64) -> u64 {
		let pa = self.mark;
		self.mark += npages * PAGE_SIZE;
		pa
	}
}
