use std::{
	cell::{Cell, RefCell},
	collections::VecDeque,
};

use prekern_arch::Cpu;

/// A CPU whose leaves are deterministic and counted.
#[derive(Debug)]
pub struct ScriptedCpu {
	/// Next cycle counter value.
	counter:      Cell<u64>,
	/// Cycle counter reads so far.
	cycle_reads:  Cell<usize>,
	/// Whether the hardware RNG is advertised.
	hw_rng:       bool,
	/// Words the hardware RNG will hand out; empty means draws fail.
	hw_words:     RefCell<VecDeque<u64>>,
	/// Hardware RNG draws attempted so far.
	hw_rng_reads: Cell<usize>,
	/// Whether no-execute is supported.
	no_exec:      bool,
	/// Every address passed to `invalidate`, in order.
	invalidated:  RefCell<Vec<u64>>,
}

impl Default for ScriptedCpu {
	fn default() -> Self {
		Self::new()
	}
}

impl ScriptedCpu {
	/// A CPU without a hardware RNG, with no-execute support, whose cycle
	/// counter starts at a fixed value.
	#[must_use]
	pub fn new() -> Self {
		Self::with_counter(0x0000_1234_5678_9ABC)
	}

	/// Like [`ScriptedCpu::new`], but the cycle counter starts at `start`.
	#[must_use]
	pub fn with_counter(start: u64) -> Self {
		Self {
			counter:      Cell::new(start),
			cycle_reads:  Cell::new(0),
			hw_rng:       false,
			hw_words:     RefCell::new(VecDeque::new()),
			hw_rng_reads: Cell::new(0),
			no_exec:      true,
			invalidated:  RefCell::new(Vec::new()),
		}
	}

	/// Advertises a hardware RNG that hands out `words`, then fails.
	#[must_use]
	pub fn with_hw_rng(mut self, words: impl IntoIterator<Item = u64>) -> Self {
		self.hw_rng = true;
		self.hw_words = RefCell::new(words.into_iter().collect());
		self
	}

	/// Reports no no-execute support.
	#[must_use]
	pub fn without_no_exec(mut self) -> Self {
		self.no_exec = false;
		self
	}

	/// Cycle counter reads so far.
	#[must_use]
	pub fn cycle_reads(&self) -> usize {
		self.cycle_reads.get()
	}

	/// Hardware RNG draws attempted so far (failed ones included).
	#[must_use]
	pub fn hw_rng_reads(&self) -> usize {
		self.hw_rng_reads.get()
	}

	/// Every invalidated address, in order.
	#[must_use]
	pub fn invalidations(&self) -> Vec<u64> {
		self.invalidated.borrow().clone()
	}
}

impl Cpu for ScriptedCpu {
	fn cycle_counter(&self) -> u64 {
		self.cycle_reads.set(self.cycle_reads.get() + 1);
		let now = self.counter.get();
		self.counter.set(now.wrapping_add(0x9E37_79B9));
		now
	}

	fn has_hw_rng(&self) -> bool {
		self.hw_rng
	}

	fn hw_rng(&self) -> Option<u64> {
		if !self.hw_rng {
			return None;
		}
		self.hw_rng_reads.set(self.hw_rng_reads.get() + 1);
		self.hw_words.borrow_mut().pop_front()
	}

	fn has_no_exec(&self) -> bool {
		self.no_exec
	}

	fn invalidate(&self, va: u64) {
		self.invalidated.borrow_mut().push(va);
	}
}
