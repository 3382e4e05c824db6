use prekern_arch::VirtMemory;

use crate::ElfError;

/// A string table somewhere in the address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StrTable {
	/// Base address.
	pub va:   u64,
	/// Size in bytes.
	pub size: u64,
}

impl StrTable {
	/// The NUL-terminated name at `offset`.
	pub fn name<M: VirtMemory + ?Sized>(self, mem: &M, offset: u32) -> Result<Name<'_, M>, ElfError> {
		if u64::from(offset) >= self.size {
			return Err(ElfError::NameOffset(offset));
		}
		Ok(Name {
			mem,
			table: self,
			pos: u64::from(offset),
			done: false,
		})
	}
}

/// The bytes of a name, read lazily and bounded by its table.
pub(crate) struct Name<'m, M: ?Sized> {
	/// Where the table lives.
	mem:   &'m M,
	/// The table.
	table: StrTable,
	/// Offset of the next byte.
	pos:   u64,
	/// Set once the terminator (or an error) was seen.
	done:  bool,
}

impl<M: ?Sized> Clone for Name<'_, M> {
	fn clone(&self) -> Self {
		Self {
			mem:   self.mem,
			table: self.table,
			pos:   self.pos,
			done:  self.done,
		}
	}
}

impl<M: VirtMemory + ?Sized> Iterator for Name<'_, M> {
	type Item = Result<u8, ElfError>;

	fn next(&mut self) -> Option<Self::Item> {
		if self.done {
			return None;
		}
		if self.pos >= self.table.size {
			self.done = true;
			return Some(Err(ElfError::NameOverflow));
		}
		let b = self.mem.read_u8(self.table.va + self.pos);
		if b == 0 {
			self.done = true;
			return None;
		}
		self.pos += 1;
		Some(Ok(b))
	}
}

impl<M: VirtMemory + ?Sized> Name<'_, M> {
	/// Whether the whole name is exactly `expected`.
	pub fn is(self, expected: &[u8]) -> Result<bool, ElfError> {
		let mut len = 0;
		for b in self {
			if expected.get(len) != Some(&b?) {
				return Ok(false);
			}
			len += 1;
		}
		Ok(len == expected.len())
	}

	/// The rest of the name after `prefix`, if it starts with it.
	pub fn strip_prefix(mut self, prefix: &[u8]) -> Result<Option<Self>, ElfError> {
		for &want in prefix {
			match self.next().transpose()? {
				Some(b) if b == want => {}
				_ => return Ok(None),
			}
		}
		Ok(Some(self))
	}

	/// Whether two names (possibly in different tables) are identical.
	pub fn eq_name<N: VirtMemory + ?Sized>(mut self, mut other: Name<'_, N>) -> Result<bool, ElfError> {
		loop {
			match (self.next().transpose()?, other.next().transpose()?) {
				(None, None) => return Ok(true),
				(Some(a), Some(b)) if a == b => {}
				_ => return Ok(false),
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use prekern_test::SimMachine;

	use super::*;

	const TABLE: u64 = 0x9000;

	fn table(bytes: &[u8]) -> (SimMachine, StrTable) {
		let mut sim = SimMachine::new();
		sim.load(TABLE, bytes);
		(sim, StrTable {
			va:   TABLE,
			size: bytes.len() as u64,
		})
	}

	#[test]
	fn exact_names() {
		let (sim, t) = table(b"\0start\0started\0");
		assert!(t.name(&sim, 1).unwrap().is(b"start").unwrap());
		assert!(!t.name(&sim, 7).unwrap().is(b"start").unwrap());
		assert!(!t.name(&sim, 1).unwrap().is(b"started").unwrap());
		assert!(t.name(&sim, 0).unwrap().is(b"").unwrap());
	}

	#[test]
	fn bounds_are_enforced() {
		let (sim, t) = table(b"\0abc");
		assert_eq!(t.name(&sim, 4).err(), Some(ElfError::NameOffset(4)));
		assert_eq!(t.name(&sim, 1).unwrap().is(b"abc"), Err(ElfError::NameOverflow));
	}

	#[test]
	fn prefixes_and_cross_table_compare() {
		let (mut sim, syms) = table(b"\0__start_link_set_foo\0");
		let secs = StrTable {
			va:   TABLE + 0x100,
			size: 14,
		};
		sim.load(secs.va, b"\0link_set_foo\0");

		let rest = syms
			.name(&sim, 1)
			.unwrap()
			.strip_prefix(b"__start_")
			.unwrap()
			.unwrap();
		assert!(rest.clone().eq_name(secs.name(&sim, 1).unwrap()).unwrap());
		assert!(rest.strip_prefix(b"link_set").unwrap().is_some());
		assert!(
			syms.name(&sim, 1)
				.unwrap()
				.strip_prefix(b"__stop_")
				.unwrap()
				.is_none()
		);
	}
}
