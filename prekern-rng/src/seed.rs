//! Random seed blobs saved by the previous boot and handed over by the
//! bootloader as modules in the boot-info list.

use prekern_arch::VirtMemory;
use prekern_protocol::{
	bootinfo::{self, EntryType},
	seed::{DATA_LEN, DATA_OFFSET, DIGEST_OFFSET, SEED_SIZE},
};
use sha1::{Digest, Sha1};

use crate::RngError;

/// A copy of one saved seed record.
#[derive(Clone)]
pub struct SeedBlob {
	/// Where the bootloader left it.
	pa:    u64,
	/// The raw record.
	bytes: [u8; SEED_SIZE],
}

impl core::fmt::Debug for SeedBlob {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("SeedBlob").field("pa", &self.pa).finish_non_exhaustive()
	}
}

impl SeedBlob {
	/// Copies a seed record. `bytes` must be exactly one record long.
	pub fn from_bytes(pa: u64, bytes: &[u8]) -> Result<Self, RngError> {
		let bytes = bytes.try_into().map_err(|_| {
			RngError::BadSeedLength {
				pa,
				len: bytes.len() as u64,
			}
		})?;
		Ok(Self { pa, bytes })
	}

	/// Checks the embedded SHA-1 digest and returns the seed payload.
	pub fn verified_data(&self) -> Result<&[u8], RngError> {
		let (covered, digest) = self.bytes.split_at(DIGEST_OFFSET);
		if Sha1::digest(covered).as_slice() != digest {
			return Err(RngError::BadSeedChecksum { pa: self.pa });
		}
		Ok(&self.bytes[DATA_OFFSET..DATA_OFFSET + DATA_LEN])
	}
}

/// Walks a boot-info list, yielding every random seed module in order.
pub struct SeedBlobs<'a, M: VirtMemory> {
	/// Memory the list (and the modules) are readable through.
	mem:          &'a M,
	/// Address of the next list entry.
	cursor:       u64,
	/// List entries not yet visited.
	entries_left: u32,
	/// Address of the next module record in the current module list.
	module:       u64,
	/// Module records not yet visited in the current module list.
	modules_left: u32,
}

impl<'a, M: VirtMemory> SeedBlobs<'a, M> {
	/// Starts a walk of the list at `bootinfo`. A zero address yields
	/// nothing.
	#[must_use]
	pub fn new(mem: &'a M, bootinfo: u64) -> Self {
		let entries_left = if bootinfo == 0 {
			0
		} else {
			mem.read_u32(bootinfo)
		};

		Self {
			mem,
			cursor: bootinfo + bootinfo::HEADER_SIZE,
			entries_left,
			module: 0,
			modules_left: 0,
		}
	}

	/// Reads the module record at `self.module`, if it is a seed.
	fn next_module(&mut self) -> Option<Result<SeedBlob, RngError>> {
		let record = self.module;
		self.module += bootinfo::MODULE_RECORD_SIZE;
		self.modules_left -= 1;

		let ty = self.mem.read_u32(record + bootinfo::MODULE_TYPE_OFFSET) as i32;
		if ty != bootinfo::MODULE_TYPE_RANDOM {
			return None;
		}

		let len = u64::from(self.mem.read_u32(record + bootinfo::MODULE_LEN_OFFSET));
		let pa = u64::from(self.mem.read_u32(record + bootinfo::MODULE_BASE_OFFSET));
		if len != SEED_SIZE as u64 {
			return Some(Err(RngError::BadSeedLength { pa, len }));
		}

		let mut bytes = [0; SEED_SIZE];
		self.mem.read(pa, &mut bytes);
		Some(Ok(SeedBlob { pa, bytes }))
	}
}

impl<M: VirtMemory> Iterator for SeedBlobs<'_, M> {
	type Item = Result<SeedBlob, RngError>;

	fn next(&mut self) -> Option<Self::Item> {
		loop {
			if self.modules_left > 0 {
				if let Some(blob) = self.next_module() {
					return Some(blob);
				}
				continue;
			}

			if self.entries_left == 0 {
				return None;
			}
			self.entries_left -= 1;

			let entry = self.cursor;
			let len = self.mem.read_u32(entry) as i32;
			let ty = self.mem.read_u32(entry + 4) as i32;

			if EntryType::from_raw(ty) == Some(EntryType::ModuleList) {
				let count = self.mem.read_u32(entry + bootinfo::ENTRY_HEADER_SIZE) as i32;
				self.modules_left = u32::try_from(count).unwrap_or(0);
				self.module =
					entry + bootinfo::ENTRY_HEADER_SIZE + bootinfo::MODULE_LIST_BODY_SIZE;
			}

			// A non-positive length would walk in place forever.
			match u64::try_from(len) {
				Ok(len) if len > 0 => self.cursor += len,
				_ => self.entries_left = 0,
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use prekern_test::{BootInfoBuilder, SimMachine, seed_blob_bytes};

	use super::*;

	#[test]
	fn finds_seed_modules_among_other_entries() {
		let mut sim = SimMachine::new();
		let good = seed_blob_bytes(128, &[7; 512]);
		sim.load(0x7_0000, &good);

		let list = BootInfoBuilder::new()
			.entry(EntryType::Console as i32, &[0; 16])
			.modules(&[
				("/boot/kernel.sym", 1, 0x1000, 0x6_0000),
				("/var/db/entropy-file", 3, good.len() as u32, 0x7_0000),
			])
			.build();
		sim.load(0x5_0000, &list);

		let blobs: Vec<_> = SeedBlobs::new(&sim, 0x5_0000).collect();
		assert_eq!(blobs.len(), 1);
		let blob = blobs[0].as_ref().unwrap();
		assert_eq!(blob.pa, 0x7_0000);
		assert_eq!(blob.verified_data().unwrap(), &[7; 512]);
	}

	#[test]
	fn wrong_length_is_reported() {
		let sim = {
			let mut sim = SimMachine::new();
			let list = BootInfoBuilder::new()
				.modules(&[("/var/db/entropy-file", 3, 100, 0x7_0000)])
				.build();
			sim.load(0x5_0000, &list);
			sim
		};

		let blobs: Vec<_> = SeedBlobs::new(&sim, 0x5_0000).collect();
		assert!(matches!(
			blobs[..],
			[Err(RngError::BadSeedLength {
				pa: 0x7_0000,
				len: 100
			})]
		));
	}

	#[test]
	fn absent_list_yields_nothing() {
		let sim = SimMachine::new();
		assert_eq!(SeedBlobs::new(&sim, 0).count(), 0);
	}

	#[test]
	fn digest_covers_the_entropy_estimate() {
		let mut bytes = seed_blob_bytes(64, &[1; 512]);
		bytes[0] = 65;
		let blob = SeedBlob::from_bytes(0, &bytes).unwrap();
		assert_eq!(
			blob.verified_data(),
			Err(RngError::BadSeedChecksum { pa: 0 })
		);
		assert!(SeedBlob::from_bytes(0, &bytes[..535]).is_err());
	}
}
