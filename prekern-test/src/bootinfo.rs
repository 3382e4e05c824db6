use prekern_protocol::{
	bootinfo::{self, EntryType},
	seed::{DATA_LEN, SEED_SIZE},
};
use sha1::{Digest, Sha1};

/// Builds a saved seed record with a valid digest.
#[must_use]
pub fn seed_blob_bytes(entropy: u32, data: &[u8]) -> Vec<u8> {
	assert_eq!(data.len(), DATA_LEN, "seed payload must be {DATA_LEN} bytes");

	let mut blob = Vec::with_capacity(SEED_SIZE);
	blob.extend_from_slice(&entropy.to_le_bytes());
	blob.extend_from_slice(data);
	let digest = Sha1::digest(&blob);
	blob.extend_from_slice(&digest);
	blob
}

/// Builds a boot-info list.
#[derive(Debug, Default)]
pub struct BootInfoBuilder {
	/// Encoded entries, headers included.
	entries: Vec<Vec<u8>>,
}

impl BootInfoBuilder {
	/// An empty list.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Appends an entry of raw type `ty` with `body` after its header.
	#[must_use]
	pub fn entry(mut self, ty: i32, body: &[u8]) -> Self {
		let len = bootinfo::ENTRY_HEADER_SIZE as usize + body.len();
		let mut entry = Vec::with_capacity(len);
		entry.extend_from_slice(&(len as i32).to_le_bytes());
		entry.extend_from_slice(&ty.to_le_bytes());
		entry.extend_from_slice(body);
		self.entries.push(entry);
		self
	}

	/// Appends a module list of `(path, type, len, base)` records.
	#[must_use]
	pub fn modules(self, modules: &[(&str, i32, u32, u32)]) -> Self {
		let mut body = Vec::new();
		body.extend_from_slice(&(modules.len() as i32).to_le_bytes());
		let end = modules.iter().map(|m| m.3 + m.2).max().unwrap_or(0);
		body.extend_from_slice(&end.to_le_bytes());

		for &(path, ty, len, base) in modules {
			let mut name = [0_u8; bootinfo::MODULE_PATH_LEN as usize];
			let n = path.len().min(name.len() - 1);
			name[..n].copy_from_slice(&path.as_bytes()[..n]);
			body.extend_from_slice(&name);
			body.extend_from_slice(&ty.to_le_bytes());
			body.extend_from_slice(&(len as i32).to_le_bytes());
			body.extend_from_slice(&base.to_le_bytes());
		}

		self.entry(EntryType::ModuleList as i32, &body)
	}

	/// Encodes the list.
	#[must_use]
	pub fn build(self) -> Vec<u8> {
		let mut out = Vec::new();
		out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
		out.extend_from_slice(&0_u32.to_le_bytes());
		for entry in self.entries {
			out.extend_from_slice(&entry);
		}
		out
	}
}
