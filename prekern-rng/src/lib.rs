//! Entropy gathering and the loader's pseudo-random byte stream.
//!
//! All inputs (bootloader seed blobs, hardware RNG words, the cycle
//! counter) are condensed with SHA-512. The first half of each digest is
//! the secret state carried into the next round; the second half is the
//! output buffer callers draw from.
#![cfg_attr(not(test), no_std)]

mod seed;

use prekern_arch::Cpu;
use sha2::{Digest, Sha512};

pub use self::seed::{SeedBlob, SeedBlobs};

/// Size of the output buffer, and the most a single draw may request.
pub const OUTPUT_SIZE: usize = 32;

/// Most hardware RNG words mixed into one entropy sample.
const HW_RNG_WORDS: usize = 8;

/// Entropy errors. All of them are fatal at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RngError {
	/// A seed blob was not exactly one saved-seed record long.
	#[error("random seed at {pa:#x}: bad length {len}")]
	BadSeedLength {
		/// Physical address of the blob.
		pa:  u64,
		/// Length the boot-info list reported.
		len: u64,
	},
	/// A seed blob's embedded digest does not match its payload.
	#[error("random seed at {pa:#x}: bad file checksum")]
	BadSeedChecksum {
		/// Physical address of the blob.
		pa: u64,
	},
	/// More than [`OUTPUT_SIZE`] bytes were requested in one draw.
	#[error("requested {0} random bytes at once (max {max})", max = OUTPUT_SIZE)]
	RequestTooLarge(usize),
}

/// Anything that can hand out uniformly distributed 64-bit words.
pub trait RandomSource {
	/// Draws the next word.
	fn random_u64(&mut self) -> u64;
}

/// The reseedable generator.
pub struct Rng<C: Cpu> {
	/// Source of per-round entropy.
	cpu:    C,
	/// Secret accumulator.
	state:  [u8; 32],
	/// Current output buffer.
	output: [u8; OUTPUT_SIZE],
	/// Bytes of `output` already handed out.
	used:   usize,
	/// Rounds run since initialization.
	rounds: u64,
}

impl<C: Cpu> Rng<C> {
	/// Seeds the generator from every blob in `seeds`, then one fresh
	/// entropy sample.
	///
	/// Each blob is verified before any of it is hashed; a single bad blob
	/// fails the whole initialization.
	pub fn new<I>(cpu: C, seeds: I) -> Result<Self, RngError>
	where
		I: IntoIterator<Item = Result<SeedBlob, RngError>>,
	{
		let mut hasher = Sha512::new();

		let mut blobs = 0_usize;
		for blob in seeds {
			let blob = blob?;
			hasher.update(blob.verified_data()?);
			blobs += 1;
		}

		sample_entropy(&cpu, &mut hasher);

		log::debug!(
			"rng: {blobs} seed blob(s), hardware rng {}",
			if cpu.has_hw_rng() { "present" } else { "absent" }
		);

		let mut rng = Self {
			cpu,
			state: [0; 32],
			output: [0; OUTPUT_SIZE],
			used: 0,
			rounds: 0,
		};
		rng.absorb(&hasher.finalize());
		Ok(rng)
	}

	/// Fills `buf` with random bytes.
	///
	/// `buf` may be at most [`OUTPUT_SIZE`] bytes long.
	pub fn get_rand(&mut self, buf: &mut [u8]) -> Result<(), RngError> {
		if buf.len() > OUTPUT_SIZE {
			return Err(RngError::RequestTooLarge(buf.len()));
		}
		self.extract(buf);
		Ok(())
	}

	/// The number of reseed rounds run so far (initialization excluded).
	#[must_use]
	pub fn rounds(&self) -> u64 {
		self.rounds
	}

	/// Copies out of the output buffer, running exactly one round if it
	/// runs dry part-way. `buf.len()` must be at most [`OUTPUT_SIZE`].
	fn extract(&mut self, buf: &mut [u8]) {
		debug_assert!(buf.len() <= OUTPUT_SIZE);

		let avail = OUTPUT_SIZE - self.used;
		if buf.len() > avail {
			let (head, tail) = buf.split_at_mut(avail);
			head.copy_from_slice(&self.output[self.used..]);
			self.round();
			tail.copy_from_slice(&self.output[..tail.len()]);
			self.used = tail.len();
		} else {
			let end = self.used + buf.len();
			buf.copy_from_slice(&self.output[self.used..end]);
			self.used = end;
		}
	}

	/// Rehashes the state with a fresh entropy sample.
	fn round(&mut self) {
		let mut hasher = Sha512::new();
		hasher.update(self.state);
		sample_entropy(&self.cpu, &mut hasher);
		self.absorb(&hasher.finalize());
		self.rounds += 1;
	}

	/// Splits a digest into the new state and output buffer.
	fn absorb(&mut self, digest: &[u8]) {
		let (state, output) = digest.split_at(32);
		self.state.copy_from_slice(state);
		self.output.copy_from_slice(output);
		self.used = 0;
	}
}

impl<C: Cpu> RandomSource for Rng<C> {
	fn random_u64(&mut self) -> u64 {
		let mut word = [0; 8];
		self.extract(&mut word);
		u64::from_le_bytes(word)
	}
}

/// Mixes up to [`HW_RNG_WORDS`] hardware RNG words (stopping at the first
/// failed draw) and one cycle counter reading into `hasher`.
fn sample_entropy<C: Cpu>(cpu: &C, hasher: &mut Sha512) {
	if cpu.has_hw_rng() {
		for _ in 0..HW_RNG_WORDS {
			let Some(word) = cpu.hw_rng() else {
				break;
			};
			hasher.update(word.to_le_bytes());
		}
	}

	hasher.update(cpu.cycle_counter().to_le_bytes());
}
