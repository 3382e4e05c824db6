//! Layout of a saved random seed blob.
//!
//! ```text
//! u32 entropy;     // estimated bits, little-endian
//! u8  data[512];
//! u8  digest[20];  // SHA-1 over entropy ++ data
//! ```

/// Total blob size. Anything else is malformed.
pub const SEED_SIZE: usize = 536;
/// Offset of the seed payload.
pub const DATA_OFFSET: usize = 4;
/// Size of the seed payload.
pub const DATA_LEN: usize = 512;
/// Offset of the digest.
pub const DIGEST_OFFSET: usize = DATA_OFFSET + DATA_LEN;
/// Size of the digest.
pub const DIGEST_LEN: usize = 20;

static_assertions::const_assert_eq!(DIGEST_OFFSET + DIGEST_LEN, SEED_SIZE);
