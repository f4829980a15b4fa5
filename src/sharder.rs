use serde::{Deserialize, Serialize};

/// Maps an arbitrary input onto one of `total_shards` buckets.
pub trait Sharder {
    /// Map `input` onto a shard in `0..total_shards`.
    fn get_shard(&self, input: impl AsRef<[u8]>, total_shards: u64) -> u64;
}

/// Sharder shared by all Eppo SDKs: the first 4 bytes of the MD5 digest, read as a big-endian
/// `u32`, modulo `total_shards`.
pub struct Md5Sharder;

impl Sharder for Md5Sharder {
    fn get_shard(&self, input: impl AsRef<[u8]>, total_shards: u64) -> u64 {
        let hash = md5::compute(input);
        let value = u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]]);
        u64::from(value) % total_shards
    }
}

/// Half-open shard interval `[start, end)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ShardRange {
    /// Inclusive start.
    pub start: u64,
    /// Exclusive end.
    pub end: u64,
}

impl ShardRange {
    /// Returns `true` if `v` falls in the range.
    pub fn contains(&self, v: u64) -> bool {
        self.start <= v && v < self.end
    }
}
