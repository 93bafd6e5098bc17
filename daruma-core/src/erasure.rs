//! Reed-Solomon Erasure Coding
//!
//! Systematic (k, n) coding where:
//! - k data fragments carry the message itself
//! - n - k parity fragments carry redundancy
//! - Any k of the n shares reconstruct the message
//!
//! Every share is self-describing so that shares can be handed back in any
//! order and mismatched shares are detected:
//!
//! ```text
//! [ index: u8 ][ k: u8 ][ n: u8 ][ message_len: u32 BE ][ fragment ]
//! ```

use crate::error::{DarumaError, Result};
use reed_solomon_erasure::galois_8::ReedSolomon;
use serde::{Deserialize, Serialize};

/// Size of the per-share header in bytes
pub const HEADER_SIZE: usize = 7;

/// Largest number of shares a message can be split into
pub const MAX_SHARES: usize = 255;

/// Erasure coding configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErasureConfig {
    /// Number of data shards (k), the reconstruction threshold
    pub data_shards: usize,
    /// Number of parity shards (n - k)
    pub parity_shards: usize,
}

impl ErasureConfig {
    /// Create a config for `threshold`-of-`total` coding
    pub fn new(threshold: usize, total: usize) -> Result<Self> {
        if threshold == 0 {
            return Err(DarumaError::IllegalArgument(
                "threshold must be > 0".to_string(),
            ));
        }
        if threshold > total {
            return Err(DarumaError::IllegalArgument(format!(
                "threshold {} exceeds share count {}",
                threshold, total
            )));
        }
        if total > MAX_SHARES {
            return Err(DarumaError::IllegalArgument(format!(
                "share count {} exceeds maximum {}",
                total, MAX_SHARES
            )));
        }
        Ok(Self {
            data_shards: threshold,
            parity_shards: total - threshold,
        })
    }

    /// Total number of shards
    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    /// Maximum number of lost shares that can be tolerated
    pub fn max_failures(&self) -> usize {
        self.parity_shards
    }

    /// Fragment size for a message of the given length (never zero)
    fn fragment_size(&self, message_len: usize) -> usize {
        message_len.div_ceil(self.data_shards).max(1)
    }
}

/// Parsed share header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ShareHeader {
    index: u8,
    threshold: u8,
    total: u8,
    message_len: u32,
}

impl ShareHeader {
    fn write_to(&self, out: &mut Vec<u8>) {
        out.push(self.index);
        out.push(self.threshold);
        out.push(self.total);
        out.extend_from_slice(&self.message_len.to_be_bytes());
    }

    fn parse(share: &[u8]) -> Result<(Self, &[u8])> {
        if share.len() <= HEADER_SIZE {
            return Err(DarumaError::Decode(format!(
                "share too short: {} bytes",
                share.len()
            )));
        }
        let (head, fragment) = share.split_at(HEADER_SIZE);
        let header = Self {
            index: head[0],
            threshold: head[1],
            total: head[2],
            message_len: u32::from_be_bytes([head[3], head[4], head[5], head[6]]),
        };
        Ok((header, fragment))
    }
}

/// Reed-Solomon encoder/decoder
pub struct ErasureEncoder {
    config: ErasureConfig,
    // None when there are no parity shards (plain striping)
    encoder: Option<ReedSolomon>,
}

impl ErasureEncoder {
    /// Create an encoder for `threshold`-of-`total` coding
    pub fn new(threshold: usize, total: usize) -> Result<Self> {
        Self::with_config(ErasureConfig::new(threshold, total)?)
    }

    /// Create a new encoder with a prepared configuration
    pub fn with_config(config: ErasureConfig) -> Result<Self> {
        let encoder = if config.parity_shards == 0 {
            None
        } else {
            Some(
                ReedSolomon::new(config.data_shards, config.parity_shards)
                    .map_err(|e| DarumaError::Library(e.to_string()))?,
            )
        };
        Ok(Self { config, encoder })
    }

    /// Get the erasure configuration
    pub fn config(&self) -> &ErasureConfig {
        &self.config
    }

    /// Encode a message into `total` framed shares
    pub fn encode(&self, message: &[u8]) -> Result<Vec<Vec<u8>>> {
        let message_len = u32::try_from(message.len()).map_err(|_| {
            DarumaError::IllegalArgument(format!(
                "message of {} bytes is too large to share",
                message.len()
            ))
        })?;
        let fragment_size = self.config.fragment_size(message.len());

        // Pad data to be evenly divisible by data_shards
        let mut padded = message.to_vec();
        padded.resize(fragment_size * self.config.data_shards, 0);

        let mut fragments: Vec<Vec<u8>> =
            padded.chunks(fragment_size).map(|c| c.to_vec()).collect();
        for _ in 0..self.config.parity_shards {
            fragments.push(vec![0u8; fragment_size]);
        }

        if let Some(encoder) = &self.encoder {
            encoder
                .encode(&mut fragments)
                .map_err(|e| DarumaError::Library(e.to_string()))?;
        }

        let shares = fragments
            .into_iter()
            .enumerate()
            .map(|(i, fragment)| {
                let header = ShareHeader {
                    index: i as u8,
                    threshold: self.config.data_shards as u8,
                    total: self.config.total_shards() as u8,
                    message_len,
                };
                let mut share = Vec::with_capacity(HEADER_SIZE + fragment.len());
                header.write_to(&mut share);
                share.extend_from_slice(&fragment);
                share
            })
            .collect();

        Ok(shares)
    }

    /// Decode shares (in any order) back into the original message
    ///
    /// Requires at least `data_shards` distinct, mutually consistent shares.
    pub fn decode<S: AsRef<[u8]>>(&self, shares: &[S]) -> Result<Vec<u8>> {
        let required = self.config.data_shards;
        if shares.len() < required {
            return Err(too_few(shares.len(), required));
        }

        let total = self.config.total_shards();
        let mut slots: Vec<Option<Vec<u8>>> = vec![None; total];
        let mut expected: Option<(u32, usize)> = None;

        for share in shares {
            let (header, fragment) = ShareHeader::parse(share.as_ref())?;

            if header.threshold as usize != required || header.total as usize != total {
                return Err(DarumaError::Decode(format!(
                    "share coded as {}-of-{}, expected {}-of-{}",
                    header.threshold, header.total, required, total
                )));
            }
            let index = header.index as usize;
            if index >= total {
                return Err(DarumaError::Decode(format!(
                    "share index {} out of range (max {})",
                    index,
                    total - 1
                )));
            }

            match expected {
                None => {
                    let fragment_size = self.config.fragment_size(header.message_len as usize);
                    if fragment.len() != fragment_size {
                        return Err(DarumaError::Decode(format!(
                            "fragment size {} does not match message length {}",
                            fragment.len(),
                            header.message_len
                        )));
                    }
                    expected = Some((header.message_len, fragment_size));
                }
                Some((message_len, fragment_size)) => {
                    if header.message_len != message_len || fragment.len() != fragment_size {
                        return Err(DarumaError::Decode(
                            "shares disagree on message size".to_string(),
                        ));
                    }
                }
            }

            if slots[index].is_some() {
                return Err(DarumaError::Decode(format!(
                    "duplicate share index {}",
                    index
                )));
            }
            slots[index] = Some(fragment.to_vec());
        }

        let (message_len, fragment_size) = expected.ok_or_else(|| too_few(0, required))?;

        match &self.encoder {
            Some(encoder) => encoder.reconstruct_data(&mut slots)?,
            None => {
                let present = slots.iter().filter(|s| s.is_some()).count();
                if present < required {
                    return Err(too_few(present, required));
                }
            }
        }

        let mut message = Vec::with_capacity(fragment_size * required);
        for slot in slots.iter().take(required) {
            match slot {
                Some(fragment) => message.extend_from_slice(fragment),
                None => {
                    return Err(DarumaError::Decode("reconstruction incomplete".to_string()))
                }
            }
        }

        message.truncate(message_len as usize);
        Ok(message)
    }
}

/// Split `message` into `total` shares, any `threshold` of which reconstruct it
pub fn share(message: &[u8], threshold: usize, total: usize) -> Result<Vec<Vec<u8>>> {
    ErasureEncoder::new(threshold, total)?.encode(message)
}

/// Reconstruct a message from at least `threshold` shares produced by [`share`]
pub fn reconstruct<S: AsRef<[u8]>>(shares: &[S], threshold: usize, total: usize) -> Result<Vec<u8>> {
    ErasureEncoder::new(threshold, total)?.decode(shares)
}

fn too_few(available: usize, required: usize) -> DarumaError {
    DarumaError::Decode(format!("have {} shares, need {}", available, required))
}

/// Total share count recorded in a share's header
///
/// Readers that do not know how many shares were written use this to pick
/// the decoder.
pub fn share_total(share: &[u8]) -> Result<usize> {
    let (header, _) = ShareHeader::parse(share)?;
    Ok(header.total as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_erasure_config() {
        let config = ErasureConfig::new(3, 5).unwrap();
        assert_eq!(config.data_shards, 3);
        assert_eq!(config.parity_shards, 2);
        assert_eq!(config.total_shards(), 5);
        assert_eq!(config.max_failures(), 2);
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            ErasureConfig::new(0, 5),
            Err(DarumaError::IllegalArgument(_))
        ));
        assert!(matches!(
            ErasureConfig::new(6, 5),
            Err(DarumaError::IllegalArgument(_))
        ));
        assert!(matches!(
            ErasureConfig::new(3, 300),
            Err(DarumaError::IllegalArgument(_))
        ));
        assert!(share(b"data", 6, 5).is_err());
    }

    #[test]
    fn test_encode_decode_simple() {
        let original = b"Hello, Daruma!";
        let shares = share(original, 3, 5).unwrap();
        assert_eq!(shares.len(), 5);

        let decoded = reconstruct(&shares, 3, 5).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_shares_have_equal_length() {
        let shares = share(&[1u8; 1001], 4, 7).unwrap();
        let len = shares[0].len();
        assert!(shares.iter().all(|s| s.len() == len));
    }

    #[test]
    fn test_decode_from_parity_only_subset() {
        let original: Vec<u8> = (0..1000).map(|i| (i % 251) as u8).collect();
        let shares = share(&original, 2, 5).unwrap();

        let subset = vec![shares[4].clone(), shares[3].clone()];
        assert_eq!(reconstruct(&subset, 2, 5).unwrap(), original);
    }

    #[test]
    fn test_too_few_shares() {
        let shares = share(b"test data", 3, 5).unwrap();
        let result = reconstruct(&shares[..2], 3, 5);
        match result {
            Err(DarumaError::Decode(message)) => assert_eq!(message, "have 2 shares, need 3"),
            other => panic!("expected a decode error, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_share_rejected() {
        let shares = share(b"test data", 3, 5).unwrap();
        let subset = vec![shares[0].clone(), shares[0].clone(), shares[1].clone()];
        assert!(matches!(
            reconstruct(&subset, 3, 5),
            Err(DarumaError::Decode(_))
        ));
    }

    #[test]
    fn test_mismatched_sizes_rejected() {
        let a = share(b"short", 2, 3).unwrap();
        let b = share(b"a much longer message", 2, 3).unwrap();
        let mixed = vec![a[0].clone(), b[1].clone()];
        assert!(matches!(reconstruct(&mixed, 2, 3), Err(DarumaError::Decode(_))));
    }

    #[test]
    fn test_wrong_parameters_rejected() {
        let shares = share(b"test data", 3, 5).unwrap();
        assert!(matches!(
            reconstruct(&shares, 2, 5),
            Err(DarumaError::Decode(_))
        ));
    }

    #[test]
    fn test_truncated_share_rejected() {
        let shares = share(b"test data", 2, 3).unwrap();
        let broken = vec![shares[0][..HEADER_SIZE].to_vec(), shares[1].clone()];
        assert!(matches!(reconstruct(&broken, 2, 3), Err(DarumaError::Decode(_))));
    }

    #[test]
    fn test_no_parity_striping() {
        let original = b"striped without parity";
        let shares = share(original, 3, 3).unwrap();
        assert_eq!(reconstruct(&shares, 3, 3).unwrap(), original);
        assert!(reconstruct(&shares[..2], 3, 3).is_err());
    }

    #[test]
    fn test_empty_message() {
        let shares = share(b"", 2, 4).unwrap();
        assert_eq!(reconstruct(&shares[2..], 2, 4).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_share_indices() {
        let shares = share(b"index test", 3, 5).unwrap();
        for (i, s) in shares.iter().enumerate() {
            assert_eq!(s[0] as usize, i);
            assert_eq!(s[1], 3);
            assert_eq!(s[2], 5);
            assert_eq!(share_total(s).unwrap(), 5);
        }
        assert!(share_total(&shares[0][..3]).is_err());
    }

    proptest! {
        #[test]
        fn prop_any_k_subset_reconstructs(
            message in proptest::collection::vec(any::<u8>(), 0..512),
            total in 1usize..9,
            threshold_seed in any::<usize>(),
            order_seed in any::<u64>(),
        ) {
            let threshold = threshold_seed % total + 1;
            let shares = share(&message, threshold, total).unwrap();

            // Deterministic pseudo-shuffle, then take the first `threshold`
            let mut indexed: Vec<(u64, Vec<u8>)> = shares
                .into_iter()
                .enumerate()
                .map(|(i, s)| ((i as u64 + 1).wrapping_mul(order_seed | 1).rotate_left(17), s))
                .collect();
            indexed.sort_by_key(|(k, _)| *k);
            let subset: Vec<Vec<u8>> = indexed.into_iter().take(threshold).map(|(_, s)| s).collect();

            prop_assert_eq!(reconstruct(&subset, threshold, total).unwrap(), message);
        }
    }
}
