//! Purpose: Job configuration shared by every subcommand, plus the keyspace summary.
//! Exports: `JobConfig`, `KeyspaceSummary`, `DEFAULT_QUEUE_BLOCK_SIZE`, `human_bytes`.
//! Role: Turns raw CLI/env values into a validated alphabet, pipeline and range.
//! Invariants: Every configuration problem surfaces before any work starts.
//! Invariants: Unknown algorithm names are dropped; an empty selection is an error.
use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use serde::Serialize;

use crate::api::queue::ApiResult;
use crate::core::alphabet::Alphabet;
use crate::core::digest::{AlgorithmRegistry, DEFAULT_TRUNCATE_BYTES, DigestPipeline};
use crate::core::error::{Error, ErrorKind};
use crate::core::keyspace::MAX_SEED_LENGTH;
use crate::core::plan::{self, KeyRange};

/// Fallback for `fill` when neither `-B` nor `DISTGEN_BLOCK_SIZE` is given.
pub const DEFAULT_QUEUE_BLOCK_SIZE: u64 = 500_000;

#[derive(Clone, Debug)]
pub struct JobConfig {
    /// `None` selects the printable ASCII default.
    pub charset: Option<String>,
    pub algorithms: Vec<String>,
    pub chars_len: usize,
    pub block_size: Option<BigUint>,
    pub inclusive: bool,
    pub skip: Option<BigUint>,
    pub limit: Option<BigUint>,
    /// `None` keeps whole digests.
    pub truncate: Option<usize>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            charset: None,
            algorithms: vec!["all".to_string()],
            chars_len: 1,
            block_size: None,
            inclusive: false,
            skip: None,
            limit: None,
            truncate: Some(DEFAULT_TRUNCATE_BYTES),
        }
    }
}

impl JobConfig {
    pub fn validate(&self) -> ApiResult<()> {
        if self.chars_len == 0 || self.chars_len > MAX_SEED_LENGTH {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!(
                    "keyspace length must be between 1 and {MAX_SEED_LENGTH}, got {}",
                    self.chars_len
                ))
                .with_hint("Pass a smaller `-k`."));
        }
        if self.block_size.as_ref().is_some_and(Zero::is_zero) {
            return Err(Error::new(ErrorKind::InvalidBlockSize).with_message("block size must be at least 1"));
        }
        if self.truncate == Some(0) {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("truncate must keep at least one byte")
                .with_hint("Use --full-digest to keep whole digests."));
        }
        if self.algorithms.is_empty() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("no hash algorithm requested")
                .with_hint("Pass `-a all` or one or more algorithm names."));
        }
        Ok(())
    }

    pub fn alphabet(&self) -> ApiResult<Alphabet> {
        match &self.charset {
            Some(charset) => Alphabet::new(charset),
            None => Ok(Alphabet::default()),
        }
    }

    pub fn pipeline(&self, registry: &AlgorithmRegistry) -> ApiResult<DigestPipeline> {
        let algorithms = registry.select(&self.algorithms);
        if algorithms.is_empty() {
            let known: Vec<&str> = registry.names().collect();
            return Err(Error::new(ErrorKind::Usage)
                .with_message("none of the requested algorithms are known")
                .with_hint(format!("Choose from: all, {}", known.join(", "))));
        }
        Ok(DigestPipeline::new(algorithms).with_truncate(self.truncate))
    }

    /// Length-class range narrowed by `skip` and `limit`.
    pub fn resolve_range(&self, alphabet: &Alphabet) -> ApiResult<KeyRange> {
        let range = plan::compute_range(self.chars_len, alphabet, self.inclusive)?;
        Ok(range.with_offsets(self.skip.as_ref(), self.limit.as_ref()))
    }

    /// Configured block size, else one that cuts the range into at most 32000 blocks.
    pub fn block_size_for(&self, range: &KeyRange) -> BigUint {
        self.block_size
            .clone()
            .unwrap_or_else(|| plan::auto_block_size(range))
    }

    /// Entry count times the size of one record for the all-minimum value.
    pub fn estimate_output_bytes(
        &self,
        alphabet: &Alphabet,
        pipeline: &DigestPipeline,
        range: &KeyRange,
    ) -> ApiResult<BigUint> {
        let sample: String = std::iter::repeat_n(alphabet.first(), self.chars_len).collect();
        let line = pipeline.compute_record(&sample).to_json_line()?;
        Ok(range.entries() * line.len())
    }

    pub fn summarize(
        &self,
        alphabet: &Alphabet,
        pipeline: &DigestPipeline,
        range: &KeyRange,
    ) -> ApiResult<KeyspaceSummary> {
        let block_size = self.block_size_for(range);
        let estimated_bytes = self.estimate_output_bytes(alphabet, pipeline, range)?;
        Ok(KeyspaceSummary {
            start: range.start.clone(),
            end: range.end.clone(),
            entries: range.entries(),
            blocks: plan::block_count(range, &block_size),
            block_size,
            estimated_human: human_bytes(&estimated_bytes),
            estimated_bytes,
            algorithms: pipeline.algorithms().names().map(str::to_string).collect(),
        })
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct KeyspaceSummary {
    #[serde(with = "crate::core::wire::ordinal")]
    pub start: BigUint,
    #[serde(with = "crate::core::wire::ordinal")]
    pub end: BigUint,
    #[serde(with = "crate::core::wire::ordinal")]
    pub entries: BigUint,
    #[serde(with = "crate::core::wire::ordinal")]
    pub block_size: BigUint,
    #[serde(with = "crate::core::wire::ordinal")]
    pub blocks: BigUint,
    #[serde(with = "crate::core::wire::ordinal")]
    pub estimated_bytes: BigUint,
    pub estimated_human: String,
    pub algorithms: Vec<String>,
}

/// Binary-prefixed size, e.g. `1.5KiB`.
pub fn human_bytes(bytes: &BigUint) -> String {
    const UNITS: [&str; 8] = ["", "Ki", "Mi", "Gi", "Ti", "Pi", "Ei", "Zi"];
    let mut value = bytes.to_f64().unwrap_or(f64::INFINITY);
    for unit in UNITS {
        if value.abs() < 1024.0 {
            return format!("{value:.1}{unit}B");
        }
        value /= 1024.0;
    }
    format!("{value:.1}YiB")
}
