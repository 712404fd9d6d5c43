//! Purpose: Compute truncated, base64-encoded digests for preimages and serialise records.
//! Exports: `AlgorithmRegistry`, `AlgorithmSet`, `DigestFn`, `DigestPipeline`, `DigestRecord`.
//! Role: Per-value hot path for workers and the wordlist indexer.
//! Invariants: The registry is an explicit value built once and passed in; no globals.
//! Invariants: Pipelines are immutable and safe to share across threads without locks.
//! Invariants: Records serialise `preimage` first, then digests in algorithm-set order.
use std::io::Write;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::ser::{Serialize, SerializeMap, Serializer};
use sha2::Digest;

use crate::core::error::{Error, ErrorKind};

pub const ALL_ALGORITHMS: &str = "all";
pub const DEFAULT_TRUNCATE_BYTES: usize = 6;

pub type DigestFn = fn(&[u8]) -> Vec<u8>;

#[derive(Clone, Debug, Default)]
pub struct AlgorithmRegistry {
    entries: Vec<(String, DigestFn)>,
}

impl AlgorithmRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("md5", |data| md5::compute(data).0.to_vec());
        registry.register("sha1", |data| sha1::Sha1::digest(data).to_vec());
        registry.register("sha224", |data| sha2::Sha224::digest(data).to_vec());
        registry.register("sha256", |data| sha2::Sha256::digest(data).to_vec());
        registry.register("sha384", |data| sha2::Sha384::digest(data).to_vec());
        registry.register("sha512", |data| sha2::Sha512::digest(data).to_vec());
        registry.register("sha3_256", |data| sha3::Sha3_256::digest(data).to_vec());
        registry.register("sha3_512", |data| sha3::Sha3_512::digest(data).to_vec());
        registry.register("blake3", |data| blake3::hash(data).as_bytes().to_vec());
        registry
    }

    /// Adds or replaces `name`.
    pub fn register(&mut self, name: impl Into<String>, digest: DigestFn) {
        let name = name.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = digest,
            None => self.entries.push((name, digest)),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<DigestFn> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, digest)| *digest)
    }

    /// Resolves requested names; `all` selects everything and unknown names are dropped.
    ///
    /// Callers must check the result with `AlgorithmSet::is_empty`.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> AlgorithmSet {
        if names.iter().any(|name| name.as_ref() == ALL_ALGORITHMS) {
            return AlgorithmSet {
                entries: Arc::from(self.entries.clone()),
            };
        }

        let mut entries: Vec<(String, DigestFn)> = Vec::new();
        for name in names {
            let name = name.as_ref();
            if entries.iter().any(|(existing, _)| existing == name) {
                continue;
            }
            match self.get(name) {
                Some(digest) => entries.push((name.to_string(), digest)),
                None => tracing::debug!(algorithm = name, "dropping unknown algorithm"),
            }
        }
        AlgorithmSet {
            entries: Arc::from(entries),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AlgorithmSet {
    entries: Arc<[(String, DigestFn)]>,
}

impl AlgorithmSet {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DigestRecord {
    pub preimage: String,
    pub digests: Vec<(String, String)>,
}

impl DigestRecord {
    pub fn to_json_line(&self) -> Result<String, Error> {
        let mut line = serde_json::to_string(self).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode digest record")
                .with_source(err)
        })?;
        line.push('\n');
        Ok(line)
    }
}

impl Serialize for DigestRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.digests.len() + 1))?;
        map.serialize_entry("preimage", &self.preimage)?;
        for (name, encoded) in &self.digests {
            map.serialize_entry(name, encoded)?;
        }
        map.end()
    }
}

#[derive(Clone, Debug)]
pub struct DigestPipeline {
    algorithms: AlgorithmSet,
    truncate: Option<usize>,
}

impl DigestPipeline {
    pub fn new(algorithms: AlgorithmSet) -> Self {
        Self {
            algorithms,
            truncate: Some(DEFAULT_TRUNCATE_BYTES),
        }
    }

    /// `None` keeps whole digests.
    pub fn with_truncate(mut self, truncate: Option<usize>) -> Self {
        self.truncate = truncate;
        self
    }

    pub fn algorithms(&self) -> &AlgorithmSet {
        &self.algorithms
    }

    pub fn compute_record(&self, preimage: &str) -> DigestRecord {
        let bytes = preimage.as_bytes();
        let digests = self
            .algorithms
            .entries
            .iter()
            .map(|(name, digest)| {
                let mut raw = digest(bytes);
                if let Some(truncate) = self.truncate {
                    raw.truncate(truncate);
                }
                (name.clone(), STANDARD.encode(raw))
            })
            .collect();
        DigestRecord {
            preimage: preimage.to_string(),
            digests,
        }
    }

    /// Byte-level entry point; preimages that are not UTF-8 text are `Data` errors.
    pub fn compute_record_bytes(&self, preimage: &[u8]) -> Result<DigestRecord, Error> {
        let text = std::str::from_utf8(preimage).map_err(|err| {
            Error::new(ErrorKind::Data)
                .with_message("preimage is not valid UTF-8")
                .with_source(err)
        })?;
        Ok(self.compute_record(text))
    }

    /// Appends one JSON line for `preimage`; returns the number of bytes written.
    pub fn write_record<W: Write>(&self, preimage: &str, out: &mut W) -> Result<usize, Error> {
        let line = self.compute_record(preimage).to_json_line()?;
        out.write_all(line.as_bytes()).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to write digest record")
                .with_source(err)
        })?;
        Ok(line.len())
    }
}

#[cfg(test)]
mod tests {
    use super::{AlgorithmRegistry, DigestPipeline};
    use crate::core::error::ErrorKind;

    fn identity(data: &[u8]) -> Vec<u8> {
        data.to_vec()
    }

    #[test]
    fn unknown_names_are_dropped() {
        let registry = AlgorithmRegistry::builtin();
        let set = registry.select(&["sha256", "nope", "md5", "sha256"]);
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["sha256", "md5"]);
        assert!(registry.select(&["nope"]).is_empty());
        assert_eq!(registry.select(&["all"]).len(), registry.names().count());
    }

    #[test]
    fn md5_truncated_to_six_bytes() {
        let registry = AlgorithmRegistry::builtin();
        let pipeline = DigestPipeline::new(registry.select(&["md5"]));
        let record = pipeline.compute_record("password");
        // md5("password") = 5f4dcc3b5aa765d6...
        assert_eq!(record.digests, vec![("md5".to_string(), "X03MO1qn".to_string())]);
    }

    #[test]
    fn full_digests_when_truncation_disabled() {
        let registry = AlgorithmRegistry::builtin();
        let pipeline = DigestPipeline::new(registry.select(&["sha256"])).with_truncate(None);
        let record = pipeline.compute_record("");
        assert_eq!(
            record.digests[0].1,
            "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="
        );
    }

    #[test]
    fn record_line_keeps_preimage_first() {
        let mut registry = AlgorithmRegistry::empty();
        registry.register("zz", identity);
        registry.register("aa", identity);
        let pipeline = DigestPipeline::new(registry.select(&["all"])).with_truncate(Some(1));
        let line = pipeline.compute_record("01").to_json_line().unwrap();
        assert_eq!(line, "{\"preimage\":\"01\",\"zz\":\"MA==\",\"aa\":\"MA==\"}\n");
    }

    #[test]
    fn undecodable_preimage_is_a_data_error() {
        let pipeline = DigestPipeline::new(AlgorithmRegistry::builtin().select(&["md5"]));
        let err = pipeline.compute_record_bytes(&[0xff, 0xfe]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Data);
        assert!(pipeline.compute_record_bytes(b"ok").is_ok());
    }
}
