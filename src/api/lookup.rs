//! Purpose: Answer hash queries against JSON-lines digest indexes.
//! Exports: `HashEncoding`, `QuerySet`, `IndexLookup`, `ResultSet`, `LookupResult`, `LookupStats`,
//!          `read_hash_files`.
//! Role: `distgen lookup`; the read side of `index`, `local` and `work` output.
//! Invariants: Index files are streamed line by line; only the query set is held in memory.
//! Invariants: A row matches a query when both digests agree on their common byte prefix,
//!             so truncated index columns answer full-length queries and vice versa.
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::api::queue::ApiResult;
use crate::core::digest::{ALL_ALGORITHMS, AlgorithmRegistry};
use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum HashEncoding {
    #[default]
    Base64,
    Hex,
}

impl FromStr for HashEncoding {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, String> {
        match value.to_ascii_lowercase().as_str() {
            "base64" => Ok(HashEncoding::Base64),
            "hex" => Ok(HashEncoding::Hex),
            _ => Err(format!("expected base64 or hex, got {value:?}")),
        }
    }
}

impl HashEncoding {
    fn decode(self, value: &str) -> ApiResult<Vec<u8>> {
        let decoded = match self {
            HashEncoding::Base64 => STANDARD
                .decode(value)
                .or_else(|_| STANDARD_NO_PAD.decode(value))
                .map_err(|err| err.to_string()),
            HashEncoding::Hex => hex::decode(value).map_err(|err| err.to_string()),
        };
        decoded.map_err(|reason| {
            let hint = match self {
                HashEncoding::Base64 => "Pass `-e hex` for hexadecimal hashes.",
                HashEncoding::Hex => "Hex hashes need an even number of 0-9a-f digits.",
            };
            Error::new(ErrorKind::Usage)
                .with_message(format!("cannot decode hash {value:?}: {reason}"))
                .with_hint(hint)
        })
    }
}

/// Distinct, decoded hashes to look up in one algorithm's column.
#[derive(Clone, Debug)]
pub struct QuerySet {
    algorithm: String,
    hashes: Vec<(String, Vec<u8>)>,
}

impl QuerySet {
    /// Trims and de-duplicates `raw`, dropping blanks; every hash is re-encoded as base64.
    pub fn new<I, S>(
        registry: &AlgorithmRegistry,
        algorithm: &str,
        raw: I,
        encoding: HashEncoding,
    ) -> ApiResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if algorithm == ALL_ALGORITHMS || registry.get(algorithm).is_none() {
            let known: Vec<&str> = registry.names().collect();
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("cannot look up hashes for algorithm {algorithm:?}"))
                .with_hint(format!("Choose one of: {}", known.join(", "))));
        }

        let mut seen = HashSet::new();
        let mut hashes = Vec::new();
        for value in raw {
            let value = value.as_ref().trim();
            if value.is_empty() {
                continue;
            }
            let bytes = encoding.decode(value)?;
            if bytes.is_empty() || !seen.insert(bytes.clone()) {
                continue;
            }
            hashes.push((STANDARD.encode(&bytes), bytes));
        }
        if hashes.is_empty() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("no hashes to look up")
                .with_hint("Pass hashes as arguments, or files of hashes with -f."));
        }
        Ok(Self {
            algorithm: algorithm.to_string(),
            hashes,
        })
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Base64 form of each distinct hash, in request order.
    pub fn hashes(&self) -> impl Iterator<Item = &str> {
        self.hashes.iter().map(|(text, _)| text.as_str())
    }
}

/// One hash per line; surrounding whitespace is trimmed later by `QuerySet::new`.
pub fn read_hash_files(paths: &[PathBuf]) -> ApiResult<Vec<String>> {
    let mut hashes = Vec::new();
    for path in paths {
        let file = open_input(path, "hash file does not exist or is not readable")?;
        let before = hashes.len();
        for line in BufReader::new(file).lines() {
            hashes.push(line.map_err(|err| read_error(err, path))?);
        }
        tracing::info!(file = %path.display(), lines = hashes.len() - before, "read hashes");
    }
    Ok(hashes)
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct LookupResult {
    pub preimage: String,
    /// The queried hash, base64 encoded.
    pub hash: String,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ResultSet {
    pub algorithm: String,
    pub results: Vec<LookupResult>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct LookupStats {
    pub queried: u64,
    pub found: u64,
    pub rows: u64,
    /// Rows that were not JSON objects or lacked a decodable column.
    pub skipped: u64,
}

pub struct IndexLookup {
    query: QuerySet,
    by_digest: BTreeMap<Vec<u8>, usize>,
}

impl IndexLookup {
    pub fn new(query: QuerySet) -> Self {
        let by_digest = query
            .hashes
            .iter()
            .enumerate()
            .map(|(position, (_, bytes))| (bytes.clone(), position))
            .collect();
        Self { query, by_digest }
    }

    pub fn search_files(&self, paths: &[PathBuf]) -> ApiResult<(ResultSet, LookupStats)> {
        let mut readers = Vec::with_capacity(paths.len());
        for path in paths {
            readers.push(BufReader::new(open_input(path, "index file does not exist or is not readable")?));
        }
        tracing::info!(
            algorithm = self.query.algorithm(),
            hashes = self.query.len(),
            files = paths.len(),
            "searching index"
        );
        self.search(readers)
    }

    pub fn search<I, R>(&self, sources: I) -> ApiResult<(ResultSet, LookupStats)>
    where
        I: IntoIterator<Item = R>,
        R: BufRead,
    {
        let mut result_set = ResultSet {
            algorithm: self.query.algorithm.clone(),
            results: Vec::new(),
        };
        let mut stats = LookupStats {
            queried: self.query.len() as u64,
            ..LookupStats::default()
        };
        let mut found = vec![false; self.query.len()];

        for mut reader in sources {
            let mut line = Vec::new();
            loop {
                line.clear();
                let read = reader.read_until(b'\n', &mut line).map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to read index")
                        .with_source(err)
                })?;
                if read == 0 {
                    break;
                }
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                stats.rows += 1;

                let Some((preimage, digest)) = self.parse_row(&line) else {
                    stats.skipped += 1;
                    continue;
                };
                for position in self.matching(&digest) {
                    found[position] = true;
                    result_set.results.push(LookupResult {
                        preimage: preimage.clone(),
                        hash: self.query.hashes[position].0.clone(),
                    });
                }
            }
        }

        stats.found = found.iter().filter(|hit| **hit).count() as u64;
        tracing::info!(
            found = stats.found,
            queried = stats.queried,
            rows = stats.rows,
            skipped = stats.skipped,
            "lookup completed"
        );
        Ok((result_set, stats))
    }

    fn parse_row(&self, line: &[u8]) -> Option<(String, Vec<u8>)> {
        let row: Map<String, Value> = match serde_json::from_slice(line) {
            Ok(row) => row,
            Err(err) => {
                tracing::debug!(error = %err, "skipping malformed index row");
                return None;
            }
        };
        let preimage = row.get("preimage").and_then(Value::as_str)?;
        let column = row.get(&self.query.algorithm).and_then(Value::as_str)?;
        let digest = STANDARD.decode(column).ok()?;
        Some((preimage.to_string(), digest))
    }

    /// Positions of every query sharing its common prefix with `digest`.
    fn matching(&self, digest: &[u8]) -> Vec<usize> {
        if digest.is_empty() {
            return Vec::new();
        }
        let mut positions: Vec<usize> = self
            .by_digest
            .range(digest.to_vec()..)
            .take_while(|(query, _)| query.starts_with(digest))
            .map(|(_, position)| *position)
            .collect();
        for len in 1..digest.len() {
            if let Some(position) = self.by_digest.get(&digest[..len]) {
                positions.push(*position);
            }
        }
        positions
    }
}

fn open_input(path: &Path, message: &str) -> ApiResult<File> {
    File::open(path).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(message)
            .with_path(path)
            .with_source(err)
    })
}

fn read_error(err: std::io::Error, path: &Path) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("failed to read input")
        .with_path(path)
        .with_source(err)
}

#[cfg(test)]
mod tests {
    use super::{HashEncoding, IndexLookup, QuerySet, read_hash_files};
    use crate::core::digest::{AlgorithmRegistry, DigestPipeline};
    use crate::core::error::ErrorKind;
    use std::io::Cursor;

    // md5("password")
    const PASSWORD_HEX: &str = "5f4dcc3b5aa765d61d8327deb882cf99";
    const PASSWORD_B64: &str = "X03MO1qnZdYdgyfeuILPmQ==";

    fn index_of(words: &[&str], truncate: Option<usize>) -> Cursor<Vec<u8>> {
        let registry = AlgorithmRegistry::builtin();
        let pipeline = DigestPipeline::new(registry.select(&["md5", "sha1"])).with_truncate(truncate);
        let mut out = Vec::new();
        for word in words {
            pipeline.write_record(word, &mut out).unwrap();
        }
        Cursor::new(out)
    }

    fn query(hashes: &[&str], encoding: HashEncoding) -> QuerySet {
        QuerySet::new(&AlgorithmRegistry::builtin(), "md5", hashes, encoding).unwrap()
    }

    #[test]
    fn hex_hashes_are_converted_to_base64() {
        let set = query(&[PASSWORD_HEX], HashEncoding::Hex);
        assert_eq!(set.hashes().collect::<Vec<_>>(), vec![PASSWORD_B64]);
        assert_eq!("HEX".parse::<HashEncoding>().unwrap(), HashEncoding::Hex);
        assert!("base32".parse::<HashEncoding>().is_err());
    }

    #[test]
    fn duplicates_and_blanks_are_dropped() {
        let set = query(&[PASSWORD_B64, " ", PASSWORD_B64, "X03MO1qn"], HashEncoding::Base64);
        assert_eq!(set.len(), 2);
        assert_eq!(set.algorithm(), "md5");
    }

    #[test]
    fn bad_input_is_a_usage_error() {
        let registry = AlgorithmRegistry::builtin();
        let err = QuerySet::new(&registry, "md5", ["zz"], HashEncoding::Hex).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
        let err = QuerySet::new(&registry, "rot13", [PASSWORD_B64], HashEncoding::Base64).unwrap_err();
        assert!(err.hint().unwrap().contains("md5"));
        let err = QuerySet::new(&registry, "md5", ["", "  "], HashEncoding::Base64).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn full_queries_match_truncated_index_rows() {
        let lookup = IndexLookup::new(query(&[PASSWORD_HEX], HashEncoding::Hex));
        let (results, stats) = lookup
            .search([index_of(&["letmein", "password", "hunter2"], Some(6))])
            .unwrap();
        assert_eq!(results.algorithm, "md5");
        assert_eq!(results.results.len(), 1);
        assert_eq!(results.results[0].preimage, "password");
        assert_eq!(results.results[0].hash, PASSWORD_B64);
        assert_eq!((stats.queried, stats.found, stats.rows, stats.skipped), (1, 1, 3, 0));
    }

    #[test]
    fn truncated_queries_match_whole_digest_rows() {
        let lookup = IndexLookup::new(query(&["X03MO1qn"], HashEncoding::Base64));
        let (results, _) = lookup
            .search([index_of(&["hunter2"], None), index_of(&["password"], None)])
            .unwrap();
        let preimages: Vec<&str> = results.results.iter().map(|r| r.preimage.as_str()).collect();
        assert_eq!(preimages, vec!["password"]);
        assert_eq!(results.results[0].hash, "X03MO1qn");
    }

    #[test]
    fn rows_without_the_column_are_skipped() {
        let index = concat!(
            "{\"preimage\":\"a\",\"sha1\":\"AAAA\"}\n",
            "not json\n",
            "\n",
            "{\"preimage\":\"password\",\"md5\":\"X03MO1qn\"}\n",
        );
        let lookup = IndexLookup::new(query(&[PASSWORD_B64], HashEncoding::Base64));
        let (results, stats) = lookup.search([Cursor::new(index.as_bytes())]).unwrap();
        assert_eq!(results.results.len(), 1);
        assert_eq!((stats.rows, stats.skipped), (3, 2));
    }

    #[test]
    fn hash_files_are_read_line_by_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hashes.txt");
        std::fs::write(&path, format!("{PASSWORD_HEX}\n\n{PASSWORD_HEX}\n")).unwrap();
        let lines = read_hash_files(&[path]).unwrap();
        assert_eq!(lines.len(), 3);
        let set = QuerySet::new(&AlgorithmRegistry::builtin(), "md5", &lines, HashEncoding::Hex).unwrap();
        assert_eq!(set.len(), 1);

        let err = read_hash_files(&[dir.path().join("missing")]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
    }
}
