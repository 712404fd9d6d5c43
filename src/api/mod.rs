// Queue, sink and worker orchestration built on the pure engine in `core`.
pub mod config;
pub mod distributor;
pub mod index;
pub mod local;
pub mod lookup;
pub mod queue;
pub mod signal;
pub mod sink;
pub mod spool;
pub mod status;
pub mod worker;

pub use config::{JobConfig, KeyspaceSummary};
pub use distributor::{FillReport, WorkDistributor};
pub use index::{IndexReport, OutputMode, WordlistIndexer};
pub use local::{LocalPool, LocalReport};
pub use lookup::{HashEncoding, IndexLookup, LookupResult, LookupStats, QuerySet, ResultSet};
pub use queue::{ApiResult, MemoryQueue, OutgoingMessage, ReceivedMessage, WorkQueue};
pub use sink::{DirectorySink, HttpSink, ObjectSink};
pub use spool::SpoolQueue;
pub use worker::{PollOutcome, Worker, WorkerReport};
