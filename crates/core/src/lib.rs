pub mod admission;
pub mod config;
pub mod ingest;
pub mod metrics;
pub mod tee;
pub mod testing;
pub mod work;

pub use admission::{Admission, AdmissionError, AdmissionQueue, AdmissionSnapshot, Ticket, TicketId};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, WorkConfig,
};
pub use ingest::{
    AcceptAll, HeaderValidator, IngestConfig, IngestError, IngestPipeline, IngestRequest,
    IngestResult, IngestStatus, ManifestWriter, PrefixValidator,
};
pub use tee::{DigestAlgorithm, StreamTee, TeeConfig, TeeError, TeeOutput};
pub use work::{
    ordered_map, OrderedParallelQueue, OrderedStatus, QueueError, SerialStatus, SerialWorkQueue,
    TaskFailure, TaskResult,
};
