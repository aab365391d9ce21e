//! Stable, supported API surface for embedding ampoose.
//!
//! This module re-exports the types and functions intended for external use.
//! Treat the contents of this module as SemVer-stable.

pub use crate::artifact::{
    build_graphql_artifact, calibration_status, get_missing_required_queries, load_artifact,
    normalize_graphql_artifact, save_artifact, validate_entry, CalibrationArtifact,
    CalibrationEntry, CalibrationStatus, EntryCheck, CALIBRATION_KEY, REQUIRED_OPS,
};
pub use crate::capture::{
    canonicalize_op_name, AutomationGuard, CalibrationWait, CanonicalOp, CaptureManager,
    CapturingTransport, ObservedBody, ObservedRequest,
};
pub use crate::client::{
    candidate_endpoints, compute_ambient_params, parse_graphql_body, AbortSignal, AttemptFailure,
    EndpointConfig, FetchRequest, FetchResponse, GraphqlPayload, HostPage, HostSnapshot,
    QueryClient, QueryRequest, QueryResponse, ResponseMode, SnapshotFile, Transport, UreqTransport,
};
pub use crate::db::{KeyValueStore, MemoryStore, SqliteStore};
pub use crate::error::{AmpooseError, Result};
pub use crate::export::{
    build_download_filename, export_resume_cursors, import_resume_cursors, ChunkIndex, ChunkState,
    ControllerSnapshot, DirectorySink, DownloadOutcome, DownloadSink, DuplicateGuard,
    ExportController, ExportMode, ExportPost, ExportSettings, MemorySink, ResumeCursorPayload,
    RunOutcome, StopHandle, StopReason,
};
pub use crate::har::{parse_har_file, Har};
pub use crate::path_query::{first_match, get_path};
pub use crate::timeline::{
    extract_timeline_page, fetch_single_post, fetch_timeline_page, RuntimePost, TimelinePage,
};
