//! Convenience prelude for common embedding tasks.

pub use crate::api::{
    AbortSignal, AmpooseError, CaptureManager, DirectorySink, ExportController, ExportSettings,
    HostSnapshot, MemoryStore, QueryClient, Result, SqliteStore, UreqTransport,
};
