mod chunks;
mod controller;
mod guard;
mod logbuf;
mod paths;
mod post;
mod resume;
mod sink;

pub use chunks::{ChunkIndex, ChunkState, CHUNK_INDEX_FORMAT, DEFAULT_CHUNK_SIZE};
pub use controller::{
    ControllerSnapshot, ExportController, ExportMode, ExportSettings, RunOutcome, RunProgress,
    Step, StopHandle, StopReason,
};
pub use guard::{DuplicateGuard, DEFAULT_DUPLICATE_THRESHOLD};
pub use logbuf::{safe_serialize, LogEntry, LogLevel, RunLog, DEFAULT_LOG_CAP};
pub use paths::{build_download_filename, collection_folder, sanitize_segment, DOWNLOAD_ROOT};
pub use post::{sanitize_for_export, ExportPost};
pub use resume::{
    checkpoint_key, export_resume_cursors, import_resume_cursors, load_checkpoint,
    load_resume_cursors, push_resume_cursor, resume_cursors_key, save_checkpoint, ResumeCursor,
    ResumeCursorPayload, RunCheckpoint, MAX_RESUME_CURSORS, RESUME_FORMAT,
};
pub use sink::{DirectorySink, DownloadOutcome, DownloadSink, MemorySink, SavedFile};
