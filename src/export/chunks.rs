use serde::{Deserialize, Serialize};

pub const CHUNK_INDEX_FORMAT: &str = "ampoose-post-chunks-v1";
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Bookkeeping for the numbered part files of one run. A `chunk_size` of 0
/// disables part files; the run is then written as one envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkState {
    pub chunk_size: usize,
    pub next_part: u32,
    pub part_files: Vec<String>,
    pub total_flushed: usize,
    pub run_id: u64,
    pub prefix: String,
}

impl ChunkState {
    pub fn new(run_id: u64, chunk_size: usize, prefix: impl Into<String>) -> Self {
        Self {
            chunk_size,
            next_part: 1,
            part_files: Vec::new(),
            total_flushed: 0,
            run_id,
            prefix: prefix.into(),
        }
    }

    /// Size of the next part to write from `buffered` posts, if one is due.
    /// Without `force` only full parts are written.
    pub fn pending_part(&self, buffered: usize, force: bool) -> Option<usize> {
        if self.chunk_size == 0 {
            None
        } else if buffered >= self.chunk_size {
            Some(self.chunk_size)
        } else if force && buffered > 0 {
            Some(buffered)
        } else {
            None
        }
    }

    pub fn next_filename(&self) -> String {
        format!("{}-part-{:04}.json", self.prefix, self.next_part)
    }

    pub fn index_filename(&self) -> String {
        format!("{}-index.json", self.prefix)
    }

    /// Record that the next part, holding `count` posts, was written as `filename`.
    pub fn commit(&mut self, filename: String, count: usize) {
        self.part_files.push(filename);
        self.next_part += 1;
        self.total_flushed += count;
    }

    /// Changes exactly when a part was appended or the flushed total moved.
    pub fn signature(&self) -> String {
        format!("{}:{}:{}", self.run_id, self.part_files.len(), self.total_flushed)
    }

    pub fn has_parts(&self) -> bool {
        !self.part_files.is_empty()
    }
}

/// Index file written once a chunked run is finalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkIndex {
    pub format: String,
    pub created_at: String,
    pub collection_id: String,
    pub folder_names: Vec<String>,
    pub run_id: u64,
    pub chunk_prefix: String,
    pub total_posts: usize,
    pub part_files: Vec<String>,
}

impl ChunkIndex {
    pub fn new(chunk: &ChunkState, collection_id: &str, folder_names: Vec<String>) -> Self {
        Self {
            format: CHUNK_INDEX_FORMAT.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            collection_id: collection_id.to_string(),
            folder_names,
            run_id: chunk.run_id,
            chunk_prefix: chunk.prefix.clone(),
            total_posts: chunk.total_flushed,
            part_files: chunk.part_files.clone(),
        }
    }
}
