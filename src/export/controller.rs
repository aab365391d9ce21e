//! The export run controller.
//!
//! A run moves `Start -> Downloading -> Done`. Each loop iteration fetches one
//! page, deduplicates it against the run, applies the duplicate guard and the
//! date/count limits, flushes full chunks in fetch-all mode and checkpoints.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::chunks::{ChunkIndex, ChunkState, DEFAULT_CHUNK_SIZE};
use super::guard::{DuplicateGuard, DEFAULT_DUPLICATE_THRESHOLD};
use super::logbuf::{LogEntry, RunLog, DEFAULT_LOG_CAP};
use super::paths::{build_download_filename, collection_folder, sanitize_segment};
use super::post::{sanitize_for_export, ExportPost};
use super::resume::{
    load_checkpoint, load_resume_cursors, push_resume_cursor, save_checkpoint, ResumeCursor,
    RunCheckpoint,
};
use super::sink::DownloadSink;
use crate::artifact::{
    calibration_status, load_artifact, op_names, CalibrationArtifact, CalibrationStatus,
    REQUIRED_OPS,
};
use crate::client::{AbortSignal, QueryClient};
use crate::db::{next_run_id, KeyValueStore};
use crate::error::{AmpooseError, Result};
use crate::timeline::{fetch_timeline_page, Actor, RuntimePost};

const JSON_MIME: &str = "application/json";
const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportMode {
    /// Everything the timeline returns.
    #[default]
    All,
    /// Stop after a fixed number of posts.
    Count,
    /// Stop at posts older than a number of days.
    Days,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSettings {
    pub mode: ExportMode,
    pub count: usize,
    pub days: u32,
    /// Apply the day window outside `Days` mode too.
    pub date_filter: bool,
    pub chunk_size: usize,
    pub page_size: u32,
    pub request_delay: Duration,
    /// Pages after which randomized backoff is added to the delay; 0 disables it.
    pub backoff_after_pages: u32,
    pub jitter_min: Duration,
    pub jitter_max: Duration,
    pub duplicate_threshold: u32,
    pub log_cap: usize,
    pub endpoint: Option<String>,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            mode: ExportMode::All,
            count: 100,
            days: 30,
            date_filter: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            page_size: 3,
            request_delay: Duration::from_millis(1200),
            backoff_after_pages: 5,
            jitter_min: Duration::from_millis(500),
            jitter_max: Duration::from_millis(2500),
            duplicate_threshold: DEFAULT_DUPLICATE_THRESHOLD,
            log_cap: DEFAULT_LOG_CAP,
            endpoint: None,
        }
    }
}

impl ExportSettings {
    fn date_filter_active(&self) -> bool {
        self.mode == ExportMode::Days || self.date_filter
    }

    fn fetch_all_unfiltered(&self) -> bool {
        self.mode == ExportMode::All && !self.date_filter_active()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Start,
    Downloading,
    Done,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Manual,
    DuplicateLoop,
    DateBoundary,
    CountReached,
    EndOfTimeline,
}

impl StopReason {
    pub fn describe(self) -> &'static str {
        match self {
            StopReason::Manual => "stopped by user",
            StopReason::DuplicateLoop => "duplicate loop detected",
            StopReason::DateBoundary => "date boundary reached",
            StopReason::CountReached => "post count reached",
            StopReason::EndOfTimeline => "end of timeline",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunProgress {
    pub cursor: Option<String>,
    pub next_cursor: Option<String>,
    pub last_batch_count: usize,
    pub pages_fetched: u32,
    pub duplicate_streak: u32,
    pub total_posts: usize,
}

/// Read-only view of the controller handed to subscribers.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerSnapshot {
    pub step: Step,
    pub error: Option<String>,
    pub stop_reason: Option<StopReason>,
    pub run_id: u64,
    pub collection_id: String,
    pub progress: RunProgress,
    pub buffered_posts: usize,
    pub part_files: Vec<String>,
    pub logs: Vec<LogEntry>,
}

/// Stops a run from another thread (e.g. a Ctrl+C handler).
#[derive(Clone, Default)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
    abort: Arc<Mutex<AbortSignal>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.abort
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .abort();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn rearm(&self) -> AbortSignal {
        let fresh = AbortSignal::new();
        *self.abort.lock().unwrap_or_else(PoisonError::into_inner) = fresh.clone();
        self.stopped.store(false, Ordering::SeqCst);
        fresh
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunOutcome {
    pub stop_reason: StopReason,
    pub pages_fetched: u32,
    pub total_posts: usize,
}

type Listener = Box<dyn FnMut(&ControllerSnapshot)>;

pub struct ExportController {
    client: QueryClient,
    sink: Box<dyn DownloadSink>,
    settings: ExportSettings,

    step: Step,
    error: Option<String>,
    stop_reason: Option<StopReason>,
    run_id: u64,
    collection_id: String,
    progress: RunProgress,
    /// Eligible posts not yet flushed to a part file.
    posts: Vec<ExportPost>,
    /// Posts cut by the count limit. Their ids stay in `seen`, so they are
    /// put back into `posts` when the run continues.
    held_back: Vec<ExportPost>,
    chunk: Option<ChunkState>,
    seen: HashSet<String>,
    guard: DuplicateGuard,
    log: RunLog,
    profile: Option<Actor>,
    author: Option<Actor>,

    stop: StopHandle,
    listeners: Vec<Listener>,
}

impl ExportController {
    pub fn new<S>(client: QueryClient, sink: S, settings: ExportSettings) -> Self
    where
        S: DownloadSink + 'static,
    {
        let log = RunLog::new(settings.log_cap);
        let guard = DuplicateGuard::new(settings.duplicate_threshold);
        Self {
            client,
            sink: Box::new(sink),
            settings,
            step: Step::Start,
            error: None,
            stop_reason: None,
            run_id: 0,
            collection_id: String::new(),
            progress: RunProgress::default(),
            posts: Vec::new(),
            held_back: Vec::new(),
            chunk: None,
            seen: HashSet::new(),
            guard,
            log,
            profile: None,
            author: None,
            stop: StopHandle::default(),
            listeners: Vec::new(),
        }
    }

    fn store(&self) -> &dyn KeyValueStore {
        self.client.store().as_ref()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&ControllerSnapshot) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            step: self.step,
            error: self.error.clone(),
            stop_reason: self.stop_reason,
            run_id: self.run_id,
            collection_id: self.collection_id.clone(),
            progress: self.progress.clone(),
            buffered_posts: self.posts.len(),
            part_files: self
                .chunk
                .as_ref()
                .map(|c| c.part_files.clone())
                .unwrap_or_default(),
            logs: self.log.entries(),
        }
    }

    /// Posts held in memory (not yet written to a part file).
    pub fn posts(&self) -> &[ExportPost] {
        &self.posts
    }

    fn notify(&mut self) {
        if self.listeners.is_empty() {
            return;
        }
        let snapshot = self.snapshot();
        for listener in &mut self.listeners {
            listener(&snapshot);
        }
    }

    fn folder(&self) -> String {
        collection_folder(Some(&self.collection_id))
    }

    /// Check calibration and return the collection the artifact targets.
    fn require_calibration(&self) -> Result<String> {
        let artifact = load_artifact(self.store())?;
        match calibration_status(artifact.as_ref()) {
            CalibrationStatus::Ready => Ok(artifact
                .as_ref()
                .and_then(CalibrationArtifact::collection_id)
                .unwrap_or_default()),
            CalibrationStatus::Incomplete(missing) => {
                Err(AmpooseError::CalibrationRequired(op_names(&missing)))
            }
            CalibrationStatus::Missing => {
                Err(AmpooseError::CalibrationRequired(op_names(REQUIRED_OPS)))
            }
        }
    }

    fn begin_fresh(&mut self, collection_id: String) -> Result<()> {
        let run_id = next_run_id(self.store())?;
        let prefix = format!(
            "ampoose-{}-run{run_id:04}",
            sanitize_segment(&collection_id).unwrap_or_else(|| "profile".to_string())
        );
        self.run_id = run_id;
        self.collection_id = collection_id;
        self.progress = RunProgress::default();
        self.posts.clear();
        self.held_back.clear();
        self.chunk = Some(ChunkState::new(run_id, self.settings.chunk_size, prefix));
        self.seen.clear();
        self.guard.reset();
        self.log.clear();
        self.profile = None;
        self.author = None;
        self.error = None;
        self.stop_reason = None;
        Ok(())
    }

    /// Run until a stop condition. With `resume`, the previous run's state is
    /// kept and the loop continues from its cursor.
    pub fn start(&mut self, resume: bool) -> Result<RunOutcome> {
        let collection_id = self.require_calibration()?;
        if resume {
            if self.chunk.is_none() {
                return Err(AmpooseError::InvalidState("there is no run to resume".to_string()));
            }
            self.restore_held_back();
        } else {
            self.begin_fresh(collection_id)?;
        }

        let abort = self.stop.rearm();
        self.step = Step::Downloading;
        self.error = None;
        self.stop_reason = None;
        self.log.info(format!(
            "{} run {} ({:?} mode)",
            if resume { "resuming" } else { "starting" },
            self.run_id,
            self.settings.mode
        ));
        self.notify();

        let result = self.run_loop(&abort);
        self.step = Step::Done;
        match result {
            Ok(reason) => {
                self.stop_reason = Some(reason);
                self.log.info(format!(
                    "run {} finished: {} after {} pages, {} posts",
                    self.run_id,
                    reason.describe(),
                    self.progress.pages_fetched,
                    self.progress.total_posts
                ));
                self.notify();
                Ok(RunOutcome {
                    stop_reason: reason,
                    pages_fetched: self.progress.pages_fetched,
                    total_posts: self.progress.total_posts,
                })
            }
            Err(err) => {
                self.error = Some(err.to_string());
                self.log.error(format!("run {} failed: {err}", self.run_id));
                self.notify();
                Err(err)
            }
        }
    }

    fn restore_held_back(&mut self) {
        if self.held_back.is_empty() {
            return;
        }
        let restored = self.held_back.len();
        self.posts.append(&mut self.held_back);
        self.progress.total_posts += restored;
        self.log.info(format!("restored {restored} posts held back by the count limit"));
    }

    /// Re-enter the loop at the cursor the last page returned.
    pub fn continue_run(&mut self) -> Result<RunOutcome> {
        let Some(next) = self.progress.next_cursor.clone() else {
            return Err(AmpooseError::InvalidState("no next cursor to continue from".to_string()));
        };
        self.progress.cursor = Some(next);
        self.start(true)
    }

    /// Stop the current run. The in-flight fetch is aborted and the controller
    /// is `Done` immediately.
    pub fn stop(&mut self) {
        self.stop.stop();
        if self.step == Step::Downloading {
            self.step = Step::Done;
            self.stop_reason = Some(StopReason::Manual);
            self.log.info("stop requested");
            self.notify();
        }
    }

    /// Restore the stored checkpoint, or fall back to the newest stored resume
    /// cursor. A checkpoint without a next cursor marks a finished run; only
    /// cursors from later runs (e.g. imported ones) are used after it.
    /// Returns `false` when there is nothing to resume.
    pub fn resume_from_store(&mut self) -> Result<bool> {
        let collection_id = self.require_calibration()?;

        let mut finished_run = None;
        if let Some(checkpoint) = load_checkpoint(self.store(), &collection_id)? {
            if let Some(next) = checkpoint.next_cursor.clone() {
                self.run_id = checkpoint.run_id;
                self.collection_id = collection_id;
                self.progress = RunProgress {
                    cursor: Some(next.clone()),
                    next_cursor: Some(next),
                    last_batch_count: 0,
                    pages_fetched: checkpoint.pages_fetched,
                    duplicate_streak: 0,
                    total_posts: checkpoint.total_posts,
                };
                self.seen = checkpoint.seen_ids.into_iter().collect();
                self.posts = checkpoint.posts;
                self.held_back = checkpoint.held_back;
                self.chunk = Some(checkpoint.chunk);
                self.profile = checkpoint.profile;
                self.author = checkpoint.author;
                self.guard.reset();
                self.log.info(format!(
                    "restored checkpoint for run {} ({} pages, {} posts)",
                    self.run_id, self.progress.pages_fetched, self.progress.total_posts
                ));
                return Ok(true);
            }
            finished_run = Some(checkpoint.run_id);
        }

        let cursors = load_resume_cursors(self.store(), &collection_id)?;
        let latest = cursors
            .into_iter()
            .find(|record| finished_run.map_or(true, |run_id| record.run_id > run_id));
        if let Some(latest) = latest {
            self.begin_fresh(collection_id)?;
            self.progress.cursor = Some(latest.cursor.clone());
            self.progress.next_cursor = Some(latest.cursor);
            self.log.info(format!("resuming from stored cursor of run {}", latest.run_id));
            return Ok(true);
        }
        Ok(false)
    }

    fn run_loop(&mut self, abort: &AbortSignal) -> Result<StopReason> {
        loop {
            if self.stop.is_stopped() {
                return Ok(StopReason::Manual);
            }

            let date_active = self.settings.date_filter_active();
            let cutoff = date_active.then(|| {
                chrono::Utc::now().timestamp() - i64::from(self.settings.days) * SECONDS_PER_DAY
            });

            let fetched = match fetch_timeline_page(
                &self.client,
                self.progress.cursor.as_deref(),
                self.settings.page_size,
                self.settings.endpoint.as_deref(),
                abort,
            ) {
                Ok(fetched) => fetched,
                Err(AmpooseError::Aborted) => return Ok(StopReason::Manual),
                Err(err) if self.stop.is_stopped() => {
                    tracing::debug!(%err, "fetch failed after stop; treating as manual stop");
                    return Ok(StopReason::Manual);
                }
                Err(err) => return Err(err),
            };
            for failure in &fetched.failures {
                self.log.warn("request attempt failed", &failure.to_string());
            }

            let page = fetched.page;
            let fetched_count = page.posts.len();
            self.progress.pages_fetched += 1;
            self.progress.last_batch_count = fetched_count;
            self.progress.next_cursor = page.next_cursor.clone();

            let fresh: Vec<RuntimePost> = page
                .posts
                .into_iter()
                .filter(|post| match post.resolved_id() {
                    Some(id) => self.seen.insert(id.to_string()),
                    None => true,
                })
                .collect();
            let duplicates = fetched_count - fresh.len();

            self.guard.observe(fetched_count, duplicates, self.settings.fetch_all_unfiltered());
            self.progress.duplicate_streak = self.guard.streak();
            if self.guard.should_stop() {
                self.log.warn(
                    "same page returned repeatedly; stopping",
                    &json!({"streak": self.guard.streak(), "cursor": self.progress.cursor}),
                );
                self.checkpoint()?;
                return Ok(StopReason::DuplicateLoop);
            }

            let mut boundary = false;
            let mut eligible = Vec::new();
            for post in &fresh {
                if self.profile.is_none() {
                    self.profile = post.profile.clone();
                }
                if self.author.is_none() {
                    self.author = post.author.clone();
                }
                let in_window = match (cutoff, post.created_at) {
                    (None, _) => true,
                    (Some(cutoff), Some(created)) => created >= cutoff,
                    (Some(_), None) => false,
                };
                match sanitize_for_export(post).filter(|_| in_window) {
                    Some(exported) => eligible.push(exported),
                    None => {
                        if let (Some(cutoff), Some(created)) = (cutoff, post.created_at) {
                            if created < cutoff {
                                boundary = true;
                            }
                        }
                    }
                }
            }

            let kept = eligible.len();
            self.posts.extend(eligible);
            self.progress.total_posts += kept;
            self.log.info(format!(
                "page {}: fetched {fetched_count}, new {}, kept {kept}, total {}",
                self.progress.pages_fetched,
                fresh.len(),
                self.progress.total_posts
            ));

            let mut stop = None;
            if boundary {
                stop = Some(StopReason::DateBoundary);
            } else if self.settings.mode == ExportMode::Count
                && self.progress.total_posts >= self.settings.count
            {
                let flushed = self.chunk.as_ref().map_or(0, |c| c.total_flushed);
                let limit = self.settings.count.saturating_sub(flushed).min(self.posts.len());
                self.held_back = self.posts.split_off(limit);
                self.progress.total_posts = flushed + self.posts.len();
                stop = Some(StopReason::CountReached);
            }

            if stop.is_none() && self.settings.fetch_all_unfiltered() {
                if let Err(err) = self.flush_chunks(false) {
                    self.log.warn("chunk flush failed; keeping posts buffered", &err.to_string());
                }
            }

            if stop.is_none() {
                match page.next_cursor {
                    Some(next) => self.progress.cursor = Some(next),
                    None => stop = Some(StopReason::EndOfTimeline),
                }
            }

            self.checkpoint()?;
            self.notify();
            if let Some(reason) = stop {
                return Ok(reason);
            }

            if !self.pace(abort) {
                return Ok(StopReason::Manual);
            }
        }
    }

    /// Inter-page delay. Returns `false` when aborted while waiting.
    fn pace(&self, abort: &AbortSignal) -> bool {
        let mut delay = self.settings.request_delay;
        let after = self.settings.backoff_after_pages;
        if after > 0 && self.progress.pages_fetched >= after {
            let low = self.settings.jitter_min.as_millis() as u64;
            let high = self.settings.jitter_max.as_millis() as u64;
            let jitter = if high > low {
                rand::thread_rng().gen_range(low..=high)
            } else {
                low
            };
            delay += Duration::from_millis(jitter);
        }
        if delay.is_zero() {
            return !abort.is_aborted();
        }
        tracing::debug!(delay_ms = delay.as_millis() as u64, "pacing before next page");
        abort.sleep(delay)
    }

    fn checkpoint(&mut self) -> Result<()> {
        let Some(chunk) = self.chunk.clone() else {
            return Ok(());
        };
        let now = chrono::Utc::now().to_rfc3339();
        let checkpoint = RunCheckpoint {
            run_id: self.run_id,
            cursor: self.progress.cursor.clone(),
            next_cursor: self.progress.next_cursor.clone(),
            pages_fetched: self.progress.pages_fetched,
            total_posts: self.progress.total_posts,
            chunk,
            posts: self.posts.clone(),
            held_back: self.held_back.clone(),
            seen_ids: self.seen.iter().cloned().collect(),
            profile: self.profile.clone(),
            author: self.author.clone(),
            saved_at: now.clone(),
        };
        save_checkpoint(self.store(), &self.collection_id, &checkpoint)?;
        if let Some(next) = &self.progress.next_cursor {
            push_resume_cursor(
                self.store(),
                &self.collection_id,
                ResumeCursor {
                    run_id: self.run_id,
                    cursor: next.clone(),
                    pages_fetched: self.progress.pages_fetched,
                    total_posts: self.progress.total_posts,
                    saved_at: now,
                },
            )?;
        }
        Ok(())
    }

    /// Write due part files. With `force`, a final short part is written too.
    fn flush_chunks(&mut self, force: bool) -> Result<usize> {
        let folder = self.folder();
        let Some(chunk) = self.chunk.as_mut() else {
            return Ok(0);
        };
        let mut written = 0;
        while let Some(count) = chunk.pending_part(self.posts.len(), force) {
            let filename = chunk.next_filename();
            let path = build_download_filename(Some(&format!("{folder}/{filename}")));
            let text = serde_json::to_string_pretty(&self.posts[..count])?;
            let outcome = self.sink.download_text_as_file(&text, &path, JSON_MIME, false);
            if !outcome.ok {
                return Err(AmpooseError::Download(
                    outcome.error.unwrap_or_else(|| format!("could not save {path}")),
                ));
            }
            self.posts.drain(..count);
            chunk.commit(filename, count);
            written += 1;
            self.log.info(format!("wrote {path} ({count} posts)"));
        }
        Ok(written)
    }

    /// Write the run's output: remaining parts plus an index when the run was
    /// chunked, otherwise a single envelope file. Returns the written paths.
    pub fn download_json(&mut self) -> Result<Vec<String>> {
        let folder = self.folder();
        let chunked = self.chunk.as_ref().is_some_and(ChunkState::has_parts);
        let mut written = Vec::new();

        if chunked {
            self.flush_chunks(true)?;
            let Some(chunk) = self.chunk.as_ref() else {
                return Err(AmpooseError::InvalidState("chunk state disappeared".to_string()));
            };
            written.extend(
                chunk
                    .part_files
                    .iter()
                    .map(|f| build_download_filename(Some(&format!("{folder}/{f}")))),
            );
            let index = ChunkIndex::new(chunk, &self.collection_id, vec![folder.clone()]);
            let index_name = format!("{folder}/{}", chunk.index_filename());
            let path = build_download_filename(Some(&index_name));
            self.save(&serde_json::to_string_pretty(&index)?, &path)?;
            written.push(path);
        } else {
            let name = match &self.chunk {
                Some(chunk) => format!("{folder}/{}-posts.json", chunk.prefix),
                None => format!("{folder}/posts.json"),
            };
            let path = build_download_filename(Some(&name));
            let envelope = json!({
                "profile": self.profile,
                "author": self.author,
                "posts": self.posts,
            });
            self.save(&serde_json::to_string_pretty(&envelope)?, &path)?;
            written.push(path);
        }

        self.notify();
        Ok(written)
    }

    fn save(&mut self, text: &str, path: &str) -> Result<()> {
        let outcome = self.sink.download_text_as_file(text, path, JSON_MIME, false);
        if outcome.ok {
            self.log.info(format!("wrote {path}"));
            Ok(())
        } else {
            let error = outcome.error.unwrap_or_else(|| format!("could not save {path}"));
            self.log.error(format!("download failed: {error}"));
            Err(AmpooseError::Download(error))
        }
    }
}
