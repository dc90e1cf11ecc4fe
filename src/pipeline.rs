//! The enrichment driver.
//!
//! One track at a time, in catalog order: clear stale sidecars, look up
//! lyrics, write the new sidecar. The checkpoint's `last_offset` is always
//! the catalog index of the next track that has not been handled, so a
//! resumed run neither repeats nor skips tracks as long as the catalog order
//! is unchanged.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::catalog::{CatalogEnumerator, CatalogSource};
use crate::checkpoint::{ErrorLog, ProgressRecord, ProgressStore, RunStatus};
use crate::config::Config;
use crate::error::{CheckpointError, ItemFailure, PipelineError, Result};
use crate::lrclib::LyricSource;
use crate::models::{LyricQuery, Provenance, RunStatistics, Track};
use crate::policy::Throttle;
use crate::progress::{create_track_bar, log_progress};
use crate::remote::RemoteExecutor;
use crate::resolver::LyricResolver;
use crate::sidecar::{PathMapper, SidecarMutator};

/// Interval between tail-friendly progress lines in log-only mode.
const LOG_PROGRESS_EVERY: u64 = 25;

/// Per-invocation switches.
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    /// Continue from an unfinished checkpoint instead of starting over.
    pub resume: bool,
    /// Report what would happen; no lookup, no remote command, no checkpoint write.
    pub dry_run: bool,
    /// Stop after this many tracks have been attempted.
    pub limit: Option<u64>,
    /// Only handle tracks whose title or artist contains this text.
    pub only: Option<String>,
}

/// How a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// The catalog was exhausted.
    Completed,
    /// Operator cancellation.
    Interrupted,
    /// `limit` tracks were attempted before the catalog ran out.
    LimitReached,
    /// A page after the first could not be fetched.
    CatalogFailed,
}

impl RunOutcome {
    /// Checkpoint status this outcome is persisted as.
    pub fn status(self) -> RunStatus {
        match self {
            RunOutcome::Completed => RunStatus::Completed,
            _ => RunStatus::Interrupted,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub stats: RunStatistics,
    /// Final checkpoint contents (not persisted in dry-run mode).
    pub record: ProgressRecord,
}

// ============================================================================
// Journal
// ============================================================================

/// Where progress goes: the on-disk store, or nowhere in dry-run mode.
enum Journal {
    Store(ProgressStore),
    DryRun {
        record: ProgressRecord,
        capacity: usize,
    },
}

impl Journal {
    fn record(&self) -> &ProgressRecord {
        match self {
            Journal::Store(store) => store.record(),
            Journal::DryRun { record, .. } => record,
        }
    }

    fn record_mut(&mut self) -> &mut ProgressRecord {
        match self {
            Journal::Store(store) => store.record_mut(),
            Journal::DryRun { record, .. } => record,
        }
    }

    fn save(&mut self) -> Result<(), CheckpointError> {
        match self {
            Journal::Store(store) => store.flush(),
            Journal::DryRun { .. } => Ok(()),
        }
    }

    fn into_record(self) -> ProgressRecord {
        match self {
            Journal::Store(store) => store.record().clone(),
            Journal::DryRun { record, .. } => record,
        }
    }
}

impl ErrorLog for Journal {
    fn log_error(&mut self, message: &str) {
        match self {
            Journal::Store(store) => store.log_error(message),
            Journal::DryRun { record, capacity } => {
                record.push_error(message.to_string(), *capacity);
            }
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Drives catalog enumeration, lyric resolution and sidecar mutation.
pub struct Pipeline<C, L, R> {
    config: Config,
    catalog: CatalogEnumerator<C>,
    resolver: LyricResolver<L>,
    mutator: SidecarMutator<R>,
    cancel: Arc<AtomicBool>,
}

impl<C, L, R> Pipeline<C, L, R>
where
    C: CatalogSource,
    L: LyricSource,
    R: RemoteExecutor,
{
    pub fn new(config: Config, catalog: C, lyrics: L, remote: R) -> Self {
        let policies = config.policies.clone();
        let mapper = PathMapper::new(config.path_mappings.clone());
        Self {
            catalog: CatalogEnumerator::new(catalog, policies.catalog),
            resolver: LyricResolver::new(lyrics, policies.lookup),
            mutator: SidecarMutator::new(remote, mapper, policies.remote),
            cancel: Arc::new(AtomicBool::new(false)),
            config,
        }
    }

    /// Flag that, once set, makes the run stop at the next track boundary.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn catalog(&self) -> &CatalogEnumerator<C> {
        &self.catalog
    }

    pub fn resolver(&self) -> &LyricResolver<L> {
        &self.resolver
    }

    pub fn mutator(&self) -> &SidecarMutator<R> {
        &self.mutator
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Runs one pass over the catalog.
    ///
    /// Fails only on checkpoint problems, a scope mismatch on resume, or an
    /// unreachable catalog on the first page. Per-track failures are counted
    /// and logged.
    pub fn run(&self, options: &RunOptions) -> Result<RunReport> {
        let started = Instant::now();
        let scope = self.config.library_id.clone();
        let capacity = self.config.error_log_capacity;

        let store = ProgressStore::open(&self.config.checkpoint_path, capacity)?;
        let prior = store.record().clone();
        let resume_from = if options.resume {
            prior.resume_offset()
        } else {
            None
        };
        if resume_from.is_some() && prior.library_id != scope {
            return Err(PipelineError::ScopeMismatch {
                stored: prior.library_id,
                requested: scope,
            });
        }
        let start = resume_from.unwrap_or(0);

        let mut journal = if options.dry_run {
            Journal::DryRun {
                record: prior.clone(),
                capacity,
            }
        } else {
            Journal::Store(store)
        };

        match resume_from {
            Some(offset) => info!(
                offset,
                processed = prior.processed,
                status = ?prior.status,
                "resuming from checkpoint"
            ),
            None if options.resume && prior.status == RunStatus::Completed => {
                info!("previous run completed, starting a new pass")
            }
            None => info!("starting from the beginning of the catalog"),
        }

        let page_size = self.config.page_size;
        let mut catalog_throttle = self.config.policies.catalog.throttle();
        let mut lookup_throttle = self.config.policies.lookup.throttle();

        catalog_throttle.wait();
        let first = self
            .catalog
            .fetch_page(scope.as_deref(), start, page_size, &mut journal);
        if let Some(error) = &first.error {
            return Err(PipelineError::CatalogUnavailable(error.clone()));
        }

        // The catalog answered: from here on the checkpoint describes this run.
        {
            let record = journal.record_mut();
            if resume_from.is_none() {
                *record = ProgressRecord {
                    library_id: scope.clone(),
                    ..ProgressRecord::default()
                };
            }
            record.status = RunStatus::Running;
            record.last_offset = Some(start);
            if let Some(total) = first.total {
                record.total_songs = total;
            }
        }
        journal.save()?;

        let bar = create_track_bar(start, "Refreshing lyrics");
        bar.set_length(journal.record().total_songs);

        let mut stats = RunStatistics::default();
        let mut offset = start;
        let mut since_save: u64 = 0;
        let mut page = first;

        let outcome = 'pages: loop {
            let page_start = offset;
            for (i, track) in page.tracks.iter().enumerate() {
                if self.cancelled() {
                    break 'pages RunOutcome::Interrupted;
                }
                if options.limit.is_some_and(|limit| stats.attempted >= limit) {
                    break 'pages RunOutcome::LimitReached;
                }

                let next = page_start + i as u64 + 1;
                let selected = options
                    .only
                    .as_deref()
                    .map_or(true, |needle| track.matches_filter(needle));
                if selected {
                    self.process_track(
                        track,
                        next,
                        options.dry_run,
                        &mut journal,
                        &mut lookup_throttle,
                        &mut stats,
                    );
                } else {
                    debug!(track = %track.label(), "skipped by filter");
                    stats.filtered_out += 1;
                }

                offset = next;
                journal.record_mut().last_offset = Some(offset);
                bar.set_position(offset);
                log_progress("lyrics", offset, journal.record().total_songs, LOG_PROGRESS_EVERY);

                if selected {
                    since_save += 1;
                    if since_save >= self.config.checkpoint_every {
                        journal.save()?;
                        since_save = 0;
                    }
                }
            }

            if !page.has_more {
                break RunOutcome::Completed;
            }
            journal.save()?;
            since_save = 0;

            if self.cancelled() {
                break RunOutcome::Interrupted;
            }
            if options.limit.is_some_and(|limit| stats.attempted >= limit) {
                break RunOutcome::LimitReached;
            }

            catalog_throttle.wait();
            page = self
                .catalog
                .fetch_page(scope.as_deref(), offset, page_size, &mut journal);
            if page.failed() {
                break RunOutcome::CatalogFailed;
            }
            if let Some(total) = page.total {
                journal.record_mut().total_songs = total;
                bar.set_length(total);
            }
            if page.tracks.is_empty() {
                break RunOutcome::Completed;
            }
        };
        bar.finish_and_clear();

        let record = journal.record_mut();
        record.status = outcome.status();
        record.last_offset = match outcome {
            RunOutcome::Completed => None,
            _ => Some(offset),
        };
        journal.save()?;

        stats.elapsed_seconds = started.elapsed().as_secs_f64();
        let record = journal.into_record();
        info!(
            outcome = ?outcome,
            offset,
            processed = record.processed,
            succeeded = record.success_count,
            lyrics_found = record.lyrics_found,
            dry_run = options.dry_run,
            "run finished"
        );
        Ok(RunReport {
            outcome,
            stats,
            record,
        })
    }

    /// Handles one track. Failures stop at this boundary: they are logged,
    /// counted and never returned.
    fn process_track(
        &self,
        track: &Track,
        next_offset: u64,
        dry_run: bool,
        journal: &mut Journal,
        lookup_throttle: &mut Throttle,
        stats: &mut RunStatistics,
    ) {
        stats.attempted += 1;

        let result = if dry_run {
            self.preview_track(track)
        } else {
            self.refresh_track(track, journal, lookup_throttle)
        };

        // Logging a failure persists the record, so the count and the offset
        // move past this track together first.
        let record = journal.record_mut();
        record.processed += 1;
        record.last_offset = Some(next_offset);

        match result {
            Ok(found) => {
                stats.succeeded += 1;
                record.success_count += 1;
                if let Some(provenance) = found {
                    stats.record_lyrics(provenance);
                    record.lyrics_found += 1;
                }
            }
            Err(failure) => {
                stats.still_failed += 1;
                warn!(track = %track.label(), error = %failure, "track failed");
                journal.log_error(&format!("{}: {}", track.label(), failure));
            }
        }
    }

    /// Clear, look up, write. Returns the provenance of any written lyrics.
    fn refresh_track(
        &self,
        track: &Track,
        journal: &mut Journal,
        lookup_throttle: &mut Throttle,
    ) -> Result<Option<Provenance>, ItemFailure> {
        let target = track.target()?;
        let remote = self.mutator.locate(target.path)?;
        let written = self.mutator.refresh(&remote, || {
            lookup_throttle.wait();
            self.resolver.resolve(&LyricQuery::from(&target), journal)
        })?;
        Ok(written.map(|lyrics| lyrics.provenance()))
    }

    fn preview_track(
        &self,
        track: &Track,
    ) -> Result<Option<Provenance>, ItemFailure> {
        let target = track.target()?;
        let remote = self.mutator.locate(target.path)?;
        info!(
            track = %track.label(),
            dir = %remote.dir,
            sidecar = %remote.sidecar(),
            "would clear sidecars and look up lyrics"
        );
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LyricCandidate;
    use crate::testing::{FakeLyrics, FakeRemote, MemoryCatalog};
    use std::fs;
    use tempfile::TempDir;

    type TestPipeline = Pipeline<MemoryCatalog, FakeLyrics, FakeRemote>;

    fn tracks(n: usize) -> Vec<Track> {
        (0..n)
            .map(|i| Track {
                id: format!("id-{i}"),
                title: format!("Song {i}"),
                artists: vec!["Artist".into()],
                path: format!("/music/Artist/{i:02} Song {i}.flac"),
                duration_secs: Some(200),
                ..Default::default()
            })
            .collect()
    }

    fn config(dir: &TempDir) -> Config {
        let mut config = Config {
            remote_host: "media@nas".into(),
            checkpoint_path: dir.path().join("progress.json"),
            page_size: 5,
            ..Config::default()
        };
        for policy in [
            &mut config.policies.catalog,
            &mut config.policies.lookup,
            &mut config.policies.remote,
        ] {
            policy.min_interval_secs = 0.0;
            policy.backoff_secs = 0.0;
        }
        config
    }

    fn pipeline(dir: &TempDir, catalog: MemoryCatalog) -> TestPipeline {
        Pipeline::new(config(dir), catalog, FakeLyrics::default(), FakeRemote::default())
    }

    fn synced(text: &str) -> LyricCandidate {
        LyricCandidate {
            synced_lyrics: Some(text.to_string()),
            ..Default::default()
        }
    }

    fn resume() -> RunOptions {
        RunOptions {
            resume: true,
            ..Default::default()
        }
    }

    fn saved(dir: &TempDir) -> ProgressRecord {
        ProgressStore::load(&dir.path().join("progress.json")).unwrap()
    }

    #[test]
    fn test_three_tracks_one_synced_hit() {
        let dir = TempDir::new().unwrap();
        let p = pipeline(&dir, MemoryCatalog::new(tracks(3)));
        p.resolver()
            .source()
            .respond("Song 1", vec![synced("[00:10.00]hello")]);

        let report = p.run(&resume()).unwrap();
        assert_eq!(report.outcome, RunOutcome::Completed);

        let record = saved(&dir);
        assert_eq!(record.processed, 3);
        assert_eq!(record.success_count, 3);
        assert_eq!(record.lyrics_found, 1);
        assert_eq!(record.status, RunStatus::Completed);
        assert_eq!(record.last_offset, None);
        assert_eq!(record.total_songs, 3);

        let files = p.mutator().executor().files();
        assert_eq!(
            files.get("/music/Artist/01 Song 1.lrc").map(String::as_str),
            Some("[00:10.00]hello\n")
        );
        assert_eq!(files.len(), 1);
        assert_eq!(report.stats.synced, 1);
    }

    #[test]
    fn test_interrupt_after_seven_then_resume() {
        let dir = TempDir::new().unwrap();
        let p = pipeline(&dir, MemoryCatalog::new(tracks(20)));
        p.mutator()
            .executor()
            .trip_after_deletes(7, p.cancel_flag());

        let report = p.run(&resume()).unwrap();
        assert_eq!(report.outcome, RunOutcome::Interrupted);
        let record = saved(&dir);
        assert_eq!(record.status, RunStatus::Interrupted);
        assert_eq!(record.last_offset, Some(7));
        assert_eq!(record.processed, 7);

        let second = pipeline(&dir, MemoryCatalog::new(tracks(20)));
        let report = second.run(&resume()).unwrap();
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(second.catalog().source().offsets()[0], 7);
        assert_eq!(report.stats.attempted, 13);

        // Every track cleared exactly once across both runs.
        let first_deletes = p.mutator().executor().commands();
        let second_deletes = second.mutator().executor().commands();
        let mut cleared: Vec<String> = first_deletes
            .iter()
            .chain(second_deletes.iter())
            .filter(|c| c.starts_with("find "))
            .cloned()
            .collect();
        assert_eq!(cleared.len(), 20);
        cleared.sort();
        cleared.dedup();
        assert_eq!(cleared.len(), 20);

        let record = saved(&dir);
        assert_eq!(record.processed, 20);
        assert_eq!(record.status, RunStatus::Completed);
    }

    #[test]
    fn test_no_candidates_still_clears_sidecars() {
        let dir = TempDir::new().unwrap();
        let p = pipeline(&dir, MemoryCatalog::new(tracks(1)));
        let remote = p.mutator().executor();
        remote.put("/music/Artist/00 Song 0.lrc", "stale");
        remote.put("/music/Artist/00 Song 0.txt", "stale");
        remote.put("/music/Artist/00 Song 0.flac", "audio");

        p.run(&resume()).unwrap();

        let files = p.mutator().executor().files();
        assert_eq!(files.keys().collect::<Vec<_>>(), vec!["/music/Artist/00 Song 0.flac"]);
        let record = saved(&dir);
        assert_eq!(record.lyrics_found, 0);
        assert_eq!(record.success_count, 1);
        assert_eq!(p.resolver().source().queries().len(), 1);
    }

    #[test]
    fn test_corrupt_checkpoint_aborts_before_catalog() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("progress.json"), "{\"status\": \"running\",").unwrap();
        let p = pipeline(&dir, MemoryCatalog::new(tracks(3)));

        let err = p.run(&resume()).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Checkpoint(CheckpointError::Corrupt { .. })
        ));
        assert!(p.catalog().source().calls().is_empty());
    }

    #[test]
    fn test_checkpoint_persisted_every_ten_tracks() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.page_size = 50;
        let p = Pipeline::new(
            cfg,
            MemoryCatalog::new(tracks(25)),
            FakeLyrics::default(),
            FakeRemote::default(),
        );
        p.resolver().source().watch_file(dir.path().join("progress.json"));
        p.run(&resume()).unwrap();

        // What was on disk while each track's lookup ran.
        let on_disk: Vec<ProgressRecord> = p
            .resolver()
            .source()
            .snapshots()
            .iter()
            .map(|raw| serde_json::from_str(raw.as_deref().unwrap()).unwrap())
            .collect();
        assert_eq!(on_disk.len(), 25);
        assert_eq!(on_disk[0].status, RunStatus::Running);
        assert_eq!(on_disk[9].processed, 0);
        assert_eq!(on_disk[10].processed, 10);
        assert_eq!(on_disk[10].last_offset, Some(10));
        assert_eq!(on_disk[19].processed, 10);
        assert_eq!(on_disk[20].processed, 20);
        assert_eq!(on_disk[20].last_offset, Some(20));
    }

    #[test]
    fn test_running_checkpoint_resumes_like_interrupted() {
        let dir = TempDir::new().unwrap();
        let mut store = ProgressStore::open(dir.path().join("progress.json"), 10).unwrap();
        store
            .save(ProgressRecord {
                status: RunStatus::Running,
                processed: 10,
                success_count: 10,
                last_offset: Some(10),
                total_songs: 12,
                ..Default::default()
            })
            .unwrap();

        let p = pipeline(&dir, MemoryCatalog::new(tracks(12)));
        let report = p.run(&resume()).unwrap();
        assert_eq!(p.catalog().source().offsets(), vec![10]);
        assert_eq!(report.stats.attempted, 2);
        assert_eq!(saved(&dir).processed, 12);
    }

    #[test]
    fn test_no_resume_starts_over() {
        let dir = TempDir::new().unwrap();
        let mut store = ProgressStore::open(dir.path().join("progress.json"), 10).unwrap();
        store
            .save(ProgressRecord {
                status: RunStatus::Interrupted,
                processed: 2,
                last_offset: Some(2),
                errors: vec!["old".into()],
                ..Default::default()
            })
            .unwrap();

        let p = pipeline(&dir, MemoryCatalog::new(tracks(4)));
        p.run(&RunOptions::default()).unwrap();
        assert_eq!(p.catalog().source().offsets()[0], 0);
        let record = saved(&dir);
        assert_eq!(record.processed, 4);
        assert!(record.errors.is_empty());
    }

    #[test]
    fn test_completed_checkpoint_starts_fresh_pass() {
        let dir = TempDir::new().unwrap();
        let p = pipeline(&dir, MemoryCatalog::new(tracks(3)));
        p.run(&resume()).unwrap();
        let again = pipeline(&dir, MemoryCatalog::new(tracks(3)));
        again.run(&resume()).unwrap();
        assert_eq!(again.catalog().source().offsets()[0], 0);
        assert_eq!(saved(&dir).processed, 3);
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let p = pipeline(&dir, MemoryCatalog::new(tracks(7)));
        p.mutator().executor().put("/music/Artist/00 Song 0.lrc", "stale");

        let report = p
            .run(&RunOptions {
                dry_run: true,
                ..resume()
            })
            .unwrap();
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(report.stats.attempted, 7);
        assert_eq!(report.record.processed, 7);
        assert!(!dir.path().join("progress.json").exists());
        assert!(p.mutator().executor().commands().is_empty());
        assert!(p.resolver().source().queries().is_empty());
        assert_eq!(p.mutator().executor().files().len(), 1);
    }

    #[test]
    fn test_missing_field_counts_as_failure() {
        let dir = TempDir::new().unwrap();
        let mut items = tracks(3);
        items[1].artists.clear();
        let p = pipeline(&dir, MemoryCatalog::new(items));
        let report = p.run(&resume()).unwrap();

        assert_eq!(report.stats.still_failed, 1);
        assert_eq!(report.stats.succeeded, 2);
        let record = saved(&dir);
        assert_eq!(record.processed, 3);
        assert_eq!(record.success_count, 2);
        assert_eq!(record.errors.len(), 1);
        assert!(record.errors[0].contains("missing required field artist"));
        // Never looked up.
        assert_eq!(p.resolver().source().queries().len(), 2);
    }

    #[test]
    fn test_failed_track_saved_with_matching_count_and_offset() {
        let dir = TempDir::new().unwrap();
        let mut items = tracks(3);
        items[0].path.clear();
        let p = pipeline(&dir, MemoryCatalog::new(items));
        p.resolver().source().watch_file(dir.path().join("progress.json"));
        p.run(&resume()).unwrap();

        // On disk right after the first track's failure was logged.
        let raw = p.resolver().source().snapshots()[0].clone().unwrap();
        let on_disk: ProgressRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(on_disk.errors.len(), 1);
        assert_eq!(on_disk.processed, 1);
        assert_eq!(on_disk.last_offset, Some(1));
    }

    #[test]
    fn test_delete_failure_skips_lookup() {
        let dir = TempDir::new().unwrap();
        let p = pipeline(&dir, MemoryCatalog::new(tracks(2)));
        p.mutator().executor().set_fail_deletes(true);
        let report = p.run(&resume()).unwrap();
        assert_eq!(report.stats.still_failed, 2);
        assert!(p.resolver().source().queries().is_empty());
        assert_eq!(saved(&dir).status, RunStatus::Completed);
    }

    #[test]
    fn test_write_failure_is_counted_not_fatal() {
        let dir = TempDir::new().unwrap();
        let p = pipeline(&dir, MemoryCatalog::new(tracks(2)));
        p.resolver().source().respond("Song 0", vec![synced("[00:01.00]a")]);
        p.mutator().executor().set_fail_uploads(true);
        let report = p.run(&resume()).unwrap();
        assert_eq!(report.stats.still_failed, 1);
        assert_eq!(report.stats.succeeded, 1);
        assert_eq!(saved(&dir).lyrics_found, 0);
    }

    #[test]
    fn test_limit_persists_next_offset() {
        let dir = TempDir::new().unwrap();
        let p = pipeline(&dir, MemoryCatalog::new(tracks(12)));
        let report = p
            .run(&RunOptions {
                limit: Some(7),
                ..resume()
            })
            .unwrap();
        assert_eq!(report.outcome, RunOutcome::LimitReached);
        let record = saved(&dir);
        assert_eq!(record.status, RunStatus::Interrupted);
        assert_eq!(record.last_offset, Some(7));
    }

    #[test]
    fn test_first_page_failure_is_fatal_and_leaves_checkpoint() {
        let dir = TempDir::new().unwrap();
        let catalog = MemoryCatalog::new(tracks(3));
        catalog.fail_next(1);
        let p = pipeline(&dir, catalog);
        let err = p.run(&resume()).unwrap_err();
        assert!(matches!(err, PipelineError::CatalogUnavailable(_)));
        let record = saved(&dir);
        assert_eq!(record.status, RunStatus::NotStarted);
        assert_eq!(record.errors.len(), 1);
    }

    #[test]
    fn test_later_page_failure_is_interrupted() {
        let dir = TempDir::new().unwrap();
        let catalog = MemoryCatalog::new(tracks(12));
        catalog.fail_from(5);
        let p = pipeline(&dir, catalog);
        let report = p.run(&resume()).unwrap();
        assert_eq!(report.outcome, RunOutcome::CatalogFailed);
        let record = saved(&dir);
        assert_eq!(record.status, RunStatus::Interrupted);
        assert_eq!(record.last_offset, Some(5));
        assert!(record.errors[0].contains("index 5"));
    }

    #[test]
    fn test_only_filter_advances_offset() {
        let dir = TempDir::new().unwrap();
        let p = pipeline(&dir, MemoryCatalog::new(tracks(6)));
        let report = p
            .run(&RunOptions {
                only: Some("song 3".into()),
                ..resume()
            })
            .unwrap();
        assert_eq!(report.stats.attempted, 1);
        assert_eq!(report.stats.filtered_out, 5);
        let record = saved(&dir);
        assert_eq!(record.processed, 1);
        assert_eq!(record.status, RunStatus::Completed);
    }

    #[test]
    fn test_scope_mismatch_on_resume() {
        let dir = TempDir::new().unwrap();
        let mut store = ProgressStore::open(dir.path().join("progress.json"), 10).unwrap();
        store
            .save(ProgressRecord {
                status: RunStatus::Interrupted,
                last_offset: Some(3),
                library_id: Some("other".into()),
                ..Default::default()
            })
            .unwrap();
        let p = pipeline(&dir, MemoryCatalog::new(tracks(5)));
        assert!(matches!(
            p.run(&resume()),
            Err(PipelineError::ScopeMismatch { .. })
        ));
        assert!(p.catalog().source().calls().is_empty());
    }
}
