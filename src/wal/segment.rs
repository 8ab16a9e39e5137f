//! Segmented append-only WAL: active file + rotated historical segments,
//! tail-scan repair, replay, and maintenance ops.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::codec::{self, Frame, HEADER_SIZE};
use super::fsync::{fsync_dir, strong_fsync_file};
use crate::config::EngineConfig;
use crate::error::{Error, Result};

/// Result of a header/frame integrity pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckResult {
    /// True if the file needed no repair.
    pub ok: bool,
    /// Number of complete, CRC-valid entries found.
    pub entries: u64,
    /// True if a bad or partial tail was found (and, with `fix`, truncated).
    pub truncated: bool,
    /// Byte offset of the truncation point, when `truncated` is true.
    pub trunc_pos: u64,
}

struct ScanOutcome {
    end_pos: u64,
    count: u64,
    truncated: bool,
}

/// Scans frames starting at `HEADER_SIZE`, calling `on_frame(index, frame)` for
/// each complete, CRC-valid one. Stops at the first short read, unknown tag,
/// or CRC mismatch, reporting the last good boundary.
fn scan_frames(
    path: &Path,
    mut on_frame: impl FnMut(u64, Frame) -> Result<()>,
) -> Result<ScanOutcome> {
    let mut file = File::open(path).map_err(|e| Error::io(path, e))?;
    file.seek(SeekFrom::Start(HEADER_SIZE as u64))
        .map_err(|e| Error::io(path, e))?;

    let mut pos = HEADER_SIZE as u64;
    let mut count = 0u64;
    let mut truncated = false;

    loop {
        let mut tag = [0u8; 1];
        match file.read_exact(&mut tag) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(Error::io(path, e)),
        }

        let Some(frame_size) = Frame::size_for_tag(tag[0]) else {
            warn!(path = %path.display(), offset = pos, tag = tag[0], "unknown WAL frame tag, truncating");
            truncated = true;
            break;
        };

        let mut rest = vec![0u8; frame_size - 1];
        match file.read_exact(&mut rest) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                warn!(path = %path.display(), offset = pos, "short frame read, truncating");
                truncated = true;
                break;
            }
            Err(e) => return Err(Error::io(path, e)),
        }

        let mut full = Vec::with_capacity(frame_size);
        full.push(tag[0]);
        full.extend_from_slice(&rest);

        match Frame::decode(&full) {
            Ok(frame) => {
                on_frame(count, frame)?;
                pos += frame_size as u64;
                count += 1;
            }
            Err(_) => {
                warn!(path = %path.display(), offset = pos, "CRC mismatch, truncating");
                truncated = true;
                break;
            }
        }
    }

    Ok(ScanOutcome {
        end_pos: pos,
        count,
        truncated,
    })
}

fn segment_path(dir: &Path, base: &str, index: u32) -> PathBuf {
    dir.join(format!("{base}.{index:06}"))
}

fn list_segment_indices(dir: &Path, base: &str) -> Result<Vec<u32>> {
    let mut indices = Vec::new();
    let prefix = format!("{base}.");
    for entry in fs::read_dir(dir).map_err(|e| Error::io(dir, e))? {
        let entry = entry.map_err(|e| Error::io(dir, e))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(suffix) = name.strip_prefix(&prefix) {
            if suffix.len() == 6 {
                if let Ok(idx) = suffix.parse::<u32>() {
                    indices.push(idx);
                }
            }
        }
    }
    indices.sort_unstable();
    Ok(indices)
}

/// Segmented write-ahead log spanning an active file and rotated segments.
pub struct SegmentedLog {
    dir: PathBuf,
    base: String,
    active_path: PathBuf,
    active_file: File,
    end_pos: u64,
    segment_index: u32,
    segment_entries: u64,
    next_lsn: u64,
    entries_since_sync: u32,

    /// Appends performed by this session (not carried over from disk state).
    pub entries_written: u64,
    /// Records applied by [`SegmentedLog::replay_from_lsn`] this session.
    pub entries_replayed: u64,
    /// Bytes appended by this session.
    pub bytes_written: u64,
    /// Tail-scan or mid-replay truncations observed this session.
    pub truncations: u64,
    /// Count of I/O failures observed this session.
    pub io_error_count: u64,
    /// Most recent I/O error message, if any.
    pub last_error: Option<String>,

    segment_size_limit: u64,
    sync_every: u32,
}

impl SegmentedLog {
    /// Opens (creating if absent) the active WAL file at `<dir>/<base>`,
    /// enumerating existing segments.
    ///
    /// With `repair`, a torn header or tail is rewritten and strong-fsynced
    /// in place. Without it (a read-only open, or a validate-only `check`),
    /// damage is detected and reflected in the returned entry count, but the
    /// file on disk is never touched — a torn header on an existing file then
    /// surfaces as [`Error::Corrupt`] rather than being silently rewritten.
    ///
    /// # Errors
    ///
    /// [`Error::Corrupt`] on header magic/version mismatch (or, without
    /// `repair`, a torn header), [`Error::Io`] on file system failures.
    pub fn open(dir: &Path, base: &str, config: &EngineConfig, repair: bool) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        let active_path = dir.join(base);

        let mut active_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&active_path)
            .map_err(|e| Error::io(&active_path, e))?;

        let len = active_file
            .metadata()
            .map_err(|e| Error::io(&active_path, e))?
            .len();

        let mut truncations = 0u64;
        if len == 0 {
            // Brand-new file: writing the bare header initializes it and
            // discards nothing that existed before.
            active_file
                .write_all(&codec::encode_header())
                .map_err(|e| Error::io(&active_path, e))?;
            strong_fsync_file(&active_file).map_err(|e| Error::io(&active_path, e))?;
        } else if len < HEADER_SIZE as u64 {
            // Header torn by a crash mid-rotation.
            if !repair {
                return Err(Error::Corrupt(format!(
                    "WAL header at {} is torn ({len} of {HEADER_SIZE} bytes) and repair is disabled",
                    active_path.display(),
                )));
            }
            active_file.set_len(0).map_err(|e| Error::io(&active_path, e))?;
            active_file
                .seek(SeekFrom::Start(0))
                .map_err(|e| Error::io(&active_path, e))?;
            active_file
                .write_all(&codec::encode_header())
                .map_err(|e| Error::io(&active_path, e))?;
            strong_fsync_file(&active_file).map_err(|e| Error::io(&active_path, e))?;
            truncations += 1;
        } else {
            let mut header = [0u8; HEADER_SIZE];
            active_file
                .seek(SeekFrom::Start(0))
                .map_err(|e| Error::io(&active_path, e))?;
            active_file
                .read_exact(&mut header)
                .map_err(|e| Error::io(&active_path, e))?;
            codec::validate_header(&header)?;
        }

        // Tail-scan: detect the first invalid/short frame. With `repair`,
        // truncate the file there; otherwise just clip the in-memory view.
        let outcome = scan_frames(&active_path, |_, _| Ok(()))?;
        if outcome.truncated {
            truncations += 1;
            if repair {
                active_file
                    .set_len(outcome.end_pos)
                    .map_err(|e| Error::io(&active_path, e))?;
                strong_fsync_file(&active_file).map_err(|e| Error::io(&active_path, e))?;
                debug!(path = %active_path.display(), pos = outcome.end_pos, "tail-scan repaired WAL");
            } else {
                warn!(path = %active_path.display(), pos = outcome.end_pos, "tail-scan found damage, repair disabled, leaving file untouched");
            }
        }

        let segment_index = list_segment_indices(dir, base)?
            .into_iter()
            .max()
            .unwrap_or(0);

        // LSNs are 1-based: the first ever appended entry is LSN 1. This
        // makes `last_lsn == 0` an unambiguous "nothing snapshotted yet"
        // sentinel rather than colliding with a real LSN.
        let mut next_lsn = 1u64;
        for idx in 1..=segment_index {
            let seg_path = segment_path(dir, base, idx);
            let seg_outcome = scan_frames(&seg_path, |_, _| Ok(()))?;
            next_lsn += seg_outcome.count;
        }
        next_lsn += outcome.count;

        Ok(Self {
            dir: dir.to_path_buf(),
            base: base.to_string(),
            active_path,
            active_file,
            end_pos: outcome.end_pos,
            segment_index,
            segment_entries: outcome.count,
            next_lsn,
            entries_since_sync: 0,
            entries_written: 0,
            entries_replayed: 0,
            bytes_written: 0,
            truncations,
            io_error_count: 0,
            last_error: None,
            segment_size_limit: config.segment_size_limit,
            sync_every: config.sync_every,
        })
    }

    /// True if no I/O failure has been observed this session.
    #[must_use]
    pub fn healthy(&self) -> bool {
        self.io_error_count == 0
    }

    fn record_io_error(&mut self, err: Error) -> Error {
        self.io_error_count += 1;
        self.last_error = Some(err.to_string());
        err
    }

    /// Appends `frame`, rotating first if it would overflow the segment size
    /// limit. Returns the LSN assigned to the new entry.
    pub fn append(&mut self, frame: &Frame) -> Result<u64> {
        let bytes = frame.encode();
        let entry_size = bytes.len() as u64;

        if self.end_pos + entry_size > self.segment_size_limit {
            self.rotate()?;
        }

        let write_result = (|| -> Result<()> {
            self.active_file
                .seek(SeekFrom::Start(self.end_pos))
                .map_err(|e| Error::io(&self.active_path, e))?;
            self.active_file
                .write_all(&bytes)
                .map_err(|e| Error::io(&self.active_path, e))?;
            Ok(())
        })();

        if let Err(e) = write_result {
            return Err(self.record_io_error(e));
        }

        self.end_pos += entry_size;
        self.segment_entries += 1;
        self.entries_since_sync += 1;
        self.entries_written += 1;
        self.bytes_written += entry_size;

        let lsn = self.next_lsn;
        self.next_lsn += 1;

        if self.entries_since_sync >= self.sync_every {
            self.flush()?;
        }

        Ok(lsn)
    }

    /// Forces a durable flush of the active file.
    pub fn flush(&mut self) -> Result<()> {
        match strong_fsync_file(&self.active_file) {
            Ok(()) => {
                self.entries_since_sync = 0;
                Ok(())
            }
            Err(e) => Err(self.record_io_error(Error::io(&self.active_path, e))),
        }
    }

    /// Sums complete, CRC-valid entries across all segments and the active file.
    pub fn total_entries(&self) -> Result<u64> {
        let mut total = 0u64;
        for idx in 1..=self.segment_index {
            let path = segment_path(&self.dir, &self.base, idx);
            total += scan_frames(&path, |_, _| Ok(()))?.count;
        }
        total += scan_frames(&self.active_path, |_, _| Ok(()))?.count;
        Ok(total)
    }

    /// Replays records with LSN greater than `from_lsn`, in append order,
    /// across historical segments then the active file. LSNs are 1-based, so
    /// `from_lsn == 0` replays everything. `apply` performs the in-memory
    /// insert; a CRC mismatch mid-scan stops replay at the bad boundary.
    ///
    /// With `repair`, the file holding the bad boundary is truncated and
    /// strong-fsynced there. Without it, replay still stops at the same
    /// boundary but the file on disk is left untouched.
    pub fn replay_from_lsn(
        &mut self,
        from_lsn: u64,
        repair: bool,
        mut apply: impl FnMut(Frame) -> Result<()>,
    ) -> Result<()> {
        let mut lsn = 1u64;
        let mut files: Vec<PathBuf> = (1..=self.segment_index)
            .map(|idx| segment_path(&self.dir, &self.base, idx))
            .collect();
        files.push(self.active_path.clone());

        'outer: for path in &files {
            let is_active = *path == self.active_path;
            let outcome = scan_frames(path, |_, frame| {
                if lsn > from_lsn {
                    apply(frame)?;
                    self.entries_replayed += 1;
                }
                lsn += 1;
                Ok(())
            })?;

            if outcome.truncated {
                self.truncations += 1;
                if repair {
                    let file = OpenOptions::new()
                        .write(true)
                        .open(path)
                        .map_err(|e| Error::io(path, e))?;
                    file.set_len(outcome.end_pos).map_err(|e| Error::io(path, e))?;
                    strong_fsync_file(&file).map_err(|e| Error::io(path, e))?;
                } else {
                    warn!(path = %path.display(), pos = outcome.end_pos, "replay found damage, repair disabled, leaving file untouched");
                }
                if is_active {
                    self.end_pos = outcome.end_pos;
                    self.segment_entries = outcome.count;
                }
                self.next_lsn = lsn;
                break 'outer;
            }
        }

        if self.next_lsn < lsn {
            self.next_lsn = lsn;
        }
        Ok(())
    }

    /// Rotates the active file into a new historical segment and starts a
    /// fresh, header-only active file.
    pub fn rotate(&mut self) -> Result<()> {
        strong_fsync_file(&self.active_file).map_err(|e| Error::io(&self.active_path, e))?;

        let new_index = self.segment_index + 1;
        let rotated_path = segment_path(&self.dir, &self.base, new_index);

        // Unix permits renaming a file out from under an open descriptor; the
        // existing handle keeps referring to the now-historical segment until
        // it's replaced below.
        fs::rename(&self.active_path, &rotated_path).map_err(|e| Error::io(&rotated_path, e))?;
        fsync_dir(&self.dir).map_err(|e| Error::io(&self.dir, e))?;

        let mut new_active = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&self.active_path)
            .map_err(|e| Error::io(&self.active_path, e))?;
        new_active
            .write_all(&codec::encode_header())
            .map_err(|e| Error::io(&self.active_path, e))?;
        strong_fsync_file(&new_active).map_err(|e| Error::io(&self.active_path, e))?;
        fsync_dir(&self.dir).map_err(|e| Error::io(&self.dir, e))?;

        self.active_file = new_active;
        self.segment_index = new_index;
        self.segment_entries = 0;
        self.end_pos = HEADER_SIZE as u64;
        debug!(index = new_index, "rotated WAL segment");
        Ok(())
    }

    /// Truncates the active file back to a bare header (used after a
    /// snapshot commit makes the prior log entries redundant).
    pub fn truncate_to_header(&mut self) -> Result<()> {
        self.active_file
            .set_len(HEADER_SIZE as u64)
            .map_err(|e| Error::io(&self.active_path, e))?;
        strong_fsync_file(&self.active_file).map_err(|e| Error::io(&self.active_path, e))?;
        self.end_pos = HEADER_SIZE as u64;
        self.segment_entries = 0;
        Ok(())
    }

    /// Deletes historical segments whose index is `<= max_index - keep`,
    /// returning the number removed.
    pub fn delete_segments_keep_last(&mut self, keep: u32) -> Result<u32> {
        if self.segment_index <= keep {
            return Ok(0);
        }
        let cutoff = self.segment_index - keep;
        let mut removed = 0u32;
        for idx in list_segment_indices(&self.dir, &self.base)? {
            if idx <= cutoff {
                let path = segment_path(&self.dir, &self.base, idx);
                fs::remove_file(&path).map_err(|e| Error::io(&path, e))?;
                removed += 1;
            }
        }
        if removed > 0 {
            fsync_dir(&self.dir).map_err(|e| Error::io(&self.dir, e))?;
        }
        Ok(removed)
    }

    /// Validates the header and every frame CRC in the active file. With
    /// `fix`, truncates at the last good boundary and strong-fsyncs.
    pub fn check(&mut self, fix: bool) -> Result<CheckResult> {
        let outcome = scan_frames(&self.active_path, |_, _| Ok(()))?;
        if outcome.truncated && fix {
            self.active_file
                .set_len(outcome.end_pos)
                .map_err(|e| Error::io(&self.active_path, e))?;
            strong_fsync_file(&self.active_file).map_err(|e| Error::io(&self.active_path, e))?;
            self.end_pos = outcome.end_pos;
            self.segment_entries = outcome.count;
            self.truncations += 1;
        }
        Ok(CheckResult {
            ok: !outcome.truncated,
            entries: outcome.count,
            truncated: outcome.truncated,
            trunc_pos: outcome.end_pos,
        })
    }

    /// Current segment index (highest completed historical segment).
    #[must_use]
    pub fn segment_index(&self) -> u32 {
        self.segment_index
    }

    /// Current LSN that will be assigned to the next appended entry.
    #[must_use]
    pub fn next_lsn(&self) -> u64 {
        self.next_lsn
    }
}

/// Standalone maintenance entry point for `check(dir_path, fix)`,
/// usable without holding an open [`SegmentedLog`]. `fix` governs both the
/// open-time tail repair and the explicit `check` pass, so a validate-only
/// call (`fix = false`) never mutates the file.
pub fn check_directory(dir: &Path, base: &str, fix: bool) -> Result<CheckResult> {
    let config = EngineConfig::default();
    let mut log = SegmentedLog::open(dir, base, &config, fix)?;
    log.check(fix)
}

#[cfg(test)]
#[path = "segment_tests.rs"]
mod tests;
