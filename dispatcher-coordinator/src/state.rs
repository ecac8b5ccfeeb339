//! The coordinator's serialised state: lease table, pending-result buffer,
//! output writer, and checkpoint store.
//!
//! A direct port of `data_tracker.py`'s `DataTracker`: same algorithms for
//! `get_work_batch`, `complete_work_batch`, checkpoint load/write, and
//! final `close`, expressed with a single `std::sync::Mutex` guarding all
//! state per the coordinator's no-suspend-while-locked design.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dispatcher_common::DispatcherError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct Checkpoint {
    last_processed_work_id: i64,
    input_offset: u64,
    output_offset: u64,
}

/// A line handed out but not yet committed.
struct IssuedWork {
    content: String,
    /// Byte offset in the input file just past this line.
    input_offset: u64,
}

/// One item returned by [`CoordinatorState::get_work_batch`].
#[derive(Debug, Clone)]
pub struct Assignment {
    pub work_id: u64,
    pub content: String,
}

/// Snapshot of the coordinator's counters, for `GET /status`.
#[derive(Debug, Clone)]
pub struct Status {
    pub last_committed_work_id: i64,
    pub next_work_id: u64,
    pub leased_count: usize,
    pub pending_count: usize,
    pub heap_size: usize,
    pub expired_reissues: u64,
}

struct CoordinatorState {
    infile: File,
    infile_path: PathBuf,
    outfile: File,
    checkpoint_path: PathBuf,

    work_timeout: Duration,
    checkpoint_interval: Duration,

    last_committed_work_id: i64,
    next_work_id: u64,
    input_offset: u64,

    last_checkpoint_time: Instant,
    expired_reissues: u64,

    issued: HashMap<u64, IssuedWork>,
    issued_heap: BinaryHeap<Reverse<(Instant, u64)>>,
    pending_write: HashMap<u64, String>,
}

/// Reads one `\n`-terminated line, byte at a time, so the file's cursor
/// always matches the logical offset with no buffering surprises. Returns
/// `None` at EOF with nothing left to return, mirroring Python's
/// `readline()` contract.
fn read_line_raw<R: Read>(file: &mut R) -> std::io::Result<Option<String>> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = file.read(&mut byte)?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            break;
        }
        if byte[0] == b'\n' {
            break;
        }
        buf.push(byte[0]);
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

impl CoordinatorState {
    fn new(
        infile_path: PathBuf,
        outfile_path: PathBuf,
        checkpoint_path: PathBuf,
        work_timeout: Duration,
        checkpoint_interval: Duration,
    ) -> Result<Self, DispatcherError> {
        let infile = File::open(&infile_path)?;
        let outfile = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&outfile_path)?;

        let mut state = Self {
            infile,
            infile_path,
            outfile,
            checkpoint_path,
            work_timeout,
            checkpoint_interval,
            last_committed_work_id: -1,
            next_work_id: 0,
            input_offset: 0,
            last_checkpoint_time: Instant::now(),
            expired_reissues: 0,
            issued: HashMap::new(),
            issued_heap: BinaryHeap::new(),
            pending_write: HashMap::new(),
        };
        state.load_checkpoint()?;
        Ok(state)
    }

    fn load_checkpoint(&mut self) -> Result<(), DispatcherError> {
        let exists = self.checkpoint_path.exists()
            && fs::metadata(&self.checkpoint_path)?.len() > 0;
        if !exists {
            tracing::info!("no checkpoint found; starting fresh");
            return Ok(());
        }

        let raw = fs::read_to_string(&self.checkpoint_path)?;
        let cp: Checkpoint = serde_json::from_str(&raw).map_err(|source| {
            DispatcherError::CheckpointCorrupt {
                path: self.checkpoint_path.display().to_string(),
                source,
            }
        })?;

        self.last_committed_work_id = cp.last_processed_work_id;
        self.input_offset = cp.input_offset;
        self.infile.seek(SeekFrom::Start(cp.input_offset))?;
        self.outfile.seek(SeekFrom::Start(cp.output_offset))?;

        let mut extra_count: i64 = 0;
        while read_line_raw(&mut self.outfile)?.is_some() {
            extra_count += 1;
        }
        for _ in 0..extra_count {
            read_line_raw(&mut self.infile)?;
        }

        self.last_committed_work_id += extra_count;
        self.next_work_id = (self.last_committed_work_id + 1) as u64;
        self.input_offset = self.infile.stream_position()?;

        tracing::info!(
            last_committed_work_id = self.last_committed_work_id,
            input_offset = self.input_offset,
            output_offset = self.outfile.stream_position()?,
            "loaded checkpoint"
        );
        Ok(())
    }

    fn all_work_complete(&mut self) -> Result<bool, DispatcherError> {
        let total = fs::metadata(&self.infile_path)?.len();
        let pos = self.infile.stream_position()?;
        Ok(total - pos == 0 && self.pending_write.is_empty())
    }

    fn track_issued_work(&mut self, when: Instant, content: String, input_offset: u64) -> Assignment {
        let work_id = self.next_work_id;
        self.next_work_id += 1;
        self.issued.insert(work_id, IssuedWork { content: content.clone(), input_offset });
        self.issued_heap.push(Reverse((when, work_id)));
        Assignment { work_id, content }
    }

    fn reissue_work(&mut self, when: Instant, work_id: u64) -> Assignment {
        self.expired_reissues += 1;
        tracing::info!(work_id, expired_reissues = self.expired_reissues, "reissuing expired work");
        let content = self.issued.get(&work_id).expect("reissued work_id must be tracked").content.clone();
        self.issued_heap.push(Reverse((when, work_id)));
        Assignment { work_id, content }
    }

    fn get_work_batch(&mut self, batch_size: usize) -> Result<Vec<Assignment>, DispatcherError> {
        let mut batch = Vec::with_capacity(batch_size);
        let now = Instant::now();

        while batch.len() < batch_size {
            let Some(&Reverse((ts, work_id))) = self.issued_heap.peek() else {
                break;
            };
            if !self.issued.contains_key(&work_id) {
                self.issued_heap.pop();
                continue;
            }
            if now.saturating_duration_since(ts) > self.work_timeout {
                self.issued_heap.pop();
                batch.push(self.reissue_work(now, work_id));
                continue;
            }
            break;
        }

        while batch.len() < batch_size {
            let Some(line) = read_line_raw(&mut self.infile)? else {
                break;
            };
            let input_offset = self.infile.stream_position()?;
            batch.push(self.track_issued_work(now, line, input_offset));
        }

        Ok(batch)
    }

    fn complete_work_batch(
        &mut self,
        batch: Vec<(u64, String)>,
    ) -> Result<(), DispatcherError> {
        for (work_id, result) in batch {
            if (work_id as i64) <= self.last_committed_work_id || self.pending_write.contains_key(&work_id) {
                tracing::warn!(work_id, "duplicate completion; discarding");
            } else if !self.issued.contains_key(&work_id) {
                tracing::warn!(work_id, "completion for unissued work; discarding");
            } else {
                self.pending_write.insert(work_id, result);
            }
        }

        self.flush_pending_writes()?;

        if self.last_checkpoint_time.elapsed() >= self.checkpoint_interval {
            self.write_checkpoint()?;
            self.last_checkpoint_time = Instant::now();
            tracing::info!(
                last_committed_work_id = self.last_committed_work_id,
                issued = self.issued.len(),
                pending = self.pending_write.len(),
                heap_size = self.issued_heap.len(),
                expired_reissues = self.expired_reissues,
                "checkpoint written"
            );
        }
        Ok(())
    }

    fn flush_pending_writes(&mut self) -> Result<(), DispatcherError> {
        let mut out = Vec::new();
        loop {
            let next_id = (self.last_committed_work_id + 1) as u64;
            let Some(result) = self.pending_write.remove(&next_id) else {
                break;
            };
            self.last_committed_work_id = next_id as i64;
            let issued = self.issued.remove(&next_id).expect("committed work_id must have been issued");
            self.input_offset = issued.input_offset;

            out.extend_from_slice(result.as_bytes());
            out.push(b'\n');
        }
        if !out.is_empty() {
            self.outfile.write_all(&out)?;
            self.outfile.flush()?;
        }
        Ok(())
    }

    fn write_checkpoint(&mut self) -> Result<(), DispatcherError> {
        let cp = Checkpoint {
            last_processed_work_id: self.last_committed_work_id,
            input_offset: self.input_offset,
            output_offset: self.outfile.stream_position()?,
        };
        let tmp_path = checkpoint_tmp_path(&self.checkpoint_path);
        let write_result = (|| -> std::io::Result<()> {
            let mut f = File::create(&tmp_path)?;
            let json = serde_json::to_vec(&cp).expect("checkpoint always serializes");
            f.write_all(&json)?;
            f.flush()?;
            f.sync_all()?;
            Ok(())
        })();
        if let Err(source) = write_result {
            let _ = fs::remove_file(&tmp_path);
            return Err(DispatcherError::CheckpointWrite {
                path: self.checkpoint_path.display().to_string(),
                source,
            });
        }
        fs::rename(&tmp_path, &self.checkpoint_path)?;
        Ok(())
    }

    fn status(&self) -> Status {
        Status {
            last_committed_work_id: self.last_committed_work_id,
            next_work_id: self.next_work_id,
            leased_count: self.issued.len(),
            pending_count: self.pending_write.len(),
            heap_size: self.issued_heap.len(),
            expired_reissues: self.expired_reissues,
        }
    }

    fn close(&mut self) -> Result<(), DispatcherError> {
        self.write_checkpoint()?;
        tracing::info!(
            last_committed_work_id = self.last_committed_work_id,
            issued = self.issued.len(),
            pending = self.pending_write.len(),
            "final checkpoint written"
        );
        Ok(())
    }
}

fn checkpoint_tmp_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".tmp");
    PathBuf::from(s)
}

/// Thread-safe façade over [`CoordinatorState`]. All operations serialise
/// through a single `std::sync::Mutex`; none suspend while holding it.
pub struct Coordinator {
    state: Mutex<CoordinatorState>,
}

impl Coordinator {
    pub fn new(
        infile_path: PathBuf,
        outfile_path: PathBuf,
        checkpoint_path: PathBuf,
        work_timeout: Duration,
        checkpoint_interval: Duration,
    ) -> Result<Self, DispatcherError> {
        let state = CoordinatorState::new(
            infile_path,
            outfile_path,
            checkpoint_path,
            work_timeout,
            checkpoint_interval,
        )?;
        Ok(Self {
            state: Mutex::new(state),
        })
    }

    pub fn get_work_batch(&self, batch_size: usize) -> Result<Vec<Assignment>, DispatcherError> {
        let mut state = self.state.lock().expect("coordinator lock poisoned");
        state.get_work_batch(batch_size)
    }

    pub fn complete_work_batch(&self, batch: Vec<(u64, String)>) -> Result<(), DispatcherError> {
        let mut state = self.state.lock().expect("coordinator lock poisoned");
        state.complete_work_batch(batch)
    }

    pub fn all_work_complete(&self) -> Result<bool, DispatcherError> {
        let mut state = self.state.lock().expect("coordinator lock poisoned");
        state.all_work_complete()
    }

    pub fn status(&self) -> Status {
        let state = self.state.lock().expect("coordinator lock poisoned");
        state.status()
    }

    pub fn close(&self) -> Result<(), DispatcherError> {
        let mut state = self.state.lock().expect("coordinator lock poisoned");
        state.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_lines(path: &Path, lines: &[&str]) {
        fs::write(path, lines.join("\n") + "\n").unwrap();
    }

    fn coordinator(dir: &tempfile::TempDir, lines: &[&str]) -> Coordinator {
        let infile = dir.path().join("in.jsonl");
        write_lines(&infile, lines);
        Coordinator::new(
            infile,
            dir.path().join("out.jsonl"),
            dir.path().join("checkpoint.json"),
            Duration::from_secs(900),
            Duration::from_secs(60),
        )
        .unwrap()
    }

    #[test]
    fn cold_start_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(&dir, &["A", "B", "C"]);

        let batch = coord.get_work_batch(3).unwrap();
        assert_eq!(batch.len(), 3);
        let results: Vec<(u64, String)> = batch
            .iter()
            .map(|a| (a.work_id, a.content.to_lowercase()))
            .collect();
        coord.complete_work_batch(results).unwrap();

        let out = fs::read_to_string(dir.path().join("out.jsonl")).unwrap();
        assert_eq!(out, "a\nb\nc\n");
        assert!(coord.all_work_complete().unwrap());
    }

    #[test]
    fn out_of_order_commit_buffers_until_contiguous() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(&dir, &["A", "B", "C"]);
        let batch = coord.get_work_batch(3).unwrap();

        coord
            .complete_work_batch(vec![(batch[2].work_id, "c".to_string())])
            .unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("out.jsonl")).unwrap(), "");

        coord
            .complete_work_batch(vec![(batch[0].work_id, "a".to_string())])
            .unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("out.jsonl")).unwrap(), "a\n");

        coord
            .complete_work_batch(vec![(batch[1].work_id, "b".to_string())])
            .unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("out.jsonl")).unwrap(),
            "a\nb\nc\n"
        );
    }

    #[test]
    fn duplicate_completion_keeps_first_result() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(&dir, &["A"]);
        let batch = coord.get_work_batch(1).unwrap();
        let wid = batch[0].work_id;

        coord.complete_work_batch(vec![(wid, "a1".to_string())]).unwrap();
        coord.complete_work_batch(vec![(wid, "a2".to_string())]).unwrap();

        assert_eq!(fs::read_to_string(dir.path().join("out.jsonl")).unwrap(), "a1\n");
    }

    #[test]
    fn lease_expiry_reissues_same_content() {
        let dir = tempfile::tempdir().unwrap();
        let coord = Coordinator::new(
            {
                let p = dir.path().join("in.jsonl");
                write_lines(&p, &["A"]);
                p
            },
            dir.path().join("out.jsonl"),
            dir.path().join("checkpoint.json"),
            Duration::from_millis(0),
            Duration::from_secs(60),
        )
        .unwrap();

        let first = coord.get_work_batch(1).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let second = coord.get_work_batch(1).unwrap();

        assert_eq!(first[0].work_id, second[0].work_id);
        assert_eq!(first[0].content, second[0].content);
        assert_eq!(coord.status().expired_reissues, 1);
    }

    #[test]
    fn empty_input_is_immediately_complete() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(&dir, &[]);
        assert!(coord.all_work_complete().unwrap());
        assert!(coord.get_work_batch(5).unwrap().is_empty());
    }

    #[test]
    fn restart_reconciles_extra_committed_output() {
        let dir = tempfile::tempdir().unwrap();
        let infile = dir.path().join("in.jsonl");
        write_lines(&infile, &["A", "B", "C"]);
        let outfile = dir.path().join("out.jsonl");
        let checkpoint = dir.path().join("checkpoint.json");
        // Simulate a checkpoint already having been written once, before any
        // work was committed (last_processed_work_id = -1).
        fs::write(
            &checkpoint,
            serde_json::json!({
                "last_processed_work_id": -1,
                "input_offset": 0,
                "output_offset": 0
            })
            .to_string(),
        )
        .unwrap();

        {
            let coord = Coordinator::new(
                infile.clone(),
                outfile.clone(),
                checkpoint.clone(),
                Duration::from_secs(900),
                Duration::from_secs(60),
            )
            .unwrap();
            let batch = coord.get_work_batch(2).unwrap();
            coord
                .complete_work_batch(vec![
                    (batch[0].work_id, "a".to_string()),
                    (batch[1].work_id, "b".to_string()),
                ])
                .unwrap();
            // Crash before a checkpoint is ever written: out.jsonl has two
            // committed lines but checkpoint.json does not exist yet.
        }

        let coord = Coordinator::new(
            infile,
            outfile,
            checkpoint,
            Duration::from_secs(900),
            Duration::from_secs(60),
        )
        .unwrap();
        assert_eq!(coord.status().last_committed_work_id, 1);

        let batch = coord.get_work_batch(1).unwrap();
        assert_eq!(batch[0].work_id, 2);
        assert_eq!(batch[0].content, "C");
    }
}
