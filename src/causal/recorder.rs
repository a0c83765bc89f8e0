// =============================================================================
// Causal recorder — the process-wide append-only log writer
// =============================================================================
//
// One of the two documented singletons (with the mode guard). Constructed
// once in main, passed by Arc into every component that records; there is no
// hidden access path. Writes two sibling files:
//
//   <base>.bin    fixed-size records, authoritative
//   <base>.jsonl  one JSON object per line, for post-mortems
//
// Writes serialise behind a single mutex. Back-pressure is visible to
// callers through `record`'s Result — the hot path decides what to drop,
// the recorder never silently does.
// =============================================================================

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::info;

use crate::causal::events::CausalEvent;
use crate::error::EngineResult;

struct Inner {
    bin: BufWriter<File>,
    jsonl: BufWriter<File>,
    records: u64,
}

pub struct Recorder {
    inner: Mutex<Inner>,
    bin_path: PathBuf,
    jsonl_path: PathBuf,
}

impl Recorder {
    /// Open `<base>.bin` and `<base>.jsonl` for writing, truncating any
    /// previous session at the same base path.
    pub fn create(base_path: &str) -> EngineResult<Self> {
        let bin_path = PathBuf::from(format!("{base_path}.bin"));
        let jsonl_path = PathBuf::from(format!("{base_path}.jsonl"));

        let bin = BufWriter::new(File::create(&bin_path)?);
        let jsonl = BufWriter::new(File::create(&jsonl_path)?);

        info!(
            bin = %bin_path.display(),
            jsonl = %jsonl_path.display(),
            "causal recorder opened"
        );

        Ok(Self {
            inner: Mutex::new(Inner {
                bin,
                jsonl,
                records: 0,
            }),
            bin_path,
            jsonl_path,
        })
    }

    /// Append one event to both representations.
    pub fn record(&self, event: &CausalEvent) -> EngineResult<()> {
        let mut inner = self.inner.lock();
        inner.bin.write_all(&event.encode())?;
        let line = event.to_json_line();
        inner.jsonl.write_all(line.as_bytes())?;
        inner.jsonl.write_all(b"\n")?;
        inner.records += 1;
        Ok(())
    }

    pub fn flush(&self) -> EngineResult<()> {
        let mut inner = self.inner.lock();
        inner.bin.flush()?;
        inner.jsonl.flush()?;
        Ok(())
    }

    pub fn record_count(&self) -> u64 {
        self.inner.lock().records
    }

    pub fn bin_path(&self) -> &std::path::Path {
        &self.bin_path
    }

    pub fn jsonl_path(&self) -> &std::path::Path {
        &self.jsonl_path
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        let _ = inner.bin.flush();
        let _ = inner.jsonl.flush();
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::causal::events::{EventHeader, EventKind, Payload};

    fn tmp_base(name: &str) -> String {
        let dir = std::env::temp_dir().join("borealis_recorder_tests");
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name).to_string_lossy().into_owned()
    }

    fn tick(event_id: u64, bid: f64) -> CausalEvent {
        CausalEvent::new(
            EventHeader {
                event_id,
                parent_id: 0,
                kind: EventKind::Tick,
                ts_ns: event_id * 1_000,
                symbol_hash: 1,
            },
            Payload::Tick {
                bid,
                ask: bid + 0.01,
                bid_size: 1.0,
                ask_size: 1.0,
            },
        )
        .unwrap()
    }

    #[test]
    fn writes_both_files() {
        let base = tmp_base("both_files");
        let rec = Recorder::create(&base).unwrap();
        rec.record(&tick(1, 100.0)).unwrap();
        rec.record(&tick(2, 100.5)).unwrap();
        rec.flush().unwrap();
        assert_eq!(rec.record_count(), 2);

        let bin = std::fs::read(rec.bin_path()).unwrap();
        assert_eq!(bin.len(), 2 * (super::super::events::HEADER_LEN + 32));

        let jsonl = std::fs::read_to_string(rec.jsonl_path()).unwrap();
        assert_eq!(jsonl.lines().count(), 2);
        for line in jsonl.lines() {
            let _: serde_json::Value = serde_json::from_str(line).unwrap();
        }
    }

    #[test]
    fn binary_file_is_exact_concatenation() {
        let base = tmp_base("concat");
        let rec = Recorder::create(&base).unwrap();
        let a = tick(1, 100.0);
        let b = tick(2, 101.0);
        rec.record(&a).unwrap();
        rec.record(&b).unwrap();
        rec.flush().unwrap();

        let mut expected = a.encode();
        expected.extend(b.encode());
        let on_disk = std::fs::read(rec.bin_path()).unwrap();
        assert_eq!(on_disk, expected);
    }
}
