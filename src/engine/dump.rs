//! Sample aggregation and the textual dump encodings

use crate::arguments::Counter;
use crate::context::Context;
use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// What a sample is attributed to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SampleKey {
    pub thread: String,
    pub context: Option<Context>,
}

impl SampleKey {
    /// Pseudo stack, outermost first: thread, root span, span
    pub fn frames(&self) -> Vec<String> {
        let mut frames = vec![format!("[{}]", self.thread)];
        match self.context {
            Some(ctx) => {
                frames.push(format!("[root={}]", ctx.root_span_id));
                frames.push(format!("[span={}]", ctx.span_id));
            }
            None => frames.push("[no_context]".to_string()),
        }
        frames
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SampleCounts {
    pub samples: u64,
    /// Sum of sampling intervals in nanoseconds
    pub total: u64,
}

impl SampleCounts {
    fn value(&self, counter: Counter) -> u64 {
        match counter {
            Counter::Samples => self.samples,
            Counter::Total => self.total,
        }
    }
}

/// Aggregated samples, written by the sampler thread and read by dumps
#[derive(Debug, Default)]
pub struct SampleStore {
    entries: Mutex<HashMap<SampleKey, SampleCounts>>,
    total_samples: AtomicU64,
}

impl SampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SampleKey, SampleCounts>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, key: SampleKey, interval: u64) {
        let mut entries = self.lock();
        let counts = entries.entry(key).or_default();
        counts.samples += 1;
        counts.total += interval;
        self.total_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.lock().clear();
        self.total_samples.store(0, Ordering::Relaxed);
    }

    pub fn total_samples(&self) -> u64 {
        self.total_samples.load(Ordering::Relaxed)
    }

    /// Entries sorted by descending sample count, ties by key
    pub fn snapshot(&self) -> Vec<(SampleKey, SampleCounts)> {
        let mut entries: Vec<_> = self
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        entries.sort_by(|a, b| b.1.samples.cmp(&a.1.samples).then_with(|| a.0.cmp(&b.0)));
        entries
    }

    /// One line per stack: `frame;frame;frame value`
    pub fn write_collapsed(&self, out: &mut dyn Write, counter: Counter) -> io::Result<()> {
        let mut entries = self.snapshot();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        for (key, counts) in entries {
            writeln!(out, "{} {}", key.frames().join(";"), counts.value(counter))?;
        }
        Ok(())
    }

    /// Per-trace listing, hottest first, capped at `limit` traces (0 = all)
    pub fn write_traces(&self, out: &mut dyn Write, limit: usize) -> io::Result<()> {
        let entries = self.snapshot();
        let total = self.total_samples().max(1);
        let limit = if limit == 0 { entries.len() } else { limit };

        writeln!(out, "--- Execution profile ---")?;
        writeln!(out, "Total samples       : {}", self.total_samples())?;
        writeln!(out)?;

        for (key, counts) in entries.iter().take(limit) {
            writeln!(
                out,
                "--- {} ns ({:.2}%), {} samples",
                counts.total,
                percent(counts.samples, total),
                counts.samples
            )?;
            for (depth, frame) in key.frames().iter().rev().enumerate() {
                writeln!(out, "  [{depth:2}] {frame}")?;
            }
            writeln!(out)?;
        }
        Ok(())
    }

    /// Histogram of innermost frames, hottest first, capped at `limit` rows (0 = all)
    pub fn write_flat(&self, out: &mut dyn Write, limit: usize) -> io::Result<()> {
        let mut leaves: HashMap<String, SampleCounts> = HashMap::new();
        for (key, counts) in self.snapshot() {
            let leaf = key.frames().pop().unwrap_or_default();
            let entry = leaves.entry(leaf).or_default();
            entry.samples += counts.samples;
            entry.total += counts.total;
        }
        let mut rows: Vec<_> = leaves.into_iter().collect();
        rows.sort_by(|a, b| b.1.samples.cmp(&a.1.samples).then_with(|| a.0.cmp(&b.0)));
        let total = self.total_samples().max(1);
        let limit = if limit == 0 { rows.len() } else { limit };

        writeln!(out, "{:>12}  {:>7}  {:>7}  top", "ns", "percent", "samples")?;
        writeln!(out, "{:>12}  {:>7}  {:>7}  ---", "----------", "-------", "-------")?;
        for (frame, counts) in rows.iter().take(limit) {
            writeln!(
                out,
                "{:>12}  {:>6.2}%  {:>7}  {}",
                counts.total,
                percent(counts.samples, total),
                counts.samples,
                frame
            )?;
        }
        Ok(())
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    part as f64 * 100.0 / whole as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(thread: &str, ctx: Option<(u64, u64)>) -> SampleKey {
        SampleKey {
            thread: thread.to_string(),
            context: ctx.map(|(s, r)| Context::new(s, r)),
        }
    }

    fn populated() -> SampleStore {
        let store = SampleStore::new();
        for _ in 0..3 {
            store.record(key("worker", Some((7, 1))), 1000);
        }
        store.record(key("worker", None), 1000);
        store.record(key("io", Some((9, 1))), 1000);
        store
    }

    fn render(f: impl FnOnce(&mut Vec<u8>) -> io::Result<()>) -> String {
        let mut buf = Vec::new();
        f(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_frames() {
        assert_eq!(
            key("w", Some((2, 1))).frames(),
            vec!["[w]", "[root=1]", "[span=2]"]
        );
        assert_eq!(key("w", None).frames(), vec!["[w]", "[no_context]"]);
    }

    #[test]
    fn test_record_and_reset() {
        let store = populated();
        assert_eq!(store.total_samples(), 5);
        assert_eq!(store.snapshot()[0].1.samples, 3);
        store.reset();
        assert_eq!(store.total_samples(), 0);
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_collapsed_samples_and_total() {
        let store = populated();
        let text = render(|b| store.write_collapsed(b, Counter::Samples));
        assert!(text.contains("[worker];[root=1];[span=7] 3\n"));
        assert!(text.contains("[worker];[no_context] 1\n"));
        assert_eq!(text.lines().count(), 3);

        let text = render(|b| store.write_collapsed(b, Counter::Total));
        assert!(text.contains("[worker];[root=1];[span=7] 3000\n"));
    }

    #[test]
    fn test_traces_limit() {
        let store = populated();
        let all = render(|b| store.write_traces(b, 0));
        assert_eq!(all.matches("samples\n").count(), 3);
        let one = render(|b| store.write_traces(b, 1));
        assert_eq!(one.matches("samples\n").count(), 1);
        assert!(one.contains("3 samples"));
        assert!(one.contains("[ 0] [span=7]"));
    }

    #[test]
    fn test_flat_limit() {
        let store = populated();
        let all = render(|b| store.write_flat(b, 0));
        assert_eq!(all.lines().count(), 2 + 3);
        let top = render(|b| store.write_flat(b, 1));
        assert_eq!(top.lines().count(), 2 + 1);
        assert!(top.contains("[span=7]"));
    }
}
