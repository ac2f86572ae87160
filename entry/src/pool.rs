//! Core module for scheduling loci over a fixed pool of workers
//! Alejandro Gonzales-Irribarren, 2025
//!
//! This module owns the shared queue of pending gene loci and the threads
//! draining it.
//!
//! In short, loci are queued longest first behind a mutex. A worker pops
//! one, bumps the running count and processes it with its own signal
//! readers. Finished loci are written to the shared outputs under their
//! own locks; split loci go back into the queue. A worker finding the
//! queue empty waits on a condition variable while others are running,
//! and leaves once nothing is queued and nobody is running. Panics inside
//! a locus are caught and the locus is counted as failed. A cancellation
//! flag is checked between loci.

use config::get_progress_bar;
use dashmap::DashMap;
use indicatif::ProgressBar;
use log::{error, info, warn};
use packbed::GeneLocus;
use serde::Serialize;

use std::collections::{BTreeMap, VecDeque};
use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::locus::LocusResult;

const IDLE_WAIT: Duration = Duration::from_millis(50);

const WRITTEN: &str = "written";
const SPLIT: &str = "split";
const FAILED: &str = "failed";
const CANCELLED: &str = "cancelled";

/// per-run locus counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolSummary {
    pub written: usize,
    pub split: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// finished loci that stopped early, by outcome kind
    pub skipped: BTreeMap<String, usize>,
}

impl PoolSummary {
    fn from_counts(counts: &DashMap<&'static str, usize>) -> Self {
        let mut summary = PoolSummary::default();
        for entry in counts.iter() {
            let (kind, count) = (*entry.key(), *entry.value());
            match kind {
                WRITTEN => summary.written = count,
                SPLIT => summary.split = count,
                FAILED => summary.failed = count,
                CANCELLED => summary.cancelled = count,
                _ => {
                    summary.skipped.insert(kind.to_string(), count);
                }
            }
        }
        summary
    }
}

/// element and transcript streams shared by all workers
pub struct Outputs<E: Write, T: Write> {
    elements: Mutex<E>,
    transcripts: Mutex<T>,
}

impl<E: Write, T: Write> Outputs<E, T> {
    pub fn new(elements: E, transcripts: T) -> Self {
        Self {
            elements: Mutex::new(elements),
            transcripts: Mutex::new(transcripts),
        }
    }

    fn write(&self, result: &LocusResult) -> anyhow::Result<()> {
        let (elements, transcripts) = result.lines();

        {
            let mut writer = self
                .elements
                .lock()
                .map_err(|_| anyhow::anyhow!("elements writer poisoned"))?;
            for line in elements {
                writeln!(writer, "{}", line)?;
            }
        }

        let mut writer = self
            .transcripts
            .lock()
            .map_err(|_| anyhow::anyhow!("transcripts writer poisoned"))?;
        for line in transcripts {
            writeln!(writer, "{}", line)?;
        }

        Ok(())
    }

    pub fn into_inner(self) -> anyhow::Result<(E, T)> {
        let elements = self
            .elements
            .into_inner()
            .map_err(|_| anyhow::anyhow!("elements writer poisoned"))?;
        let transcripts = self
            .transcripts
            .into_inner()
            .map_err(|_| anyhow::anyhow!("transcripts writer poisoned"))?;
        Ok((elements, transcripts))
    }
}

/// queue state shared by the workers
struct Shared {
    queue: Mutex<VecDeque<GeneLocus>>,
    ready: Condvar,
    running: AtomicUsize,
    counts: DashMap<&'static str, usize>,
    progress: ProgressBar,
}

impl Shared {
    fn count(&self, kind: &'static str, n: usize) {
        *self.counts.entry(kind).or_insert(0) += n;
    }
}

/// inserts keeping the queue sorted by decreasing span
fn enqueue(queue: &mut VecDeque<GeneLocus>, locus: GeneLocus) {
    let span = locus.span();
    let idx = queue.partition_point(|other| other.span() >= span);
    queue.insert(idx, locus);
}

/// fixed worker pool over a queue of gene loci
#[derive(Debug, Clone)]
pub struct Coordinator {
    threads: usize,
    cancel: Arc<AtomicBool>,
}

impl Coordinator {
    pub fn new(threads: usize) -> Self {
        Self {
            threads: threads.max(1),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// flag checked between loci; once set, queued loci are dropped
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Drains `loci` over the pool
    ///
    /// # Arguments
    ///
    /// * `loci` - initial loci, any order
    /// * `open` - builds one worker's private state (its signal readers)
    /// * `process` - runs one locus with that state
    /// * `outputs` - shared element and transcript streams
    ///
    /// # Returns
    ///
    /// * `anyhow::Result<PoolSummary>` - counts per fate; errors come from
    ///   worker setup or from the output streams
    ///
    /// # Example
    ///
    /// ```rust, ignore
    /// let summary = Coordinator::new(8).run(
    ///     loci,
    ///     || signals.open(),
    ///     |locus, readers| process_locus(locus, &ctx, readers),
    ///     &outputs,
    /// )?;
    /// ```
    pub fn run<S, O, P, E, T>(
        &self,
        loci: Vec<GeneLocus>,
        open: O,
        process: P,
        outputs: &Outputs<E, T>,
    ) -> anyhow::Result<PoolSummary>
    where
        O: Fn() -> anyhow::Result<S> + Sync,
        P: Fn(GeneLocus, &mut S) -> anyhow::Result<LocusResult> + Sync,
        E: Write + Send,
        T: Write + Send,
    {
        let mut queue = VecDeque::with_capacity(loci.len());
        for locus in loci {
            enqueue(&mut queue, locus);
        }

        let shared = Shared {
            progress: get_progress_bar(queue.len() as u64, "Processing loci"),
            queue: Mutex::new(queue),
            ready: Condvar::new(),
            running: AtomicUsize::new(0),
            counts: DashMap::new(),
        };

        let results = std::thread::scope(|scope| {
            let handles = (0..self.threads)
                .map(|_| scope.spawn(|| self.worker(&shared, &open, &process, outputs)))
                .collect::<Vec<_>>();

            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(anyhow::anyhow!("worker thread panicked")))
                })
                .collect::<Vec<_>>()
        });
        shared.progress.finish_and_clear();

        let leftover = shared
            .queue
            .lock()
            .map(|mut queue| queue.drain(..).count())
            .unwrap_or(0);
        if leftover > 0 {
            shared.count(FAILED, leftover);
        }

        let summary = PoolSummary::from_counts(&shared.counts);
        info!(
            "Loci written: {}, split: {}, failed: {}, cancelled: {}, stopped early: {:?}",
            summary.written, summary.split, summary.failed, summary.cancelled, summary.skipped
        );

        results.into_iter().collect::<anyhow::Result<Vec<_>>>()?;
        Ok(summary)
    }

    /// next locus, `None` once the pool is drained or cancelled
    fn next(&self, shared: &Shared) -> anyhow::Result<Option<GeneLocus>> {
        let mut queue = shared
            .queue
            .lock()
            .map_err(|_| anyhow::anyhow!("locus queue poisoned"))?;

        loop {
            if self.cancel.load(Ordering::Relaxed) {
                let dropped = queue.drain(..).count();
                if dropped > 0 {
                    warn!("Cancelled, dropping {} queued loci", dropped);
                    shared.count(CANCELLED, dropped);
                }
                shared.ready.notify_all();
                return Ok(None);
            }

            if let Some(locus) = queue.pop_front() {
                shared.running.fetch_add(1, Ordering::SeqCst);
                return Ok(Some(locus));
            }

            if shared.running.load(Ordering::SeqCst) == 0 {
                shared.ready.notify_all();
                return Ok(None);
            }

            queue = shared
                .ready
                .wait_timeout(queue, IDLE_WAIT)
                .map_err(|_| anyhow::anyhow!("locus queue poisoned"))?
                .0;
        }
    }

    /// hands back split loci and releases the running slot in one step
    fn finish(&self, shared: &Shared, replacements: Vec<GeneLocus>) -> anyhow::Result<()> {
        let mut queue = shared
            .queue
            .lock()
            .map_err(|_| anyhow::anyhow!("locus queue poisoned"))?;

        shared.progress.inc_length(replacements.len() as u64);
        for locus in replacements {
            enqueue(&mut queue, locus);
        }
        shared.running.fetch_sub(1, Ordering::SeqCst);
        shared.progress.inc(1);
        shared.ready.notify_all();

        Ok(())
    }

    fn worker<S, O, P, E, T>(
        &self,
        shared: &Shared,
        open: &O,
        process: &P,
        outputs: &Outputs<E, T>,
    ) -> anyhow::Result<()>
    where
        O: Fn() -> anyhow::Result<S>,
        P: Fn(GeneLocus, &mut S) -> anyhow::Result<LocusResult>,
        E: Write,
        T: Write,
    {
        let mut state = open()?;

        while let Some(locus) = self.next(shared)? {
            let name = locus.name();
            let result = catch_unwind(AssertUnwindSafe(|| process(locus, &mut state)));

            let replacements = match result {
                Ok(Ok(LocusResult::Split(sub_loci))) => {
                    shared.count(SPLIT, 1);
                    sub_loci
                }
                Ok(Ok(done)) => {
                    if let LocusResult::Done {
                        outcome: Some(outcome),
                        ..
                    } = &done
                    {
                        shared.count(outcome.kind(), 1);
                    }
                    if let Err(err) = outputs.write(&done) {
                        self.finish(shared, Vec::new())?;
                        return Err(err);
                    }
                    shared.count(WRITTEN, 1);
                    Vec::new()
                }
                Ok(Err(err)) => {
                    error!("Locus {} failed: {:#}", name, err);
                    shared.count(FAILED, 1);
                    Vec::new()
                }
                Err(_) => {
                    error!("Locus {} panicked, skipping it", name);
                    shared.count(FAILED, 1);
                    self.finish(shared, Vec::new())?;
                    // readers may be mid-read
                    state = open()?;
                    continue;
                }
            };

            self.finish(shared, replacements)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{LocusOutcome, Strand};

    fn locus(start: u64, stop: u64) -> GeneLocus {
        GeneLocus::new("chr1", Strand::Forward, vec![(start, stop)])
    }

    fn done(locus: GeneLocus, outcome: Option<LocusOutcome>) -> anyhow::Result<LocusResult> {
        Ok(LocusResult::Done { locus, outcome })
    }

    #[test]
    fn test_queue_is_longest_first() {
        let mut queue = VecDeque::new();
        for l in [locus(0, 99), locus(0, 999), locus(0, 499)] {
            enqueue(&mut queue, l);
        }
        let spans = queue.iter().map(|l| l.span()).collect::<Vec<_>>();
        assert_eq!(spans, vec![1000, 500, 100]);
    }

    #[test]
    fn test_splits_are_requeued_and_panics_contained() {
        let loci = vec![locus(0, 999), locus(5000, 5099), locus(9000, 9099)];
        let outputs = Outputs::new(Vec::new(), Vec::new());

        let summary = Coordinator::new(3)
            .run(
                loci,
                || Ok(()),
                |l, _| {
                    if l.start() == 9000 {
                        panic!("boom");
                    }
                    if l.span() == 1000 {
                        return Ok(LocusResult::Split(vec![locus(0, 299), locus(600, 999)]));
                    }
                    if l.start() == 5000 {
                        return done(l, Some(LocusOutcome::TooFewReads));
                    }
                    done(l, None)
                },
                &outputs,
            )
            .unwrap();

        assert_eq!(summary.split, 1);
        assert_eq!(summary.written, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.cancelled, 0);
        assert_eq!(summary.skipped.get("too_few_reads"), Some(&1));

        let (elements, _) = outputs.into_inner().unwrap();
        let elements = String::from_utf8(elements).unwrap();
        assert_eq!(elements.lines().count(), 3);
    }

    #[test]
    fn test_cancel_drops_queued_loci() {
        let coordinator = Coordinator::new(1);
        let cancel = coordinator.cancel_flag();
        let outputs = Outputs::new(Vec::new(), Vec::new());

        let loci = (0..5).map(|i| locus(i * 1000, i * 1000 + 99)).collect();
        let summary = coordinator
            .run(
                loci,
                || Ok(()),
                |l, _| {
                    cancel.store(true, Ordering::Relaxed);
                    done(l, None)
                },
                &outputs,
            )
            .unwrap();

        assert_eq!(summary.written, 1);
        assert_eq!(summary.cancelled, 4);
    }

    #[test]
    fn test_failing_worker_setup_is_reported() {
        let outputs = Outputs::new(Vec::new(), Vec::new());
        let result = Coordinator::new(2).run(
            vec![locus(0, 99)],
            || -> anyhow::Result<()> { Err(anyhow::anyhow!("cannot open")) },
            |l, _| done(l, None),
            &outputs,
        );
        assert!(result.is_err());
    }
}
