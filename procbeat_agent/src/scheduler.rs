//! Single-threaded tick loop: fast ticks sample, slow ticks flush and report.
//!
//! Both timers and the shutdown signal are multiplexed through one biased
//! `select!`, so exactly one handler runs at a time. Ticks that fire while a
//! handler is still busy are skipped, not queued.

use std::future::Future;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::batch::BatchAccumulator;
use crate::error::CollectError;
use crate::procfs::ProcFs;
use crate::report::ReportBuilder;
use crate::sample::SampleCollector;
use crate::sink::ReportSink;

/// What was left when the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownSummary {
    pub reports_sent: u64,
    /// Samples of the unfinished batch; never reported.
    pub samples_dropped: usize,
}

pub struct Scheduler<F, S> {
    collector: SampleCollector<F>,
    batch: BatchAccumulator,
    builder: ReportBuilder,
    sink: S,
    mem_total: u64,
    fast_period: Duration,
    flush_every: u32,
    reports_sent: u64,
}

impl<F: ProcFs, S: ReportSink> Scheduler<F, S> {
    /// Reads the memory baseline and primes the CPU counters.
    ///
    /// Either failing is fatal: there is nothing meaningful to report
    /// without them.
    pub fn start(
        mut collector: SampleCollector<F>,
        builder: ReportBuilder,
        sink: S,
        fast_period: Duration,
        flush_every: u32,
    ) -> Result<Self, CollectError> {
        let mem_total = collector.stats().read_memory_total()?;
        info!("Total memory: {mem_total} KiB");
        collector.stats_mut().warm_up()?;
        let flush_every = flush_every.max(1);
        Ok(Self {
            collector,
            batch: BatchAccumulator::new(flush_every as usize),
            builder,
            sink,
            mem_total,
            fast_period,
            flush_every,
            reports_sent: 0,
        })
    }

    pub fn mem_total(&self) -> u64 {
        self.mem_total
    }

    pub fn batch_len(&self) -> usize {
        self.batch.len()
    }

    pub fn reports_sent(&self) -> u64 {
        self.reports_sent
    }

    /// Fast tick: sample CPU and processes into the batch.
    pub fn on_fast_tick(&mut self) {
        match self.collector.memory_usage(self.mem_total) {
            Ok(m) => debug!(
                "Memory usage: {}/{} KiB ({:.0}%)",
                m.used,
                self.mem_total,
                m.percent_of(self.mem_total)
            ),
            Err(e) => warn!("memory usage unavailable: {e}"),
        }

        let sample = match self.collector.collect(self.mem_total) {
            Ok(s) => s,
            Err(e) => {
                warn!("sample skipped: {e}");
                return;
            }
        };
        debug!(
            "CPU Utilization: {:.0}% ({} processes)",
            sample.cpu_utilization * 100.0,
            sample.process_stats.len()
        );
        for p in sample.process_stats.iter().take(self.builder.top_n()) {
            trace!("{:.0}% {}", p.memory_share, p.command_line);
        }
        self.batch.append(sample);
    }

    /// Slow tick: flush the batch and hand one report to the sink.
    ///
    /// An empty batch still goes out with no data points, so the endpoint
    /// hears from the agent every cycle. Delivery failures are logged and
    /// the report is dropped.
    pub async fn on_slow_tick(&mut self) {
        let samples = self.batch.flush_and_reset();
        if samples.is_empty() {
            debug!("flushing an empty batch");
        }
        let report = self.builder.build(&samples);
        drop(samples);
        match self.sink.deliver(&report).await {
            Ok(()) => {
                self.reports_sent += 1;
                info!(
                    data_points = report.data_points.len(),
                    name = %report.name,
                    "report delivered"
                );
            }
            Err(e) => warn!("Failed to hit the endpoint, report dropped: {e}"),
        }
    }

    /// Runs until `shutdown` resolves. The unfinished batch is dropped.
    pub async fn run<Fut>(mut self, shutdown: Fut) -> ShutdownSummary
    where
        Fut: Future<Output = ()>,
    {
        let start = Instant::now();
        let slow_period = self.fast_period * self.flush_every;
        let mut fast = interval_at(start + self.fast_period, self.fast_period);
        let mut slow = interval_at(start + slow_period, slow_period);
        fast.set_missed_tick_behavior(MissedTickBehavior::Skip);
        slow.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(
            fast_ms = self.fast_period.as_millis() as u64,
            flush_every = self.flush_every,
            "sampling started"
        );
        loop {
            // Order matters: shutdown wins, and a fast tick due at the same
            // instant as a slow tick lands in the batch before it is flushed.
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = fast.tick() => self.on_fast_tick(),
                _ = slow.tick() => self.on_slow_tick().await,
            }
        }

        let samples_dropped = self.batch.flush_and_reset().len();
        info!(
            reports_sent = self.reports_sent,
            samples_dropped, "shutting down"
        );
        ShutdownSummary {
            reports_sent: self.reports_sent,
            samples_dropped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procfs::mock::MockFs;
    use crate::error::DeliveryError;
    use crate::report::Report;
    use crate::sink::RecordingSink;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Accepts every report but takes `delay` to do it.
    #[derive(Clone, Default)]
    struct StallingSink {
        delay: Duration,
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
        seen: Arc<Mutex<Vec<(Instant, Report)>>>,
    }

    impl ReportSink for StallingSink {
        async fn deliver(&self, report: &Report) -> Result<(), DeliveryError> {
            let busy = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(busy, Ordering::SeqCst);
            self.seen
                .lock()
                .unwrap()
                .push((Instant::now(), report.clone()));
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn fake_proc(n: u32) -> MockFs {
        let fs = MockFs::new();
        let root = Path::new("/proc");
        fs.set_cpu_line(root, "cpu 100 0 100 200 0 0 0 0 0 0");
        fs.set_meminfo(root, 2048, 512);
        for pid in 1..=n {
            fs.add_process(
                root,
                pid,
                format!("/bin/p{pid}\0").as_bytes(),
                Some(&format!("100 {} 0 0 0 0 0", pid * 3)),
            );
        }
        fs
    }

    fn scheduler(fs: MockFs, sink: RecordingSink) -> Scheduler<MockFs, RecordingSink> {
        Scheduler::start(
            SampleCollector::new(fs, Path::new("/proc")),
            ReportBuilder::new("test-agent", 10),
            sink,
            Duration::from_secs(1),
            10,
        )
        .unwrap()
    }

    #[test]
    fn start_needs_meminfo() {
        let fs = MockFs::new();
        fs.set_cpu_line(Path::new("/proc"), "cpu 1 1 1 1 1 1 1 1 1 1");
        let res = Scheduler::start(
            SampleCollector::new(fs, Path::new("/proc")),
            ReportBuilder::new("x", 10),
            RecordingSink::new(),
            Duration::from_secs(1),
            10,
        );
        assert!(matches!(res, Err(CollectError::SourceUnavailable { .. })));
    }

    #[test]
    fn start_needs_cpu_stat() {
        let fs = MockFs::new();
        fs.set_meminfo(Path::new("/proc"), 1024, 10);
        let res = Scheduler::start(
            SampleCollector::new(fs, Path::new("/proc")),
            ReportBuilder::new("x", 10),
            RecordingSink::new(),
            Duration::from_secs(1),
            10,
        );
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn fast_ticks_fill_and_slow_tick_flushes() {
        let sink = RecordingSink::new();
        let mut s = scheduler(fake_proc(12), sink.clone());
        assert_eq!(s.mem_total(), 2048);
        for k in 1..=4 {
            s.on_fast_tick();
            assert_eq!(s.batch_len(), k);
        }
        s.on_slow_tick().await;
        assert_eq!(s.batch_len(), 0);
        let reports = sink.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].data_points.len(), 4);
        assert_eq!(reports[0].data_points[0].processes[0].name, "/bin/p12");
    }

    #[tokio::test]
    async fn empty_flush_sends_report_without_data_points() {
        let sink = RecordingSink::new();
        let mut s = scheduler(fake_proc(3), sink.clone());
        s.on_slow_tick().await;
        let reports = sink.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].name, "test-agent");
        assert!(reports[0].data_points.is_empty());
        assert_eq!(s.reports_sent(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn every_flush_cycle_reports_even_when_cpu_reads_fail() {
        let fs = fake_proc(3);
        let sink = RecordingSink::new();
        let s = scheduler(fs.clone(), sink.clone());
        fs.remove("/proc/stat");
        let summary = s.run(tokio::time::sleep(Duration::from_millis(20_500))).await;
        let reports = sink.reports();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.data_points.is_empty()));
        assert_eq!(
            summary,
            ShutdownSummary {
                reports_sent: 2,
                samples_dropped: 0
            }
        );
    }

    #[tokio::test]
    async fn delivery_failure_is_absorbed() {
        let mut s = scheduler(fake_proc(3), RecordingSink::failing());
        s.on_fast_tick();
        s.on_slow_tick().await;
        assert_eq!(s.reports_sent(), 0);
        assert_eq!(s.batch_len(), 0);
        s.on_fast_tick();
        assert_eq!(s.batch_len(), 1);
    }

    #[tokio::test]
    async fn cpu_read_failure_skips_only_that_tick() {
        let fs = fake_proc(3);
        let mut s = scheduler(fs.clone(), RecordingSink::new());
        fs.remove("/proc/stat");
        s.on_fast_tick();
        assert_eq!(s.batch_len(), 0);
        fs.set_cpu_line(Path::new("/proc"), "cpu 200 0 200 300 0 0 0 0 0 0");
        s.on_fast_tick();
        assert_eq!(s.batch_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_reports_every_tenth_tick() {
        let sink = RecordingSink::new();
        let s = scheduler(fake_proc(15), sink.clone());
        let summary = s.run(tokio::time::sleep(Duration::from_millis(25_500))).await;
        let reports = sink.reports();
        assert_eq!(reports.len(), 2);
        for r in &reports {
            assert_eq!(r.name, "test-agent");
            assert_eq!(r.data_points.len(), 10);
            assert!(r.data_points.iter().all(|d| d.processes.len() == 10));
        }
        assert_eq!(
            summary,
            ShutdownSummary {
                reports_sent: 2,
                samples_dropped: 5
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_missed_during_slow_delivery_are_coalesced() {
        let sink = StallingSink {
            delay: Duration::from_secs(25),
            ..Default::default()
        };
        let s = Scheduler::start(
            SampleCollector::new(fake_proc(4), Path::new("/proc")),
            ReportBuilder::new("test-agent", 10),
            sink.clone(),
            Duration::from_secs(1),
            10,
        )
        .unwrap();
        let t0 = Instant::now();
        // first delivery starts at 10s and blocks the loop until 35s, the
        // second starts at 35s and blocks until 60s; shutdown is seen then
        let summary = s.run(tokio::time::sleep(Duration::from_secs(50))).await;

        assert_eq!(sink.max_in_flight.load(Ordering::SeqCst), 1);
        let seen = sink.seen.lock().unwrap().clone();
        let starts: Vec<Duration> = seen.iter().map(|(at, _)| *at - t0).collect();
        assert_eq!(starts, vec![Duration::from_secs(10), Duration::from_secs(35)]);
        let lens: Vec<usize> = seen.iter().map(|(_, r)| r.data_points.len()).collect();
        // 25 fast ticks expired during the stall; only one of them ran
        assert_eq!(lens, vec![10, 1]);
        assert!(lens.iter().all(|n| *n <= 10));
        assert_eq!(
            summary,
            ShutdownSummary {
                reports_sent: 2,
                samples_dropped: 0
            }
        );
    }
}
