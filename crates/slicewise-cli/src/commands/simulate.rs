//! Simulated streaming volume load.
//!
//! Stands in for a volume loader: one prefetch request per slice, a
//! thumbnail for the series, and an interaction request for the slice on
//! screen. Each request just sleeps for the configured latency. Closing the
//! volume mid-load drops its queued slices through `Scheduler::filter`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::info;

use slicewise_core::{RequestCategory, RequestMetadata, SlicewiseConfig};
use slicewise_scheduler::{Request, Scheduler, SchedulerStats};

pub const VOLUME_ID: &str = "ct-chest-001";

#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub config: SlicewiseConfig,
    pub slices: usize,
    /// Overrides `scheduler.max_simultaneous_requests`.
    pub max_requests: Option<usize>,
    pub latency: Duration,
    pub close_after: Option<Duration>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchRecord {
    pub category: RequestCategory,
    pub slice_index: Option<i64>,
    pub at_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub volume_id: String,
    pub max_simultaneous_requests: usize,
    pub dispatches: Vec<DispatchRecord>,
    pub discarded_on_close: usize,
    pub stats: SchedulerStats,
}

/// Middle slice first, then alternating outward.
pub fn interleaved_slice_order(slices: usize) -> Vec<usize> {
    let mut order = Vec::with_capacity(slices);
    if slices == 0 {
        return order;
    }
    let mid = slices / 2;
    order.push(mid);
    for step in 1..=mid.max(slices - mid) {
        if mid + step < slices {
            order.push(mid + step);
        }
        if step <= mid {
            order.push(mid - step);
        }
    }
    order
}

pub async fn run(options: SimulationOptions) -> anyhow::Result<SimulationReport> {
    let mut config = options.config.scheduler.clone();
    if let Some(max) = options.max_requests {
        config.max_simultaneous_requests = max;
    }
    let (scheduler, _capacity) = Scheduler::from_config(&config)?;

    let started = Instant::now();
    let dispatches = Arc::new(Mutex::new(Vec::new()));
    let request = |category: RequestCategory, slice_index: Option<usize>| {
        let mut metadata = RequestMetadata::new().with("volumeId", VOLUME_ID);
        if let Some(index) = slice_index {
            metadata.insert("sliceIndex", index);
        }
        let dispatches = Arc::clone(&dispatches);
        let latency = options.latency;
        Request::new(category, move || {
            dispatches.lock().unwrap_or_else(|e| e.into_inner()).push(DispatchRecord {
                category,
                slice_index: slice_index.map(|i| i as i64),
                at_ms: started.elapsed().as_millis() as u64,
            });
            async move {
                tokio::time::sleep(latency).await;
                Ok(())
            }
        })
        .with_metadata(metadata)
    };

    let order = interleaved_slice_order(options.slices);
    info!(
        volume_id = VOLUME_ID,
        slices = options.slices,
        max = config.max_simultaneous_requests,
        "starting simulated volume load"
    );

    // Submitted as one batch so the first pass already sees every category.
    let mut batch: Vec<Request> = order
        .iter()
        .map(|&index| request(RequestCategory::Prefetch, Some(index)))
        .collect();
    batch.push(request(RequestCategory::Thumbnail, None));
    if let Some(&on_screen) = order.first() {
        batch.push(request(RequestCategory::Interaction, Some(on_screen)));
    }
    scheduler.submit_all(batch);

    let discarded_on_close = match options.close_after {
        Some(delay) => {
            tokio::time::sleep(delay).await;
            let discarded = scheduler.filter(|r| !r.metadata().matches("volumeId", VOLUME_ID));
            info!(volume_id = VOLUME_ID, discarded, "volume closed");
            discarded
        }
        None => 0,
    };

    let poll = options.latency.max(Duration::from_millis(1));
    while scheduler.is_awake() {
        tokio::time::sleep(poll).await;
    }

    let stats = scheduler.stats();
    info!(
        dispatched = stats.dispatched,
        completed = stats.completed,
        passes = stats.admission_passes,
        "simulated volume load finished"
    );

    let dispatches = dispatches.lock().unwrap_or_else(|e| e.into_inner()).clone();
    Ok(SimulationReport {
        volume_id: VOLUME_ID.to_string(),
        max_simultaneous_requests: config.max_simultaneous_requests,
        dispatches,
        discarded_on_close,
        stats,
    })
}

pub fn format_report(report: &SimulationReport) -> String {
    let mut out = format!(
        "volume {} (max {} simultaneous requests)\n",
        report.volume_id, report.max_simultaneous_requests
    );
    for record in &report.dispatches {
        let slice = record
            .slice_index
            .map(|i| format!("slice {i}"))
            .unwrap_or_else(|| "series".to_string());
        out.push_str(&format!(
            "  {:>6} ms  {:<11} {}\n",
            record.at_ms, record.category, slice
        ));
    }
    out.push_str(&format!(
        "dispatched {}, completed {}, failed {}, discarded {}, passes {}\n",
        report.stats.dispatched,
        report.stats.completed,
        report.stats.failed,
        report.stats.discarded,
        report.stats.admission_passes
    ));
    out
}
