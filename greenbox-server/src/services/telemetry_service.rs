use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use greenbox_api::models::{DeviceId, MetricName, TelemetrySample};
use greenbox_control::Summary;
use time::{Duration, OffsetDateTime};
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::configs::Tier;
use crate::errors::TelemetryError;

type SeriesKey = (DeviceId, MetricName);

/// Read/write surface the control loop needs from telemetry storage.
#[async_trait]
pub trait TelemetryBackend: Send + Sync {
    async fn append(&self, sample: TelemetrySample) -> Result<(), TelemetryError>;

    /// Most recent raw sample strictly before `before`.
    async fn latest_before(
        &self,
        device_id: &str,
        metric: &str,
        before: OffsetDateTime,
    ) -> Result<TelemetrySample, TelemetryError>;
}

/// Samples of one (device, metric) pair, one deque per resolution tier.
#[derive(Debug)]
struct Series {
    tiers: Vec<VecDeque<TelemetrySample>>,
}

impl Series {
    fn new(tier_count: usize) -> Self {
        Self {
            tiers: (0..tier_count).map(|_| VecDeque::new()).collect(),
        }
    }

    fn raw(&self) -> &VecDeque<TelemetrySample> {
        &self.tiers[0]
    }
}

/// Ordered snapshot of a window; iterate it as many times as needed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleWindow {
    samples: Vec<TelemetrySample>,
}

impl SampleWindow {
    pub fn iter(&self) -> impl Iterator<Item = &TelemetrySample> + '_ {
        self.samples.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().map(|sample| sample.value)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl IntoIterator for SampleWindow {
    type Item = TelemetrySample;
    type IntoIter = std::vec::IntoIter<TelemetrySample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.into_iter()
    }
}

/// In-memory multi-resolution telemetry store.
///
/// Each series sits behind its own lock, so writers to different series never
/// wait on each other and readers only contend with the writer of the series
/// they read. The outer map lock is held just long enough to find or create a
/// series.
pub struct TelemetryStore {
    tiers: Arc<[Tier]>,
    series: RwLock<HashMap<SeriesKey, Arc<RwLock<Series>>>>,
}

impl TelemetryStore {
    pub fn new(tiers: &[Tier]) -> Result<Self, TelemetryError> {
        Tier::validate_all(tiers).map_err(TelemetryError::InvalidTiers)?;

        Ok(Self {
            tiers: tiers.into(),
            series: RwLock::new(HashMap::new()),
        })
    }

    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    pub async fn series_count(&self) -> usize {
        self.series.read().await.len()
    }

    async fn find(&self, device_id: &str, metric: &str) -> Option<Arc<RwLock<Series>>> {
        let series = self.series.read().await;
        series.get(&(device_id.to_string(), metric.to_string())).cloned()
    }

    async fn find_or_create(&self, device_id: &str, metric: &str) -> Arc<RwLock<Series>> {
        if let Some(series) = self.find(device_id, metric).await {
            return series;
        }

        let mut series = self.series.write().await;
        series
            .entry((device_id.to_string(), metric.to_string()))
            .or_insert_with(|| Arc::new(RwLock::new(Series::new(self.tiers.len()))))
            .clone()
    }

    async fn snapshot(&self) -> Vec<Arc<RwLock<Series>>> {
        self.series.read().await.values().cloned().collect()
    }

    fn tier_index(&self, resolution: &str) -> Result<usize, TelemetryError> {
        self.tiers
            .iter()
            .position(|tier| tier.name == resolution)
            .ok_or_else(|| TelemetryError::UnknownTier(resolution.to_string()))
    }

    /// Appends to the raw tier. A sample identical to the latest one is
    /// accepted without being stored twice.
    pub async fn append(
        &self,
        device_id: &str,
        metric: &str,
        timestamp: OffsetDateTime,
        value: f64,
    ) -> Result<(), TelemetryError> {
        if !value.is_finite() {
            return Err(TelemetryError::NonFiniteValue {
                device_id: device_id.to_string(),
                metric: metric.to_string(),
            });
        }

        let series = self.find_or_create(device_id, metric).await;
        let mut series = series.write().await;
        let raw = &mut series.tiers[0];

        if let Some(latest) = raw.back() {
            if timestamp < latest.timestamp {
                return Err(TelemetryError::OutOfOrderSample {
                    device_id: device_id.to_string(),
                    metric: metric.to_string(),
                    timestamp,
                    latest: latest.timestamp,
                });
            }
            if timestamp == latest.timestamp && value == latest.value {
                tracing::trace!(device_id, metric, %timestamp, "duplicate sample ignored");
                return Ok(());
            }
        }

        raw.push_back(TelemetrySample::new(device_id, metric, timestamp, value));

        Ok(())
    }

    pub async fn ingest(&self, sample: TelemetrySample) -> Result<(), TelemetryError> {
        self.append(&sample.device_id, &sample.metric, sample.timestamp, sample.value)
            .await
    }

    pub async fn latest(&self, device_id: &str, metric: &str) -> Result<TelemetrySample, TelemetryError> {
        let not_found = || TelemetryError::NotFound {
            device_id: device_id.to_string(),
            metric: metric.to_string(),
        };

        let series = self.find(device_id, metric).await.ok_or_else(not_found)?;
        let series = series.read().await;
        series.raw().back().cloned().ok_or_else(not_found)
    }

    pub async fn latest_before(
        &self,
        device_id: &str,
        metric: &str,
        before: OffsetDateTime,
    ) -> Result<TelemetrySample, TelemetryError> {
        let not_found = || TelemetryError::NotFound {
            device_id: device_id.to_string(),
            metric: metric.to_string(),
        };

        let series = self.find(device_id, metric).await.ok_or_else(not_found)?;
        let series = series.read().await;
        let raw = series.raw();
        let index = raw.partition_point(|sample| sample.timestamp < before);

        index
            .checked_sub(1)
            .and_then(|index| raw.get(index))
            .cloned()
            .ok_or_else(not_found)
    }

    /// Samples of `resolution` with `from <= timestamp < to`, ascending.
    /// Copied out under the series lock, so iterating never blocks writers.
    pub async fn window(
        &self,
        device_id: &str,
        metric: &str,
        resolution: &str,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> Result<SampleWindow, TelemetryError> {
        let tier = self.tier_index(resolution)?;

        let Some(series) = self.find(device_id, metric).await else {
            return Ok(SampleWindow::default());
        };
        let series = series.read().await;

        Ok(SampleWindow {
            samples: slice(&series.tiers[tier], from, to).cloned().collect(),
        })
    }

    pub async fn summary(
        &self,
        device_id: &str,
        metric: &str,
        resolution: &str,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> Result<Option<Summary>, TelemetryError> {
        let window = self.window(device_id, metric, resolution, from, to).await?;
        let values: Vec<f64> = window.values().collect();

        Ok(Summary::of(&values))
    }

    /// Reduces one bucket of `resolution` from the tier below it. Pure: the
    /// same closed bucket always yields the same sample.
    pub async fn compute_bucket(
        &self,
        device_id: &str,
        metric: &str,
        resolution: &str,
        bucket_start: OffsetDateTime,
    ) -> Result<Option<TelemetrySample>, TelemetryError> {
        let tier = self.tier_index(resolution)?;
        if tier == 0 {
            return Err(TelemetryError::UnknownTier(format!("{resolution} is not a derived tier")));
        }

        let Some(series) = self.find(device_id, metric).await else {
            return Ok(None);
        };
        let series = series.read().await;
        let start = bucket_floor(bucket_start, self.tiers[tier].bucket());

        Ok(self.reduce_bucket(&series, tier, start, device_id, metric))
    }

    fn reduce_bucket(
        &self,
        series: &Series,
        tier: usize,
        start: OffsetDateTime,
        device_id: &str,
        metric: &str,
    ) -> Option<TelemetrySample> {
        let target = &self.tiers[tier];
        let values: Vec<f64> = slice(&series.tiers[tier - 1], start, start + target.bucket())
            .map(|sample| sample.value)
            .collect();

        target
            .reducer
            .reduce(&values)
            .map(|value| TelemetrySample::new(device_id, metric, start, value))
    }

    /// Folds every closed bucket into its coarser tier and returns how many
    /// derived samples were added. A bucket is closed once the series holds a
    /// raw sample at or after its end. Buckets already derived are skipped, so
    /// running this again after a partial failure is safe.
    pub async fn downsample(&self) -> usize {
        let mut derived = 0;

        for series in self.snapshot().await {
            let mut series = series.write().await;
            let Some(latest) = series.raw().back().cloned() else {
                continue;
            };

            for tier in 1..self.tiers.len() {
                let bucket = self.tiers[tier].bucket();
                let Some(first) = series.tiers[tier - 1].front().map(|sample| sample.timestamp) else {
                    continue;
                };
                let mut start = match series.tiers[tier].back() {
                    Some(last) => last.timestamp + bucket,
                    None => bucket_floor(first, bucket),
                };

                while start + bucket <= latest.timestamp {
                    if let Some(sample) =
                        self.reduce_bucket(&series, tier, start, &latest.device_id, &latest.metric)
                    {
                        series.tiers[tier].push_back(sample);
                        derived += 1;
                    }
                    start += bucket;
                }
            }
        }

        if derived > 0 {
            tracing::debug!(derived, "downsampled closed buckets");
        }

        derived
    }

    /// Drops samples older than each tier's retention, measured from the
    /// series' latest raw sample.
    pub async fn prune(&self) -> usize {
        let mut removed = 0;

        for series in self.snapshot().await {
            let mut series = series.write().await;
            let Some(latest) = series.raw().back().map(|sample| sample.timestamp) else {
                continue;
            };

            for (tier, config) in self.tiers.iter().enumerate() {
                let horizon = latest - config.retention();
                let samples = &mut series.tiers[tier];
                let expired = samples.partition_point(|sample| sample.timestamp < horizon);
                // Keep the newest raw sample so the series never goes blank.
                let expired = if tier == 0 { expired.min(samples.len() - 1) } else { expired };
                samples.drain(..expired);
                removed += expired;
            }
        }

        if removed > 0 {
            tracing::debug!(removed, "pruned expired samples");
        }

        removed
    }
}

impl TelemetryStore {
    /// Downsamples then prunes every `period` until `shutdown` flips.
    pub fn start_maintenance_task(
        self: &Arc<Self>,
        period: std::time::Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period.max(std::time::Duration::from_millis(1)));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        store.downsample().await;
                        store.prune().await;
                    }
                }
            }

            tracing::debug!("telemetry maintenance stopped");
        })
    }
}

#[async_trait]
impl TelemetryBackend for TelemetryStore {
    async fn append(&self, sample: TelemetrySample) -> Result<(), TelemetryError> {
        self.ingest(sample).await
    }

    async fn latest_before(
        &self,
        device_id: &str,
        metric: &str,
        before: OffsetDateTime,
    ) -> Result<TelemetrySample, TelemetryError> {
        TelemetryStore::latest_before(self, device_id, metric, before).await
    }
}

fn slice(
    samples: &VecDeque<TelemetrySample>,
    from: OffsetDateTime,
    to: OffsetDateTime,
) -> impl Iterator<Item = &TelemetrySample> {
    let start = samples.partition_point(|sample| sample.timestamp < from);
    let end = samples.partition_point(|sample| sample.timestamp < to).max(start);

    samples.range(start..end)
}

/// Start of the epoch-aligned bucket of width `bucket` containing `timestamp`.
pub fn bucket_floor(timestamp: OffsetDateTime, bucket: Duration) -> OffsetDateTime {
    let width = bucket.whole_seconds().max(1);
    let seconds = timestamp.unix_timestamp();
    let floored = seconds - seconds.rem_euclid(width);

    OffsetDateTime::from_unix_timestamp(floored).unwrap_or(timestamp)
}
