//! A scripted [`TileDataSource`] that records its calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use reconciler::{SourceError, TileDataSource};
use snow_common::{PixelPos, TileId, WeekObservation};

/// What the source does for a given date.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Deterministic values derived from pixel and date.
    Synthetic,
    Unavailable,
    Failed,
    /// The fetch task panics.
    Panic,
    /// Synthetic values, leaving out the listed pixels.
    Omit(Vec<PixelPos>),
    /// The same observation for every pixel.
    Constant(WeekObservation),
}

/// One recorded call to [`ScriptedSource::fetch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    pub tile: TileId,
    pub date: NaiveDate,
    pub pixels: Vec<PixelPos>,
}

/// Snow value produced by [`Behavior::Synthetic`].
pub fn synthetic_value(pos: PixelPos, date: NaiveDate) -> WeekObservation {
    let value = (pos.row as i32 + pos.col as i32 + date.ordinal() as i32) % 101;
    WeekObservation::new(value, (pos.col % 5) as u32)
}

fn synthetic_values<'a>(
    pixels: impl Iterator<Item = &'a PixelPos>,
    date: NaiveDate,
) -> HashMap<PixelPos, WeekObservation> {
    pixels
        .map(|pos| (*pos, synthetic_value(*pos, date)))
        .collect()
}

/// Source that follows a per-date script and records every call.
#[derive(Debug)]
pub struct ScriptedSource {
    default: Behavior,
    by_date: HashMap<NaiveDate, Behavior>,
    delay: Duration,
    calls: Mutex<Vec<FetchCall>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for ScriptedSource {
    fn default() -> Self {
        Self::new(Behavior::Synthetic)
    }
}

impl ScriptedSource {
    pub fn new(default: Behavior) -> Self {
        Self {
            default,
            by_date: HashMap::new(),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_date(mut self, date: NaiveDate, behavior: Behavior) -> Self {
        self.by_date.insert(date, behavior);
        self
    }

    /// Sleep this long inside every fetch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Calls so far, sorted by tile then date.
    pub fn calls(&self) -> Vec<FetchCall> {
        let mut calls = self.calls.lock().map(|c| c.clone()).unwrap_or_default();
        calls.sort_by_key(|c| (c.tile, c.date));
        calls
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }

    /// Highest number of fetches observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn behavior_for(&self, date: NaiveDate) -> &Behavior {
        self.by_date.get(&date).unwrap_or(&self.default)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TileDataSource for ScriptedSource {
    async fn fetch(
        &self,
        tile: TileId,
        date: NaiveDate,
        pixels: &[PixelPos],
    ) -> Result<HashMap<PixelPos, WeekObservation>, SourceError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(FetchCall {
                tile,
                date,
                pixels: pixels.to_vec(),
            });
        }

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match self.behavior_for(date) {
            Behavior::Synthetic => Ok(synthetic_values(pixels.iter(), date)),
            Behavior::Unavailable => Err(SourceError::Unavailable(format!(
                "no granule for {} on {}",
                tile, date
            ))),
            Behavior::Failed => Err(SourceError::Failed(format!(
                "unreadable granule for {} on {}",
                tile, date
            ))),
            Behavior::Panic => panic!("scripted panic for {} on {}", tile, date),
            Behavior::Omit(omitted) => Ok(synthetic_values(
                pixels.iter().filter(|pos| !omitted.contains(*pos)),
                date,
            )),
            Behavior::Constant(observation) => {
                Ok(pixels.iter().map(|pos| (*pos, *observation)).collect())
            }
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[tokio::test]
    async fn test_script_by_date() {
        let tile = TileId::new(18, 4).unwrap();
        let pixels = [PixelPos::new(1, 2), PixelPos::new(3, 4)];
        let source = ScriptedSource::default()
            .with_date(date("2024-01-08"), Behavior::Unavailable)
            .with_date(date("2024-01-15"), Behavior::Omit(vec![PixelPos::new(1, 2)]));

        let values = source.fetch(tile, date("2024-01-01"), &pixels).await.unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[&pixels[0]], synthetic_value(pixels[0], date("2024-01-01")));

        let err = source.fetch(tile, date("2024-01-08"), &pixels).await.unwrap_err();
        assert!(matches!(err, SourceError::Unavailable(_)));

        let partial = source.fetch(tile, date("2024-01-15"), &pixels).await.unwrap();
        assert_eq!(partial.len(), 1);
        assert!(partial.contains_key(&pixels[1]));

        assert_eq!(source.call_count(), 3);
        assert_eq!(source.max_in_flight(), 1);
    }

    #[test]
    fn test_synthetic_value_in_range() {
        for row in [0u16, 1500, 2999] {
            let obs = synthetic_value(PixelPos::new(row, 2999), date("2024-12-30"));
            let value = obs.value().unwrap();
            assert!((0..=100).contains(&value));
            assert!(!obs.is_error());
        }
    }
}
