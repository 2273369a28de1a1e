//! Resource exclusivity: disjunctive timelines for processing elements, cumulative ones
//! for communication units, and the admissible job-to-PE durations.

use sdfsyde_common::models::SDFToMultiCoreCharacterizedJobs;
use sdfsyde_core::SynthesisError;

fn overlaps(a: (u64, u64), b: (u64, u64)) -> bool {
    a.0 < b.1 && b.0 < a.1
}

/// Intervals `[start, end)` of a resource that runs one thing at a time.
///
/// Zero-length intervals never occupy the resource and are not kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timeline {
    intervals: Vec<(u64, u64)>,
}

impl Timeline {
    pub fn new() -> Timeline {
        Timeline::default()
    }

    /// The earliest start at or after `release` where `duration` fits without overlap.
    pub fn earliest_fit(&self, release: u64, duration: u64) -> u64 {
        if duration == 0 {
            return release;
        }
        let mut t = release;
        for &(s, e) in &self.intervals {
            if e <= t {
                continue;
            }
            if s >= t.saturating_add(duration) {
                break;
            }
            t = e;
        }
        t
    }

    pub fn reserve(&mut self, start: u64, duration: u64) -> Result<(), SynthesisError> {
        if duration == 0 {
            return Ok(());
        }
        let interval = (start, start.saturating_add(duration));
        if self.intervals.iter().any(|i| overlaps(*i, interval)) {
            return Err(SynthesisError::NoFeasibleMapping(format!(
                "interval [{}, {}) overlaps an occupied one",
                interval.0, interval.1
            )));
        }
        let pos = self.intervals.partition_point(|i| i.0 < start);
        self.intervals.insert(pos, interval);
        Ok(())
    }

    pub fn release(&mut self, start: u64, duration: u64) {
        if let Some(pos) = self
            .intervals
            .iter()
            .position(|i| *i == (start, start.saturating_add(duration)))
        {
            self.intervals.remove(pos);
        }
    }
}

/// Intervals of a resource that serves up to `capacity` things at the same time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CumulativeTimeline {
    capacity: u32,
    intervals: Vec<(u64, u64)>,
}

impl CumulativeTimeline {
    pub fn new(capacity: u32) -> CumulativeTimeline {
        CumulativeTimeline {
            capacity,
            intervals: Vec::new(),
        }
    }

    fn peak_usage(&self, window: (u64, u64)) -> usize {
        let mut points = vec![window.0];
        points.extend(
            self.intervals
                .iter()
                .map(|i| i.0)
                .filter(|s| *s > window.0 && *s < window.1),
        );
        points
            .into_iter()
            .map(|x| {
                self.intervals
                    .iter()
                    .filter(|(s, e)| *s <= x && x < *e)
                    .count()
            })
            .max()
            .unwrap_or(0)
    }

    /// The earliest start at or after `release` where `duration` fits under the capacity,
    /// or `None` when the resource has no capacity at all.
    pub fn earliest_fit(&self, release: u64, duration: u64) -> Option<u64> {
        if self.capacity == 0 {
            return None;
        }
        if duration == 0 {
            return Some(release);
        }
        let mut candidates: Vec<u64> = vec![release];
        candidates.extend(self.intervals.iter().map(|i| i.1).filter(|e| *e > release));
        candidates.sort_unstable();
        candidates
            .into_iter()
            .find(|t| self.peak_usage((*t, t.saturating_add(duration))) < self.capacity as usize)
    }

    /// Whether `[start, start + duration)` still fits under the capacity.
    pub fn fits(&self, start: u64, duration: u64) -> bool {
        let window = (start, start.saturating_add(duration));
        self.capacity > 0 && (duration == 0 || self.peak_usage(window) < self.capacity as usize)
    }

    pub fn reserve(&mut self, start: u64, duration: u64) -> bool {
        if !self.fits(start, duration) {
            return false;
        }
        if duration > 0 {
            let pos = self.intervals.partition_point(|i| i.0 < start);
            self.intervals.insert(pos, (start, start.saturating_add(duration)));
        }
        true
    }

    pub fn release(&mut self, start: u64, duration: u64) {
        if let Some(pos) = self
            .intervals
            .iter()
            .position(|i| *i == (start, start.saturating_add(duration)))
        {
            self.intervals.remove(pos);
        }
    }
}

/// Durations of every job on every processing element, `None` where the job's actor may
/// not run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingTable {
    pub durations: Vec<Vec<Option<u64>>>,
}

impl MappingTable {
    pub fn new(model: &SDFToMultiCoreCharacterizedJobs) -> Result<MappingTable, SynthesisError> {
        let c = &model.characterized;
        let mut durations = Vec::with_capacity(model.jobs.len());
        for job in &model.jobs {
            let admissible = c.admissible_processing_elements(&job.actor);
            if admissible.is_empty() {
                return Err(SynthesisError::NoFeasibleMapping(format!(
                    "actor '{}' has no admissible processing element",
                    job.actor
                )));
            }
            let mut row = Vec::with_capacity(c.platform.processing_elements.len());
            for pe in &c.platform.processing_elements {
                if admissible.contains(&pe.as_str()) {
                    row.push(Some(c.wcet_of(&job.actor, pe)?));
                } else {
                    row.push(None);
                }
            }
            durations.push(row);
        }
        Ok(MappingTable { durations })
    }

    pub fn duration(&self, job: usize, pe: usize) -> Option<u64> {
        self.durations.get(job).and_then(|r| r.get(pe)).copied().flatten()
    }

    pub fn admissible(&self, job: usize) -> Vec<usize> {
        self.durations
            .get(job)
            .map(|r| {
                r.iter()
                    .enumerate()
                    .filter(|(_, d)| d.is_some())
                    .map(|(p, _)| p)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The smallest duration of a job over its admissible processing elements.
    pub fn min_duration(&self, job: usize) -> u64 {
        self.durations
            .get(job)
            .and_then(|r| r.iter().flatten().min().copied())
            .unwrap_or(0)
    }

    /// Round-robin seeding of jobs over their admissible processing elements.
    pub fn round_robin_hint(&self, job: usize) -> Option<usize> {
        let admissible = self.admissible(job);
        if admissible.is_empty() {
            None
        } else {
            Some(admissible[job % admissible.len()])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeline_fills_gaps() {
        let mut t = Timeline::new();
        t.reserve(2, 2).unwrap();
        t.reserve(6, 1).unwrap();
        assert_eq!(t.earliest_fit(0, 2), 0);
        assert_eq!(t.earliest_fit(0, 3), 7);
        assert_eq!(t.earliest_fit(3, 2), 4);
        assert_eq!(t.earliest_fit(5, 0), 5);
    }

    #[test]
    fn timeline_rejects_overlaps() {
        let mut t = Timeline::new();
        t.reserve(0, 4).unwrap();
        assert!(matches!(
            t.reserve(3, 2),
            Err(SynthesisError::NoFeasibleMapping(_))
        ));
        t.reserve(4, 2).unwrap();
        t.release(0, 4);
        assert_eq!(t.earliest_fit(0, 4), 0);
    }

    #[test]
    fn cumulative_timeline_honours_capacity() {
        let mut t = CumulativeTimeline::new(2);
        assert!(t.reserve(0, 4));
        assert!(t.reserve(1, 4));
        assert!(!t.fits(2, 1));
        assert_eq!(t.earliest_fit(0, 1), Some(0));
        assert_eq!(t.earliest_fit(1, 1), Some(4));
        assert!(t.reserve(4, 2));
        assert_eq!(t.earliest_fit(4, 1), Some(5));
        t.release(1, 4);
        assert_eq!(t.earliest_fit(4, 1), Some(4));
    }

    #[test]
    fn unusable_unit_never_fits() {
        let t = CumulativeTimeline::new(0);
        assert_eq!(t.earliest_fit(0, 1), None);
        assert!(!t.fits(0, 0));
    }
}
