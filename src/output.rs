//! Persisted output of the pair finder: the candidate table and the mass histogram.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use log::info;
use ndarray::{Array1, ArrayView1};
use serde::Serialize;

use crate::error::TrackingError;
use crate::kinematics::CandidateRecord;
use crate::{Float, lit};

/// Writes one CSV row per candidate, with a header row.
pub struct CandidateWriter<W: Write> {
    writer: csv::Writer<W>,
    rows: usize,
}

impl CandidateWriter<File> {
    /// Create (or truncate) the table at `path`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TrackingError> {
        info!("Writing candidates to {}.", path.as_ref().display());
        Ok(Self::new(File::create(path)?))
    }
}

impl<W: Write> CandidateWriter<W> {
    /// Write to `sink`.
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
            rows: 0,
        }
    }

    /// Append one candidate.
    pub fn write<F: Serialize>(&mut self, record: &CandidateRecord<F>) -> Result<(), TrackingError> {
        self.writer.serialize(record)?;
        self.rows += 1;
        Ok(())
    }

    /// Append all candidates of an event.
    pub fn write_all<F: Serialize>(
        &mut self,
        records: &[CandidateRecord<F>],
    ) -> Result<(), TrackingError> {
        records.iter().try_for_each(|r| self.write(r))
    }

    /// Number of rows written so far.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Flush buffered rows.
    pub fn flush(&mut self) -> Result<(), TrackingError> {
        Ok(self.writer.flush()?)
    }

    /// Flush and return the underlying sink.
    pub fn into_inner(self) -> Result<W, TrackingError> {
        self.writer
            .into_inner()
            .map_err(|e| TrackingError::Io(e.into_error()))
    }
}

/// Fixed-width histogram of reconstructed masses.
#[derive(Clone, Debug)]
pub struct MassHistogram<F: Float> {
    min: F,
    max: F,
    counts: Array1<u64>,
    underflow: u64,
    overflow: u64,
}

impl<F: Float> Default for MassHistogram<F> {
    /// 500 bins between 0 and 1 GeV.
    fn default() -> Self {
        Self::new(500, F::zero(), F::one())
    }
}

impl<F: Float> MassHistogram<F> {
    /// Histogram of `n_bins` equal bins covering `[min, max)`.
    ///
    /// # Panics
    /// If `n_bins` is zero or `min >= max`.
    pub fn new(n_bins: usize, min: F, max: F) -> Self {
        assert!(n_bins > 0, "histogram needs at least one bin");
        assert!(min < max, "histogram range is empty");
        Self {
            min,
            max,
            counts: Array1::zeros(n_bins),
            underflow: 0,
            overflow: 0,
        }
    }

    /// Number of bins.
    pub fn n_bins(&self) -> usize {
        self.counts.len()
    }

    fn bin_width(&self) -> F {
        (self.max - self.min) / lit(self.n_bins() as f64)
    }

    /// Bin containing `value`, `None` outside the range.
    pub fn bin(&self, value: F) -> Option<usize> {
        if !(value >= self.min && value < self.max) {
            return None;
        }
        let index = ((value - self.min) / self.bin_width()).floor();
        let index = nalgebra::try_convert::<F, f64>(index)? as usize;
        Some(index.min(self.n_bins() - 1))
    }

    /// Center of bin `index`.
    pub fn bin_center(&self, index: usize) -> F {
        self.min + self.bin_width() * (lit::<F>(index as f64) + lit(0.5))
    }

    /// Count one entry. NaN is ignored.
    pub fn fill(&mut self, value: F) {
        if nalgebra::try_convert::<F, f64>(value).is_none_or(f64::is_nan) {
            return;
        }
        match self.bin(value) {
            Some(index) => self.counts[index] += 1,
            None if value < self.min => self.underflow += 1,
            None => self.overflow += 1,
        }
    }

    /// Count the invariant mass of every candidate.
    pub fn fill_candidates(&mut self, records: &[CandidateRecord<F>]) {
        records.iter().for_each(|r| self.fill(r.invariant_mass));
    }

    /// Bin contents.
    pub fn counts(&self) -> ArrayView1<'_, u64> {
        self.counts.view()
    }

    /// Entries below the range.
    pub fn underflow(&self) -> u64 {
        self.underflow
    }

    /// Entries at or above the upper edge.
    pub fn overflow(&self) -> u64 {
        self.overflow
    }

    /// All counted entries, including under- and overflow.
    pub fn entries(&self) -> u64 {
        self.counts.sum() + self.underflow + self.overflow
    }
}
