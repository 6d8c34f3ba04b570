//! Routing of sample blocks to datasets
//!
//! A write call carries one file offset and many requests. Requests are
//! grouped by catalog, each request is resolved through the [`DatasetIndex`]
//! built at open and issued as one bounded-range write. Progress is reported
//! once per catalog group.

use std::time::Duration;

use tracing::{debug, trace};

use crate::backend::ContainerFile;
use crate::cancel::CancellationToken;
use crate::catalog::WriteRequest;
use crate::error::{Result, WriterError};
use crate::namespace::{DatasetIndex, DatasetKey};

/// Element index of `file_offset` at `sample_period`
///
/// # Errors
///
/// `InvalidOffset` when the offset is not a whole number of sample periods.
pub fn element_offset(file_offset: Duration, sample_period: Duration) -> Result<u64> {
    let period = sample_period.as_nanos();
    let offset = file_offset.as_nanos();
    if period == 0 || offset % period != 0 {
        return Err(WriterError::InvalidOffset {
            offset: file_offset,
            sample_period,
        });
    }
    u64::try_from(offset / period).map_err(|_| WriterError::InvalidOffset {
        offset: file_offset,
        sample_period,
    })
}

/// Requests of one catalog, in arrival order
fn group_by_catalog(requests: &[WriteRequest]) -> Vec<Vec<&WriteRequest>> {
    let mut groups: Vec<(&str, Vec<&WriteRequest>)> = Vec::new();
    for request in requests {
        let catalog_id = request.item.catalog.id.as_str();
        match groups.iter_mut().find(|(id, _)| *id == catalog_id) {
            Some((_, group)) => group.push(request),
            None => groups.push((catalog_id, vec![request])),
        }
    }
    groups.into_iter().map(|(_, group)| group).collect()
}

/// Outcome of a successful dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchSummary {
    /// Catalog groups processed
    pub groups: usize,
    /// Requests written
    pub requests: usize,
    /// Samples written across all requests
    pub samples: u64,
}

/// Borrows an open file and its dataset index for one write call
pub struct Dispatcher<'a, F: ContainerFile> {
    file: &'a mut F,
    index: &'a DatasetIndex<F::Node>,
    sample_period: Duration,
}

impl<'a, F: ContainerFile> Dispatcher<'a, F> {
    /// Dispatcher over `file`
    pub fn new(
        file: &'a mut F,
        index: &'a DatasetIndex<F::Node>,
        sample_period: Duration,
    ) -> Self {
        Self {
            file,
            index,
            sample_period,
        }
    }

    /// Write every request at `file_offset`
    ///
    /// Cancellation is observed before each catalog group and each request;
    /// requests written before it stay written.
    pub fn write<P>(
        &mut self,
        file_offset: Duration,
        requests: &[WriteRequest],
        mut progress: P,
        cancel: &CancellationToken,
    ) -> Result<DispatchSummary>
    where
        P: FnMut(f64),
    {
        let offset = element_offset(file_offset, self.sample_period)?;
        let total_length = self.index.total_length();
        if requests.is_empty() {
            progress(1.0);
            return Ok(DispatchSummary::default());
        }

        let total = requests.len();
        let mut summary = DispatchSummary::default();
        for group in group_by_catalog(requests) {
            cancel.check()?;

            for request in group {
                cancel.check()?;

                let key = DatasetKey::for_item(&request.item);
                let dataset = self
                    .index
                    .get(&key)
                    .ok_or_else(|| WriterError::UnknownDataset(key.path()))?;

                let len = request.samples.len() as u64;
                let end = offset
                    .checked_add(len)
                    .filter(|end| *end <= total_length)
                    .ok_or_else(|| WriterError::OutOfBounds {
                        dataset: key.path(),
                        offset,
                        end: offset.saturating_add(len),
                        length: total_length,
                    })?;

                self.file.write_range(dataset, offset, &request.samples)?;
                trace!(dataset = %key.path(), offset, end, "wrote range");

                summary.requests += 1;
                summary.samples += len;
            }

            summary.groups += 1;
            progress(summary.requests as f64 / total as f64);
        }

        debug!(
            offset,
            groups = summary.groups,
            requests = summary.requests,
            samples = summary.samples,
            "dispatched write"
        );
        Ok(summary)
    }
}
