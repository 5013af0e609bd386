// Partitioned CSV output for reshaped arrival batches.

use crate::tld_cache::DataDir;
use crate::tld_models::{Arrival, Result, TLDError};
use log::debug;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

pub struct PartitionWriter {
    by_location_dir: PathBuf,
    by_route_dir: PathBuf,
}

impl PartitionWriter {
    pub fn new(data_dir: &DataDir) -> PartitionWriter {
        PartitionWriter {
            by_location_dir: data_dir.by_location_dir(),
            by_route_dir: data_dir.by_route_dir(),
        }
    }

    /// Append a batch into both partition schemes: one file per stop id, and
    /// one file per (route, stop) pair. Files are created with a header row;
    /// later batches append rows only. Rows are never deduplicated across
    /// runs, so overlapping fetches accumulate duplicate rows.
    pub fn write_batch(&self, rows: &[Arrival]) -> Result<()> {
        for (locid, stop_rows) in Self::group_by_stop(rows) {
            for (route, route_rows) in Self::group_by_route(&stop_rows) {
                let route_dir = self.by_route_dir.join(route.to_string());
                fs::create_dir_all(&route_dir).map_err(|e| {
                    TLDError::FileError(format!("Failed to create {:?}: {}", route_dir, e))
                })?;
                Self::append_rows(&route_dir.join(format!("{}.csv", locid)), &route_rows)?;
            }
            Self::append_rows(
                &self.by_location_dir.join(format!("{}.csv", locid)),
                &stop_rows,
            )?;
        }
        Ok(())
    }

    fn group_by_stop(rows: &[Arrival]) -> BTreeMap<i64, Vec<&Arrival>> {
        let mut groups: BTreeMap<i64, Vec<&Arrival>> = BTreeMap::new();
        for row in rows {
            groups.entry(row.locid).or_insert_with(Vec::new).push(row);
        }
        groups
    }

    fn group_by_route<'a>(rows: &[&'a Arrival]) -> BTreeMap<i64, Vec<&'a Arrival>> {
        let mut groups: BTreeMap<i64, Vec<&'a Arrival>> = BTreeMap::new();
        for row in rows {
            groups.entry(row.route).or_insert_with(Vec::new).push(row);
        }
        groups
    }

    fn append_rows(path: &Path, rows: &[&Arrival]) -> Result<()> {
        let write_header = !path.is_file();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| TLDError::FileError(format!("Failed to open {:?}: {}", path, e)))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(write_header)
            .from_writer(file);

        for row in rows {
            writer
                .serialize(row)
                .map_err(|e| TLDError::FileError(format!("Failed to write {:?}: {}", path, e)))?;
        }
        writer
            .flush()
            .map_err(|e| TLDError::FileError(format!("Failed to flush {:?}: {}", path, e)))?;

        debug!("{} rows appended to {:?}", rows.len(), path);
        Ok(())
    }
}
