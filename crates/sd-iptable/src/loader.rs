//! CIDR list files: one `a.b.c.d/n` entry per line, `#` comments and blank
//! lines ignored.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::cidr::{CidrError, Interval};
use crate::config::IpTableConfig;
use crate::table::{IntervalTable, TableError};
use crate::FIRST_SOURCE_GROUP;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}:{line}: {source}")]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: CidrError,
    },
    #[error(transparent)]
    Table(#[from] TableError),
}

/// Parse the content of a CIDR list. Errors carry the 1-based line number.
pub fn parse_list(content: &str) -> Result<Vec<Interval>, (usize, CidrError)> {
    let mut intervals = Vec::new();
    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let interval = Interval::parse_cidr(line).map_err(|e| (i + 1, e))?;
        intervals.push(interval);
    }
    Ok(intervals)
}

/// Read and parse one CIDR list file.
pub fn load_file(path: &Path) -> Result<Vec<Interval>, LoadError> {
    let content = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_list(&content).map_err(|(line, source)| LoadError::Parse {
        path: path.to_path_buf(),
        line,
        source,
    })
}

/// Load every configured source and build the table.
pub fn load_table(config: &IpTableConfig) -> Result<IntervalTable, LoadError> {
    let mut sources = Vec::with_capacity(config.sources.len());
    for (i, path) in config.sources.iter().enumerate() {
        let intervals = load_file(path)?;
        info!(
            "Loaded {} ranges from {} as group {}",
            intervals.len(),
            path.display(),
            FIRST_SOURCE_GROUP + i as u64
        );
        sources.push(intervals);
    }

    let table = IntervalTable::from_sources(sources, config.overlap_policy())?;
    info!("IP table ready: {} ranges in {} groups", table.len(), table.group_count());
    Ok(table)
}
