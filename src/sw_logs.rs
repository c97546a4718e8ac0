//! Teardown logs
//!
//! When a robot is destroyed its whole chain is dumped to `block.csv` and
//! `sc.csv` in its log directory. Rows are space separated and start with
//! the robot id and the time of writing.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use log::{error, info};

use crate::sw_contract::Contract;
use crate::sw_interface::{short_hex, Block, RobotId, SimTime};

pub const BLOCK_LOG: &str = "block.csv";
pub const SC_LOG: &str = "sc.csv";

pub const BLOCK_HEADER: [&str; 11] = [
    "HEIGHT",
    "BLOCK",
    "TIMESTAMP",
    "TELAPSED",
    "RECEPTION",
    "SIZE_KB",
    "TXS",
    "DIFF",
    "TDIFF",
    "HASH",
    "PHASH",
];

pub const SC_HEADER: [&str; 3] = ["N", "PRIVATE", "BALANCES"];

// fixed part of a block header on the wire, and one encoded transaction
const BLOCK_HEADER_BYTES: usize = 8 * 5 + 4 + 32 * 3;
const TX_BYTES: usize = 32 + 4 + 5 + 8 + 8;

pub struct CsvLogger {
    out: BufWriter<File>,
    id: RobotId,
    rows: usize,
}

impl CsvLogger {
    /// Create `path` and write the header line
    pub fn create(path: &Path, header: &[&str], id: RobotId) -> io::Result<Self> {
        let mut out = BufWriter::new(File::create(path)?);
        writeln!(out, "ID TIME {}", header.join(" "))?;
        Ok(Self { out, id, rows: 0 })
    }

    pub fn log<T: Display>(&mut self, time: SimTime, fields: &[T]) -> io::Result<()> {
        write!(self.out, "{} {}", self.id, time)?;
        for field in fields {
            write!(self.out, " {}", field)?;
        }
        writeln!(self.out)?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Flush to disk and close
    pub fn close(mut self) -> io::Result<()> {
        self.out.flush()?;
        self.out.get_ref().sync_all()
    }
}

/// Approximate encoded size of a block, in KiB
pub fn block_size_kb(block: &Block) -> f64 {
    (BLOCK_HEADER_BYTES + block.data.len() * TX_BYTES) as f64 / 1024.0
}

pub fn block_row(block: &Block) -> Vec<String> {
    let elapsed = if block.reception == 0 {
        0
    } else {
        block.reception.saturating_sub(block.timestamp)
    };

    vec![
        block.height.to_string(),
        block.height.to_string(),
        block.timestamp.to_string(),
        elapsed.to_string(),
        block.reception.to_string(),
        format!("{:.3}", block_size_kb(block)),
        block.data.len().to_string(),
        block.difficulty.to_string(),
        block.total_difficulty.to_string(),
        short_hex(&block.hash),
        short_hex(&block.parent_hash),
    ]
}

// {k:v,k:v} with no spaces so the row stays splittable
fn compact<K: Display, V: Display>(map: &BTreeMap<K, V>) -> String {
    let body: Vec<String> = map.iter().map(|(k, v)| format!("{}:{}", k, v)).collect();
    format!("{{{}}}", body.join(",")).replace(' ', "_")
}

pub fn sc_row(state: &Contract) -> Vec<String> {
    vec![
        state.n.to_string(),
        compact(&state.private),
        compact(&state.balances),
    ]
}

/// What made it to disk during teardown
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    pub block_rows: usize,
    pub sc_rows: usize,
    pub errors: usize,
}

fn open_log(
    dir: &Path,
    name: &str,
    header: &[&str],
    id: RobotId,
    report: &mut TeardownReport,
) -> Option<CsvLogger> {
    match CsvLogger::create(&dir.join(name), header, id) {
        Ok(logger) => Some(logger),
        Err(e) => {
            error!("Failed to open {} for robot {}: {}", name, id, e);
            report.errors += 1;
            None
        }
    }
}

fn close_log(
    logger: Option<CsvLogger>,
    name: &str,
    id: RobotId,
    report: &mut TeardownReport,
) -> usize {
    let Some(logger) = logger else {
        return 0;
    };
    let rows = logger.rows();
    if let Err(e) = logger.close() {
        error!("Failed to close {} for robot {}: {}", name, id, e);
        report.errors += 1;
    }
    rows
}

/// Dump `chain` into `dir`
///
/// Each file and each row is attempted independently; failures are logged
/// and counted, never returned.
pub fn write_chain_logs<'a>(
    dir: &Path,
    id: RobotId,
    now: SimTime,
    chain: impl IntoIterator<Item = &'a Block>,
) -> TeardownReport {
    let mut report = TeardownReport::default();

    if let Err(e) = fs::create_dir_all(dir) {
        error!("Failed to create log dir {}: {}", dir.display(), e);
        report.errors += 1;
    }

    let mut block_log = open_log(dir, BLOCK_LOG, &BLOCK_HEADER, id, &mut report);
    let mut sc_log = open_log(dir, SC_LOG, &SC_HEADER, id, &mut report);

    for block in chain {
        if let Some(logger) = block_log.as_mut() {
            if let Err(e) = logger.log(now, &block_row(block)) {
                error!("Failed to write to block log for robot {}: {}", id, e);
                report.errors += 1;
            }
        }
        if let Some(logger) = sc_log.as_mut() {
            if let Err(e) = logger.log(now, &sc_row(&block.state)) {
                error!("Failed to write to sc log for robot {}: {}", id, e);
                report.errors += 1;
            }
        }
    }

    report.block_rows = close_log(block_log, BLOCK_LOG, id, &mut report);
    report.sc_rows = close_log(sc_log, SC_LOG, id, &mut report);

    info!(
        "robot {} wrote {} block rows and {} sc rows to {}",
        id,
        report.block_rows,
        report.sc_rows,
        dir.display()
    );
    report
}
