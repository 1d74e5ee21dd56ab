//! Line-oriented output of the tracker.
//!
//! Everything an operator sees on stdout goes through [`DepositReporter`]: readiness, the
//! resumed cursor, one line per deposit, backfill completion and fatal errors. Diagnostics go
//! to `tracing` instead.

use std::{
    fmt::Display,
    io::{self, Write},
    sync::{Arc, Mutex, PoisonError},
};

use crate::{event::DecodedDeposit, types::BlockRef};

/// Shared, clonable writer of report lines.
///
/// A failed write is returned to the caller: the report is the program's only output, so
/// losing it is fatal.
#[derive(Debug)]
pub struct DepositReporter<W> {
    sink: Arc<Mutex<W>>,
}

impl<W> Clone for DepositReporter<W> {
    fn clone(&self) -> Self {
        Self { sink: Arc::clone(&self.sink) }
    }
}

impl DepositReporter<io::Stdout> {
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> DepositReporter<W> {
    pub fn new(sink: W) -> Self {
        Self { sink: Arc::new(Mutex::new(sink)) }
    }

    pub fn report(&self, deposit: &DecodedDeposit) -> io::Result<()> {
        self.line(deposit)
    }

    pub fn tracker_ready(&self) -> io::Result<()> {
        self.line("Tracker is ready")
    }

    pub fn last_block(&self, block: &BlockRef) -> io::Result<()> {
        self.line(format_args!("Last block processed: {}", block.number))
    }

    pub fn sync_complete(&self) -> io::Result<()> {
        self.line("Historical sync is done")
    }

    pub fn error(&self, error: &dyn Display) -> io::Result<()> {
        self.line(format_args!("[ERR]: {error}"))
    }

    fn line(&self, line: impl Display) -> io::Result<()> {
        // a writer that panicked mid-line cannot corrupt later lines
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(sink, "{line}")?;
        sink.flush()
    }
}
