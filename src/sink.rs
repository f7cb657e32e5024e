//! Destinations for rendered records.

use std::io::{self, Write};

use tokio::sync::mpsc;

/// Receives one rendered record at a time from any number of session tasks.
///
/// Implementations must write each record as a whole so records from
/// different files never interleave.
pub trait Sink: Send + Sync + 'static {
    fn emit(&self, record: &str) -> io::Result<()>;
}

/// Newline-delimited records on standard output.
#[derive(Clone, Copy, Debug, Default)]
pub struct Stdout;

impl Sink for Stdout {
    fn emit(&self, record: &str) -> io::Result<()> {
        let mut line = String::with_capacity(record.len() + 1);
        line.push_str(record);
        line.push('\n');

        let mut out = io::stdout().lock();
        out.write_all(line.as_bytes())?;
        out.flush()
    }
}

/// Forwards records over an unbounded channel.
#[derive(Clone, Debug)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelSink { tx }, rx)
    }
}

impl Sink for ChannelSink {
    fn emit(&self, record: &str) -> io::Result<()> {
        self.tx
            .send(record.to_owned())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "record receiver dropped"))
    }
}
