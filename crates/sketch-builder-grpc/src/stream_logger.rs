//! Logger that forwards builder output over a gRPC response stream.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use sketch_builder::{CancellationToken, Level, Logger};
use tokio::sync::mpsc;
use tonic::Status;

use crate::proto::Response;

/// Sends every builder emission as one [`Response`] on a server stream.
///
/// Sends block the calling thread, so this must only be used from a blocking
/// worker. If the caller has gone away, the first failed send is logged and
/// cancels the build; later emissions are dropped.
#[derive(Debug)]
pub struct StreamLogger {
    tx: mpsc::Sender<Result<Response, Status>>,
    cancel: CancellationToken,
    disconnected: AtomicBool,
}

impl StreamLogger {
    /// Bind a logger to a response channel and the call's cancellation token.
    pub fn new(tx: mpsc::Sender<Result<Response, Status>>, cancel: CancellationToken) -> Self {
        Self {
            tx,
            cancel,
            disconnected: AtomicBool::new(false),
        }
    }

    /// True once a send has failed.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }

    fn send(&self, line: String) {
        if self.is_disconnected() {
            return;
        }
        if self.tx.blocking_send(Ok(Response { line })).is_err()
            && !self.disconnected.swap(true, Ordering::AcqRel)
        {
            tracing::warn!("build stream closed by caller, cancelling build");
            self.cancel.cancel();
        }
    }
}

impl Logger for StreamLogger {
    fn fprintln(&self, _level: Level, args: fmt::Arguments<'_>) {
        self.send(args.to_string());
    }

    fn unformatted_fprintln(&self, line: &str) {
        self.send(line.to_string());
    }

    fn unformatted_write(&self, data: &[u8]) {
        self.send(String::from_utf8_lossy(data).into_owned());
    }

    // Everything already went out on the stream.
    fn flush(&self) -> String {
        String::new()
    }

    fn name(&self) -> &'static str {
        "streamlogger"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_each_emission_is_one_message() {
        let (tx, mut rx) = mpsc::channel(8);
        let logger = StreamLogger::new(tx, CancellationToken::new());

        logger.fprintln(Level::Info, format_args!("Compiling sketch..."));
        logger.println(Level::Warn, format_args!("{}%", 75));
        logger.unformatted_fprintln("Linking everything together...");
        logger.unformatted_write(b"Sketch uses 924 bytes");
        assert_eq!(logger.flush(), "");
        drop(logger);

        let mut lines = Vec::new();
        while let Some(msg) = rx.blocking_recv() {
            lines.push(msg.unwrap().line);
        }
        assert_eq!(
            lines,
            vec![
                "Compiling sketch...",
                "75%",
                "Linking everything together...",
                "Sketch uses 924 bytes"
            ]
        );
    }

    #[test]
    fn test_closed_stream_cancels_once() {
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let logger = StreamLogger::new(tx, cancel.clone());
        drop(rx);

        logger.unformatted_fprintln("nobody is listening");
        assert!(logger.is_disconnected());
        assert!(cancel.is_cancelled());

        // Later sends are silently dropped
        logger.unformatted_fprintln("still nobody");
        assert!(logger.is_disconnected());
    }

    #[test]
    fn test_name() {
        let (tx, _rx) = mpsc::channel(1);
        assert_eq!(StreamLogger::new(tx, CancellationToken::new()).name(), "streamlogger");
    }
}
