// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use anyhow::Context;
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::io::Write;
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use time::OffsetDateTime;

use crate::job_engine::blocking_queue::BlockingQueue;

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: OffsetDateTime,
    pub level: Level,
    pub target: String,
    pub message: String,
}

impl LogEntry {
    /// `[HH:MM:SS] LEVEL target: message`, UTC.
    pub fn format_line(&self) -> String {
        format!(
            "[{:02}:{:02}:{:02}] {:<5} {}: {}",
            self.timestamp.hour(),
            self.timestamp.minute(),
            self.timestamp.second(),
            self.level,
            self.target,
            self.message
        )
    }
}

enum SinkMessage {
    Entry(LogEntry),
    Flush(mpsc::Sender<()>),
    Shutdown,
}

/// Logger that never blocks the logging thread on I/O.
///
/// Records are queued on a [`BlockingQueue`] and written by a dedicated
/// thread, so job bodies on pool workers only pay for formatting and a push.
pub struct LogSink {
    queue: Arc<BlockingQueue<SinkMessage>>,
    level: LevelFilter,
    writer_thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSink")
            .field("level", &self.level)
            .field("queued", &self.queue.len())
            .finish()
    }
}

impl LogSink {
    pub fn new<W>(writer: W, level: LevelFilter) -> anyhow::Result<Self>
    where
        W: Write + Send + 'static,
    {
        let queue = Arc::new(BlockingQueue::new());
        let queue_in_thread = queue.clone();
        let writer_thread = thread::Builder::new()
            .name("jobgraph-log".to_string())
            .spawn(move || write_loop(writer, &queue_in_thread))
            .context("failed to spawn the log writer thread")?;
        Ok(Self {
            queue,
            level,
            writer_thread: Some(writer_thread),
        })
    }

    /// Makes a new sink the process-wide logger.
    pub fn install<W>(writer: W, level: LevelFilter) -> anyhow::Result<&'static LogSink>
    where
        W: Write + Send + 'static,
    {
        let sink: &'static LogSink = Box::leak(Box::new(Self::new(writer, level)?));
        log::set_logger(sink).context("a logger is already installed")?;
        log::set_max_level(level);
        Ok(sink)
    }

    /// Queues a plain message, stamped with the current time.
    pub fn log_line(&self, message: impl Into<String>) {
        self.push(LogEntry {
            timestamp: OffsetDateTime::now_utc(),
            level: Level::Info,
            target: "jobgraph".to_string(),
            message: message.into(),
        });
    }

    pub fn push(&self, entry: LogEntry) {
        self.queue.push(SinkMessage::Entry(entry));
    }
}

impl Log for LogSink {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        self.push(LogEntry {
            timestamp: OffsetDateTime::now_utc(),
            level: record.level(),
            target: record.target().to_string(),
            message: record.args().to_string(),
        });
    }

    /// Blocks until everything queued before this call has been written.
    fn flush(&self) {
        let (tx, rx) = mpsc::channel();
        self.queue.push(SinkMessage::Flush(tx));
        // an Err means the writer thread is gone and nothing is left to wait for
        let _ = rx.recv();
    }
}

impl Drop for LogSink {
    fn drop(&mut self) {
        self.queue.push(SinkMessage::Shutdown);
        if let Some(handle) = self.writer_thread.take() {
            let _ = handle.join();
        }
    }
}

fn write_loop<W: Write>(mut writer: W, queue: &BlockingQueue<SinkMessage>) {
    loop {
        match queue.pop() {
            SinkMessage::Entry(entry) => {
                if let Err(e) = writeln!(writer, "{}", entry.format_line()) {
                    eprintln!("log sink write failed: {e}");
                }
            }
            SinkMessage::Flush(done) => {
                if let Err(e) = writer.flush() {
                    eprintln!("log sink flush failed: {e}");
                }
                let _ = done.send(());
            }
            SinkMessage::Shutdown => {
                let _ = writer.flush();
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use time::macros::datetime;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn lines(&self) -> Vec<String> {
            String::from_utf8(self.0.lock().unwrap().clone())
                .unwrap()
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    #[test]
    fn formats_time_level_and_target() {
        let entry = LogEntry {
            timestamp: datetime!(2024-05-01 07:08:09 UTC),
            level: Level::Warn,
            target: "jobgraph::job_engine".into(),
            message: "iteration 3 was still in flight".into(),
        };
        assert_eq!(
            entry.format_line(),
            "[07:08:09] WARN  jobgraph::job_engine: iteration 3 was still in flight"
        );
    }

    #[test]
    fn records_are_written_in_order() {
        let buffer = SharedBuffer::default();
        let sink = LogSink::new(buffer.clone(), LevelFilter::Debug).unwrap();
        for i in 0..5 {
            sink.log(
                &Record::builder()
                    .args(format_args!("frame {i}"))
                    .level(Level::Info)
                    .target("driver")
                    .build(),
            );
        }
        sink.log(
            &Record::builder()
                .args(format_args!("too chatty"))
                .level(Level::Trace)
                .target("driver")
                .build(),
        );
        sink.log_line("plain");
        sink.flush();

        let lines = buffer.lines();
        assert_eq!(lines.len(), 6);
        for (i, line) in lines.iter().take(5).enumerate() {
            assert!(line.ends_with(&format!("INFO  driver: frame {i}")), "{line}");
        }
        assert!(lines[5].ends_with("jobgraph: plain"));
    }

    #[test]
    fn drop_drains_the_queue() {
        let buffer = SharedBuffer::default();
        {
            let sink = LogSink::new(buffer.clone(), LevelFilter::Info).unwrap();
            sink.log_line("last words");
        }
        assert_eq!(buffer.lines().len(), 1);
    }
}
