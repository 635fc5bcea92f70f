use std::io::{BufRead, BufReader, Read};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Which pipe a captured line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// The pluggable log sink behind `SetLogger` (§4.1, §4.6). The default, [`TracingLogger`],
/// forwards every line to `tracing::debug!`, effectively a no-op until the host process installs
/// a `tracing` subscriber, matching "default is a no-op sink" without the crate inventing its
/// own logging facade.
pub trait Logger: Send + Sync {
    fn log_line(&self, supervisor: &str, stream: Stream, line: &str);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log_line(&self, supervisor: &str, stream: Stream, line: &str) {
        match stream {
            Stream::Stdout => tracing::debug!(supervisor, stream = "stdout", "{line}"),
            Stream::Stderr => tracing::debug!(supervisor, stream = "stderr", "{line}"),
        }
    }
}

const MAX_LINE_LEN: usize = 4096;

/// Spawns one reader thread per pipe, draining it into `logger` at Debug level until EOF or a
/// read error. Lines longer than 4 KiB are truncated rather than buffered without bound (§4.6);
/// since each thread only ever calls the (non-blocking, synchronous) logger and never the
/// child, a slow sink cannot back-pressure the child's writes. The OS pipe buffer is the only
/// thing that could, and draining continuously is what prevents it from filling.
pub fn spawn_readers(
    supervisor_name: String,
    stdout: impl Read + Send + 'static,
    stderr: impl Read + Send + 'static,
    logger: Arc<dyn Logger>,
) -> (JoinHandle<()>, JoinHandle<()>) {
    let out_handle = spawn_one(supervisor_name.clone(), Stream::Stdout, stdout, logger.clone());
    let err_handle = spawn_one(supervisor_name, Stream::Stderr, stderr, logger);
    (out_handle, err_handle)
}

fn spawn_one(
    supervisor_name: String,
    stream: Stream,
    reader: impl Read + Send + 'static,
    logger: Arc<dyn Logger>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {
                    let trimmed = line.trim_end_matches('\n');
                    let truncated = if trimmed.len() > MAX_LINE_LEN {
                        &trimmed[..MAX_LINE_LEN]
                    } else {
                        trimmed
                    };
                    logger.log_line(&supervisor_name, stream, truncated);
                }
                Err(_) => break,
            }
        }
    })
}
