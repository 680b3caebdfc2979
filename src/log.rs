use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use anyhow::Result;
use once_cell::sync::OnceCell;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::Registry;

use crate::utils::get_dot_path;

static LOG_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

const MAX_LOG_SIZE: u64 = 5 * 1024 * 1024; // 5 MB

#[derive(Clone)]
struct TruncatingFileWriter {
    inner: Arc<Mutex<File>>,
    path: PathBuf,
}

impl TruncatingFileWriter {
    fn new(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(file)),
            path,
        })
    }

    fn lock(&self) -> io::Result<std::sync::MutexGuard<'_, File>> {
        self.inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log file lock poisoned"))
    }
}

impl Write for TruncatingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut file = self.lock()?;

        if file.metadata()?.len() > MAX_LOG_SIZE {
            *file = OpenOptions::new()
                .write(true)
                .truncate(true)
                .open(&self.path)?;
        }

        file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock()?.flush()
    }
}

pub fn configure_logger() -> Result<()> {
    let path = get_dot_path()?.join("echobeat.log");

    let writer = TruncatingFileWriter::new(path)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(writer);
    LOG_GUARD.set(guard).ok();

    let targets = filter::Targets::new()
        .with_target("echobeat", tracing::Level::DEBUG)
        .with_default(LevelFilter::OFF);

    let console_layer = fmt::layer().with_target(false).with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::OFF.into())
            .from_env_lossy(),
    );

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_filter(EnvFilter::new("info"));

    Registry::default()
        .with(console_layer)
        .with(file_layer)
        .with(targets)
        .init();

    Ok(())
}
