//! Tracing subscriber, Prometheus recorder and thread helpers shared by the pipeline.

use std::{
    io,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::OnceLock,
    thread,
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{
    filter::{EnvFilter, filter_fn},
    fmt,
    layer::SubscriberExt,
    prelude::*,
};

use crate::pipeline::config::TelemetryOptions;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static PROM_UPKEEP_THREAD: OnceLock<thread::JoinHandle<()>> = OnceLock::new();
static PROM_HTTP: OnceLock<SocketAddr> = OnceLock::new();

/// Keeps the subscriber installed for the current thread and flushes the
/// Chrome trace, if any, when dropped.
pub struct TelemetryGuard {
    _default_guard: tracing::subscriber::DefaultGuard,
    chrome_guard: Option<tracing_chrome::FlushGuard>,
    chrome_trace_path: Option<PathBuf>,
}

/// Install the global metrics recorder.
///
/// With `listen` set, the exporter also serves `/metrics` on that address and
/// no in-process handle is kept. Repeated calls are no-ops.
pub fn init_metrics_recorder(listen: Option<SocketAddr>) -> Result<()> {
    if PROM_HANDLE.get().is_some() || PROM_HTTP.get().is_some() {
        return Ok(());
    }

    if let Some(addr) = listen {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .with_context(|| format!("failed to start metrics listener on {addr}"))?;
        let _ = PROM_HTTP.set(addr);
        tracing::info!(%addr, "serving Prometheus metrics");
        return Ok(());
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    metrics::set_global_recorder(recorder)
        .map_err(|_| anyhow!("a metrics recorder is already installed"))?;

    let upkeep_handle = handle.clone();
    let upkeep = spawn_thread("prometheus-upkeep", move || {
        loop {
            thread::sleep(Duration::from_secs(5));
            upkeep_handle.run_upkeep();
        }
    })
    .context("failed to spawn prometheus upkeep thread")?;
    let _ = PROM_UPKEEP_THREAD.set(upkeep);
    let _ = PROM_HANDLE.set(handle);
    Ok(())
}

/// In-process Prometheus handle, when the recorder was installed without an HTTP listener.
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROM_HANDLE.get()
}

/// Install the tracing subscriber for the calling thread.
///
/// `RUST_LOG` wins over `verbose`; without either the filter is `info`.
pub fn enter_runtime(opts: &TelemetryOptions, verbose: bool) -> TelemetryGuard {
    let default_directive = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let (chrome_layer, chrome_guard) = match opts.chrome_trace_path.as_deref() {
        Some(path) => match build_chrome_layer(path) {
            Ok((layer, guard)) => (Some(layer), Some(guard)),
            Err(err) => {
                eprintln!(
                    "failed to initialise chrome trace writer at {}: {err}",
                    path.display()
                );
                (None, None)
            }
        },
        None => (None, None),
    };

    let default_guard = match chrome_layer {
        Some(chrome) => tracing::subscriber::set_default(
            tracing_subscriber::registry()
                .with(chrome.with_filter(filter_fn(|metadata| metadata.is_span())))
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_timer(fmt::time::uptime())
                        .with_filter(env_filter),
                )
                .with(tracing_error::ErrorLayer::default()),
        ),
        None => tracing::subscriber::set_default(
            tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_timer(fmt::time::uptime())
                        .with_filter(env_filter),
                )
                .with(tracing_error::ErrorLayer::default()),
        ),
    };

    TelemetryGuard {
        _default_guard: default_guard,
        chrome_guard,
        chrome_trace_path: opts.chrome_trace_path.clone(),
    }
}

/// Spawn a thread that inherits the current tracing dispatcher.
pub fn spawn_thread<F, T>(name: impl Into<String>, f: F) -> io::Result<thread::JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let dispatch = tracing::dispatcher::get_default(|current| current.clone());
    thread::Builder::new()
        .name(name.into())
        .spawn(move || tracing::dispatcher::with_default(&dispatch, f))
}

fn build_chrome_layer(
    path: &Path,
) -> io::Result<(
    tracing_chrome::ChromeLayer<tracing_subscriber::Registry>,
    tracing_chrome::FlushGuard,
)> {
    let file = std::fs::File::create(path)?;
    // Frame spans cross from the worker to the consumer thread; threaded style
    // keeps each thread's slices on its own track.
    let (layer, guard) = tracing_chrome::ChromeLayerBuilder::new()
        .writer(file)
        .include_args(true)
        .trace_style(tracing_chrome::TraceStyle::Threaded)
        .build();
    Ok((layer, guard))
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(guard) = self.chrome_guard.take() {
            guard.flush();
            drop(guard);
            if let Some(path) = self.chrome_trace_path.as_ref() {
                tracing::info!("chrome trace written to {}", path.display());
            }
        }
    }
}
