use std::fmt::Display;
use std::time::Instant;

use console::Style;
use indicatif::ProgressStyle;

const ANSI_BLUE: Style = Style::new().blue();

pub(crate) fn as_overhead(s: Instant) -> impl Display {
    let e = Instant::now();
    let f = format!("(+{}ms)", e.duration_since(s).as_millis());
    ANSI_BLUE.apply_to(f)
}

/// Progress bar for a whole run, one tick per settled node.
pub(crate) fn style_root() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        .expect("Error setting progress bar template")
        .progress_chars("=>-")
}

/// Spinner for a single running task.
pub(crate) fn style_task() -> ProgressStyle {
    ProgressStyle::with_template("{span_child_prefix}{spinner:.green} {span_name} {msg} [{elapsed}]")
        .expect("Error setting progress bar template")
}

/// Wires up a `tracing` subscriber with progress-aware terminal output.
///
/// Spans opened by the executor drive indicatif progress bars; regular log
/// lines are redirected above them. Honors `RUST_LOG`, defaulting to `info`.
/// Call once at program start.
#[cfg(feature = "logging")]
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_indicatif::IndicatifLayer;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{EnvFilter, fmt};

    let indicatif_layer = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(indicatif_layer.get_stderr_writer()))
        .with(indicatif_layer)
        .try_init()?;

    Ok(())
}
