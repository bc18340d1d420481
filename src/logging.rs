use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Filter used when `RUST_LOG` is not set, indexed by `-v` count.
fn default_directives(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "audio_dispatch=info,warn",
        1 => "audio_dispatch=debug,warn",
        _ => "audio_dispatch=trace,info",
    }
}

/// Initialize logging with tracing
///
/// Reads the filter from `RUST_LOG` when set, otherwise derives it from the
/// verbosity. Output goes to stderr so stdout stays free for audio data.
///
/// Calling it a second time has no effect.
pub fn init_logging(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbosity)));

    let installed = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!("logging initialized");
    }
}
