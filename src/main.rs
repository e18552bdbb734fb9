fn main() {
    #[cfg(unix)]
    unsafe {
        // Avoid panics when piping output (e.g. `notes-bridge ... | head`).
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = notes_bridge::run() {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}
