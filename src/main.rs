use clap::Parser;
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;

use hashwatch::{
    cli::{Cli, OutputFormat},
    ChangeEvent, ChangeKind, FileWatcher, HashWatchConfig,
};

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(err) = cli.validate() {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }

    cli.setup_logging();

    let config = HashWatchConfig::resolve(cli.config.as_deref())?;
    let watch_path = cli.get_watch_path();
    tracing::info!("Starting hashwatch on: {}", watch_path.display());

    let watcher = match FileWatcher::with_config(&watch_path, &config) {
        Ok(watcher) => watcher,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            std::process::exit(1);
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    if cli.output == OutputFormat::Text {
        println!("Watching: {}", watcher.root().display());
        println!("Press Ctrl+C to quit");
        println!("---");
    }

    while running.load(Ordering::SeqCst) {
        match watcher.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => print_event(&event, &cli)?,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let store = watcher.shutdown()?;
    tracing::info!("Tracked {} files at exit", store.len());

    Ok(())
}

fn print_event(event: &ChangeEvent, cli: &Cli) -> Result<()> {
    match cli.output {
        OutputFormat::Json => {
            let line = serde_json::json!({
                "kind": event.kind,
                "path": event.path,
                "timestamp": chrono::DateTime::<chrono::Utc>::from(event.timestamp).to_rfc3339(),
                "sequence": event.sequence,
                "digest": event.digest,
            });
            println!("{}", line);
        }
        OutputFormat::Text => print_text_event(event, cli.no_color),
        OutputFormat::Compact => print_compact_event(event),
    }
    Ok(())
}

fn print_text_event(event: &ChangeEvent, no_color: bool) {
    let time_str = chrono::DateTime::<chrono::Local>::from(event.timestamp).format("%H:%M:%S");
    let event_type = event.kind.label();

    if no_color {
        println!("[{}] {} {}", time_str, event_type, event.path.display());
    } else {
        let color = match event.kind {
            ChangeKind::Added => "\x1b[32m",    // Green
            ChangeKind::Removed => "\x1b[31m",  // Red
            ChangeKind::Modified => "\x1b[33m", // Yellow
        };
        println!("\x1b[90m[{}]\x1b[0m {}{}\x1b[0m {}", time_str, color, event_type, event.path.display());
    }
}

fn print_compact_event(event: &ChangeEvent) {
    let event_type = match event.kind {
        ChangeKind::Added => "A",
        ChangeKind::Removed => "D",
        ChangeKind::Modified => "M",
    };

    println!("{} {}", event_type, event.path.display());
}
