use clap::Parser;
use hydrate::cli::Cli;
use hydrate::logging::{init_logging, LoggingConfig};

fn main() {
    let cli = Cli::parse();

    let level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let config = LoggingConfig {
        level: level.to_string(),
        ..Default::default()
    };
    if let Err(err) = init_logging(Some(&config)) {
        eprintln!("{err}");
        std::process::exit(2);
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("failed to start async runtime: {err}");
            std::process::exit(2);
        }
    };

    match runtime.block_on(cli.run()) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("fatal: {err}");
            std::process::exit(2);
        }
    }
}
