use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "GROOVI_LOG";

fn main() {
    let opts = match parse_args(std::env::args().skip(1)) {
        Ok(Some(opts)) => opts,
        Ok(None) => return,
        Err(message) => {
            eprintln!("error: {message}");
            std::process::exit(2);
        }
    };

    init_logging();

    if let Err(err) = groovi_feed::run(opts) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// `Ok(None)` means a flag was handled and the process should exit.
fn parse_args(
    mut args: impl Iterator<Item = String>,
) -> Result<Option<groovi_feed::app::RunOptions>, String> {
    let mut opts = groovi_feed::app::RunOptions::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("groovi-feed {}", groovi_feed::VERSION);
                return Ok(None);
            }
            "--help" | "-h" => {
                println!(
                    "groovi-feed - Browse the Groovi video feed from the terminal.\n\n  --config,  -c <path>  Use this config file instead of the default\n  --offline            Use the built-in demo feed\n  --version, -V        Show version and exit\n  --help,    -h        Show this help message\n\n  Logging: set {LOG_ENV} (e.g. {LOG_ENV}=debug)."
                );
                return Ok(None);
            }
            "--offline" => opts.offline = true,
            "--config" | "-c" => {
                let path = args
                    .next()
                    .ok_or_else(|| format!("{arg} requires a path"))?;
                opts.config_file = Some(PathBuf::from(path));
            }
            other => return Err(format!("unknown argument {other:?}; see --help")),
        }
    }
    Ok(Some(opts))
}
