use clap::Parser;
use trackbit_app::app::{run, AppConfig, Cli};

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("trackbit: {err}; using defaults");
            AppConfig::default()
        }
    };
    let mut stdout = std::io::stdout().lock();
    if let Err(err) = run(config, cli, &mut stdout) {
        eprintln!("trackbit: {err:#}");
        std::process::exit(1);
    }
}
