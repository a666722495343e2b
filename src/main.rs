use clap::Parser;
use procpool::app::{build_runtime, handle_fatal_error, init_logging, AppConfig};
use procpool::cli::{execute_command, Cli};

fn main() {
    // Worker processes are this binary re-executed; they never reach the CLI.
    procpool::enter_if_worker(&procpool::demo::registry());

    let cli = Cli::parse();
    let config = AppConfig::new(cli.verbose).with_config_path(cli.config);
    init_logging(&config);

    let runtime = match build_runtime() {
        Ok(runtime) => runtime,
        Err(e) => handle_fatal_error(e, config.verbose),
    };

    if let Err(e) = runtime.block_on(execute_command(cli.command, &config)) {
        handle_fatal_error(e, config.verbose);
    }
}
