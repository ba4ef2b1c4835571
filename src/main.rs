//! cctns-query - run a read-only SQL query against the CCTNS records database.

use cctns_copilot::cli::Cli;
use cctns_copilot::config::Config;
use cctns_copilot::error::Result;
use cctns_copilot::gateway::{QueryGateway, QueryRequest};
use cctns_copilot::logging;
use cctns_copilot::policy::ReadOnlyPolicy;
use cctns_copilot::report;
use std::io::Write;
use tracing::{error, info};

fn main() {
    let cli = Cli::parse_args();

    // A missing .env is fine; the variables may come from the environment.
    let dotenv = dotenvy::dotenv();

    match cli.log_target() {
        Some(path) => logging::init_file_logging(path),
        None => logging::init_stderr_logging(),
    }

    if let Ok(path) = dotenv {
        info!("Loaded environment from {}", path.display());
    }

    if let Err(e) = run(&cli) {
        error!("{}: {}", e.category(), e);
        eprintln!("{}: {}", e.category(), e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let sql = cli.read_sql()?;

    let config_path = cli.config_path();
    info!("Loading config from: {}", config_path.display());
    let config = Config::load_from_file(&config_path)?;

    // Precedence: CLI arguments, then config file, then environment.
    let mut database = config.database.clone();
    database.merge(&cli.to_database_config());
    database.apply_env_defaults();

    let policy = if cli.strict || config.policy.strict {
        ReadOnlyPolicy::strict()
    } else {
        ReadOnlyPolicy::new()
    };

    let mut request = QueryRequest::new(sql);
    if let Some(params) = cli.parse_params()? {
        request = request.with_params(params);
    }

    let mut gateway = QueryGateway::new(database.provisioning()).with_policy(policy);
    gateway.provision()?;
    let table = gateway.execute(&request)?;
    gateway.close();

    let rendered = report::render(&table, cli.format)?;
    match &cli.output_file {
        Some(path) => {
            std::fs::write(path, rendered)?;
            info!("Wrote {} rows to {}", table.row_count(), path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(rendered.as_bytes())?;
            stdout.flush()?;
        }
    }

    Ok(())
}
