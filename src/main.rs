//! mapsync CLI entry point.

use clap::Parser;
use mapsync::cli::commands::{self, Context};
use mapsync::cli::{Cli, Commands, OutputFormat};
use mapsync::config::default_actor;
use mapsync::error::Error;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    // Set up tracing based on verbosity
    init_tracing(cli.verbose, cli.quiet);

    // Resolve effective JSON mode: --json OR --format json OR non-TTY stdout
    let json = cli.json
        || cli.format == OutputFormat::Json
        || !std::io::IsTerminal::is_terminal(&std::io::stdout());

    let ctx = Context {
        db: cli.db.clone(),
        host: cli.host.clone(),
        api_key: cli.api_key.clone(),
        actor: cli.actor.clone().unwrap_or_else(default_actor),
        json,
        csv: cli.format == OutputFormat::Csv,
        quiet: cli.quiet,
    };

    // Run the command and handle errors
    match run(&cli, &ctx) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if json {
                eprintln!("{}", e.to_structured_json());
            } else if !cli.quiet {
                if let Some(hint) = e.hint() {
                    eprintln!("Error: {e}\n  Hint: {hint}");
                } else {
                    eprintln!("Error: {e}");
                }
            }
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    if quiet {
        return;
    }

    // Honor RUST_LOG if set, otherwise use verbosity flag
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug,rusqlite=info"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn run(cli: &Cli, ctx: &Context) -> Result<(), Error> {
    match &cli.command {
        Commands::Login { key, no_verify } => {
            commands::auth::login(ctx, key.as_deref(), *no_verify)
        }
        Commands::Logout => commands::auth::logout(ctx),
        Commands::Check => commands::auth::check(ctx),

        Commands::Analyze {
            project,
            all,
            force,
        } => commands::analyze::execute(ctx, project, *all, *force),
        Commands::Publish(args) => commands::publish::execute(ctx, args),
        Commands::Status { project, limit } => commands::status::execute(ctx, project, *limit),
        Commands::Touch { project, layers } => commands::touch::execute(ctx, project, layers),
        Commands::Watch {
            project,
            interval,
            polls,
        } => commands::watch::execute(ctx, project, *interval, *polls),

        Commands::Completions { shell } => commands::completions::execute(shell),
        Commands::Version => commands::version::execute(ctx),
    }
}
