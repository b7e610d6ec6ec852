use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use leafprint::cli::{Cli, Command};
use leafprint::config::LeafConfig;
use leafprint::store::{CarbonStore, StateFile};
use leafprint::sysfs::SysfsRoot;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let config = leafprint::config::load(cli.config.as_ref());

    match cli.command {
        Command::Run => cmd_run(&config, cli.json)?,
        Command::Status => cmd_status(&config, cli.json)?,
        Command::Reset => cmd_reset(&config)?,
        Command::Regions => cmd_regions(cli.json),
        Command::Completions { shell } => leafprint::cli::print_completions(shell),
    }

    Ok(())
}

fn cmd_run(config: &LeafConfig, json: bool) -> Result<()> {
    let sysfs = SysfsRoot::system();
    if !json {
        println!("{}", "Carbon accounting".bold().underline());
        println!("Press Ctrl+C to stop");
        println!();
    }
    leafprint::daemon::run(config, &sysfs, move |event| {
        leafprint::output::print_event(event, json)
    })?;
    Ok(())
}

fn cmd_status(config: &LeafConfig, json: bool) -> Result<()> {
    let sysfs = SysfsRoot::system();
    let report = leafprint::status::collect(config, &sysfs)?;

    if json {
        leafprint::output::print_status_json(&report);
    } else {
        leafprint::output::print_status(&report);
    }

    Ok(())
}

fn cmd_reset(config: &LeafConfig) -> Result<()> {
    let path = leafprint::daemon::state_path(config)?;
    let mut store = StateFile::open(&path);
    let previous = store.load_lifetime_carbon();

    store.reset()?;

    println!(
        "{} (was {})",
        "Lifetime carbon reset.".green().bold(),
        leafprint::output::format_grams(previous)
    );
    println!("  State file: {}", store.path().display());
    println!(
        "  A running {} keeps its own totals; send it {} to reset those.",
        "leafprint run".cyan(),
        "SIGUSR1".cyan()
    );
    Ok(())
}

fn cmd_regions(json: bool) {
    let countries = leafprint::intensity::registry::COUNTRIES;
    if json {
        leafprint::output::print_regions_json(countries);
    } else {
        leafprint::output::print_regions(countries);
    }
}
