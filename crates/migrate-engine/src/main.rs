use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use migrate_engine::prelude::*;
use std::collections::BTreeSet;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

fn cli() -> Command {
    let config_arg = Arg::new("config")
        .long("config")
        .value_name("FILE")
        .help("TOML engine configuration");

    Command::new("migrate-engine")
        .version(migrate_engine::VERSION)
        .about("Bounded concurrent workflow migration engine")
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Log at debug level unless RUST_LOG is set"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run simulated workflow migrations through the engine")
                .arg(config_arg.clone())
                .arg(
                    Arg::new("workflows")
                        .long("workflows")
                        .value_delimiter(',')
                        .default_value("1,2,3")
                        .value_parser(value_parser!(u64))
                        .help("Workflow ids to migrate"),
                )
                .arg(
                    Arg::new("concurrency")
                        .long("concurrency")
                        .value_parser(value_parser!(usize))
                        .help("Pool size (defaults to the configured value)"),
                )
                .arg(
                    Arg::new("interval-ms")
                        .long("interval-ms")
                        .value_parser(value_parser!(u64))
                        .help("Status poll interval (defaults to the configured value)"),
                )
                .arg(
                    Arg::new("steps")
                        .long("steps")
                        .default_value("5")
                        .value_parser(value_parser!(u8).range(1..=100))
                        .help("Steps per simulated workflow"),
                )
                .arg(
                    Arg::new("step-delay-ms")
                        .long("step-delay-ms")
                        .default_value("100")
                        .value_parser(value_parser!(u64))
                        .help("Delay per simulated step"),
                )
                .arg(id_list_arg("fail", "Workflows whose migration returns an error"))
                .arg(id_list_arg("panic", "Workflows whose migration panics"))
                .arg(id_list_arg("unknown", "Workflows the loader rejects"))
                .arg(id_list_arg("missing-plugin", "Workflows needing a plugin the target lacks"))
                .arg(
                    Arg::new("immediate")
                        .long("immediate")
                        .action(ArgAction::SetTrue)
                        .help("Close immediately once every unit has been polled once"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the final status as JSON"),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Print the effective engine configuration")
                .arg(config_arg),
        )
}

fn id_list_arg(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .value_delimiter(',')
        .value_parser(value_parser!(u64))
        .help(help)
}

fn ids(args: &ArgMatches, name: &str) -> BTreeSet<WorkflowId> {
    args.get_many::<u64>(name)
        .into_iter()
        .flatten()
        .map(|id| WorkflowId(*id))
        .collect()
}

fn ordered_ids(args: &ArgMatches, name: &str) -> Vec<WorkflowId> {
    args.get_many::<u64>(name)
        .into_iter()
        .flatten()
        .map(|id| WorkflowId(*id))
        .collect()
}

fn load_config(args: &ArgMatches) -> anyhow::Result<EngineConfig> {
    match args.get_one::<String>("config") {
        Some(path) => EngineConfig::from_file(path).with_context(|| format!("loading {path}")),
        None => Ok(EngineConfig::default()),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn simulate(args: &ArgMatches) -> anyhow::Result<bool> {
    let mut config = load_config(args)?;
    if let Some(interval) = args.get_one::<u64>("interval-ms") {
        config = config.with_poll_interval(Duration::from_millis(*interval));
    }
    let concurrency = args
        .get_one::<usize>("concurrency")
        .copied()
        .unwrap_or(config.concurrency);

    let plan = SimulationPlan {
        steps: args.get_one::<u8>("steps").copied().unwrap_or(5),
        step_delay: Duration::from_millis(
            args.get_one::<u64>("step-delay-ms")
                .copied()
                .unwrap_or(100),
        ),
        failing: ids(args, "fail"),
        panicking: ids(args, "panic"),
        unknown: ids(args, "unknown"),
        missing_plugin: ids(args, "missing-plugin"),
    };
    let workflows = ordered_ids(args, "workflows");
    let immediate = args.get_flag("immediate");
    let json = args.get_flag("json");

    let monitor = Monitor::new(config.poll_interval());
    let mut engine = Engine::with_config(Arc::new(SimulatedLoader::new(plan)), config)?;

    if let Err(err) = engine.start(&workflows, concurrency) {
        tracing::error!(%err, "engine rejected the batch");
        engine.shutdown();
        return Err(err.into());
    }

    let outcome = monitor.poll(&mut engine, |snapshot| {
        if !json {
            for status in snapshot {
                println!("{status}");
            }
            println!("-- {}/{} complete", snapshot.completed_count(), snapshot.len());
        }
        if immediate {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    });

    engine.close(ShutdownMode::from(immediate));

    let snapshot = outcome.into_snapshot();
    if json {
        println!("{}", snapshot.to_json()?);
    }
    Ok(snapshot.failed().count() == 0)
}

fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("verbose"));

    match matches.subcommand() {
        Some(("simulate", args)) => {
            let clean = simulate(args)?;
            std::process::exit(if clean { 0 } else { 1 });
        }
        Some(("config", args)) => {
            let config = load_config(args)?;
            print!("{}", config.to_toml_string()?);
        }
        _ => {
            cli().print_help()?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn simulate_parses_id_lists() {
        let matches = cli()
            .try_get_matches_from([
                "migrate-engine",
                "simulate",
                "--workflows",
                "6,4,5",
                "--fail",
                "5",
                "--concurrency",
                "2",
            ])
            .unwrap();
        let (_, args) = matches.subcommand().unwrap();

        assert_eq!(
            ordered_ids(args, "workflows"),
            vec![WorkflowId(6), WorkflowId(4), WorkflowId(5)]
        );
        assert_eq!(ids(args, "fail"), BTreeSet::from([WorkflowId(5)]));
        assert!(ids(args, "panic").is_empty());
        assert_eq!(args.get_one::<usize>("concurrency"), Some(&2));
    }
}
