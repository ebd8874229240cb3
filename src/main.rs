use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use vanopticon_huginn::{config, observability, replay, run, start_store};

#[derive(Parser)]
#[command(name = "huginn", about = "Huginn - workload metadata store")]
struct Cli {
	#[command(subcommand)]
	command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
	/// Replay recorded collector events and print the resulting store content
	Dump {
		/// NDJSON file with one collector event per line
		#[arg(long)]
		events: PathBuf,
		/// Include per-source entries and high-cardinality fields
		#[arg(long)]
		verbose: bool,
		/// Print the dump as JSON instead of text
		#[arg(long)]
		json: bool,
	},
	/// Replay recorded collector events and print store metrics
	Metrics {
		/// NDJSON file with one collector event per line
		#[arg(long)]
		events: PathBuf,
	},
	/// Run the store until interrupted (default)
	Run,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();

	let settings = match config::load() {
		Ok(s) => s,
		Err(e) => {
			eprintln!("Warning: failed to load config, using defaults: {}", e);
			config::Settings::default()
		}
	};

	let obs = observability::init_observability(settings.log_level.to_level_filter())?;

	match cli.command.unwrap_or(Commands::Run) {
		Commands::Dump {
			events,
			verbose,
			json,
		} => {
			let store = start_store(&settings, obs.metrics)?;
			let batch = replay::read_file(&events)?;
			store
				.notify(batch)
				.await
				.with_context(|| format!("failed to replay {}", events.display()))?;

			let dump = store.dump(verbose).await;
			if json {
				println!("{}", serde_json::to_string_pretty(&dump)?);
			} else {
				dump.write(&mut std::io::stdout().lock())?;
			}
			store.shutdown().await;
		}
		Commands::Metrics { events } => {
			let store = start_store(&settings, obs.metrics)?;
			let batch = replay::read_file(&events)?;
			store
				.notify(batch)
				.await
				.with_context(|| format!("failed to replay {}", events.display()))?;

			print!("{}", store.metrics().encode());
			store.shutdown().await;
		}
		Commands::Run => run(settings, obs.metrics).await?,
	}

	Ok(())
}
