//! Command-line surface of the relay binary.

// crates.io
use clap::Parser;
// self
use crate::{_prelude::*, app::RunMode, config::RelayConfig, error::ConfigError};

/// Relay queued callback requests to partner webhooks.
#[derive(Clone, Debug, Parser)]
#[command(name = "callback-relay", version, about, long_about = None)]
pub struct Cli {
	/// Start the queue consumer.
	#[arg(long)]
	pub consumer: bool,
	/// Start the Prometheus metrics server.
	#[arg(long)]
	pub metrics: bool,
	/// Port for the metrics server; overrides `METRICS_PORT`.
	#[arg(long, value_name = "PORT")]
	pub metrics_port: Option<u16>,
}
impl Cli {
	/// Resolves the selected services; at least one flag is required.
	pub fn run_mode(&self) -> Result<RunMode, ConfigError> {
		match (self.consumer, self.metrics) {
			(true, true) => Ok(RunMode::All),
			(true, false) => Ok(RunMode::Consumer),
			(false, true) => Ok(RunMode::Metrics),
			(false, false) => Err(ConfigError::NoRunMode),
		}
	}

	/// Applies command-line overrides on top of environment configuration.
	pub fn apply(&self, config: &mut RelayConfig) {
		if let Some(port) = self.metrics_port {
			config.metrics.port = port;
		}
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use clap::CommandFactory;
	// self
	use super::*;

	fn parse(args: &[&str]) -> Cli {
		Cli::try_parse_from(std::iter::once("callback-relay").chain(args.iter().copied()))
			.expect("Arguments should parse.")
	}

	#[test]
	fn command_definition_is_valid() {
		Cli::command().debug_assert();
	}

	#[test]
	fn flags_resolve_run_mode() {
		assert_eq!(parse(&["--consumer"]).run_mode().ok(), Some(RunMode::Consumer));
		assert_eq!(parse(&["--metrics"]).run_mode().ok(), Some(RunMode::Metrics));
		assert_eq!(parse(&["--metrics", "--consumer"]).run_mode().ok(), Some(RunMode::All));
		assert!(matches!(parse(&[]).run_mode(), Err(ConfigError::NoRunMode)));
	}

	#[test]
	fn metrics_port_overrides_environment() {
		let mut config = RelayConfig::default();

		parse(&["--metrics", "--metrics-port", "9464"]).apply(&mut config);

		assert_eq!(config.metrics.port, 9464);
	}

	#[test]
	fn unknown_flags_are_usage_errors() {
		assert!(Cli::try_parse_from(["callback-relay", "--producer"]).is_err());
	}
}
