// crates.io
use clap::{CommandFactory, Parser};
use color_eyre::Result;
use tokio_util::sync::CancellationToken;
// self
use callback_relay::{app, cli::Cli, config::RelayConfig, obs};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let cli = Cli::parse();
	let mode = match cli.run_mode() {
		Ok(mode) => mode,
		Err(e) => {
			Cli::command().print_help()?;

			return Err(e.into());
		},
	};
	let mut config = RelayConfig::from_env()?;

	cli.apply(&mut config);
	obs::init_subscriber(&config.log)?;

	let shutdown = CancellationToken::new();

	tokio::spawn(cancel_on_signal(shutdown.clone()));
	tracing::info!(?mode, "callback relay starting");
	app::run(mode, config, shutdown).await?;

	Ok(())
}

async fn cancel_on_signal(shutdown: CancellationToken) {
	#[cfg(unix)]
	{
		use tokio::signal::unix::{SignalKind, signal};

		match signal(SignalKind::terminate()) {
			Ok(mut terminate) => {
				tokio::select! {
					_ = tokio::signal::ctrl_c() => {},
					_ = terminate.recv() => {},
				}
			},
			Err(e) => {
				tracing::warn!(error = %e, "SIGTERM handler unavailable");

				let _ = tokio::signal::ctrl_c().await;
			},
		}
	}
	#[cfg(not(unix))]
	{
		let _ = tokio::signal::ctrl_c().await;
	}

	tracing::info!("shutdown requested");
	shutdown.cancel();
}
