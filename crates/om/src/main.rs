use std::collections::BTreeMap;
use std::process::ExitCode;

use om::dispatcher;
use om::ui::Console;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("OM_LOG").unwrap_or_else(|_| EnvFilter::new("warn,om=info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let env: BTreeMap<String, String> = std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .collect();
    let console = Console::stdio();

    // Dropping the dispatch future on ctrl-c cancels in-flight requests and pollers.
    let result = tokio::select! {
        result = dispatcher::dispatch(&args, &env, console.clone()) => result,
        _ = tokio::signal::ctrl_c() => Err(anyhow::anyhow!("interrupted")),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            console.error(format!("{err:#}"));
            ExitCode::FAILURE
        }
    }
}
