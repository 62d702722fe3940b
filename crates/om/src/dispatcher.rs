//! Entry point shared by `main` and the tests: global flags, the command
//! table, `help` and `version`.

use std::collections::BTreeMap;

use anyhow::{anyhow, bail};
use tracing::debug;

use crate::commands::{self, Context};
use crate::options::{self, bind, command_usage, global_usage};
use crate::ui::Console;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_help(console: &Console, command: Option<&str>) -> anyhow::Result<()> {
    match command {
        None => console.print(global_usage(commands::ALL)),
        Some(name) => {
            let spec = commands::find(name).ok_or_else(|| anyhow!("Unknown command: {name}"))?;
            console.print(command_usage(spec));
        }
    }
    Ok(())
}

/// Run `om` with `args` (program name excluded).
pub async fn dispatch(
    args: &[String],
    env: &BTreeMap<String, String>,
    console: Console,
) -> anyhow::Result<()> {
    let invocation = options::parse(args, env)?;
    let global = invocation.global;

    if global.version {
        console.println(VERSION);
        return Ok(());
    }

    let Some((name, rest)) = invocation.command else {
        return print_help(&console, None);
    };
    match name.as_str() {
        "help" => return print_help(&console, rest.first().map(String::as_str)),
        "version" => {
            console.println(VERSION);
            return Ok(());
        }
        _ => {}
    }

    let Some(spec) = commands::find(&name) else {
        bail!("Unknown command: {name}");
    };
    if global.help {
        return print_help(&console, Some(spec.name));
    }
    let bound = bind(spec, &rest, env)?;
    if bound.help() {
        return print_help(&console, Some(spec.name));
    }

    debug!(command = spec.name, "dispatching");
    let ctx = Context::new(console, global, env.clone());
    commands::run(spec.name, &ctx, &bound).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(ToString::to_string).collect()
    }

    async fn dispatch_buffered(raw: &[&str]) -> (anyhow::Result<()>, crate::ui::Captured) {
        let (console, captured) = Console::buffered();
        let result = dispatch(&args(raw), &BTreeMap::new(), console).await;
        (result, captured)
    }

    #[tokio::test]
    async fn test_version_needs_no_target() {
        for raw in [&["--version"][..], &["-v"], &["version"]] {
            let (result, captured) = dispatch_buffered(raw).await;
            result.unwrap();
            assert_eq!(captured.stdout(), format!("{VERSION}\n"));
        }
    }

    #[tokio::test]
    async fn test_help_lists_commands_and_options() {
        let (result, captured) = dispatch_buffered(&["help"]).await;
        result.unwrap();
        let out = captured.stdout();
        assert!(out.contains("Usage: om [options] <command> [<args>]"));
        assert!(out.contains("download-product"));
        assert!(out.contains("--target"));

        for raw in [&["help", "curl"][..], &["curl", "--help"], &["-h", "curl"]] {
            let (result, captured) = dispatch_buffered(raw).await;
            result.unwrap();
            assert!(captured.stdout().contains("Usage: om [options] curl [<args>]"));
        }
    }

    #[tokio::test]
    async fn test_unknown_command_and_flags() {
        let (result, _) = dispatch_buffered(&["make-coffee"]).await;
        assert_eq!(result.unwrap_err().to_string(), "Unknown command: make-coffee");

        let (result, _) = dispatch_buffered(&["help", "make-coffee"]).await;
        assert_eq!(result.unwrap_err().to_string(), "Unknown command: make-coffee");

        let (result, _) = dispatch_buffered(&["curl", "--path", "/", "--bogus"]).await;
        assert_eq!(
            result.unwrap_err().to_string(),
            "unknown flag(s) [\"--bogus\"] for command 'curl'\nSee 'om curl --help' for available options."
        );
    }

    #[tokio::test]
    async fn test_missing_target_is_reported() {
        let (result, _) = dispatch_buffered(&["curl", "--path", "/api/v0/info"]).await;
        let message = format!("{:#}", result.unwrap_err());
        assert!(message.contains("target flag is required"), "{message}");
    }
}
