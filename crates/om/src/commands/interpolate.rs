//! `interpolate`: render a YAML document with variables and ops applied.

use std::io::{IsTerminal, Read};

use anyhow::{bail, Context as _};

use super::{interpolation_options, Context, CONFIG_FILE, OPS_FILE, VAR, VARS_FILE};
use crate::interpolate as interpolation;
use crate::options::{Bound, CommandSpec, ConfigMode, OptionSpec};

pub const INTERPOLATE: CommandSpec = CommandSpec {
    name: "interpolate",
    summary: "Interpolates variables into a manifest",
    description: "Interpolates variables into a manifest",
    options: &[
        CONFIG_FILE,
        OptionSpec::string("path", "Extract specified value out of the interpolated file (e.g.: /private_key). The rest of the file will not be printed."),
        OptionSpec::repeated("vars-env", "Load variables from environment variables (e.g.: 'MY' to load MY_var=value)"),
        VARS_FILE,
        VAR,
        OPS_FILE,
        OptionSpec::flag("skip-missing", "Allow skipping missing params").short('s'),
    ],
    config: ConfigMode::Own,
};

/// The document to interpolate: piped stdin, else the `--config` file.
fn read_input(options: &Bound) -> anyhow::Result<String> {
    let stdin = std::io::stdin();
    if !stdin.is_terminal() && options.str("config").is_none() {
        let mut contents = String::new();
        stdin
            .lock()
            .read_to_string(&mut contents)
            .context("error reading STDIN")?;
        if !contents.is_empty() {
            return Ok(contents);
        }
    }
    let Some(path) = options.str("config") else {
        bail!("no file or STDIN input provided. Please provide a valid --config file or use a pipe to get STDIN");
    };
    std::fs::read_to_string(path).with_context(|| format!("could not read file ({path})"))
}

pub async fn interpolate(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let contents = read_input(options)?;
    let settings = interpolation::Options {
        path: options.str("path").map(ToString::to_string),
        ..interpolation_options(options, !options.flag("skip-missing"))
    };
    let document = interpolation::execute(&contents, &settings, &ctx.env)?;
    ctx.console.print(interpolation::render(&document)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::Harness;

    fn write(dir: &tempfile::TempDir, name: &str, contents: &str) -> String {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path.to_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_interpolate_vars_ops_and_path() {
        let harness = Harness::start().await;
        let dir = tempfile::tempdir().unwrap();
        let config = write(
            &dir,
            "config.yml",
            "name: ((name))\nnetwork:\n  subnets:\n  - ((subnet))\n",
        );
        let vars = write(&dir, "vars.yml", "name: from-file\nsubnet: 10.0.0.0/24\n");
        let ops = write(
            &dir,
            "ops.yml",
            "- type: replace\n  path: /network/subnets/-\n  value: 10.0.1.0/24\n",
        );

        harness
            .run(
                &INTERPOLATE,
                &["-c", &config, "-l", &vars, "-o", &ops, "-v", "name=from-cli"],
            )
            .await
            .unwrap();
        let rendered: serde_yaml::Value = serde_yaml::from_str(&harness.stdout()).unwrap();
        assert_eq!(rendered["name"], "from-cli");
        assert_eq!(rendered["network"]["subnets"][1], "10.0.1.0/24");

        harness
            .run(
                &INTERPOLATE,
                &["-c", &config, "-l", &vars, "--path", "/network/subnets/0"],
            )
            .await
            .unwrap();
        assert!(harness.stdout().ends_with("10.0.0.0/24\n"));
    }

    #[tokio::test]
    async fn test_interpolate_missing_vars() {
        let harness = Harness::start().await;
        let dir = tempfile::tempdir().unwrap();
        let config = write(&dir, "config.yml", "a: ((first))\nb: ((second))\n");

        let err = harness
            .run(&INTERPOLATE, &["-c", &config])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Expected to find variables: first\nsecond");

        harness
            .run(&INTERPOLATE, &["-c", &config, "--skip-missing"])
            .await
            .unwrap();
        assert!(harness.stdout().contains("((second))"));
    }

    #[tokio::test]
    async fn test_interpolate_vars_env_prefix() {
        let mut harness = Harness::start().await;
        harness
            .ctx
            .env
            .insert("MY_password".into(), "hunter2".into());
        let dir = tempfile::tempdir().unwrap();
        let config = write(&dir, "config.yml", "password: ((password))\n");

        harness
            .run(&INTERPOLATE, &["-c", &config, "--vars-env", "MY"])
            .await
            .unwrap();
        assert_eq!(harness.stdout(), "password: hunter2\n");
    }
}
