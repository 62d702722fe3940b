//! Usage text in a fixed column layout.

use std::fmt::Write as _;

use super::global::GLOBAL_OPTIONS;
use super::spec::{CommandSpec, OptionSpec};

const BANNER: &str = "ॐ";

fn flag_column(spec: &OptionSpec) -> String {
    match spec.short {
        Some(short) => format!("--{}, -{short}", spec.long),
        None => format!("--{}", spec.long),
    }
}

fn description(spec: &OptionSpec) -> String {
    let mut text = spec.help.to_string();
    if spec.required {
        text.push_str(" (required)");
    }
    if let Some(env) = spec.env {
        let _ = write!(text, " (env: {env})");
    }
    if let Some(default) = spec.default {
        let _ = write!(text, " (default: {default})");
    }
    text
}

/// Two or three aligned columns, indented by two spaces.
fn table(rows: &[Vec<String>]) -> String {
    let columns = rows.iter().map(Vec::len).max().unwrap_or_default();
    let widths: Vec<usize> = (0..columns)
        .map(|c| {
            rows.iter()
                .filter_map(|r| r.get(c))
                .map(|cell| cell.chars().count())
                .max()
                .unwrap_or_default()
        })
        .collect();

    let mut out = String::new();
    for row in rows {
        let mut line = String::from(" ");
        for (c, cell) in row.iter().enumerate() {
            line.push(' ');
            if c + 1 == row.len() {
                line.push_str(cell);
            } else {
                let _ = write!(line, "{cell:<width$} ", width = widths[c]);
            }
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

fn option_rows<'a>(options: impl Iterator<Item = &'a OptionSpec>, with_type: bool) -> Vec<Vec<String>> {
    options
        .filter(|o| !o.hidden)
        .map(|o| {
            if with_type {
                vec![flag_column(o), o.kind.label().to_string(), description(o)]
            } else {
                vec![flag_column(o), description(o)]
            }
        })
        .collect()
}

fn global_rows() -> Vec<Vec<String>> {
    let mut rows = option_rows(GLOBAL_OPTIONS.iter(), false);
    rows.push(vec![
        "--help, -h".to_string(),
        "prints this usage information".to_string(),
    ]);
    rows.sort();
    rows
}

/// `om help`.
#[must_use]
pub fn global_usage(commands: &[CommandSpec]) -> String {
    let mut out = format!(
        "{BANNER}\nom helps you interact with an Ops Manager\n\nUsage: om [options] <command> [<args>]\n"
    );
    out.push_str(&table(&global_rows()));
    out.push_str("\nCommands:\n");

    let mut rows: Vec<Vec<String>> = commands
        .iter()
        .map(|c| vec![c.name.to_string(), c.summary.to_string()])
        .collect();
    rows.sort();
    out.push_str(&table(&rows));
    out
}

/// `om help <command>`.
#[must_use]
pub fn command_usage(spec: &CommandSpec) -> String {
    let rows = option_rows(spec.all_options(), true);
    let args = if rows.is_empty() { "" } else { " [<args>]" };

    let mut out = format!(
        "{BANNER}  {}\n{}\n\nUsage: om [options] {}{args}\n",
        spec.name, spec.description, spec.name
    );
    out.push_str(&table(&global_rows()));
    if !rows.is_empty() {
        out.push_str("\nCommand Arguments:\n");
        out.push_str(&table(&rows));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::spec::ConfigMode;

    const BAKE: &[OptionSpec] = &[
        OptionSpec::repeated("butter", "sticks of butter").short('b'),
        OptionSpec::int("flour", "cups of flour").short('f'),
        OptionSpec::int("lemon", "teaspoons of lemon juice").short('l'),
        OptionSpec::string("secret", "not shown").hidden(),
    ];

    #[test]
    fn test_command_usage_layout() {
        let spec = CommandSpec {
            name: "bake",
            summary: "bakes you a cake",
            description: "This command will help you bake a cake.",
            options: BAKE,
            config: ConfigMode::None,
        };
        let usage = command_usage(&spec);

        assert!(usage.starts_with("ॐ  bake\nThis command will help you bake a cake.\n\nUsage: om [options] bake [<args>]\n"));
        assert!(usage.contains(
            "\nCommand Arguments:\n  --butter, -b  string (variadic)  sticks of butter\n  --flour, -f   int                cups of flour\n  --lemon, -l   int                teaspoons of lemon juice\n"
        ));
        assert!(!usage.contains("not shown"));
        assert!(usage.contains("(env: OM_TARGET)"));
    }

    #[test]
    fn test_flagless_command_usage() {
        let spec = CommandSpec {
            name: "version",
            summary: "prints the om release version",
            description: "This command prints the om release version number.",
            options: &[],
            config: ConfigMode::None,
        };
        let usage = command_usage(&spec);
        assert!(usage.contains("Usage: om [options] version\n"));
        assert!(!usage.contains("Command Arguments"));
    }

    #[test]
    fn test_global_usage_lists_commands() {
        let commands = [
            CommandSpec {
                name: "clean",
                summary: "cleans up after baking",
                description: "",
                options: &[],
                config: ConfigMode::None,
            },
            CommandSpec {
                name: "bake",
                summary: "bakes you a cake",
                description: "",
                options: &[],
                config: ConfigMode::None,
            },
        ];
        let usage = global_usage(&commands);
        assert!(usage.starts_with("ॐ\nom helps you interact with an Ops Manager\n\nUsage: om [options] <command> [<args>]\n"));
        assert!(usage.ends_with("Commands:\n  bake   bakes you a cake\n  clean  cleans up after baking\n"));
    }
}
