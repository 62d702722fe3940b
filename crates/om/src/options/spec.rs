//! Static option descriptor tables.

/// Value type of an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    String,
    Int,
    Bool,
    Duration,
    /// String that may be given many times; values accumulate.
    Repeated,
}

impl OptionKind {
    /// Type label shown in help output.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Bool => "bool",
            Self::Duration => "duration",
            Self::Repeated => "string (variadic)",
        }
    }

    /// Whether the flag consumes a value on the command line.
    #[must_use]
    pub fn takes_value(self) -> bool {
        !matches!(self, Self::Bool)
    }
}

/// One declared option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionSpec {
    pub long: &'static str,
    pub short: Option<char>,
    pub env: Option<&'static str>,
    pub kind: OptionKind,
    pub required: bool,
    pub default: Option<&'static str>,
    pub help: &'static str,
    pub hidden: bool,
}

impl OptionSpec {
    const fn new(long: &'static str, kind: OptionKind, help: &'static str) -> Self {
        Self {
            long,
            short: None,
            env: None,
            kind,
            required: false,
            default: None,
            help,
            hidden: false,
        }
    }

    /// String option.
    #[must_use]
    pub const fn string(long: &'static str, help: &'static str) -> Self {
        Self::new(long, OptionKind::String, help)
    }

    /// Integer option.
    #[must_use]
    pub const fn int(long: &'static str, help: &'static str) -> Self {
        Self::new(long, OptionKind::Int, help)
    }

    /// Boolean switch.
    #[must_use]
    pub const fn flag(long: &'static str, help: &'static str) -> Self {
        Self::new(long, OptionKind::Bool, help)
    }

    /// Duration option (`30s`, `1m30s`).
    #[must_use]
    pub const fn duration(long: &'static str, help: &'static str) -> Self {
        Self::new(long, OptionKind::Duration, help)
    }

    /// Repeatable string option.
    #[must_use]
    pub const fn repeated(long: &'static str, help: &'static str) -> Self {
        Self::new(long, OptionKind::Repeated, help)
    }

    #[must_use]
    pub const fn short(mut self, short: char) -> Self {
        self.short = Some(short);
        self
    }

    #[must_use]
    pub const fn env(mut self, env: &'static str) -> Self {
        self.env = Some(env);
        self
    }

    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub const fn default(mut self, default: &'static str) -> Self {
        self.default = Some(default);
        self
    }

    #[must_use]
    pub const fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }
}

/// How a command treats `--config`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigMode {
    /// No config file support.
    None,
    /// `--config` holds values for the command's own flags.
    Flags,
    /// The command reads `--config` itself (product or director config).
    Own,
}

/// Options every [`ConfigMode::Flags`] command accepts implicitly.
pub const CONFIG_FLAG_OPTIONS: &[OptionSpec] = &[
    OptionSpec::string("config", "path to yml file for configuration (keys must match the following command line flags)").short('c'),
    OptionSpec::repeated("vars-env", "load variables from environment variables matching the provided prefix (e.g.: 'MY' to load MY_var=value)").env("OM_VARS_ENV"),
    OptionSpec::repeated("vars-file", "load variables from a YAML file").short('l'),
    OptionSpec::repeated("var", "load variable from the command line. Format: VAR=VAL").short('v'),
];

/// [`CONFIG_FLAG_OPTIONS`] without short names, index for index, for
/// commands that already own one of the letters.
const CONFIG_FLAG_OPTIONS_LONG_ONLY: &[OptionSpec] = &[
    OptionSpec::string("config", "path to yml file for configuration (keys must match the following command line flags)"),
    OptionSpec::repeated("vars-env", "load variables from environment variables matching the provided prefix (e.g.: 'MY' to load MY_var=value)").env("OM_VARS_ENV"),
    OptionSpec::repeated("vars-file", "load variables from a YAML file"),
    OptionSpec::repeated("var", "load variable from the command line. Format: VAR=VAL"),
];

/// A command's name, descriptions and option table.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub name: &'static str,
    pub summary: &'static str,
    pub description: &'static str,
    pub options: &'static [OptionSpec],
    pub config: ConfigMode,
}

impl CommandSpec {
    /// Declared options plus the implicit config-file options. An implicit
    /// option loses its short name when a declared option already uses it.
    pub fn all_options(&self) -> impl Iterator<Item = &'static OptionSpec> {
        let declared: &'static [OptionSpec] = self.options;
        let implicit: &'static [OptionSpec] = match self.config {
            ConfigMode::Flags => CONFIG_FLAG_OPTIONS,
            ConfigMode::None | ConfigMode::Own => &[],
        };
        let implicit = implicit
            .iter()
            .zip(CONFIG_FLAG_OPTIONS_LONG_ONLY)
            .filter(move |(option, _)| !declared.iter().any(|d| d.long == option.long))
            .map(move |(option, long_only)| {
                let taken = option
                    .short
                    .is_some_and(|short| declared.iter().any(|d| d.short == Some(short)));
                if taken {
                    long_only
                } else {
                    option
                }
            });
        declared.iter().chain(implicit)
    }

    /// Look an option up by long name.
    #[must_use]
    pub fn option(&self, long: &str) -> Option<&'static OptionSpec> {
        self.all_options().find(|o| o.long == long)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPTIONS: &[OptionSpec] = &[
        OptionSpec::string("product", "product file").short('p').required(),
        OptionSpec::flag("force", "force"),
    ];

    #[test]
    fn test_flags_mode_adds_config_options() {
        let spec = CommandSpec {
            name: "upload-product",
            summary: "",
            description: "",
            options: OPTIONS,
            config: ConfigMode::Flags,
        };
        let names: Vec<_> = spec.all_options().map(|o| o.long).collect();
        assert_eq!(names, ["product", "force", "config", "vars-env", "vars-file", "var"]);
        assert_eq!(spec.option("vars-env").and_then(|o| o.env), Some("OM_VARS_ENV"));

        let own = CommandSpec {
            config: ConfigMode::Own,
            ..spec
        };
        assert!(own.option("config").is_none());
    }

    #[test]
    fn test_declared_short_wins_over_implicit_one() {
        const STAGE: &[OptionSpec] = &[
            OptionSpec::string("product-name", "name").short('p'),
            OptionSpec::string("product-version", "version").short('v'),
        ];
        let spec = CommandSpec {
            name: "stage-product",
            summary: "",
            description: "",
            options: STAGE,
            config: ConfigMode::Flags,
        };
        assert_eq!(spec.option("product-version").and_then(|o| o.short), Some('v'));
        assert_eq!(spec.option("var").and_then(|o| o.short), None);
        assert_eq!(spec.option("vars-file").and_then(|o| o.short), Some('l'));
        assert_eq!(spec.all_options().filter(|o| o.short == Some('v')).count(), 1);
    }
}
