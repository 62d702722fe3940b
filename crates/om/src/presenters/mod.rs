//! Renderers for command results: aligned tables or pretty JSON.

mod json;
mod table;

use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

use crate::error::{Classify, ErrorKind};
use crate::options::{Bound, OptionSpec};
use crate::ui::Console;

pub use json::render_json;
pub use table::render_table;

/// The `--format` option shared by listing commands.
pub const FORMAT_OPTION: OptionSpec =
    OptionSpec::string("format", "Format to print as (options: table,json)")
        .short('f')
        .default("table");

#[derive(Error, Debug)]
pub enum PresentError {
    #[error("format not supported: {0}")]
    UnknownFormat(String),

    #[error("could not render json: {0}")]
    Json(#[from] serde_json::Error),
}

impl Classify for PresentError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// Output format selected with `--format`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Format {
    #[default]
    Table,
    Json,
}

impl FromStr for Format {
    type Err = PresentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            other => Err(PresentError::UnknownFormat(other.to_string())),
        }
    }
}

/// A record that knows how to lay itself out as a table row.
pub trait Tabular: Serialize {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

/// Writes results to the console output sink in the selected format.
pub struct Presenter<'a> {
    console: &'a Console,
    format: Format,
}

impl<'a> Presenter<'a> {
    #[must_use]
    pub fn new(console: &'a Console, format: Format) -> Self {
        Self { console, format }
    }

    /// Presenter for the `--format` value in `options`.
    pub fn from_options(console: &'a Console, options: &Bound) -> Result<Self, PresentError> {
        let format = options.str("format").unwrap_or("table").parse()?;
        Ok(Self::new(console, format))
    }

    #[must_use]
    pub fn format(&self) -> Format {
        self.format
    }

    /// Render a list of records.
    pub fn list<T: Tabular>(&self, items: &[T]) -> Result<(), PresentError> {
        match self.format {
            Format::Table => {
                let rows = items.iter().map(Tabular::row).collect();
                self.console.print(render_table(&T::headers(), rows));
            }
            Format::Json => self.console.println(render_json(&items)?),
        }
        Ok(())
    }

    /// Render free-form rows; JSON output uses `value` instead.
    pub fn rows<T: Serialize + ?Sized>(
        &self,
        headers: &[&str],
        rows: Vec<Vec<String>>,
        value: &T,
    ) -> Result<(), PresentError> {
        match self.format {
            Format::Table => self.console.print(render_table(headers, rows)),
            Format::Json => self.console.println(render_json(value)?),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Product {
        name: String,
        version: String,
    }

    impl Tabular for Product {
        fn headers() -> Vec<&'static str> {
            vec!["Name", "Version"]
        }

        fn row(&self) -> Vec<String> {
            vec![self.name.clone(), self.version.clone()]
        }
    }

    fn products() -> Vec<Product> {
        vec![Product {
            name: "cf".into(),
            version: "2.10.1".into(),
        }]
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("json".parse::<Format>().unwrap(), Format::Json);
        assert_eq!("table".parse::<Format>().unwrap(), Format::Table);
        assert_eq!(
            "xml".parse::<Format>().unwrap_err().to_string(),
            "format not supported: xml"
        );
    }

    #[test]
    fn test_table_list() {
        let (console, captured) = Console::buffered();
        Presenter::new(&console, Format::Table).list(&products()).unwrap();
        let out = captured.stdout();
        assert!(out.contains("Name"));
        assert!(out.contains("| cf "));
        assert!(out.contains("2.10.1"));
    }

    #[test]
    fn test_json_list() {
        let (console, captured) = Console::buffered();
        Presenter::new(&console, Format::Json).list(&products()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&captured.stdout()).unwrap();
        assert_eq!(parsed, serde_json::json!([{"name": "cf", "version": "2.10.1"}]));
    }
}
