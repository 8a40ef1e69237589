pub mod cli;
pub mod lambda;
pub mod toml_config;

#[cfg(feature = "cli")]
pub use self::args::{CliConfig, Command};

#[cfg(feature = "cli")]
mod args {
    use super::toml_config::TomlConfig;
    use crate::app::dispatcher::PatternKind;
    use crate::utils::error::Result;
    use crate::utils::validation::Validate;
    use clap::{Parser, Subcommand};
    use std::path::PathBuf;

    #[derive(Debug, Clone, Parser)]
    #[command(name = "serverless-patterns")]
    #[command(about = "Run serverless integration pattern handlers locally")]
    pub struct CliConfig {
        #[arg(long, global = true, help = "TOML configuration file")]
        pub config: Option<PathBuf>,

        #[arg(
            long,
            global = true,
            default_value = "./.local-storage",
            help = "Directory used as object storage"
        )]
        pub storage_dir: PathBuf,

        #[arg(short, long, global = true, help = "Enable verbose output")]
        pub verbose: bool,

        #[command(subcommand)]
        pub command: Command,
    }

    #[derive(Debug, Clone, Subcommand)]
    pub enum Command {
        /// Invoke one handler with an event read from a JSON file
        Invoke {
            #[arg(value_enum)]
            pattern: PatternKind,

            #[arg(long, help = "Event JSON file (an empty object when omitted)")]
            event: Option<PathBuf>,
        },
        /// List the available handlers
        Patterns,
    }

    impl CliConfig {
        /// Loads and validates the TOML settings, falling back to defaults.
        pub fn settings(&self) -> Result<TomlConfig> {
            let settings = match &self.config {
                Some(path) => TomlConfig::from_file(path)?,
                None => TomlConfig::default(),
            };
            settings.validate()?;
            Ok(settings)
        }
    }

}
