//! Command-line parser. Without a subcommand the gateway serves.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "mcp-gateway")]
#[command(about = "Serve tools from many MCP servers through one endpoint")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Pull container images for services by name
    Pull {
        /// Service names as used in user configuration (e.g. "time")
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Write the combined config schema and the instruction map
    Generate {
        /// Output path for the JSON schema
        schema_out: PathBuf,
        /// Output path for the instruction map
        mapping_out: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parser_builds() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_subcommand_serves() {
        let cli = Cli::parse_from(["mcp-gateway"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn pull_takes_service_names() {
        let cli = Cli::parse_from(["mcp-gateway", "pull", "time", "notion"]);
        let Some(Commands::Pull { names }) = cli.command else {
            panic!("expected pull");
        };
        assert_eq!(names, vec!["time", "notion"]);
        assert!(Cli::try_parse_from(["mcp-gateway", "pull"]).is_err());
    }

    #[test]
    fn generate_needs_both_outputs() {
        let cli = Cli::parse_from(["mcp-gateway", "generate", "spec.json", "mapping.json"]);
        let Some(Commands::Generate {
            schema_out,
            mapping_out,
        }) = cli.command
        else {
            panic!("expected generate");
        };
        assert_eq!(schema_out, PathBuf::from("spec.json"));
        assert_eq!(mapping_out, PathBuf::from("mapping.json"));
        assert!(Cli::try_parse_from(["mcp-gateway", "generate", "spec.json"]).is_err());
        assert!(Cli::try_parse_from(["mcp-gateway", "bogus"]).is_err());
    }
}
