use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "cas",
    about = "Content-addressed object store client",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// TOML configuration file (defaults to CAS_* environment variables)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Store address, e.g. s3://bucket/prefix; overrides the configuration
    #[arg(long, global = true)]
    pub address: Option<String>,

    /// Directory holding the local blob backend
    #[arg(long, global = true, default_value = ".cas")]
    pub root: PathBuf,

    /// Write without checking whether the object already exists
    #[arg(long, global = true)]
    pub no_head_check: bool,

    /// Parallel workers for batch retrieval
    #[arg(long, global = true)]
    pub concurrency: Option<usize>,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print object IDs without storing anything
    Hash(HashArgs),
    /// Store files and print their object IDs
    Put(PutArgs),
    /// Fetch objects into a directory, verifying each one
    Get(GetArgs),
    /// Write one object to stdout
    Cat(CatArgs),
    /// Show the resolved configuration
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct HashArgs {
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

#[derive(Args)]
pub struct PutArgs {
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
    /// Descend into directories
    #[arg(short, long)]
    pub recursive: bool,
}

#[derive(Args)]
pub struct GetArgs {
    #[arg(required = true)]
    pub ids: Vec<String>,
    /// Output directory; each object is written to <out>/<id>
    #[arg(short, long, default_value = ".")]
    pub out: PathBuf,
}

#[derive(Args)]
pub struct CatArgs {
    pub id: String,
}

#[derive(Args)]
pub struct ConfigArgs {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hash() {
        let cli = Cli::try_parse_from(["cas", "hash", "a.bin", "b.bin"]).unwrap();
        if let Command::Hash(args) = cli.command {
            assert_eq!(args.paths, vec![PathBuf::from("a.bin"), PathBuf::from("b.bin")]);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn hash_requires_paths() {
        assert!(Cli::try_parse_from(["cas", "hash"]).is_err());
    }

    #[test]
    fn parse_put_recursive() {
        let cli = Cli::try_parse_from(["cas", "put", "-r", "dir"]).unwrap();
        if let Command::Put(args) = cli.command {
            assert!(args.recursive);
            assert_eq!(args.paths, vec![PathBuf::from("dir")]);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_get_with_out() {
        let cli = Cli::try_parse_from(["cas", "get", "--out", "/tmp/x", "aa", "bb"]).unwrap();
        if let Command::Get(args) = cli.command {
            assert_eq!(args.ids, vec!["aa", "bb"]);
            assert_eq!(args.out, PathBuf::from("/tmp/x"));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_global_store_flags() {
        let cli = Cli::try_parse_from([
            "cas", "put", "f", "--address", "s3://b/p", "--root", "/data",
            "--no-head-check", "--concurrency", "8",
        ])
        .unwrap();
        assert_eq!(cli.address.as_deref(), Some("s3://b/p"));
        assert_eq!(cli.root, PathBuf::from("/data"));
        assert!(cli.no_head_check);
        assert_eq!(cli.concurrency, Some(8));
    }

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["cas", "config"]).unwrap();
        assert!(matches!(cli.command, Command::Config(_)));
        assert_eq!(cli.root, PathBuf::from(".cas"));
        assert!(cli.config.is_none());
        assert!(!cli.verbose);
    }

    #[test]
    fn parse_json_format() {
        let cli = Cli::try_parse_from(["cas", "--format", "json", "cat", "aa"]).unwrap();
        assert!(matches!(cli.format, OutputFormat::Json));
    }
}
