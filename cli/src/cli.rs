//! Command line arguments for `omni`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "omni")]
#[command(version, about = "Ask questions about your documents", long_about = None)]
pub struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// User the indexes and uploads belong to
    #[arg(short, long, global = true, default_value = "local")]
    pub user: String,

    /// Abort the operation after this many seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Index text files
    Ingest {
        /// Files to index, one document each
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Name of the index to add them to
        #[arg(short, long)]
        index: Option<String>,

        /// Recompute embeddings even if cached
        #[arg(long)]
        overwrite: bool,
    },

    /// Store text files for a later `ingest-uploads`
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Index previously uploaded files by ticket
    IngestUploads {
        #[arg(required = true)]
        tickets: Vec<String>,

        #[arg(short, long)]
        index: Option<String>,

        #[arg(long)]
        overwrite: bool,
    },

    /// Ask a question
    Query {
        /// The question
        #[arg(required = true)]
        question: String,

        /// Index to search (default: every document)
        #[arg(short, long)]
        index: Option<String>,

        /// Model id such as `gpt-4|openai` or `llama3|ollama`
        #[arg(short, long)]
        model: Option<String>,

        /// Number of fragments to retrieve
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Replace the default answering instruction
        #[arg(long)]
        instruction: Option<String>,
    },

    /// List the models that can answer
    Models,

    /// List indexes and their document counts
    Indexes,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_query() {
        let cli = Cli::parse_from([
            "omni", "--user", "alice", "query", "Who finds the key?", "-i", "book1", "-k", "5",
        ]);
        assert_eq!(cli.user, "alice");
        match cli.command {
            Command::Query {
                question,
                index,
                top_k,
                model,
                ..
            } => {
                assert_eq!(question, "Who finds the key?");
                assert_eq!(index.as_deref(), Some("book1"));
                assert_eq!(top_k, Some(5));
                assert_eq!(model, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["omni", "ingest", "a.txt", "b.txt", "--config", "omni.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("omni.toml")));
        assert_eq!(cli.user, "local");
        match cli.command {
            Command::Ingest {
                files, overwrite, ..
            } => {
                assert_eq!(files.len(), 2);
                assert!(!overwrite);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_ingest_requires_files() {
        assert!(Cli::try_parse_from(["omni", "ingest"]).is_err());
    }
}
