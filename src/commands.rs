//! This module defines the command-line interface for the application using `clap`.
//!
//! It provides a [`Cli`] struct that represents the parsed command-line arguments,
//! and a [`Commands`] enum that represents the available subcommands and their
//! options.
//!
//! # Examples
//!
//! ```no_run
//! use clap::Parser;
//! use dbai::commands::{Cli, Commands};
//!
//! let cli = Cli::parse();
//! if let Commands::Ask { question, .. } = cli.command {
//!     println!("asking {question}");
//! }
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Represents the parsed command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Always)]
pub struct Cli {
    /// Configuration file. Defaults to `config.yaml` in the platform config directory.
    #[arg(long, global = true, env = "DBAI_CONFIG")]
    pub config: Option<PathBuf>,

    /// The parsed subcommand and its options.
    #[command(subcommand)]
    pub command: Commands,
}

/// Represents the available subcommands and their options.
#[derive(Subcommand, Debug)]
#[command(about, long_about = None, color = clap::ColorChoice::Always)]
pub enum Commands {
    /// Write a default configuration file.
    Init,

    /// Read the live schema and merge it into the snapshot.
    #[clap(name = "discover", alias = "d")]
    Discover,

    /// Generate column descriptions and store them in the snapshot.
    Describe,

    /// Print the stored snapshot.
    Snapshot,

    /// Propose questions to ask about the database.
    Suggest,

    /// Ask one question in a conversation.
    #[clap(name = "ask", alias = "a")]
    Ask {
        /// The question to be asked.
        question: String,

        /// Conversation to continue. A new one is created when omitted.
        #[arg(name = "conversation", short = 'c', long = "conversation")]
        conversation: Option<i32>,
    },

    /// Manage stored conversations.
    #[clap(name = "conversations", alias = "c")]
    Conversations {
        #[command(subcommand)]
        action: ConversationCommand,
    },

    /// Serve the HTTP API.
    Serve {
        /// Address to listen on, overriding `bind_address`.
        #[arg(long)]
        bind: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConversationCommand {
    New { title: Option<String> },
    List,
    Rename { id: i32, title: String },
    Delete { id: i32 },
    /// Print a conversation's messages and executed queries.
    Show { id: i32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ask_takes_an_optional_conversation() {
        let cli = Cli::parse_from(["dbai", "ask", "-c", "4", "How many orders?"]);
        match cli.command {
            Commands::Ask {
                question,
                conversation,
            } => {
                assert_eq!(question, "How many orders?");
                assert_eq!(conversation, Some(4));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_conversation_subcommands_parse() {
        let cli = Cli::parse_from(["dbai", "--config", "dbai.yaml", "conversations", "rename", "2", "Revenue"]);
        assert_eq!(cli.config, Some(PathBuf::from("dbai.yaml")));
        assert!(matches!(
            cli.command,
            Commands::Conversations {
                action: ConversationCommand::Rename { id: 2, .. }
            }
        ));
    }
}
