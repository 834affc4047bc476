//! Command-line arguments

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "ragchat",
    version,
    about = "Ask a RAG chat endpoint and stream the answer"
)]
pub struct Args {
    /// Question to ask. Starts an interactive prompt when omitted.
    pub question: Option<String>,

    /// Chat endpoint URL (overrides config file and RAGCHAT_ENDPOINT)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Path to a config.toml
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Cancel an answer that takes longer than this many seconds
    #[arg(long, value_name = "SECS")]
    pub deadline_secs: Option<u64>,

    /// Log debug output to stderr
    #[arg(short, long)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_shot_question() {
        let args = Args::try_parse_from(["ragchat", "What is RAG?", "--deadline-secs", "20"])
            .unwrap();
        assert_eq!(args.question.as_deref(), Some("What is RAG?"));
        assert_eq!(args.deadline_secs, Some(20));
        assert!(!args.verbose);
    }

    #[test]
    fn test_interactive_defaults() {
        let args = Args::try_parse_from(["ragchat", "-v", "--endpoint", "http://h:1/c"]).unwrap();
        assert!(args.question.is_none());
        assert!(args.verbose);
        assert_eq!(args.endpoint.as_deref(), Some("http://h:1/c"));
    }
}
