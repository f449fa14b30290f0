use clap::{Args, Parser, Subcommand, ValueEnum};
use leitner_core::{BoxId, CardId, Difficulty, QuestionType};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    Memory,
    Sqlite,
    Postgres,
}

#[derive(Debug, Parser, Clone)]
#[command(name = "leitner", version, about = "Leitner flashcards CLI/API")]
pub struct Cli {
    /// Storage backend
    #[arg(long, value_enum, env = "LEITNER_STORE", default_value_t = StoreKind::Sqlite, global = true)]
    pub store: StoreKind,

    /// SQLite DB path when --store sqlite (defaults to app data dir)
    #[arg(long, env = "LEITNER_DB_PATH", global = true)]
    pub db_path: Option<PathBuf>,

    /// Connection string when --store postgres
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    pub database_url: Option<String>,

    /// Per-round-trip timeout for tag sync
    #[arg(long, env = "LEITNER_OP_TIMEOUT_MS", default_value_t = 5000, global = true)]
    pub op_timeout_ms: u64,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Deck operations
    #[command(subcommand)]
    Deck(DeckCmd),
    /// Leitner box operations
    #[command(subcommand, name = "box")]
    Boxes(BoxCmd),
    /// Card operations
    #[command(subcommand)]
    Card(CardCmd),
    /// Tag operations
    #[command(subcommand)]
    Tag(TagCmd),
    /// Launch Axum HTTP API
    Api(ApiCmd),
}

#[derive(Debug, Subcommand, Clone)]
pub enum DeckCmd {
    Add { name: String },
    List,
}

#[derive(Debug, Subcommand, Clone)]
pub enum BoxCmd {
    Add {
        name: String,
        /// Days between reviews for cards in this box
        #[arg(long)]
        interval: u32,
    },
    List,
}

#[derive(Debug, Subcommand, Clone)]
pub enum CardCmd {
    Add(CardAdd),
    Edit(CardEdit),
    List {
        #[arg(long)]
        deck: Option<String>,
    },
    /// Record an answer: easy, medium or hard
    Answer {
        card_id: CardId,
        difficulty: Difficulty,
    },
}

#[derive(Debug, Args, Clone)]
pub struct CardAdd {
    /// Deck id or name
    #[arg(long)]
    pub deck: String,
    #[arg(long = "box")]
    pub box_id: Option<BoxId>,
    /// classic or media
    #[arg(long = "type", default_value = "classic")]
    pub question_type: QuestionType,
    #[arg(long)]
    pub question: Option<String>,
    #[arg(long)]
    pub answer: String,
    #[arg(long)]
    pub notes: Option<String>,
    #[arg(long)]
    pub media: Option<String>,
    #[arg(long = "tag")]
    pub tags: Vec<String>,
}

#[derive(Debug, Args, Clone)]
pub struct CardEdit {
    pub card_id: CardId,
    #[arg(long = "box")]
    pub box_id: Option<BoxId>,
    #[arg(long)]
    pub question: Option<String>,
    #[arg(long)]
    pub answer: Option<String>,
    #[arg(long)]
    pub notes: Option<String>,
    #[arg(long)]
    pub media: Option<String>,
    /// Replaces the card's tags
    #[arg(long = "tag", conflicts_with = "clear_tags")]
    pub tags: Vec<String>,
    #[arg(long)]
    pub clear_tags: bool,
}

#[derive(Debug, Subcommand, Clone)]
pub enum TagCmd {
    List {
        #[arg(long)]
        deck: String,
    },
    /// Make the card's tags exactly the given names
    Sync {
        card_id: CardId,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
}

#[derive(Debug, Args, Clone)]
pub struct ApiCmd {
    /// Bind address (host:port)
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub addr: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edit_rejects_tags_with_clear() {
        let res = Cli::try_parse_from([
            "leitner", "card", "edit", "3", "--tag", "a", "--clear-tags",
        ]);
        assert!(res.is_err());
    }

    #[test]
    fn parses_box_and_answer_commands() {
        let cli = Cli::try_parse_from(["leitner", "--store", "memory", "box", "add", "Daily", "--interval", "1"])
            .unwrap();
        assert_eq!(cli.store, StoreKind::Memory);
        assert!(matches!(cli.cmd, Command::Boxes(BoxCmd::Add { interval: 1, .. })));

        let cli = Cli::try_parse_from(["leitner", "card", "answer", "7", "hard"]).unwrap();
        assert!(matches!(
            cli.cmd,
            Command::Card(CardCmd::Answer { card_id: 7, difficulty: Difficulty::Hard })
        ));
    }
}
