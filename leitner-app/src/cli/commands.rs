use crate::api::server as api_server;
use crate::cli::opts::*;
use crate::config::{AppConfig, StoreConfig};

use anyhow::{bail, Context, Result};
use leitner_core::{
    clean_tags, repo::memory::MemoryRepo, CardInput, CardPatch, CardService, CardWithTags, Deck,
    Repository, TagStore, TagSync,
};
use leitner_pg::PostgresRepo;
use leitner_sqlite::SqliteRepo;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Repository plus the card service wired to the same store.
#[derive(Clone)]
pub struct App {
    pub repo: Arc<dyn Repository>,
    pub cards: Arc<CardService>,
}

impl App {
    pub fn new<S>(store: Arc<S>, cfg: &AppConfig) -> Self
    where
        S: Repository + TagStore + 'static,
    {
        let sync = Arc::new(TagSync::new(store.clone(), cfg.sync.clone()));
        let repo: Arc<dyn Repository> = store;
        Self {
            cards: Arc::new(CardService::new(repo.clone(), sync)),
            repo,
        }
    }
}

pub async fn run_cli(args: Cli) -> Result<()> {
    let cfg = AppConfig::from_cli(&args)?;
    let app = open_app(&cfg).await?;
    match args.cmd {
        Command::Api(api) => {
            let addr: std::net::SocketAddr = api.addr.parse()?;
            api_server::run(app, addr).await
        }
        Command::Deck(cmd) => deck_cmd(&app, cmd).await,
        Command::Boxes(cmd) => box_cmd(&app, cmd).await,
        Command::Card(cmd) => card_cmd(&app, cmd).await,
        Command::Tag(cmd) => tag_cmd(&app, cmd).await,
    }
}

pub async fn open_app(cfg: &AppConfig) -> Result<App> {
    let app = match &cfg.store {
        StoreConfig::Memory => App::new(Arc::new(MemoryRepo::new()), cfg),
        StoreConfig::Sqlite(p) => {
            if let Some(parent) = p.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating data directory {}", parent.display()))?;
            }
            let repo = SqliteRepo::open_file(p)
                .await
                .with_context(|| format!("opening {}", p.display()))?;
            App::new(Arc::new(repo), cfg)
        }
        StoreConfig::Postgres(url) => App::new(Arc::new(PostgresRepo::connect(url).await?), cfg),
    };
    info!(store = cfg.store.label(), "store opened");
    Ok(app)
}

async fn deck_cmd(app: &App, cmd: DeckCmd) -> Result<()> {
    match cmd {
        DeckCmd::Add { name } => {
            let d = app.repo.create_deck(name.trim()).await?;
            println!("{}", d.id);
        }
        DeckCmd::List => {
            let mut v = app.repo.list_decks().await?;
            v.sort_by_key(|d| d.created_at);
            for d in v {
                println!("{}\t{}", d.id, d.name);
            }
        }
    }
    Ok(())
}

async fn box_cmd(app: &App, cmd: BoxCmd) -> Result<()> {
    match cmd {
        BoxCmd::Add { name, interval } => {
            let b = app.repo.create_box(name.trim(), interval).await?;
            println!("{}", b.id);
        }
        BoxCmd::List => {
            for b in app.repo.list_boxes().await? {
                println!("{}\t{}\tevery {}d", b.id, b.name, b.interval_days);
            }
        }
    }
    Ok(())
}

async fn card_cmd(app: &App, cmd: CardCmd) -> Result<()> {
    match cmd {
        CardCmd::Add(a) => {
            let deck = resolve_deck(&*app.repo, &a.deck).await?;
            let c = app
                .cards
                .create(CardInput {
                    deck_id: deck.id,
                    box_id: a.box_id,
                    question_type: a.question_type,
                    question: a.question,
                    answer: a.answer,
                    notes: a.notes,
                    media: a.media,
                    tags: clean_tags(&a.tags),
                })
                .await?;
            println!("{}", c.card.id);
        }
        CardCmd::Edit(e) => {
            let tags = if e.clear_tags {
                Some(Vec::new())
            } else if e.tags.is_empty() {
                None
            } else {
                Some(clean_tags(&e.tags))
            };
            let c = app
                .cards
                .edit(
                    e.card_id,
                    CardPatch {
                        box_id: e.box_id,
                        question: e.question,
                        answer: e.answer,
                        notes: e.notes,
                        media: e.media,
                        tags,
                    },
                )
                .await?;
            print_card(&c);
        }
        CardCmd::List { deck } => {
            let deck_id = if let Some(sel) = deck {
                Some(resolve_deck(&*app.repo, &sel).await?.id)
            } else {
                None
            };
            let mut cards = app.repo.list_cards(deck_id).await?;
            cards.sort_by_key(|c| c.created_at);
            for c in cards {
                print_card(&app.cards.get(c.id).await?);
            }
        }
        CardCmd::Answer {
            card_id,
            difficulty,
        } => {
            let s = app.cards.answer(card_id, difficulty).await?;
            println!("recorded {} for card {} (box {})", s.difficulty.as_str(), s.card_id, s.box_id);
        }
    }
    Ok(())
}

async fn tag_cmd(app: &App, cmd: TagCmd) -> Result<()> {
    match cmd {
        TagCmd::List { deck } => {
            let deck = resolve_deck(&*app.repo, &deck).await?;
            for t in app.repo.list_tags(deck.id).await? {
                println!("{}\t{}", t.id, t.name);
            }
        }
        TagCmd::Sync { card_id, tags } => {
            let report = app.cards.set_tags(card_id, &clean_tags(&tags)).await?;
            for t in &report.created {
                println!("created\t{}\t{}", t.id, t.name);
            }
            println!("linked {}", report.linked);
        }
    }
    Ok(())
}

// ===== Helpers =====
fn print_card(c: &CardWithTags) {
    let tags = if c.tags.is_empty() {
        "-".to_string()
    } else {
        c.tags.join(";")
    };
    println!(
        "{}\t{}\t{}\tdeck={}\tbox={}\ttags={}",
        c.card.id,
        c.card.question.as_deref().or(c.card.media.as_deref()).unwrap_or("-"),
        c.card.answer,
        c.card.deck_id,
        c.card.box_id,
        tags
    );
}

/// Finds a deck by id, then by case-insensitive name.
pub async fn resolve_deck<R: Repository + ?Sized>(repo: &R, sel: &str) -> Result<Deck> {
    if let Ok(id) = Uuid::parse_str(sel) {
        if let Ok(d) = repo.get_deck(id).await {
            return Ok(d);
        }
    }
    let decks = repo.list_decks().await?;
    if let Some(d) = decks.into_iter().find(|d| d.name.eq_ignore_ascii_case(sel.trim())) {
        return Ok(d);
    }
    bail!("deck not found: {}", sel)
}
