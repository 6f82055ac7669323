use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use upfeed::aggregate::{Aggregator, FeedSession, FeedView, PassStatus, Target};
use upfeed::config::Config;
use upfeed::storage::{
    BookmarkStore, ChannelCatalog, ChannelUpdate, Database, DatabaseError, FeedItem, NewChannel,
};
use upfeed::util::{display_width, strip_control_chars, truncate_to_width};

/// Settings key holding the last target passed to `feed`.
const LAST_TARGET_KEY: &str = "session.target";
const DEFAULT_COLUMNS: usize = 100;

/// Get the config directory path (~/.config/upfeed/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("upfeed"))
}

#[derive(Parser, Debug)]
#[command(name = "upfeed", about = "Merge RSS/Atom channels into one feed")]
struct Args {
    /// Database file (overrides config)
    #[arg(long, value_name = "FILE", global = true)]
    db: Option<PathBuf>,

    /// Config file (default: ~/.config/upfeed/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage channels
    #[command(subcommand)]
    Channel(ChannelCommand),

    /// Manage categories
    #[command(subcommand)]
    Category(CategoryCommand),

    /// Run one aggregation pass and print the result
    Feed {
        /// "all", "bookmarked" or a channel id (default: last used, else "all")
        target: Option<String>,

        /// Print the view as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage bookmarks
    #[command(subcommand)]
    Bookmark(BookmarkCommand),
}

#[derive(Subcommand, Debug)]
enum ChannelCommand {
    /// Register a channel
    Add {
        name: String,
        url: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        image_url: Option<String>,
        /// Category id
        #[arg(long)]
        category: Option<String>,
    },
    /// List channels
    List,
    /// Edit a channel. An empty value clears an optional field.
    Edit {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        image_url: Option<String>,
        #[arg(long)]
        category: Option<String>,
    },
    /// Remove a channel
    Remove { id: String },
}

#[derive(Subcommand, Debug)]
enum CategoryCommand {
    Add { name: String },
    List,
    Rename { id: String, name: String },
    /// Remove a category; its channels become uncategorized
    Remove { id: String },
}

#[derive(Subcommand, Debug)]
enum BookmarkCommand {
    /// Bookmark an item currently published by a channel
    Add { channel: String, item_id: String },
    Remove { item_id: String },
    List,
}

/// `Some("")` clears the field, `Some(v)` sets it, `None` leaves it alone.
fn clearable(value: Option<String>) -> Option<Option<String>> {
    value.map(|v| {
        let v = v.trim().to_owned();
        (!v.is_empty()).then_some(v)
    })
}

fn terminal_columns() -> usize {
    std::env::var("COLUMNS")
        .ok()
        .and_then(|c| c.parse().ok())
        .filter(|&c: &usize| c > 20)
        .unwrap_or(DEFAULT_COLUMNS)
}

/// Columns left for the title after `prefix`.
fn title_room(prefix: &str, columns: usize) -> usize {
    columns.saturating_sub(display_width(prefix))
}

fn print_items(items: &[FeedItem]) {
    let columns = terminal_columns();
    for item in items {
        let marker = if item.bookmarked { '*' } else { ' ' };
        let date = item
            .published_at
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "----------------".to_string());
        let channel = strip_control_chars(&item.channel.name);
        let title = strip_control_chars(&item.title);
        let prefix = format!("{} {}  {}  ", marker, date, truncate_to_width(&channel, 16));
        println!("{}{}", prefix, truncate_to_width(&title, title_room(&prefix, columns)));
        println!("    {}", strip_control_chars(&item.id));
    }
}

fn print_view(view: &FeedView) {
    if let Some(error) = &view.error {
        eprintln!("! {}", error);
    }
    match view.status() {
        PassStatus::Empty => println!("No items."),
        _ => print_items(&view.items),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
        tracing::info!(path = %config_dir.display(), "Created config directory");
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = std::fs::set_permissions(&config_dir, std::fs::Permissions::from_mode(0o700)) {
            tracing::warn!(
                path = %config_dir.display(),
                error = %e,
                "Failed to set config directory permissions to 0700"
            );
        }
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = args
        .db
        .clone()
        .or_else(|| config.database_path.clone())
        .unwrap_or_else(|| config_dir.join("upfeed.db"));
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(e @ DatabaseError::InstanceLocked) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    match args.command {
        Command::Channel(cmd) => run_channel(&db, cmd).await,
        Command::Category(cmd) => run_category(&db, cmd).await,
        Command::Feed { target, json } => run_feed(&db, &config, target, json).await,
        Command::Bookmark(cmd) => run_bookmark(&db, &config, cmd).await,
    }
}

async fn run_channel(db: &Database, cmd: ChannelCommand) -> Result<()> {
    let catalog = ChannelCatalog::load(db.clone()).await?;

    match cmd {
        ChannelCommand::Add {
            name,
            url,
            description,
            image_url,
            category,
        } => {
            let channel = catalog
                .add(NewChannel {
                    name,
                    url,
                    description,
                    image_url,
                    category_id: category,
                })
                .await?;
            println!("Added channel {} ({})", channel.id, strip_control_chars(&channel.name));
        }
        ChannelCommand::List => {
            let channels = catalog.list();
            if channels.is_empty() {
                println!("No channels. Add one with: upfeed channel add <NAME> <URL>");
            }
            for channel in channels.iter() {
                let category = channel
                    .category
                    .as_ref()
                    .map(|c| format!(" [{}]", strip_control_chars(&c.name)))
                    .unwrap_or_default();
                println!(
                    "{:>4}  {}{}  {}",
                    channel.id,
                    strip_control_chars(&channel.name),
                    category,
                    channel.url
                );
            }
        }
        ChannelCommand::Edit {
            id,
            name,
            url,
            description,
            image_url,
            category,
        } => {
            let update = ChannelUpdate {
                name,
                url,
                description: clearable(description),
                image_url: clearable(image_url),
                category_id: clearable(category),
            };
            match catalog.update(&id, update).await? {
                Some(channel) => println!("Updated channel {}", channel.id),
                None => bail!("Channel {} not found.", id),
            }
        }
        ChannelCommand::Remove { id } => {
            if !catalog.remove(&id).await? {
                bail!("Channel {} not found.", id);
            }
            println!("Removed channel {}", id);
        }
    }
    Ok(())
}

async fn run_category(db: &Database, cmd: CategoryCommand) -> Result<()> {
    match cmd {
        CategoryCommand::Add { name } => {
            let category = db.create_category(&name).await?;
            println!("Added category {} ({})", category.id, category.name);
        }
        CategoryCommand::List => {
            for category in db.get_categories().await? {
                println!("{:>4}  {}", category.id, strip_control_chars(&category.name));
            }
        }
        CategoryCommand::Rename { id, name } => {
            if !db.rename_category(&id, &name).await? {
                bail!("Category {} not found.", id);
            }
            println!("Renamed category {}", id);
        }
        CategoryCommand::Remove { id } => {
            if !db.delete_category(&id).await? {
                bail!("Category {} not found.", id);
            }
            println!("Removed category {}", id);
        }
    }
    Ok(())
}

async fn build_session(db: &Database, config: &Config) -> Result<FeedSession> {
    let client = reqwest::Client::builder()
        .user_agent(config.user_agent.as_str())
        .build()
        .context("Failed to build HTTP client")?;
    let bookmarks = BookmarkStore::load(db.clone()).await?;
    let mut aggregator = Aggregator::new(client, bookmarks).with_limits(config.fetch_limits());
    if let Some(cap) = config.max_concurrent() {
        aggregator = aggregator.with_max_concurrent(cap);
    }
    Ok(FeedSession::new(aggregator))
}

async fn run_feed(db: &Database, config: &Config, target: Option<String>, json: bool) -> Result<()> {
    let raw_target = match target {
        Some(t) => t,
        None => db
            .get_setting(LAST_TARGET_KEY)
            .await?
            .unwrap_or_else(|| "all".to_string()),
    };
    let target: Target = raw_target.parse()?;

    let catalog = ChannelCatalog::load(db.clone()).await?;
    let session = build_session(db, config).await?;

    let view = session
        .load(&target, &catalog.list())
        .await
        .unwrap_or_else(|| session.current());

    if let Err(e) = db.set_setting(LAST_TARGET_KEY, &target.to_string()).await {
        tracing::warn!(error = %e, "Failed to remember feed target");
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        print_view(&view);
    }
    Ok(())
}

async fn run_bookmark(db: &Database, config: &Config, cmd: BookmarkCommand) -> Result<()> {
    match cmd {
        BookmarkCommand::Add { channel, item_id } => {
            let catalog = ChannelCatalog::load(db.clone()).await?;
            let Some(channel) = catalog.get(&channel) else {
                bail!("Channel {} not found.", channel);
            };

            let session = build_session(db, config).await?;
            let aggregator = session.aggregator();
            let items = aggregator.fetch_channel(&channel).await?;
            let Some(item) = items.into_iter().find(|i| i.id == item_id) else {
                bail!("Item {} is not in channel {}'s current feed.", item_id, channel.id);
            };

            aggregator.bookmarks().add(&item).await?;
            println!("Bookmarked: {}", strip_control_chars(&item.title));
        }
        BookmarkCommand::Remove { item_id } => {
            let bookmarks = BookmarkStore::load(db.clone()).await?;
            if !bookmarks.remove(&item_id).await? {
                bail!("No bookmark with id {}.", item_id);
            }
            println!("Removed bookmark {}", item_id);
        }
        BookmarkCommand::List => {
            let bookmarks = BookmarkStore::load(db.clone()).await?;
            let items = bookmarks.snapshot();
            if items.is_empty() {
                println!("No bookmarks.");
            }
            print_items(&items);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_room_counts_wide_channel_names() {
        let prefix = format!("  2024-01-01 09:00  {}  ", truncate_to_width("技術ニュース", 16));
        assert_eq!(display_width(&prefix), 20 + 12 + 2);
        assert_eq!(title_room(&prefix, 100), 100 - 34);
        assert!(display_width(&prefix) + title_room(&prefix, 100) <= 100);
    }

    #[test]
    fn test_title_room_never_underflows() {
        assert_eq!(title_room(&"x".repeat(40), 30), 0);
    }

    #[test]
    fn test_clearable() {
        assert_eq!(clearable(None), None);
        assert_eq!(clearable(Some("  ".into())), Some(None));
        assert_eq!(clearable(Some(" v ".into())), Some(Some("v".into())));
    }
}
