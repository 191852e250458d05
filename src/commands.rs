//! Command line surface: argument parsing and one handler per subcommand.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::Config;
use crate::db::{Database, Feed, FeedFollow, FeedWithOwner, Post, StoreError, User};
use crate::error::{Error, Result};
use crate::fetcher::Fetcher;
use crate::scheduler::{Scheduler, DEFAULT_FETCH_TIMEOUT};

/// Command-line arguments for gator
#[derive(Parser, Debug)]
#[command(name = "gator")]
#[command(about = "Collect RSS feeds into a local database")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Switch the current user
    Login { name: String },

    /// Create a user and log in as them
    Register { name: String },

    /// Delete all users, feeds and posts
    Reset,

    /// List users
    Users,

    /// Scrape feeds forever, one feed per interval
    Agg {
        /// Time between fetches, e.g. 30s, 1m, 1h30m
        #[arg(value_parser = humantime::parse_duration)]
        interval: Duration,

        /// Give up on a single feed after this long
        #[arg(long, default_value_t = humantime::Duration::from(DEFAULT_FETCH_TIMEOUT))]
        timeout: humantime::Duration,
    },

    /// Add a feed and follow it
    #[command(name = "addfeed")]
    AddFeed { name: String, url: String },

    /// List every feed with its owner
    Feeds,

    /// Follow an existing feed by url
    Follow { url: String },

    /// List the feeds the current user follows
    Following,

    /// Stop following a feed
    Unfollow { url: String },

    /// Show the newest posts from followed feeds
    Browse {
        #[arg(default_value_t = 2)]
        limit: i64,
    },
}

pub struct State {
    pub db: Arc<Database>,
    pub config: Config,
}

pub async fn run_command(command: Command, state: &mut State) -> Result<()> {
    match command {
        Command::Login { name } => {
            let user = login(state, &name).await?;
            println!("User has been set to: {}", user.name);
        }
        Command::Register { name } => {
            let user = register(state, &name).await?;
            println!("User registered: {} (id {})", user.name, user.id);
        }
        Command::Reset => {
            state.db.reset().await?;
            println!("Database reset");
        }
        Command::Users => {
            for (user, current) in users(state).await? {
                if current {
                    println!("* {} (current)", user.name);
                } else {
                    println!("* {}", user.name);
                }
            }
        }
        Command::Agg { interval, timeout } => {
            aggregate(state, interval, timeout.into()).await?;
        }
        Command::AddFeed { name, url } => {
            let user = require_user(state).await?;
            let (feed, follow) = add_feed(state, &user, &name, &url).await?;
            print_feed(&feed);
            println!("{} now follows {}", follow.user_name, follow.feed_name);
        }
        Command::Feeds => {
            for feed in state.db.get_feeds_with_owner().await? {
                print_feed_with_owner(&feed);
            }
        }
        Command::Follow { url } => {
            let user = require_user(state).await?;
            let follow = follow(state, &user, &url).await?;
            println!("{} followed {}", follow.user_name, follow.feed_name);
        }
        Command::Following => {
            let user = require_user(state).await?;
            let names: Vec<String> = state
                .db
                .get_feed_follows_for_user(user.id)
                .await?
                .into_iter()
                .map(|f| f.feed_name)
                .collect();
            println!("[{}]", names.join(", "));
        }
        Command::Unfollow { url } => {
            let user = require_user(state).await?;
            unfollow(state, &user, &url).await?;
            println!("{} unfollowed {}", user.name, url);
        }
        Command::Browse { limit } => {
            let user = require_user(state).await?;
            for post in browse(state, &user, limit).await? {
                print_post(&post);
            }
        }
    }

    Ok(())
}

/// Resolve the logged-in user from the config.
pub async fn require_user(state: &State) -> Result<User> {
    let name = state
        .config
        .current_user()
        .ok_or_else(|| Error::Usage("no user logged in; run `gator login <name>`".to_string()))?;

    find_user(&state.db, name).await
}

async fn find_user(db: &Database, name: &str) -> Result<User> {
    db.get_user_by_name(name)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("user {:?}", name)).into())
}

async fn find_feed(db: &Database, url: &str) -> Result<Feed> {
    db.get_feed_by_url(url)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("feed {}", url)).into())
}

pub async fn login(state: &mut State, name: &str) -> Result<User> {
    let user = find_user(&state.db, name).await?;
    state.config.set_user(&user.name)?;
    Ok(user)
}

pub async fn register(state: &mut State, name: &str) -> Result<User> {
    if name.trim().is_empty() {
        return Err(Error::Usage("user name must not be empty".to_string()));
    }
    let user = state.db.create_user(name).await?;
    state.config.set_user(&user.name)?;
    Ok(user)
}

/// Every user, flagged when they are the current one.
pub async fn users(state: &State) -> Result<Vec<(User, bool)>> {
    let current = state.config.current_user();
    Ok(state
        .db
        .get_users()
        .await?
        .into_iter()
        .map(|user| {
            let is_current = current == Some(user.name.as_str());
            (user, is_current)
        })
        .collect())
}

pub async fn add_feed(
    state: &State,
    user: &User,
    name: &str,
    url: &str,
) -> Result<(Feed, FeedFollow)> {
    Ok(state.db.create_feed_with_follow(user.id, name, url).await?)
}

pub async fn follow(state: &State, user: &User, url: &str) -> Result<FeedFollow> {
    let feed = find_feed(&state.db, url).await?;
    Ok(state.db.create_feed_follow(user.id, feed.id).await?)
}

pub async fn unfollow(state: &State, user: &User, url: &str) -> Result<Feed> {
    let feed = find_feed(&state.db, url).await?;
    state.db.unfollow(user.id, feed.id).await?;
    Ok(feed)
}

pub async fn browse(state: &State, user: &User, limit: i64) -> Result<Vec<Post>> {
    if limit < 1 {
        return Err(Error::Usage("limit must be at least 1".to_string()));
    }
    Ok(state.db.get_posts_for_user(user.id, limit).await?)
}

/// Run the scheduler until Ctrl-C.
async fn aggregate(state: &State, interval: Duration, timeout: Duration) -> Result<()> {
    let scheduler = Scheduler::new(state.db.clone(), Fetcher::new()?).with_fetch_timeout(timeout);

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => on_signal.cancel(),
            Err(e) => warn!("Unable to listen for Ctrl-C: {}", e),
        }
    });

    println!(
        "Collecting feeds every {}",
        humantime::format_duration(interval)
    );
    scheduler.run(interval, shutdown).await
}

fn print_feed(feed: &Feed) {
    println!("Feed {}", feed.id);
    println!("  Name: {}", feed.name);
    println!("  URL:  {}", feed.url);
}

fn print_feed_with_owner(feed: &FeedWithOwner) {
    println!("* {} ({})", feed.name, feed.url);
    println!("  added by {}", feed.owner_name);
}

fn print_post(post: &Post) {
    println!("{} | {}", post.published_at.format("%Y-%m-%d %H:%M"), post.title);
    println!("  {}", post.url);
    if !post.description.is_empty() {
        println!("  {}", post.description);
    }
}
