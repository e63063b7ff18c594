use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config;
use crate::controller::{FeedEvent, FeedWindowController};
use crate::data::{FeedSource, HttpFeedSource, MockFeedSource};
use crate::feed_api;
use crate::session::FeedDataSource;
use crate::storage;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config_file: Option<PathBuf>,
    pub offline: bool,
}

pub fn run(opts: RunOptions) -> Result<()> {
    let cfg = config::load(config::LoadOptions {
        config_file: opts.config_file.clone(),
        env_prefix: None,
    })
    .context("load config")?;

    let store = match storage::Store::open(storage::Options {
        path: cfg.storage.path.clone(),
    }) {
        Ok(store) => Some(store),
        Err(err) => {
            warn!("snapshot store unavailable: {err:#}");
            None
        }
    };

    let source: Arc<dyn FeedSource> = if opts.offline {
        info!("using offline demo feed");
        Arc::new(MockFeedSource)
    } else {
        let client = feed_api::Client::new(feed_api::ClientConfig {
            endpoint: cfg.feed.endpoint.clone(),
            user_agent: cfg.feed.user_agent.clone(),
            timeout: Some(cfg.feed.timeout),
            http_client: None,
        })
        .context("build feed client")?;
        Arc::new(HttpFeedSource::new(Arc::new(client)))
    };

    let data = Arc::new(FeedDataSource::with_pagination(
        source,
        cfg.feed.pagination(),
    ));
    let controller = FeedWindowController::new(data, cfg.window.controller());

    let mut browser = Browser {
        controller,
        store: store.as_ref(),
        snapshot_len: cfg.storage.snapshot_len,
        item_height: cfg.window.item_height,
        wait: cfg.feed.timeout.saturating_mul(cfg.feed.max_attempts as u32),
    };

    let stdin = io::stdin();
    let stdout = io::stdout();
    browser.drive(stdin.lock(), stdout.lock())?;

    drop(browser);
    if let Some(store) = store {
        store.close()?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Next,
    Previous,
    Like,
    Retry,
    Quit,
    Help,
}

impl Command {
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            "" | "j" | "n" | "next" => Some(Command::Next),
            "k" | "p" | "prev" => Some(Command::Previous),
            "l" | "like" => Some(Command::Like),
            "r" | "retry" => Some(Command::Retry),
            "q" | "quit" => Some(Command::Quit),
            "?" | "h" | "help" => Some(Command::Help),
            _ => None,
        }
    }
}

const HELP: &str = "enter/j: next  k: previous  l: like  r: retry  q: quit";

pub struct Browser<'a> {
    pub controller: FeedWindowController,
    pub store: Option<&'a storage::Store>,
    pub snapshot_len: usize,
    pub item_height: f64,
    // Upper bound on how long a command waits for its load to land.
    pub wait: Duration,
}

impl Browser<'_> {
    pub fn drive<R: BufRead, W: Write>(&mut self, input: R, mut out: W) -> Result<()> {
        if let Some(snapshot) = self.store.and_then(|store| match store.load_snapshot() {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!("snapshot load failed: {err:#}");
                None
            }
        }) {
            if self.controller.restore(snapshot) {
                writeln!(out, "(showing last session while the feed loads)")?;
                self.render(&mut out)?;
            }
        }

        self.controller.load_initial();
        self.settle(&mut out)?;
        writeln!(out, "{HELP}")?;

        for line in input.lines() {
            let line = line.context("read command")?;
            let Some(command) = Command::parse(&line) else {
                writeln!(out, "unknown command {:?}; {HELP}", line.trim())?;
                continue;
            };
            match command {
                Command::Quit => break,
                Command::Help => {
                    writeln!(out, "{HELP}")?;
                    continue;
                }
                Command::Next => {
                    let index = self.controller.current_index() + 1;
                    self.controller.notify_visible_index_changed(index);
                }
                Command::Previous => {
                    let index = self.controller.current_index().saturating_sub(1);
                    self.controller.notify_visible_index_changed(index);
                }
                Command::Like => {
                    if let Some(id) = self.controller.current().map(|video| video.id.clone()) {
                        self.controller.toggle_like(&id);
                    }
                }
                Command::Retry => {
                    self.controller.retry();
                }
            }
            self.settle(&mut out)?;
        }

        self.controller.teardown();
        Ok(())
    }

    fn settle<W: Write>(&mut self, out: &mut W) -> Result<()> {
        for event in self.controller.wait(self.wait) {
            match event {
                FeedEvent::Loaded { appended } => {
                    tracing::debug!(appended, "rendered load");
                }
                FeedEvent::Evicted(eviction) => {
                    // Same item stays on screen; jump without animation.
                    writeln!(
                        out,
                        "[scroll {:.0}px -> item {}]",
                        eviction.scroll_offset(self.item_height),
                        eviction.new_index
                    )?;
                }
                FeedEvent::Exhausted => writeln!(out, "-- end of feed --")?,
                FeedEvent::Failed { message } => writeln!(out, "error: {message} (r to retry)")?,
            }
        }
        self.persist();
        self.render(out)
    }

    fn render<W: Write>(&self, out: &mut W) -> Result<()> {
        let Some(video) = self.controller.current() else {
            if self.controller.is_initial_loading() {
                writeln!(out, "loading...")?;
            }
            return Ok(());
        };
        let likes = self.controller.likes();
        let heart = if likes.is_liked(&video.id) { "♥" } else { "♡" };
        writeln!(
            out,
            "[{}/{}] @{} - {}  {} {}  💬 {}",
            self.controller.current_index() + 1,
            self.controller.videos().len(),
            video.username,
            video.description,
            heart,
            likes.display_count(video),
            video.comment_count,
        )?;
        writeln!(out, "    {}", video.video_url)?;
        Ok(())
    }

    fn persist(&self) {
        let Some(store) = self.store else {
            return;
        };
        if self.controller.videos().is_empty() {
            return;
        }
        if let Err(err) = store.save_snapshot(&self.controller.snapshot(self.snapshot_len)) {
            warn!("snapshot save failed: {err:#}");
        }
    }
}
