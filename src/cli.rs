use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use pagesync_core::cms::{CmsViewEngine, ContentTree};
use pagesync_core::config::DownloadOptions;
use pagesync_core::model::RenderKind;
use pagesync_core::synchronise::Synchroniser;
use pagesync_core::Repository;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use crate::load_config::{load_config, AppConfig};
use crate::remote::HttpRemoteSource;
use crate::render::HtmlRenderer;

/// CLI for pagesync: mirror a remote content tree into a local repository.
#[derive(Parser, Debug)]
#[clap(
    name = "pagesync",
    version,
    about = "Mirror remote pages and databases into a local repository and keep renders and CMS views in sync"
)]
pub struct Cli {
    /// Path to the YAML config file
    #[clap(long, global = true, default_value = "pagesync.yaml")]
    pub config: PathBuf,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Html,
    Pdf,
}

impl From<KindArg> for RenderKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Html => RenderKind::Html,
            KindArg::Pdf => RenderKind::Pdf,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create an empty repository at the configured root
    Init,
    /// Synchronise a remote page or database and everything below it
    Sync {
        /// Remote page or database ID
        id: String,
        /// Re-fetch every node even if it looks unchanged
        #[clap(long)]
        force: bool,
        /// Log and skip failing pages, rows and files
        #[clap(long)]
        fault_tolerant: bool,
        /// Fetch only, do not render
        #[clap(long)]
        no_render: bool,
        #[clap(long, value_enum, default_value = "html")]
        kind: KindArg,
    },
    /// List registered resources
    List,
    /// Remove a resource and its renders
    Remove {
        id: String,
        /// Also remove child resources instead of orphaning them
        #[clap(long)]
        children: bool,
    },
    /// Print the CMS slug tree
    Tree,
}

fn open_repository(config: &AppConfig) -> Result<Repository> {
    let mut repo = Repository::open(&config.repository.root);
    repo.load()
        .with_context(|| format!("loading repository at {}", config.repository.root.display()))?;
    Ok(repo)
}

async fn sync(config: &AppConfig, id: &str, options: DownloadOptions) -> Result<()> {
    let mut repo = open_repository(config)?;
    let _engine = CmsViewEngine::attach(&mut repo);
    let token = config
        .remote
        .api_token
        .clone()
        .or_else(|| repo.registry().ok().and_then(|r| r.default_api_key.clone()));
    let source = HttpRemoteSource::new(&config.remote.base_url, token);
    let synchroniser = Synchroniser::new(source, HtmlRenderer, config.sync.clone());

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling synchronisation");
            on_interrupt.cancel();
        }
    });

    println!("Synchronise starting...");
    let result = synchroniser.sync(&mut repo, id, &options, &cancel).await;
    cancel.cancel();
    match result {
        Ok(report) => {
            println!("Synchronise complete.\nReport:");
            println!("{:#?}", report);
            Ok(())
        }
        Err(e) => {
            eprintln!("[ERROR] Synchronisation failed: {}", e);
            Err(anyhow::Error::new(e))
        }
    }
}

fn list(config: &AppConfig) -> Result<()> {
    let repo = open_repository(config)?;
    for resource in repo.resources()? {
        println!(
            "{}\t{:?}\t{}\t{}",
            resource.id(),
            resource.resource_type(),
            resource.parent_resource_id().map(String::as_str).unwrap_or("-"),
            resource.title()
        );
    }
    Ok(())
}

fn remove(config: &AppConfig, id: &str, children: bool) -> Result<()> {
    let mut repo = open_repository(config)?;
    let _engine = CmsViewEngine::attach(&mut repo);
    repo.begin_update()?;
    let removed = repo.remove_resource(id, children);
    repo.end_update()?;
    for id in removed? {
        println!("removed {id}");
    }
    Ok(())
}

fn tree(config: &AppConfig) -> Result<()> {
    let mut repo = open_repository(config)?;
    let engine = CmsViewEngine::attach(&mut repo);
    let tree = engine.content_tree(&repo)?;
    for (depth, node) in tree.walk() {
        let id = tree.find(&node.slug).unwrap_or(ContentTree::ROOT);
        let slug: &str = if node.slug.is_empty() { "/" } else { &node.slug };
        println!(
            "{}{} ({}) [{:?}]",
            "  ".repeat(depth),
            tree.title(id),
            slug,
            tree.node_type(id)
        );
    }
    Ok(())
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    let result = match load_config(&cli.config) {
        Err(e) => Err(e),
        Ok(config) => match cli.command {
            Commands::Init => Repository::init(
                &config.repository.root,
                config.repository.profile,
                config.repository.cms_database_id.clone(),
            )
            .map(|_| println!("Initialised repository at {}", config.repository.root.display()))
            .map_err(anyhow::Error::new),
            Commands::Sync {
                id,
                force,
                fault_tolerant,
                no_render,
                kind,
            } => {
                let options = DownloadOptions {
                    render: !no_render,
                    render_kind: kind.into(),
                    force_refresh: force,
                    fault_tolerant,
                };
                sync(&config, &id, options).await
            }
            Commands::List => list(&config),
            Commands::Remove { id, children } => remove(&config, &id, children),
            Commands::Tree => tree(&config),
        },
    };

    let exit_span = tracing::info_span!("exit");
    exit_span.in_scope(|| {
        tracing::info!(success = result.is_ok(), "exiting");
    });

    result
}
