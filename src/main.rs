//! relcms CLI - inspect and manage a relational CMS store

use anyhow::Context;
use clap::{Parser, Subcommand};
use relcms::schema::{build_registry, reconcile::schema_statements, MapperOptions, Naming};
use relcms::{Adapter, AdapterConfig, CollectionConfig, FindArgs};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "relcms")]
#[command(about = "Relational storage for headless CMS collections", long_about = None)]
struct Cli {
    /// YAML adapter config; RELCMS_* variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Connection URL (mysql://... or sqlite://...), overrides the config file
    #[arg(short, long)]
    url: Option<String>,

    /// Directory of collection definitions (*.yaml)
    #[arg(long, default_value = "collections")]
    collections: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the DDL for the collection definitions without connecting
    Schema,

    /// Create missing tables, columns and junction tables
    Push,

    /// Show which collections have tables in the database
    Status,

    /// Query a collection and print the page as JSON
    Find {
        collection: String,

        /// Where clause as JSON, e.g. '{"title":{"like":"rust"}}'
        #[arg(short, long)]
        r#where: Option<String>,

        /// Sort keys, e.g. "-createdAt,title"
        #[arg(short, long)]
        sort: Option<String>,

        #[arg(short, long)]
        limit: Option<u64>,

        #[arg(short, long)]
        page: Option<u64>,

        /// Relationship depth to resolve
        #[arg(short, long, default_value_t = 0)]
        depth: u32,
    },

    /// Drop every managed table
    Drop {
        /// Required; there is no undo
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.url.clone())?;
    let collections = load_collections(&cli.collections)?;

    match cli.command {
        Commands::Schema => print_schema(&config, &collections),
        Commands::Push => push_schema(config, &collections).await,
        Commands::Status => show_status(config, &collections).await,
        Commands::Find {
            collection,
            r#where,
            sort,
            limit,
            page,
            depth,
        } => {
            let mut args = FindArgs::new(collection).depth(depth);
            if let Some(filter) = r#where {
                args = args.filter(serde_json::from_str(&filter).context("--where is not valid JSON")?);
            }
            if let Some(sort) = sort {
                args = args.sort(sort);
            }
            if let Some(limit) = limit {
                args = args.limit(limit);
            }
            if let Some(page) = page {
                args = args.page(page);
            }
            find(config, &collections, args).await
        }
        Commands::Drop { yes } => drop_database(config, &collections, yes).await,
    }
}

fn load_config(path: Option<&Path>, url: Option<String>) -> anyhow::Result<AdapterConfig> {
    let mut config = match path {
        Some(path) => AdapterConfig::load(path)?,
        None => AdapterConfig::default(),
    };
    if url.is_some() {
        config.url = url;
    }
    Ok(config.with_env_overrides()?)
}

fn load_collections(dir: &Path) -> anyhow::Result<Vec<CollectionConfig>> {
    if !dir.exists() {
        anyhow::bail!("collection directory {:?} does not exist", dir);
    }
    let collections = CollectionConfig::load_dir(dir)?;
    tracing::debug!("Loaded {} collection definition(s) from {:?}", collections.len(), dir);
    Ok(collections)
}

async fn open(config: AdapterConfig, collections: &[CollectionConfig]) -> anyhow::Result<Adapter> {
    let adapter = Adapter::new(config)?;
    adapter.connect().await?;
    if let Err(e) = adapter.init(collections).await {
        // Partial failures still leave the healthy collections usable
        if adapter.is_ready() {
            eprintln!("Warning: {}", e);
        } else {
            return Err(e.into());
        }
    }
    Ok(adapter)
}

fn print_schema(config: &AdapterConfig, collections: &[CollectionConfig]) -> anyhow::Result<()> {
    let naming = Naming::new(&config.table_prefix, &config.relationship_suffix);
    let mapper = MapperOptions {
        short_text_length: config.short_text_length,
        big_integers: config.big_integers,
        id_type: config.id_type,
    };
    let compiled = build_registry(collections, &naming, &mapper);

    for warning in &compiled.warnings {
        eprintln!("-- warning: {}", warning);
    }
    for failure in &compiled.failures {
        eprintln!("-- skipped '{}': {}", failure.collection, failure.reason);
    }
    for statement in schema_statements(config.dialect(), &compiled.registry) {
        println!("{};", statement);
    }
    Ok(())
}

async fn push_schema(mut config: AdapterConfig, collections: &[CollectionConfig]) -> anyhow::Result<()> {
    config.push = true;
    let adapter = Adapter::new(config)?;
    adapter.connect().await?;
    let result = adapter.init(collections).await;

    match &result {
        Ok(report) => {
            for table in &report.reconcile.tables {
                if table.created {
                    println!("created  {}", table.table);
                } else if !table.added_columns.is_empty() {
                    println!("altered  {} (+{})", table.table, table.added_columns.join(", +"));
                }
                for column in &table.drift {
                    println!("drift    {}.{}", table.table, column);
                }
            }
            for junction in &report.reconcile.junctions_created {
                println!("created  {}", junction);
            }
            if report.reconcile.is_noop() {
                println!("Schema is up to date.");
            }
        }
        Err(e) => eprintln!("Error: {}", e),
    }

    adapter.destroy().await;
    result.map(|_| ()).map_err(Into::into)
}

async fn show_status(mut config: AdapterConfig, collections: &[CollectionConfig]) -> anyhow::Result<()> {
    // Status never changes anything
    config.push = false;
    config.drop_database_on_init = false;
    let adapter = Adapter::new(config)?;
    adapter.connect().await?;

    println!("relcms Status");
    println!("=============");
    println!("Dialect: {}", adapter.dialect().name());

    let tables = adapter.list_tables().await?;
    println!("Tables: {}", tables.len());
    println!();

    let failures = match adapter.init(collections).await {
        Ok(_) => Vec::new(),
        Err(relcms::Error::SchemaCompilation { failures }) => failures,
        Err(e) => return Err(e.into()),
    };
    println!("Collections:");
    if let Some(registry) = adapter.registry() {
        for table in registry.tables() {
            println!("  {} -> {} (ok)", table.collection, table.name);
        }
    }
    for failure in &failures {
        println!("  {} (unavailable: {})", failure.collection, failure.reason);
    }

    adapter.destroy().await;
    Ok(())
}

async fn find(config: AdapterConfig, collections: &[CollectionConfig], args: FindArgs) -> anyhow::Result<()> {
    let adapter = open(config, collections).await?;
    let page = adapter.find(args).await;
    adapter.destroy().await;

    println!("{}", serde_json::to_string_pretty(&page?)?);
    Ok(())
}

async fn drop_database(config: AdapterConfig, collections: &[CollectionConfig], yes: bool) -> anyhow::Result<()> {
    if !yes {
        anyhow::bail!("refusing to drop tables without --yes");
    }
    let adapter = open(config, collections).await?;
    let result = adapter.drop_database().await;
    adapter.destroy().await;

    let dropped = result?;
    println!("Dropped {} table(s).", dropped.len());
    for table in dropped {
        println!("  {}", table);
    }
    Ok(())
}
