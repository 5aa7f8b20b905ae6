use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use reindex::{progress, recount, reindex_threads};
use server::{
    config::{Backend, Config},
    database::{RedisDatabase, init_redis},
    search::init_meilisearch,
};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Push every thread to the search index
    Threads,
    /// Rebuild vote counters from vote records
    Recount,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let config = Config::load()?;
    if config.backend == Backend::Memory {
        bail!("nothing to reindex with DATA_BACKEND=memory");
    }
    let db = RedisDatabase::new(init_redis(&config.redis_url).await?);

    match args.command {
        Command::Threads => {
            let index = init_meilisearch(&config.meili_url, config.meili_key.as_deref()).await?;
            let written = reindex_threads(&db, &index, &progress(0)?).await?;
            println!("\nIndexed {written} threads");
        }
        Command::Recount => {
            let drifted = recount(&db, &progress(0)?).await?;
            println!("\nFixed {drifted} drifted counters");
        }
    }

    Ok(())
}
