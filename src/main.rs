use std::path::PathBuf;

use actix_web::{middleware, web, App, HttpServer};
use clap::{Parser, Subcommand};

use amino_tracker::cache::ProfileCache;
use amino_tracker::config::Config;
use amino_tracker::guard::StoreGuard;
use amino_tracker::ingest::{self, Pipeline, RawRow};
use amino_tracker::query::MysqlStore;
use amino_tracker::routes::{self, AppState};
use amino_tracker::usda::{self, UsdaDataset, UsdaSource};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser)]
#[command(name = "amino-tracker", about = "Dietary amino acid tracker")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the conversion and recommendation API
    Serve,
    /// Load a CSV export (source, food_name, amino_acid, value) as one batch
    Ingest {
        /// Path to the CSV file
        csv: PathBuf,
    },
    /// Load an extracted USDA FoodData Central CSV release as one batch
    IngestUsda {
        /// Directory holding nutrient.csv, food_nutrient.csv and food.csv
        dir: PathBuf,
        /// Source key the release is recorded under
        #[arg(long, default_value = usda::DEFAULT_SOURCE_KEY)]
        source: String,
        #[arg(long, default_value = usda::DEFAULT_CITATION)]
        citation: String,
    },
}

fn main() -> Result<(), BoxError> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let store = MysqlStore::connect(&config.database_url, config.db_pool_max)?;
    let guard = StoreGuard::new(config.breaker_failures, config.breaker_backoff);
    let cache = match &config.redis_url {
        Some(url) => ProfileCache::connect(url, config.cache_ttl_seconds)?,
        None => {
            log::info!("REDIS_URL not set, profile cache disabled");
            ProfileCache::disabled()
        }
    };

    match cli.command {
        Command::Serve => serve(&config.bind_addr, AppState { store, guard, cache }),
        Command::Ingest { csv } => {
            let rows = ingest::read_csv(&csv)?;
            load(&store, &guard, &cache, &rows)
        }
        Command::IngestUsda {
            dir,
            source,
            citation,
        } => {
            let rows = UsdaDataset::locate(&dir)?.rows(&UsdaSource {
                key: source,
                citation,
            })?;
            load(&store, &guard, &cache, &rows)
        }
    }
}

fn load(
    store: &MysqlStore,
    guard: &StoreGuard,
    cache: &ProfileCache,
    rows: &[RawRow],
) -> Result<(), BoxError> {
    let report = Pipeline::new(store, guard).ingest(rows)?;
    cache.invalidate(report.touched_foods.iter().copied());
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn serve(bind_addr: &str, state: AppState<MysqlStore>) -> Result<(), BoxError> {
    let state = web::Data::new(state);
    let bind_addr = bind_addr.to_string();

    actix_web::rt::System::new().block_on(async move {
        log::info!("starting HTTP server at http://{bind_addr}");

        HttpServer::new(move || {
            App::new()
                .app_data(state.clone())
                .wrap(middleware::Logger::default())
                .configure(routes::configure::<MysqlStore>)
        })
        .bind(bind_addr.as_str())?
        .run()
        .await
    })?;
    Ok(())
}
