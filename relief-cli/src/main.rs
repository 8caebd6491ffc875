use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

use commands::ServiceArgs;

/// Elevation tile CLI tool
#[derive(Parser)]
#[command(name = "relief")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory containing elevation tiles
    #[arg(short, long, env = "RELIEF_TILE_DIR", global = true)]
    tile_dir: Option<PathBuf>,

    /// Tile index location (defaults to tile-index.json in the tile directory)
    #[arg(short, long, env = "RELIEF_INDEX_PATH", global = true)]
    index: Option<PathBuf>,

    /// Directory of datum-shift support files
    #[arg(long, env = "RELIEF_DATUM_DIR", global = true)]
    datum_dir: Option<PathBuf>,

    /// Dataset handle idle TTL in milliseconds; 0 disables caching
    #[arg(
        short,
        long,
        env = "RELIEF_CACHE_TTL_MS",
        default_value = "60000",
        global = true
    )]
    cache_ttl_ms: i64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Query elevation for a single coordinate
    Query {
        /// Longitude in decimal degrees
        #[arg(long)]
        lon: f64,

        /// Latitude in decimal degrees
        #[arg(long)]
        lat: f64,

        /// Output result as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Fill elevations for points from a CSV file
    Fill {
        /// Input CSV file
        input: PathBuf,

        /// Output file (input stem plus _elevation.csv if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Column name for longitude
        #[arg(long, default_value = "lon")]
        lon_col: String,

        /// Column name for latitude
        #[arg(long, default_value = "lat")]
        lat_col: String,

        /// Column name for elevation (appended if absent)
        #[arg(long, default_value = "ele")]
        ele_col: String,

        /// Overwrite existing elevations where tiles have data
        #[arg(short, long)]
        force: bool,

        /// Leave the file untouched if any point already has an elevation
        #[arg(long)]
        skip_all_if_any_exist: bool,
    },

    /// List catalog tiles
    List {
        /// Output result as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Add a tile file from the tile directory to the catalog
    Add {
        /// Tile filename within the tile directory
        filename: String,
    },

    /// Remove a tile from the catalog and delete its file
    Remove {
        /// Tile filename within the tile directory
        filename: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let service = ServiceArgs {
        tile_dir: cli.tile_dir,
        index: cli.index,
        datum_dir: cli.datum_dir,
        cache_ttl_ms: cli.cache_ttl_ms,
    };

    match cli.command {
        Commands::Query { lon, lat, json } => commands::query::run(service, lon, lat, json),
        Commands::Fill {
            input,
            output,
            lon_col,
            lat_col,
            ele_col,
            force,
            skip_all_if_any_exist,
        } => commands::fill::run(
            service,
            input,
            output,
            &lon_col,
            &lat_col,
            &ele_col,
            force,
            skip_all_if_any_exist,
        ),
        Commands::List { json } => commands::list::run(service, json),
        Commands::Add { filename } => commands::tiles::add(service, &filename),
        Commands::Remove { filename } => commands::tiles::remove(service, &filename),
    }
}
