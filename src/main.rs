use std::rc::Rc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use zbucket::{IndexConfig, Point, Range, RocksStore, ZOrderIndex};

#[derive(Parser)]
#[command(name = "zbucket", about = "Z-order spatial index over a local store")]
struct Cli {
    /// Store root directory
    #[arg(long, default_value = "./zbucket-data")]
    path: String,
    /// Data table name
    #[arg(long, default_value = "points")]
    table: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Insert a point
    Put {
        x: u32,
        y: u32,
        #[arg(default_value_t = 0)]
        id: i64,
    },
    /// Print all points stored at a location
    Get { x: u32, y: u32 },
    /// Count the points inside a rectangle
    Count {
        xmin: i64,
        ymin: i64,
        xmax: i64,
        ymax: i64,
    },
    /// Print the k points nearest to a location
    Knn { x: u32, y: u32, k: usize },
    /// Dump the bucket partition
    Index,
    /// Delete the data and index tables
    Drop,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let store = Rc::new(RocksStore::open(&cli.path).context("open store")?);
    let index = ZOrderIndex::open(store, &cli.table, IndexConfig::default())
        .with_context(|| format!("open table {}", cli.table))?;

    match cli.command {
        Command::Put { x, y, id } => {
            index.insert(&Point::new(id, x, y))?;
        }
        Command::Get { x, y } => {
            for point in index.get(x, y)? {
                println!("{}\t{}\t{}", point.id, point.x, point.y);
            }
        }
        Command::Count {
            xmin,
            ymin,
            xmax,
            ymax,
        } => {
            let range_x = Range::new(xmin, xmax)?;
            let range_y = Range::new(ymin, ymax)?;
            let mut count = 0u64;
            for point in index.range_query(&range_x, &range_y)? {
                point?;
                count += 1;
            }
            println!("{}", count);
        }
        Command::Knn { x, y, k } => {
            for point in index.nearest_neighbors(x, y, k)? {
                println!("{}\t{}\t{}", point.id, point.x, point.y);
            }
        }
        Command::Index => {
            for (key, size) in index.buckets()? {
                println!("{}\t{}", key, size);
            }
        }
        Command::Drop => {
            index.drop_tables()?;
        }
    }
    Ok(())
}
