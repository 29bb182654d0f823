//! spot_picker - maintain the spot coordinate store
//!
//! The store is the JSON list of spot top-left corners read by `parkwatch`.
//! `add` appends a spot, `remove` drops every spot containing a point, and
//! `grid` lays out evenly spaced rows.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use parkwatch::{SpotSize, SpotStore, SPOT_HEIGHT, SPOT_WIDTH};

#[derive(Parser, Debug)]
#[command(name = "spot_picker", about = "Maintain the parking spot coordinate store")]
struct Args {
    /// Coordinate store path.
    #[arg(long, env = "PARKWATCH_SPOT_STORE", default_value = "spots.json")]
    store: PathBuf,
    /// Spot width used for hit-testing and grid spacing.
    #[arg(long, default_value_t = SPOT_WIDTH)]
    width: u32,
    /// Spot height used for hit-testing and grid spacing.
    #[arg(long, default_value_t = SPOT_HEIGHT)]
    height: u32,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an empty store
    Init {
        /// Overwrite an existing store.
        #[arg(long)]
        force: bool,
    },

    /// Print every spot with its identity
    List,

    /// Append a spot with its top-left corner at (X, Y)
    Add { x: u32, y: u32 },

    /// Remove every spot whose rectangle contains (X, Y)
    Remove { x: u32, y: u32 },

    /// Append `rows` x `cols` spots starting at the origin
    Grid {
        #[arg(long)]
        rows: u32,
        #[arg(long)]
        cols: u32,
        #[arg(long, default_value_t = 0)]
        origin_x: u32,
        #[arg(long, default_value_t = 0)]
        origin_y: u32,
        /// Horizontal gap between spots.
        #[arg(long, default_value_t = 2)]
        gap_x: u32,
        /// Vertical gap between rows.
        #[arg(long, default_value_t = 8)]
        gap_y: u32,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.width == 0 || args.height == 0 {
        return Err(anyhow!("spot width and height must be non-zero"));
    }
    let size = SpotSize {
        width: args.width,
        height: args.height,
    };

    match args.command {
        Command::Init { force } => cmd_init(&args.store, force),
        Command::List => cmd_list(&args.store, size),
        Command::Add { x, y } => cmd_add(&args.store, x, y),
        Command::Remove { x, y } => cmd_remove(&args.store, x, y, size),
        Command::Grid {
            rows,
            cols,
            origin_x,
            origin_y,
            gap_x,
            gap_y,
        } => cmd_grid(
            &args.store,
            size,
            (rows, cols),
            (origin_x, origin_y),
            (gap_x, gap_y),
        ),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(anyhow!(
            "{} already exists (use --force to overwrite)",
            path.display()
        ));
    }
    SpotStore::new(path).save()?;
    println!("created empty store {}", path.display());
    Ok(())
}

fn cmd_list(path: &Path, size: SpotSize) -> Result<()> {
    let store = SpotStore::load(path)?;
    for spot in store.layout(size).spots() {
        println!(
            "{}: ({}, {}) {}x{}",
            spot.id, spot.x, spot.y, spot.width, spot.height
        );
    }
    println!("{} spots", store.len());
    Ok(())
}

fn cmd_add(path: &Path, x: u32, y: u32) -> Result<()> {
    let mut store = SpotStore::load(path)?;
    let id = store.add(x, y);
    store.save()?;
    println!("added {} at ({}, {})", id, x, y);
    Ok(())
}

fn cmd_remove(path: &Path, x: u32, y: u32, size: SpotSize) -> Result<()> {
    let mut store = SpotStore::load(path)?;
    let removed = store.remove_at(x, y, size);
    if removed.is_empty() {
        println!("no spot contains ({}, {})", x, y);
        return Ok(());
    }
    store.save()?;
    for (sx, sy) in &removed {
        println!("removed spot at ({}, {})", sx, sy);
    }
    log::info!("later spots were renumbered; {} remain", store.len());
    Ok(())
}

fn cmd_grid(
    path: &Path,
    size: SpotSize,
    (rows, cols): (u32, u32),
    (origin_x, origin_y): (u32, u32),
    (gap_x, gap_y): (u32, u32),
) -> Result<()> {
    if rows == 0 || cols == 0 {
        return Err(anyhow!("rows and cols must be >= 1"));
    }
    let positions = grid_positions(size, (rows, cols), (origin_x, origin_y), (gap_x, gap_y))?;
    let mut store = if path.exists() {
        SpotStore::load(path)?
    } else {
        SpotStore::new(path)
    };
    for &(x, y) in &positions {
        store.add(x, y);
    }
    store.save()?;
    println!(
        "added {} spots, {} total in {}",
        positions.len(),
        store.len(),
        path.display()
    );
    Ok(())
}

/// Top-left corners of a `rows` x `cols` grid, row by row. Every spot must lie
/// inside the u32 coordinate range.
fn grid_positions(
    size: SpotSize,
    (rows, cols): (u32, u32),
    (origin_x, origin_y): (u32, u32),
    (gap_x, gap_y): (u32, u32),
) -> Result<Vec<(u32, u32)>> {
    let step_x = size
        .width
        .checked_add(gap_x)
        .ok_or_else(|| anyhow!("spot width {} plus gap {} overflows", size.width, gap_x))?;
    let step_y = size
        .height
        .checked_add(gap_y)
        .ok_or_else(|| anyhow!("spot height {} plus gap {} overflows", size.height, gap_y))?;
    rows.checked_mul(cols)
        .ok_or_else(|| anyhow!("{} rows of {} spots is too many", rows, cols))?;

    let corner = |origin: u32, index: u32, step: u32, extent: u32| {
        index
            .checked_mul(step)
            .and_then(|offset| origin.checked_add(offset))
            .filter(|start| start.checked_add(extent).is_some())
    };
    let mut positions = Vec::new();
    for row in 0..rows {
        let y = corner(origin_y, row, step_y, size.height)
            .ok_or_else(|| anyhow!("grid overflows at row {}", row))?;
        for col in 0..cols {
            let x = corner(origin_x, col, step_x, size.width)
                .ok_or_else(|| anyhow!("grid overflows at column {}", col))?;
            positions.push((x, y));
        }
    }
    Ok(positions)
}
