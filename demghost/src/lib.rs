//! # demghost
//!
//! Command-line front end for [`demghost_core`]: reads the base and ghost
//! demos, merges them and writes the result.
//!
//! ## Command-Line Interface
//!
//! See [`Cli`] for all available options. Key options:
//!
//! - `-o, --output` - Merged demo (default: `out.dem`)
//! - `-v` / `-q` - Increase or decrease verbosity
//! - `--max-entities` - Entity limit of the client the demo is meant for
//! - `--trajectory-json` - Dump every ghost's entity id and path as JSON

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use demghost_core::protocol::{lossy, DEFAULT_MAX_ENTITIES, MAX_MESSAGE_LEN};
use demghost_core::{GhostPlacement, MergeOptions, Merged, Merger};
use miette::{IntoDiagnostic, Result, WrapErr};
use serde::Serialize;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Clone, Debug)]
#[command(version, about = "Merge ghost runs from Quake demos into a base demo")]
pub struct Cli {
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,

    /// Where to write the merged demo
    #[arg(short, long, default_value = "out.dem")]
    pub output: PathBuf,

    /// Entity limit of the client the demo will be played in
    #[arg(long, default_value_t = DEFAULT_MAX_ENTITIES)]
    pub max_entities: usize,

    /// Also write each ghost's entity id and trajectory to this file
    #[arg(long)]
    pub trajectory_json: Option<PathBuf>,

    /// Demo whose timeline the ghosts are replayed in
    pub base: PathBuf,

    /// Demos whose player becomes a ghost, in injection order
    #[arg(required = true)]
    pub ghosts: Vec<PathBuf>,
}

impl Cli {
    pub fn merge_options(&self) -> MergeOptions {
        MergeOptions {
            max_entities: self.max_entities,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TrajectoryExport<'a> {
    base_map: &'a str,
    ghosts: &'a [GhostPlacement],
}

fn read_demo(path: &Path) -> Result<Vec<u8>> {
    fs::read(path)
        .into_diagnostic()
        .wrap_err_with(|| format!("Failed to read {}", path.display()))
}

/// Merge the demos named in `cli` and write the output files
pub fn run(cli: &Cli) -> Result<Merged> {
    log::info!("Parsing base demo {}", cli.base.display());
    let base = read_demo(&cli.base)?;
    let mut merger = Merger::new(&base, cli.merge_options()).into_diagnostic()?;
    drop(base);

    let base_map = {
        let summary = merger.base_summary();
        let info = &summary.server_info;
        let map = lossy(info.map().unwrap_or(info.level_name.as_slice()));
        log::info!(
            "Base demo: {} ({}), highest entity id {}",
            map,
            lossy(&info.level_name),
            summary.max_entity_id
        );
        map
    };

    for path in &cli.ghosts {
        log::info!("Parsing ghost demo {}", path.display());
        let bytes = read_demo(path)?;
        let placement = merger.add_ghost(&bytes).into_diagnostic()?;
        log::info!(
            "Ghost #{}: entity {} becomes entity {}, {} samples",
            placement.index + 1,
            placement.track.source_entity,
            placement.track.entity,
            placement.track.trajectory.len()
        );
        if placement.map != base_map {
            log::warn!(
                "Ghost #{} was recorded on {}, base demo is {}",
                placement.index + 1,
                placement.map,
                base_map
            );
        }
        if placement.track.trajectory.is_empty() {
            log::warn!("Ghost #{} never moves", placement.index + 1);
        }
    }

    log::info!("Converting demo");
    let merged = merger.finish().into_diagnostic()?;
    for block in &merged.oversized_blocks {
        log::warn!(
            "Block {} is {} bytes, classic clients only accept {}",
            block.index,
            block.len,
            MAX_MESSAGE_LEN
        );
    }

    log::info!("Writing {}", cli.output.display());
    fs::write(&cli.output, &merged.bytes)
        .into_diagnostic()
        .wrap_err_with(|| format!("Failed to write {}", cli.output.display()))?;

    if let Some(path) = &cli.trajectory_json {
        let export = TrajectoryExport {
            base_map: &merged.map,
            ghosts: &merged.ghosts,
        };
        let json = serde_json::to_string_pretty(&export).into_diagnostic()?;
        fs::write(path, json)
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to write {}", path.display()))?;
        log::debug!("Trajectories written to {}", path.display());
    }

    Ok(merged)
}
