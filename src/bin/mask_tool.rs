//! Build CSU slit masks and push them to a simulated CSU.
//!
//! `<MASK>` is `OPEN`, `RANDOM`, a long slit such as `0.7x46`, or the path to a decoded
//! mask design in JSON.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;

use mosfire_csu::csu::{Csu, CsuOptions, CSU_SERVICE};
use mosfire_csu::keyword_hal_mock::KeywordServiceMock;
use mosfire_csu::mask::{Mask, NUM_BARS};
use mosfire_csu::mask_builder::MaskGeometryBuilder;
use mosfire_csu::mask_design::Design;
use mosfire_csu::mask_spec::MaskSpec;

#[derive(Parser, Debug)]
#[clap(name = "mask_tool")]
struct Opts {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a mask and print its slit table.
    Build {
        mask: String,

        /// Seed for RANDOM masks.
        #[clap(long)]
        seed: Option<u64>,

        #[clap(long)]
        json: bool,
    },
    /// Set up a mask on a simulated CSU, logging every keyword write.
    Setup {
        mask: String,

        #[clap(long)]
        seed: Option<u64>,

        /// Also execute the move and wait for it to finish.
        #[clap(long)]
        execute: bool,

        /// JSON file overriding CSU timings.
        #[clap(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let opts: Opts = Opts::parse();

    match opts.command {
        Command::Build { mask, seed, json } => {
            let mask = build_mask(&load_spec(&mask)?, seed)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&mask)?);
            } else {
                print_mask(&mask);
            }
        }
        Command::Setup { mask, seed, execute, config } => {
            let options = match config {
                Some(path) => {
                    let text = fs::read_to_string(&path)
                        .with_context(|| format!("read config {}", path.display()))?;
                    CsuOptions::from_json(&text)
                        .with_context(|| format!("parse config {}", path.display()))?
                }
                None => CsuOptions::default(),
            };
            let mask = build_mask(&load_spec(&mask)?, seed)?;
            let move_timeout = options.move_timeout();
            let mut csu = Csu::new(simulated_hal(), options.without_settling());
            csu.setup_mask(&mask)?;
            if execute {
                csu.execute_mask()?;
                csu.wait_for_ready(move_timeout)?;
            }
            info!("Sent {} keyword writes", csu.hal().writes().len());
        }
    }
    Ok(())
}

fn load_spec(input: &str) -> anyhow::Result<MaskSpec> {
    if Path::new(input).is_file() {
        let json = fs::read_to_string(input).with_context(|| format!("read design {input}"))?;
        return Ok(MaskSpec::Design(Design::from_json(&json)?));
    }
    Ok(input.parse()?)
}

fn build_mask(spec: &MaskSpec, seed: Option<u64>) -> anyhow::Result<Mask> {
    let mask = match seed {
        Some(seed) => MaskGeometryBuilder::build_with_rng(spec, &mut StdRng::seed_from_u64(seed))?,
        None => MaskGeometryBuilder::build(spec)?,
    };
    Ok(mask)
}

fn simulated_hal() -> KeywordServiceMock {
    let mut hal = KeywordServiceMock::default()
        .with_value(CSU_SERVICE, "CSUREADY", "2")
        .with_value(CSU_SERVICE, "CSUSTAT", "Setup complete.");
    for bar in 1..=NUM_BARS {
        hal = hal.with_value(CSU_SERVICE, &format!("B{bar:02}STAT"), "OK");
    }
    hal
}

fn print_mask(mask: &Mask) {
    println!("Mask: {}", mask.name());
    if let Some(pa) = mask.position_angle() {
        println!("PA: {pa:.2}");
    }
    if let Some(center) = mask.pointing_center() {
        println!("Center: {} {}", center.ra, center.dec);
    }
    println!("{:>4} {:>4} {:>10} {:>4} {:>10} {:>9} {:>8}  target",
        "slit", "lbar", "left_mm", "rbar", "right_mm", "center\"", "width\"");
    for slit in mask.slit_table() {
        println!("{:>4} {:>4} {:>10.3} {:>4} {:>10.3} {:>9.3} {:>8.3}  {}",
            slit.slit_number(),
            slit.left_bar_number(),
            slit.left_bar_position_mm(),
            slit.right_bar_number(),
            slit.right_bar_position_mm(),
            slit.center_position_arcsec(),
            slit.width_arcsec(),
            slit.target());
    }
    if let Some(alignment_box) = mask.alignment_box() {
        println!("Alignment box on slit {}: {:.3} / {:.3} mm",
            alignment_box.mech_slit_number,
            alignment_box.left_bar_position_mm,
            alignment_box.right_bar_position_mm);
    }
    for star in mask.science_targets() {
        println!("Science target {}: {} {}", star.name, star.ra, star.dec);
    }
}
