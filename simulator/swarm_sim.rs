// Swarm Simulator - run robot swarm scenarios from YAML
//
//   swarm_sim scenarios/hello_index.yaml
//   swarm_sim scenarios/ --seed 0x0102...

mod swarm;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use log::info;
use simple_logger::SimpleLogger;
use swarm::{SwarmRunner, SwarmSimConfig};

const USAGE: &str = "usage: swarm_sim <scenario.yaml | dir> [--seed HEX]";

#[derive(Debug, serde::Deserialize)]
struct ScenarioFile {
    #[serde(default)]
    meta: ScenarioMeta,

    /// Anything missing keeps its default
    #[serde(default)]
    config: SwarmSimConfig,
}

#[derive(Debug, Default, serde::Deserialize)]
struct ScenarioMeta {
    name: Option<String>,
    description: Option<String>,
}

struct Args {
    target: PathBuf,
    seed: Option<[u8; 32]>,
}

fn main() {
    SimpleLogger::new()
        .with_level(log::LevelFilter::Warn)
        .env()
        .init()
        .unwrap();

    let args = parse_args(env::args().skip(1)).unwrap_or_else(|e| {
        eprintln!("{}\n{}", e, USAGE);
        process::exit(1);
    });

    let scenarios = scenario_paths(&args.target).unwrap_or_else(|e| {
        eprintln!("{}: {}", args.target.display(), e);
        process::exit(1);
    });

    let total = scenarios.len();
    for (i, path) in scenarios.iter().enumerate() {
        if total > 1 {
            println!("\n[{}/{}] {}", i + 1, total, path.display());
        }
        if let Err(e) = run_scenario(path, args.seed) {
            eprintln!("{}: {}", path.display(), e);
            process::exit(1);
        }
    }
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args, String> {
    let target = args.next().ok_or("missing scenario path")?;

    let seed = match args.next().as_deref() {
        None => None,
        Some("--seed") => {
            let hex = args.next().ok_or("--seed needs a value")?;
            Some(parse_seed_hex(&hex).map_err(|e| format!("invalid seed {}: {}", hex, e))?)
        }
        Some(other) => return Err(format!("unexpected argument {}", other)),
    };

    Ok(Args {
        target: PathBuf::from(target),
        seed,
    })
}

/// The file itself, or every `.yaml`/`.yml` in the directory, sorted
fn scenario_paths(target: &Path) -> Result<Vec<PathBuf>, String> {
    if target.is_file() {
        return Ok(vec![target.to_path_buf()]);
    }

    let entries = fs::read_dir(target).map_err(|e| e.to_string())?;
    let mut paths: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            matches!(
                path.extension().and_then(|s| s.to_str()),
                Some("yaml") | Some("yml")
            )
        })
        .collect();
    paths.sort();

    if paths.is_empty() {
        return Err("no scenario files".to_string());
    }
    Ok(paths)
}

fn run_scenario(path: &Path, seed: Option<[u8; 32]>) -> Result<(), Box<dyn std::error::Error>> {
    let scenario: ScenarioFile = serde_yaml::from_str(&fs::read_to_string(path)?)?;
    scenario.config.arena.validate()?;

    let name = scenario.meta.name.unwrap_or_else(|| {
        path.file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("scenario")
            .to_string()
    });
    println!("== {} ==", name);
    if let Some(desc) = &scenario.meta.description {
        println!("{}", desc.trim_end());
    }

    let mut config = scenario.config;
    config.seed = seed;

    println!(
        "{} robots, {} ticks, {:?} consensus, update {}",
        config.num_robots,
        config.ticks,
        config.node.consensus,
        config.contract.update.as_deref().unwrap_or("none")
    );
    info!("running {}", name);

    SwarmRunner::new(config).run().print_summary();
    Ok(())
}

fn parse_seed_hex(hex: &str) -> Result<[u8; 32], std::num::ParseIntError> {
    let hex = hex.strip_prefix("0x").unwrap_or(hex);
    let mut seed = [0u8; 32];

    for (byte, pair) in seed.iter_mut().zip(hex.as_bytes().chunks(2)) {
        *byte = u8::from_str_radix(&String::from_utf8_lossy(pair), 16)?;
    }

    Ok(seed)
}
