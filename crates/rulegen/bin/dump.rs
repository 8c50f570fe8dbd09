use std::{path::PathBuf, str::FromStr};

use anyhow::{bail, Context};
use rulegen::{compile, Config};

fn main() -> anyhow::Result<()> {
    let level = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_owned());
    let level = log::LevelFilter::from_str(&level)
        .with_context(|| format!("Invalid RUST_LOG level `{level}`"))?;

    simplelog::TermLogger::init(
        level,
        simplelog::ConfigBuilder::new()
            .set_time_format_custom(&[])
            .build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Never,
    )?;

    let mut args = std::env::args().skip(1);
    let mut config_path = None;
    let mut reserved_path = None;
    let mut specs = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config_path = Some(args.next().context("--config expects a file")?),
            "--reserved" => reserved_path = Some(args.next().context("--reserved expects a file")?),
            _ => specs.push(PathBuf::from(arg)),
        }
    }

    if specs.is_empty() {
        bail!("Usage: dump [--config FILE] [--reserved FILE] SPEC...");
    }

    let config = match config_path {
        Some(path) => {
            let src = read(path.as_ref())?;
            Config::from_json(&src).with_context(|| format!("Failed to load config `{path}`"))?
        }
        None => Config::default(),
    };

    let reserved = reserved_path.map(|p| read(p.as_ref())).transpose()?;

    let mut sources = Vec::new();
    for path in &specs {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .with_context(|| format!("Invalid spec file name `{}`", path.display()))?
            .to_owned();
        sources.push((name, read(path)?));
    }
    let categories: Vec<(&str, &str)> = sources
        .iter()
        .map(|(name, src)| (name.as_str(), src.as_str()))
        .collect();

    let output = compile(config, reserved.as_deref(), &categories)?;
    log::info!(
        "{} tables, {} top rules, {} actions",
        output.table_count(),
        output.top_rules.len(),
        output.actions.len()
    );

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn read(path: &std::path::Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read `{}`", path.display()))
}
