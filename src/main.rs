use std::env;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::info;

use hypmix::config::{load_config, Config};
use hypmix::io::{list_models, load_model_result};
use hypmix::render::save_quicklooks;

const USAGE: &str = "\
usage:
  hypmix list <results.parquet>
  hypmix summary <results.parquet> <model-id>
  hypmix render <results.parquet> <model-id> <out-dir> [config.json]";

fn main() {
    env_logger::init();

    if let Err(err) = run(env::args().skip(1).collect()) {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn run(args: Vec<String>) -> Result<()> {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    match args.as_slice() {
        ["list", file] => {
            for id in list_models(Path::new(file))? {
                println!("{id}");
            }
        }
        ["summary", file, model_id] => {
            let result = load_model_result(Path::new(file), model_id)?;
            let json = serde_json::to_string_pretty(&result.summary())
                .context("serializing model summary")?;
            println!("{json}");
        }
        ["render", file, model_id, out_dir, rest @ ..] if rest.len() <= 1 => {
            let config = match rest.first() {
                Some(path) => load_config(Path::new(path))?,
                None => Config::default(),
            };
            let result = load_model_result(Path::new(file), model_id)?;
            let written = save_quicklooks(&result, &PathBuf::from(out_dir), &config.render)?;
            for path in &written {
                println!("{}", path.display());
            }
            info!("rendered model '{model_id}'");
        }
        _ => bail!("{USAGE}"),
    }
    Ok(())
}
