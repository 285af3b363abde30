//! Writes the control API's OpenAPI document.
//!
//! Usage:
//!   cargo run --bin generate_openapi > openapi.json
//!   cargo run --bin generate_openapi -- --output openapi.json

use std::{
    env, fs,
    io::{self, Write},
    path::PathBuf,
};

use anyhow::{Context, Result};
use sensor_publisher::api::handlers::ApiDoc;
use utoipa::OpenApi;

fn main() -> Result<()> {
    let json = ApiDoc::openapi()
        .to_pretty_json()
        .context("failed to serialise the OpenAPI document")?;

    match output_path(env::args().skip(1))? {
        Some(path) => {
            fs::write(&path, &json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("OpenAPI document written to {}", path.display());
        }
        None => io::stdout()
            .write_all(json.as_bytes())
            .context("failed to write to stdout")?,
    }
    Ok(())
}

/// `--output <path>` if given; stdout otherwise.
fn output_path(mut args: impl Iterator<Item = String>) -> Result<Option<PathBuf>> {
    let Some(arg) = args.next() else {
        return Ok(None);
    };
    if arg != "--output" {
        anyhow::bail!("unexpected argument: {arg:?}");
    }
    let path = args.next().context("--output needs a path")?;
    if let Some(extra) = args.next() {
        anyhow::bail!("unexpected argument: {extra:?}");
    }
    Ok(Some(PathBuf::from(path)))
}
