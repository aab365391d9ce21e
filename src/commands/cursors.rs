use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::artifact::load_artifact;
use crate::db::KeyValueStore;
use crate::error::{AmpooseError, Result};
use crate::export::{export_resume_cursors, import_resume_cursors};

use super::util::open_store;

pub struct CursorsOptions {
    pub store_path: PathBuf,
}

/// Cursors are filed under the profile the current calibration targets.
fn calibrated_collection(store: &dyn KeyValueStore) -> Result<String> {
    load_artifact(store)?
        .and_then(|artifact| artifact.collection_id())
        .ok_or_else(|| {
            AmpooseError::InvalidState(
                "no calibrated profile; run `ampoose calibrate` first".to_string(),
            )
        })
}

/// Write the resume-cursor transfer payload to `output`, or stdout.
pub fn run_cursors_export(options: &CursorsOptions, output: Option<&Path>) -> Result<()> {
    let store = open_store(&options.store_path)?;
    let collection_id = calibrated_collection(store.as_ref())?;
    let payload = export_resume_cursors(store.as_ref(), &collection_id)?;
    let text = serde_json::to_string_pretty(&payload)?;

    match output {
        Some(path) => {
            fs::write(path, text)?;
            println!(
                "Exported {} resume cursors for {} to {}",
                payload.resume_cursors.len(),
                collection_id,
                path.display()
            );
        }
        None => println!("{text}"),
    }
    Ok(())
}

pub fn run_cursors_import(options: &CursorsOptions, input: &Path) -> Result<()> {
    let text = fs::read_to_string(input)?;
    let raw: Value = serde_json::from_str(&text).map_err(|err| {
        AmpooseError::InvalidArgs(format!("{} is not JSON: {err}", input.display()))
    })?;
    let store = open_store(&options.store_path)?;
    let (collection_id, count) = import_resume_cursors(store.as_ref(), &raw)?;
    println!("Imported resume cursors for {collection_id}; {count} stored");
    Ok(())
}
