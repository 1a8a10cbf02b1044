use anyhow::Result;
use std::path::Path;

use crate::state::knowledge;

/// Worker entry point: prints exactly one JSON line on success.
pub fn run(docs_dir: &Path, request_file: &Path) -> Result<()> {
    let result = knowledge::scan_request_file(docs_dir, request_file)?;
    println!("{}", serde_json::to_string(&result)?);
    Ok(())
}
