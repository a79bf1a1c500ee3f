use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::Result;

use crate::ranking::RankingRow;

/// Writes the run's rows as a pretty-printed JSON array.
pub fn export_json(rows: &[RankingRow], path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(rows)?;

    let mut file = File::create(path)?;
    file.write_all(json.as_bytes())?;

    Ok(())
}
