use crate::model::ScanResults;
use anyhow::Result;

pub fn print_json(results: &ScanResults) -> Result<()> {
    let json = serde_json::to_string_pretty(results)?;
    println!("{}", json);
    Ok(())
}
