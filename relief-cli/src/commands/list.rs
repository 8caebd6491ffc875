use anyhow::Result;

use super::ServiceArgs;

pub fn run(args: ServiceArgs, json: bool) -> Result<()> {
    let service = super::build_service(args)?;
    let records = service.records();

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No tiles in catalog");
        return Ok(());
    }

    println!("{:<24} {:>24} {:>24}", "TILE", "LONGITUDE", "LATITUDE");
    println!("{}", "-".repeat(74));
    for record in &records {
        println!(
            "{:<24} {:>10.4} to {:>9.4} {:>10.4} to {:>9.4}",
            record.filename, record.left, record.right, record.bottom, record.top
        );
    }

    println!();
    println!("Summary:");
    println!("  Total tiles: {}", records.len());
    println!("  Open handles: {}", service.open_tile_count());

    Ok(())
}
