use anyhow::{Context, Result};

use super::ServiceArgs;

pub fn add(args: ServiceArgs, filename: &str) -> Result<()> {
    let service = super::build_service(args)?;
    service
        .add_tile(filename)
        .with_context(|| format!("Failed to add tile {}", filename))?;
    println!("Added {}", filename);
    Ok(())
}

pub fn remove(args: ServiceArgs, filename: &str) -> Result<()> {
    let service = super::build_service(args)?;
    service
        .delete_tile(filename)
        .with_context(|| format!("Failed to remove tile {}", filename))?;
    println!("Removed {}", filename);
    Ok(())
}
