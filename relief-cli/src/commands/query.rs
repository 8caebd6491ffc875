use anyhow::{Context, Result};
use serde::Serialize;

use super::ServiceArgs;

#[derive(Serialize)]
struct ElevationResponse {
    lon: f64,
    lat: f64,
    elevation: Option<f64>,
}

pub fn run(args: ServiceArgs, lon: f64, lat: f64, json: bool) -> Result<()> {
    let service = super::build_service(args)?;

    let elevation = service
        .get_elevation(lon, lat)
        .context("Failed to get elevation")?;

    if json {
        let response = ElevationResponse {
            lon,
            lat,
            elevation,
        };
        println!("{}", serde_json::to_string(&response)?);
    } else {
        match elevation {
            Some(elevation) => println!("{:.2}", elevation),
            None => println!("no data"),
        }
    }

    Ok(())
}
