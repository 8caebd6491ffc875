use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use relief::{BatchFiller, ElevationPoint};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::time::Duration;

use super::ServiceArgs;

struct CsvPoint {
    longitude: f64,
    latitude: f64,
    elevation: Option<f64>,
    record: csv::StringRecord,
}

impl ElevationPoint for CsvPoint {
    fn longitude(&self) -> f64 {
        self.longitude
    }

    fn latitude(&self) -> f64 {
        self.latitude
    }

    fn elevation(&self) -> Option<f64> {
        self.elevation
    }

    fn set_elevation(&mut self, elevation: Option<f64>) {
        self.elevation = elevation;
    }
}

#[allow(clippy::too_many_arguments)]
pub fn run(
    args: ServiceArgs,
    input: PathBuf,
    output: Option<PathBuf>,
    lon_col: &str,
    lat_col: &str,
    ele_col: &str,
    force: bool,
    skip_all_if_any_exist: bool,
) -> Result<()> {
    let service = super::build_service(args)?;

    let file = File::open(&input).context("Failed to open input file")?;
    let mut reader = csv::Reader::from_reader(BufReader::new(file));

    // Find column indices
    let headers = reader.headers()?.clone();
    let lon_idx = headers
        .iter()
        .position(|h| h == lon_col)
        .with_context(|| format!("Column '{}' not found in CSV", lon_col))?;
    let lat_idx = headers
        .iter()
        .position(|h| h == lat_col)
        .with_context(|| format!("Column '{}' not found in CSV", lat_col))?;
    let ele_idx = headers.iter().position(|h| h == ele_col);

    let mut points = Vec::new();
    for record in reader.records() {
        let record = record?;
        let longitude: f64 = record
            .get(lon_idx)
            .context("Missing longitude")?
            .parse()
            .context("Invalid longitude")?;
        let latitude: f64 = record
            .get(lat_idx)
            .context("Missing latitude")?
            .parse()
            .context("Invalid latitude")?;
        let elevation = ele_idx
            .and_then(|i| record.get(i))
            .and_then(|v| v.parse().ok());
        points.push(CsvPoint {
            longitude,
            latitude,
            elevation,
            record,
        });
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message(format!("filling {} points", points.len()));
    pb.enable_steady_tick(Duration::from_millis(100));

    BatchFiller::new(&service)
        .force(force)
        .skip_all_if_any_exist(skip_all_if_any_exist)
        .fill(&mut points)
        .context("Failed to fill elevations")?;

    pb.finish_with_message("done");

    // Prepare output
    let output_path = output.unwrap_or_else(|| {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "points".to_string());
        input.with_file_name(format!("{}_elevation.csv", stem))
    });
    let output_file = File::create(&output_path).context("Failed to create output file")?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(output_file));

    // Write header, appending the elevation column when the input lacked one
    let mut new_headers: Vec<&str> = headers.iter().collect();
    if ele_idx.is_none() {
        new_headers.push(ele_col);
    }
    writer.write_record(&new_headers)?;

    for point in &points {
        let elevation = point
            .elevation
            .map(|e| format!("{:.2}", e))
            .unwrap_or_default();
        let mut new_record: Vec<&str> = point.record.iter().collect();
        match ele_idx {
            Some(i) => new_record[i] = &elevation,
            None => new_record.push(&elevation),
        }
        writer.write_record(&new_record)?;
    }
    writer.flush()?;

    println!("Output written to: {}", output_path.display());
    Ok(())
}
