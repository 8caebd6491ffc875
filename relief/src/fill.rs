//! Batch elevation filling for track points.

use tracing::warn;

use crate::error::Result;
use crate::service::ElevationService;

/// A point that can carry an elevation, as stored in a track or route.
pub trait ElevationPoint {
    fn longitude(&self) -> f64;
    fn latitude(&self) -> f64;
    fn elevation(&self) -> Option<f64>;
    fn set_elevation(&mut self, elevation: Option<f64>);
}

/// Fills elevations for batches of points against an [`ElevationService`].
///
/// By default only points without an elevation are looked up, so values
/// already recorded by a GPS device survive. [`BatchFiller::force`] replaces
/// recorded values wherever a tile has data, and
/// [`BatchFiller::skip_all_if_any_exist`] leaves a batch alone entirely when
/// any of its points already carries a value.
pub struct BatchFiller<'a> {
    service: &'a ElevationService,
    force: bool,
    skip_all_if_any_exist: bool,
}

impl<'a> BatchFiller<'a> {
    pub fn new(service: &'a ElevationService) -> Self {
        Self {
            service,
            force: false,
            skip_all_if_any_exist: false,
        }
    }

    /// Overwrite recorded elevations where a tile has data. A point whose
    /// lookup finds no data keeps its recorded value.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Leave the whole batch untouched when any point already has an
    /// elevation. Takes precedence over [`BatchFiller::force`].
    pub fn skip_all_if_any_exist(mut self, skip: bool) -> Self {
        self.skip_all_if_any_exist = skip;
        self
    }

    /// Fill a batch of points.
    ///
    /// Fails only when the service itself is unavailable; a lookup error on
    /// an individual point is logged and treated as no data for that point.
    pub fn fill<P: ElevationPoint>(&self, points: &mut [P]) -> Result<()> {
        self.service.wait_until_ready()?;

        let existing = points.iter().filter(|p| p.elevation().is_some()).count();
        if self.skip_all_if_any_exist && existing > 0 {
            return Ok(());
        }
        if !self.force && existing == points.len() {
            return Ok(());
        }

        for point in points.iter_mut() {
            if !self.force && point.elevation().is_some() {
                continue;
            }
            let looked_up = match self.service.get_elevation(point.longitude(), point.latitude())
            {
                Ok(elevation) => elevation,
                Err(e) => {
                    warn!(
                        longitude = point.longitude(),
                        latitude = point.latitude(),
                        error = %e,
                        "elevation lookup failed for point"
                    );
                    None
                }
            };
            if self.force {
                // Only a real value may displace a recorded one.
                if looked_up.is_some() {
                    point.set_elevation(looked_up);
                }
            } else {
                point.set_elevation(looked_up);
            }
        }
        Ok(())
    }

    /// Fill each segment of a track independently; the batch policy applies
    /// per segment.
    pub fn fill_segments<P: ElevationPoint>(&self, segments: &mut [Vec<P>]) -> Result<()> {
        for segment in segments.iter_mut() {
            self.fill(segment)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{write_geotiff, TileSpec};
    use crate::tile::NO_DATA;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq)]
    struct TestPoint {
        longitude: f64,
        latitude: f64,
        elevation: Option<f64>,
    }

    impl TestPoint {
        fn new(longitude: f64, latitude: f64, elevation: Option<f64>) -> Self {
            Self {
                longitude,
                latitude,
                elevation,
            }
        }
    }

    impl ElevationPoint for TestPoint {
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

    /// One tile at 100 m over lon [-1, 0], lat [50, 51]; one all-no-data tile
    /// over lon [0, 1].
    fn service(tmp: &TempDir) -> ElevationService {
        write_geotiff(
            &tmp.path().join("a.tif"),
            &TileSpec::new(-1.0, 51.0, 0.1, 10, 10),
            |_, _| 100.0,
        );
        write_geotiff(
            &tmp.path().join("b.tif"),
            &TileSpec::new(0.0, 51.0, 0.1, 10, 10),
            |_, _| NO_DATA,
        );
        ElevationService::builder()
            .tile_dir(tmp.path())
            .build()
            .unwrap()
    }

    #[test]
    fn test_fills_only_missing_by_default() {
        let tmp = TempDir::new().unwrap();
        let service = service(&tmp);

        let mut points = vec![
            TestPoint::new(-0.5, 50.5, None),
            TestPoint::new(-0.5, 50.5, Some(42.0)),
            TestPoint::new(5.0, 5.0, None),
        ];
        BatchFiller::new(&service).fill(&mut points).unwrap();

        assert_eq!(points[0].elevation, Some(100.0));
        assert_eq!(points[1].elevation, Some(42.0));
        assert_eq!(points[2].elevation, None);
    }

    #[test]
    fn test_force_overwrites_only_where_data_exists() {
        let tmp = TempDir::new().unwrap();
        let service = service(&tmp);

        let mut points = vec![
            // Covered by data: recorded value is replaced.
            TestPoint::new(-0.5, 50.5, Some(42.0)),
            // Covered by the no-data tile: recorded value survives.
            TestPoint::new(0.5, 50.5, Some(42.0)),
            // Outside coverage: recorded value survives.
            TestPoint::new(5.0, 5.0, Some(42.0)),
        ];
        BatchFiller::new(&service)
            .force(true)
            .fill(&mut points)
            .unwrap();

        assert_eq!(points[0].elevation, Some(100.0));
        assert_eq!(points[1].elevation, Some(42.0));
        assert_eq!(points[2].elevation, Some(42.0));
    }

    #[test]
    fn test_skip_all_if_any_exist() {
        let tmp = TempDir::new().unwrap();
        let service = service(&tmp);

        let mut points = vec![
            TestPoint::new(-0.5, 50.5, None),
            TestPoint::new(-0.5, 50.5, Some(42.0)),
        ];
        // Overrides force.
        BatchFiller::new(&service)
            .force(true)
            .skip_all_if_any_exist(true)
            .fill(&mut points)
            .unwrap();

        assert_eq!(points[0].elevation, None);
        assert_eq!(points[1].elevation, Some(42.0));
    }

    #[test]
    fn test_skip_all_with_no_existing_values_still_fills() {
        let tmp = TempDir::new().unwrap();
        let service = service(&tmp);

        let mut points = vec![TestPoint::new(-0.5, 50.5, None)];
        BatchFiller::new(&service)
            .skip_all_if_any_exist(true)
            .fill(&mut points)
            .unwrap();

        assert_eq!(points[0].elevation, Some(100.0));
    }

    #[test]
    fn test_fully_filled_batch_is_untouched() {
        let tmp = TempDir::new().unwrap();
        let service = service(&tmp);

        let mut points = vec![
            TestPoint::new(-0.5, 50.5, Some(1.0)),
            TestPoint::new(-0.5, 50.5, Some(2.0)),
        ];
        let expected = points.clone();
        BatchFiller::new(&service).fill(&mut points).unwrap();
        assert_eq!(points, expected);
    }

    #[test]
    fn test_fill_segments_applies_policy_per_segment() {
        let tmp = TempDir::new().unwrap();
        let service = service(&tmp);

        let mut segments = vec![
            vec![TestPoint::new(-0.5, 50.5, None)],
            vec![
                TestPoint::new(-0.5, 50.5, None),
                TestPoint::new(-0.5, 50.5, Some(42.0)),
            ],
        ];
        BatchFiller::new(&service)
            .skip_all_if_any_exist(true)
            .fill_segments(&mut segments)
            .unwrap();

        // First segment had no values and is filled; the second is skipped
        // wholesale.
        assert_eq!(segments[0][0].elevation, Some(100.0));
        assert_eq!(segments[1][0].elevation, None);
        assert_eq!(segments[1][1].elevation, Some(42.0));
    }

    #[test]
    fn test_service_failure_propagates() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("absent");
        let service = ElevationService::builder()
            .tile_dir(&missing)
            .build()
            .unwrap();

        let mut points = vec![TestPoint::new(-0.5, 50.5, None)];
        assert!(BatchFiller::new(&service).fill(&mut points).is_err());
    }
}
