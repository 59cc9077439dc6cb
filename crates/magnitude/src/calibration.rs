use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{MagnitudeError, Result};

pub const MIN_DISTANCE_DEG: f64 = 5.0;
pub const MAX_DISTANCE_DEG: f64 = 108.0;
pub const MIN_DEPTH_KM: f64 = 0.0;
pub const MAX_DEPTH_KM: f64 = 800.0;

/// Distance and depth dependent term added to the amplitude magnitude.
pub trait DistanceCorrection: Send + Sync {
	fn correction(&self, distance_deg: f64, depth_km: f64) -> Option<f64>;
}

impl<F> DistanceCorrection for F
where
	F: Fn(f64, f64) -> Option<f64> + Send + Sync,
{
	fn correction(&self, distance_deg: f64, depth_km: f64) -> Option<f64> {
		self(distance_deg, depth_km)
	}
}

pub fn in_domain(distance_deg: f64, depth_km: f64) -> bool {
	(MIN_DISTANCE_DEG..=MAX_DISTANCE_DEG).contains(&distance_deg) && (MIN_DEPTH_KM..=MAX_DEPTH_KM).contains(&depth_km)
}

/// Applies `correction` only inside the calibrated domain.
pub fn calibrated(correction: &dyn DistanceCorrection, distance_deg: f64, depth_km: f64) -> Option<f64> {
	if !in_domain(distance_deg, depth_km) {
		return None;
	}
	correction.correction(distance_deg, depth_km).filter(|value| value.is_finite())
}

/// Correction values on a distance x depth grid, interpolated bilinearly.
///
/// ```toml
/// distances = [5.0, 50.0, 108.0]
/// depths = [0.0, 800.0]
/// values = [[5.9, 6.0], [6.6, 6.7], [7.1, 7.3]]
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct CalibrationTable {
	distances: Vec<f64>,
	depths: Vec<f64>,
	/// `values[i][j]` belongs to `distances[i]` and `depths[j]`.
	values: Vec<Vec<f64>>,
}

impl CalibrationTable {
	pub fn new(distances: Vec<f64>, depths: Vec<f64>, values: Vec<Vec<f64>>) -> Result<Self> {
		let table = Self { distances, depths, values };
		table.validate()?;
		Ok(table)
	}

	pub fn load(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let content = fs::read_to_string(path)
			.map_err(|source| MagnitudeError::CalibrationIo { path: path.to_path_buf(), source })?;

		Self::parse(&content)
	}

	pub fn parse(content: &str) -> Result<Self> {
		let table: Self = toml::from_str(content)?;
		table.validate()?;
		Ok(table)
	}

	fn validate(&self) -> Result<()> {
		check_axis("distances", &self.distances)?;
		check_axis("depths", &self.depths)?;

		if self.values.len() != self.distances.len() {
			return Err(MagnitudeError::CalibrationTable(format!(
				"expected {} rows of values, got {}",
				self.distances.len(),
				self.values.len()
			)));
		}

		if let Some((i, row)) = self.values.iter().enumerate().find(|(_, row)| row.len() != self.depths.len()) {
			return Err(MagnitudeError::CalibrationTable(format!(
				"row {i} has {} values, expected {}",
				row.len(),
				self.depths.len()
			)));
		}

		Ok(())
	}

	fn interpolate(&self, distance_deg: f64, depth_km: f64) -> Option<f64> {
		let (i, tx) = locate(&self.distances, distance_deg)?;
		let (j, ty) = locate(&self.depths, depth_km)?;

		let v00 = self.values[i][j];
		let v01 = self.values[i][j + 1];
		let v10 = self.values[i + 1][j];
		let v11 = self.values[i + 1][j + 1];

		let near = (v01 - v00).mul_add(ty, v00);
		let far = (v11 - v10).mul_add(ty, v10);
		Some((far - near).mul_add(tx, near))
	}
}

impl DistanceCorrection for CalibrationTable {
	fn correction(&self, distance_deg: f64, depth_km: f64) -> Option<f64> {
		self.interpolate(distance_deg, depth_km)
	}
}

fn check_axis(name: &str, axis: &[f64]) -> Result<()> {
	if axis.len() < 2 {
		return Err(MagnitudeError::CalibrationTable(format!("{name} needs at least two points")));
	}
	if axis.windows(2).any(|pair| pair[0] >= pair[1]) {
		return Err(MagnitudeError::CalibrationTable(format!("{name} must be strictly increasing")));
	}
	Ok(())
}

/// Lower cell index and fractional position of `x` on `axis`; `None` outside the axis.
fn locate(axis: &[f64], x: f64) -> Option<(usize, f64)> {
	let first = *axis.first()?;
	let last = *axis.last()?;
	if !(first..=last).contains(&x) {
		return None;
	}

	let upper = axis.partition_point(|&v| v <= x).clamp(1, axis.len() - 1);
	let lower = upper - 1;
	Some((lower, (x - axis[lower]) / (axis[upper] - axis[lower])))
}

#[cfg(test)]
mod tests {
	use super::*;

	const TABLE: &str = r"
		distances = [5.0, 50.0, 108.0]
		depths = [0.0, 800.0]
		values = [[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]
	";

	#[test]
	fn grid_points_and_midpoints() {
		let table = CalibrationTable::parse(TABLE).unwrap();

		assert!((table.correction(5.0, 0.0).unwrap() - 1.0).abs() < 1e-12);
		assert!((table.correction(108.0, 800.0).unwrap() - 6.0).abs() < 1e-12);
		assert!((table.correction(50.0, 400.0).unwrap() - 3.5).abs() < 1e-12);
		assert!((table.correction(27.5, 0.0).unwrap() - 2.0).abs() < 1e-12);
	}

	#[test]
	fn domain_gate() {
		let table = CalibrationTable::parse(TABLE).unwrap();

		assert!(calibrated(&table, 30.0, 10.0).is_some());
		assert!(calibrated(&table, 4.9, 10.0).is_none());
		assert!(calibrated(&table, 108.1, 10.0).is_none());
		assert!(calibrated(&table, 30.0, -1.0).is_none());
		assert!(calibrated(&table, 30.0, 800.5).is_none());
	}

	#[test]
	fn gate_applies_to_any_correction() {
		let constant = |_: f64, _: f64| Some(0.3);
		assert_eq!(calibrated(&constant, 2.0, 10.0), None);
		assert_eq!(calibrated(&constant, 20.0, 10.0), Some(0.3));

		let broken = |_: f64, _: f64| Some(f64::NAN);
		assert_eq!(calibrated(&broken, 20.0, 10.0), None);
	}

	#[test]
	fn rejects_malformed_tables() {
		assert!(CalibrationTable::new(vec![5.0], vec![0.0, 1.0], vec![vec![1.0, 1.0]]).is_err());
		assert!(CalibrationTable::new(vec![5.0, 4.0], vec![0.0, 1.0], vec![vec![1.0, 1.0]; 2]).is_err());
		assert!(CalibrationTable::new(vec![5.0, 6.0], vec![0.0, 1.0], vec![vec![1.0]; 2]).is_err());
		assert!(CalibrationTable::new(vec![5.0, 6.0], vec![0.0, 1.0], vec![vec![1.0, 1.0]]).is_err());
		assert!(CalibrationTable::parse("distances = 3").is_err());
	}

	#[test]
	fn example_table_is_valid() {
		let table = CalibrationTable::parse(include_str!("../../../calibration.example.toml")).unwrap();
		assert!((table.correction(50.0, 0.0).unwrap() - 6.6).abs() < 1e-12);
	}

	#[test]
	fn locate_cells() {
		let axis = [0.0, 10.0, 20.0];
		assert_eq!(locate(&axis, 0.0), Some((0, 0.0)));
		assert_eq!(locate(&axis, 15.0), Some((1, 0.5)));
		assert_eq!(locate(&axis, 20.0), Some((1, 1.0)));
		assert_eq!(locate(&axis, 21.0), None);
	}
}
