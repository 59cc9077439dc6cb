use crate::types::{Event, StationLocation};

/// Great-circle distance in degrees between two points on a sphere.
pub fn distance_degrees(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
	let (lat1, lon1, lat2, lon2) = (lat1.to_radians(), lon1.to_radians(), lat2.to_radians(), lon2.to_radians());

	// Vincenty form of the central angle, well conditioned from coincident to antipodal points
	let dlon = lon2 - lon1;
	let (sin1, cos1) = lat1.sin_cos();
	let (sin2, cos2) = lat2.sin_cos();
	let (sin_dlon, cos_dlon) = dlon.sin_cos();

	let y = (cos2 * sin_dlon).hypot(cos1.mul_add(sin2, -(sin1 * cos2 * cos_dlon)));
	let x = sin1.mul_add(sin2, cos1 * cos2 * cos_dlon);

	y.atan2(x).to_degrees()
}

pub fn epicentral_distance(event: &Event, station: &StationLocation) -> f64 {
	distance_degrees(event.latitude, event.longitude, station.latitude, station.longitude)
}
