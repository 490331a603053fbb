use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParkingSpot {
    pub id: String,
    pub name: String,
    pub address: String,
    pub available: u32,
    pub total: u32,
    pub price: f64,
    /// Distance from the user's search position, in kilometers.
    pub distance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub spot: ParkingSpot,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: String,
    pub price: f64,
}

/// Request body for `POST /parking/bookings/`.
#[derive(Debug, Clone, Serialize)]
pub struct BookingRequest {
    pub spot: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}
