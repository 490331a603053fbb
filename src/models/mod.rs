//! Domain models shared across the client.
//!
//! Wire-shape structs that are internal to a single endpoint live next to the
//! call in `api::client`; the types here are the ones the UI consumes.

pub mod account;
pub mod parking;

pub use account::{ProfileUpdate, User};
pub use parking::{Booking, BookingRequest, ParkingSpot};
