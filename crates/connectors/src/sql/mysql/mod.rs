pub mod connection;
pub mod params;
