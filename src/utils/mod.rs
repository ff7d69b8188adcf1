pub mod coerce;
pub mod logging;
