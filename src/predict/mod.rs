pub mod catalog;
pub mod elements;
mod error;
pub mod ground_station;
pub mod pass_finder;
pub mod propagation;
pub mod topocentric;
mod types;

pub use catalog::{select_satellite, split_records, CatalogRecord};
pub use elements::{parse_element_set, ElementSetId, OrbitalState};
pub use error::PredictError;
pub use ground_station::GroundStation;
pub use pass_finder::{compute_next_passes, find_passes, PassSearch};
pub use propagation::{propagate, Sgp4Model, StateVector};
pub use topocentric::observe;
pub use types::{Pass, TopocentricSample};
