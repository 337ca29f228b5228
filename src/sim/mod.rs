pub mod manifold;

pub use manifold::{PlantParams, PlantState, SimulatedManifold};
