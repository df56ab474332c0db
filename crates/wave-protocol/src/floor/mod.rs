//! Per-node floor state: requests, peer-mode collision resolution, and the
//! local view of who holds the floor.

pub mod machine;
pub mod types;

pub use machine::FloorMachine;
pub use types::{FloorConfig, FloorState};
