pub mod delivery;
pub mod position;
