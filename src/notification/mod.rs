pub mod delivery;
pub mod email;
