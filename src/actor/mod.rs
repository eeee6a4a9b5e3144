pub mod authority;
pub mod state;
pub mod world;
