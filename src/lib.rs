pub mod geometry;
pub mod io;
pub mod loop_closure;
pub mod tracking;
pub mod types;
