//! Data structures representing format components.
//!
//! Contains the container header with its stream parameters, the seek table
//! that locates every frame, and the closed set of compression levels with
//! the filter cascades they select.

pub mod header;
pub mod level;
pub mod seek_table;
