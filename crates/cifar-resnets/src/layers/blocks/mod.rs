//! Miscellaneous blocks.
pub mod bn_relu;
pub mod conv;
