pub mod diag;
pub mod vec2;
