pub mod compound;
pub mod constants;
pub mod elements;
