pub mod reading;
pub mod resolution;
pub mod window;
