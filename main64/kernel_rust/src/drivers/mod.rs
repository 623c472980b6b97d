//! Hardware drivers for KAOS kernel

pub mod screen;
pub mod serial;
