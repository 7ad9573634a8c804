pub mod capture;
pub mod conversion;
pub mod detection;
pub mod scenario;
pub mod shared;
pub mod visualization;
