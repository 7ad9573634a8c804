pub mod camera_platform;
pub mod capture_error;
pub mod capture_session;
