pub mod face_detection_service;
pub mod face_detector;
