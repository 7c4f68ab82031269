// Data models for camera frames, vehicle motion, and pilot notifications

pub mod frame;
pub mod motion;
