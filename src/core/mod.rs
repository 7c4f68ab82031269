pub mod config;
pub mod events;
pub mod storage;
pub mod features;
pub mod inference;
pub mod mailbox;
pub mod motion_state;
pub mod vehicle;
pub mod autopilot;

// Recording pipeline
pub mod recording_queue;
pub mod recording_consumer;
pub mod recorder;

// Frame arrival
pub mod frame_source;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;
