pub mod producer;
pub mod save_queue;
