pub mod candidates;
pub mod dispatch;
pub mod fleet;
pub mod intake;
pub mod notifier;
pub mod queue;
pub mod scoring;
pub mod store;
pub mod sweeper;
