pub mod booking;
pub mod courier;
pub mod location;
pub mod status;
pub mod wait_timer;
