pub mod cycle;
pub mod status;
pub mod watch;
