pub mod control;
pub mod init;
pub mod orders;
pub mod status;
pub mod watch;
