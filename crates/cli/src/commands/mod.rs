pub mod dump;
pub mod init;
pub mod rotate;
pub mod serve;
pub mod status;
