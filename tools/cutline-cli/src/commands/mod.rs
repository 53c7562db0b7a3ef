pub mod add;
pub mod check;
pub mod export;
pub mod info;
pub mod init;
pub mod plan;
pub mod preview;
pub mod validate;
