pub mod device;
pub mod shell;
