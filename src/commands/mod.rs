// Converge the host
pub mod init;

// Metadata inspection
pub mod get_metadata;
