pub mod entry_point;
pub mod error;
pub mod manager;

pub type Result<T> = std::result::Result<T, Error>;

use error::Error;
pub use entry_point::EntryPoint;
pub use manager::ServerManager;
