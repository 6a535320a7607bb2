pub mod entities;
pub mod store;
pub mod writer;

pub use store::ChatStorage;
pub use writer::spawn_writer;
