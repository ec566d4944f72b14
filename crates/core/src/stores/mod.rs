pub mod local;

pub use local::LocalIndexStore;
