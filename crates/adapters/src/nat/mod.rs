pub mod static_backend_table;

pub use static_backend_table::StaticBackendTable;
