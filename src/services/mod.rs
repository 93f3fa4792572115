// CSV decoding, parsing and writing shared by the importers
pub mod csv_import;

// Catalog and order management
pub mod orders;
pub mod products;
pub mod users;

// Cached per-user order export
pub mod user_orders;
