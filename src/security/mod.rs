pub mod error_map;
