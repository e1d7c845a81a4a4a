pub mod data_generator;

pub use data_generator::{generate_random_customers, load_customers_from_csv};
