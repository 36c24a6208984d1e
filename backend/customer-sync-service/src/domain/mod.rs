mod customer_message;
mod validation;

pub use customer_message::{BrandDto, CustomerMessage, ValidatedBrand, ValidatedCustomer};
pub use validation::validate_customer;
