//! Structural validation of decoded customer messages.
//!
//! Violations are reported with wire field names (`CustomerId`,
//! `Brands[0].Name`) so the dead-letter description matches the payload.

use validator::{Validate, ValidationError, ValidationErrors, ValidationErrorsKind};

use super::customer_message::{CustomerMessage, ValidatedBrand, ValidatedCustomer};

/// Validate a message, returning the sorted list of violated fields on failure
pub fn validate_customer(message: &CustomerMessage) -> Result<ValidatedCustomer, Vec<String>> {
    let mut fields = Vec::new();
    if let Err(errors) = message.validate() {
        collect_fields(&errors, "", &mut fields);
    }
    for (index, brand) in message.brands.iter().flatten().enumerate() {
        if let Err(errors) = brand.validate() {
            collect_fields(&errors, &format!("Brands[{}].", index), &mut fields);
        }
    }
    if !fields.is_empty() {
        fields.sort();
        return Err(fields);
    }

    let mut missing = Vec::new();
    let name = required(&message.name, "Name", &mut missing);
    let customer_type_id = required(&message.customer_type_id, "CustomerTypeId", &mut missing);
    let customer_type_name =
        required(&message.customer_type_name, "CustomerTypeName", &mut missing);
    let segment_id = required(&message.segment_id, "SegmentId", &mut missing);
    let country_iso = required(&message.country_iso, "CountryIso", &mut missing);
    let currency_iso = required(&message.currency_iso, "CurrencyIso", &mut missing);
    let brand_dtos = required(&message.brands, "Brands", &mut missing).unwrap_or_default();

    let mut brands = Vec::with_capacity(brand_dtos.len());
    for (index, brand) in brand_dtos.into_iter().enumerate() {
        let field = format!("Brands[{}].Name", index);
        if let Some(name) = required(&brand.name, &field, &mut missing) {
            brands.push(ValidatedBrand {
                brand_id: brand.brand_id,
                name,
            });
        }
    }

    let (
        Some(name),
        Some(customer_type_id),
        Some(customer_type_name),
        Some(segment_id),
        Some(country_iso),
        Some(currency_iso),
    ) = (
        name,
        customer_type_id,
        customer_type_name,
        segment_id,
        country_iso,
        currency_iso,
    )
    else {
        return Err(missing);
    };
    if !missing.is_empty() {
        return Err(missing);
    }

    Ok(ValidatedCustomer {
        customer_id: message.customer_id,
        name,
        customer_type_id,
        customer_type_name,
        segment_id,
        country_iso,
        currency_iso,
        deleted: message.deleted,
        last_change_date_time: message.last_change_date_time,
        brands,
    })
}

/// Required strings must carry something other than whitespace
pub(crate) fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

fn required<T: Clone>(value: &Option<T>, field: &str, missing: &mut Vec<String>) -> Option<T> {
    if value.is_none() {
        missing.push(field.to_string());
    }
    value.clone()
}

fn collect_fields(errors: &ValidationErrors, prefix: &str, out: &mut Vec<String>) {
    for (field, kind) in errors.errors() {
        let name = format!("{}{}", prefix, wire_name(field));
        match kind {
            ValidationErrorsKind::Field(_) => out.push(name),
            ValidationErrorsKind::Struct(inner) => {
                collect_fields(inner, &format!("{}.", name), out)
            }
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    collect_fields(inner, &format!("{}[{}].", name, index), out);
                }
            }
        }
    }
}

/// `customer_type_id` -> `CustomerTypeId`
fn wire_name(field: &str) -> String {
    field
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}
