use crate::error::{Error, Result};

/// Cheap sanity check on a stored contact address before it reaches the mail
/// API; the provider does the real validation.
pub fn validate_email_address(address: &str) -> Result<()> {
    if address.is_empty() {
        return Err(Error::invalid("email address cannot be empty"));
    }

    if address.len() > 254 {
        return Err(Error::invalid("email address too long (maximum 254 characters)"));
    }

    if address.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(Error::invalid("email address contains whitespace"));
    }

    match address.split_once('@') {
        Some((local, domain))
            if !local.is_empty() && domain.contains('.') && !domain.contains('@') =>
        {
            if domain.starts_with('.') || domain.ends_with('.') {
                return Err(Error::invalid("email address has a malformed domain"));
            }
            Ok(())
        }
        _ => Err(Error::invalid("email address must look like local@domain.tld")),
    }
}
