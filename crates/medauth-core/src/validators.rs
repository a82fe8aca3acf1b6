//! Input validators for registration and password changes

use validator::ValidateEmail;

/// Characters accepted as "special" by the password policy
pub const SPECIAL_CHARACTERS: &str = "!@#$%^&*(),.?\":{}|<>";

const COMMON_PASSWORDS: &[&str] = &[
    "password123",
    "admin123456",
    "qwerty123456",
    "12345678901",
    "password1234",
];

/// Password complexity rules
#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_digit: bool,
    pub require_special: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 12,
            require_uppercase: true,
            require_lowercase: true,
            require_digit: true,
            require_special: true,
        }
    }
}

impl PasswordPolicy {
    pub fn with_min_length(min_length: usize) -> Self {
        Self {
            min_length,
            ..Self::default()
        }
    }

    /// Check `password` against the policy.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Password meets requirements
    /// * `Err(String)` - First rule the password violates
    pub fn validate(&self, password: &str) -> Result<(), String> {
        if password.chars().count() < self.min_length {
            return Err(format!(
                "Password must be at least {} characters long",
                self.min_length
            ));
        }

        if self.require_uppercase && !password.chars().any(|c| c.is_uppercase()) {
            return Err("Password must contain at least one uppercase letter".to_string());
        }

        if self.require_lowercase && !password.chars().any(|c| c.is_lowercase()) {
            return Err("Password must contain at least one lowercase letter".to_string());
        }

        if self.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            return Err("Password must contain at least one digit".to_string());
        }

        if self.require_special && !password.chars().any(|c| SPECIAL_CHARACTERS.contains(c)) {
            return Err("Password must contain at least one special character".to_string());
        }

        let lowered = password.to_lowercase();
        if COMMON_PASSWORDS.iter().any(|common| lowered.contains(common)) {
            return Err("Password is too common".to_string());
        }

        Ok(())
    }
}

/// Validate email format. Requires an alphabetic top-level domain of at
/// least two characters on top of the RFC syntax check.
pub fn validate_email(email: &str) -> Result<(), String> {
    if !email.validate_email() {
        return Err("Invalid email format".to_string());
    }

    let domain = email.rsplit_once('@').map(|(_, d)| d).unwrap_or_default();
    let tld_ok = domain
        .rsplit_once('.')
        .map(|(_, tld)| tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic()))
        .unwrap_or(false);

    if !tld_ok {
        return Err("Invalid email domain".to_string());
    }
    Ok(())
}

/// Dedup form of an email address.
///
/// Lowercases the address, then drops any `+tag` suffix and all dots from
/// the local part. `A.B+news@Example.com` and `ab@example.com` normalize to
/// the same value.
pub fn normalize_email(email: &str) -> String {
    let lowered = email.trim().to_lowercase();
    match lowered.rsplit_once('@') {
        Some((local, domain)) => {
            let local = local.split('+').next().unwrap_or_default().replace('.', "");
            format!("{local}@{domain}")
        }
        None => lowered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_password_policy() {
        let policy = PasswordPolicy::default();

        assert!(policy.validate("Correct-Horse9!").is_ok());

        // Too short
        assert!(policy.validate("Sh0rt!pw").is_err());
        // No uppercase
        assert!(policy.validate("lowercase-only9!").is_err());
        // No lowercase
        assert!(policy.validate("UPPERCASE-ONLY9!").is_err());
        // No digit
        assert!(policy.validate("NoDigitsHere!!").is_err());
        // Special character outside the accepted set
        assert!(policy.validate("NoSpecial_Chars9").is_err());
        // Common password embedded
        assert!(policy.validate("MyPassword123!").is_err());
    }

    #[test]
    fn test_custom_min_length() {
        let policy = PasswordPolicy::with_min_length(8);
        assert!(policy.validate("Abcdef1!").is_ok());
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("user@example.com").is_ok());
        assert!(validate_email("first.last+tag@clinic.co.uk").is_ok());

        assert!(validate_email("not-an-email").is_err());
        assert!(validate_email("user@localhost").is_err());
        assert!(validate_email("user@example.c").is_err());
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("A.B+news@Example.com"), "ab@example.com");
        assert_eq!(normalize_email("ab@example.com"), "ab@example.com");
        assert_eq!(normalize_email("  User@Example.COM "), "user@example.com");
        assert_eq!(normalize_email("first.last@mail.example.org"), "firstlast@mail.example.org");
    }

    proptest! {
        #[test]
        fn normalize_email_is_idempotent(local in "[a-zA-Z0-9.+]{1,20}", domain in "[a-z]{1,10}\\.[a-z]{2,5}") {
            let email = format!("{local}@{domain}");
            let once = normalize_email(&email);
            prop_assert_eq!(normalize_email(&once), once.clone());
            prop_assert!(once.ends_with(&domain));
        }
    }
}
