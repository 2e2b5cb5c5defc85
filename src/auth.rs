use rand::Rng;
use thiserror::Error;

const ACCESS_CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const ACCESS_CODE_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("unknown role: {0}")]
    UnknownRole(String),
    #[error("password must not be empty")]
    EmptyPassword,
    #[error("password hashing failed: {0}")]
    Hashing(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

impl Role {
    pub fn parse(raw: &str) -> Result<Self, AuthError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(Role::Student),
            "teacher" => Ok(Role::Teacher),
            "admin" => Ok(Role::Admin),
            other => Err(AuthError::UnknownRole(other.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Admin => "admin",
        }
    }

    /// Admins are usable right away; everyone else waits for approval.
    pub fn active_on_registration(self) -> bool {
        matches!(self, Role::Admin)
    }
}

pub fn hash_password(password: &str, cost: u32) -> Result<String, AuthError> {
    if password.is_empty() {
        return Err(AuthError::EmptyPassword);
    }
    bcrypt::hash(password, cost).map_err(|e| AuthError::Hashing(e.to_string()))
}

/// `Err` only when the stored hash is not a bcrypt hash.
pub fn verify_password(password: &str, stored_hash: &str) -> Result<bool, AuthError> {
    bcrypt::verify(password, stored_hash).map_err(|e| AuthError::Hashing(e.to_string()))
}

/// Six characters from `A-Z0-9`, used to join a class.
pub fn generate_access_code() -> String {
    let mut rng = rand::rng();
    (0..ACCESS_CODE_LEN)
        .map(|_| {
            let idx = rng.random_range(0..ACCESS_CODE_CHARSET.len());
            ACCESS_CODE_CHARSET[idx] as char
        })
        .collect()
}

pub fn normalize_access_code(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_parse_case_insensitively() {
        assert_eq!(Role::parse("Teacher"), Ok(Role::Teacher));
        assert_eq!(Role::parse(" admin "), Ok(Role::Admin));
        assert!(matches!(Role::parse("parent"), Err(AuthError::UnknownRole(_))));
        assert!(Role::Admin.active_on_registration());
        assert!(!Role::Student.active_on_registration());
    }

    #[test]
    fn bcrypt_hash_verifies_only_the_same_password() {
        let a = hash_password("secret", 4).expect("hash");
        let b = hash_password("secret", 4).expect("hash");
        assert!(a.starts_with("$2"));
        assert_ne!(a, b);
        assert_eq!(verify_password("secret", &a), Ok(true));
        assert_eq!(verify_password("Secret", &a), Ok(false));
        assert!(matches!(
            verify_password("secret", "not-a-bcrypt-hash"),
            Err(AuthError::Hashing(_))
        ));
        assert_eq!(hash_password("", 4).err(), Some(AuthError::EmptyPassword));
    }

    #[test]
    fn access_codes_are_six_upper_alnum() {
        for _ in 0..50 {
            let code = generate_access_code();
            assert_eq!(code.len(), ACCESS_CODE_LEN);
            assert!(code
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        }
        assert_eq!(normalize_access_code(" ab12cd "), "AB12CD");
    }
}
