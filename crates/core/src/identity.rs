//! Nickname and credential rules applied before anything touches the network.

use std::ops::RangeInclusive;

pub const NICKNAME_CHARS: RangeInclusive<usize> = 2..=15;
pub const MIN_PASSWORD_CHARS: usize = 6;

/// Input errors. The messages are shown to the user as-is.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("请输入昵称")]
    EmptyNickname,
    #[error("昵称长度必须在2-15个字符之间")]
    NicknameLength,
    #[error("请输入密码")]
    EmptyPassword,
    #[error("密码长度至少为6个字符")]
    PasswordTooShort,
    #[error("两次输入的密码不一致")]
    PasswordMismatch,
    #[error("请填写完整的注册信息")]
    IncompleteRegistration,
    #[error("请选择服务器")]
    MissingServer,
}

/// Trims the nickname and checks its length in characters.
pub fn validate_nickname(nickname: &str) -> Result<&str, ValidationError> {
    let trimmed = nickname.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyNickname);
    }
    if !NICKNAME_CHARS.contains(&trimmed.chars().count()) {
        return Err(ValidationError::NicknameLength);
    }
    Ok(trimmed)
}

/// Login only requires a password to be present.
pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    if password.is_empty() {
        return Err(ValidationError::EmptyPassword);
    }
    Ok(())
}

pub fn validate_server(server_address: &str) -> Result<&str, ValidationError> {
    let trimmed = server_address.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingServer);
    }
    Ok(trimmed)
}

/// Registration rules, checked in the order the form reports them.
pub fn validate_registration<'a>(
    username: &'a str,
    password: &str,
    confirm: &str,
) -> Result<&'a str, ValidationError> {
    let trimmed = username.trim();
    if trimmed.is_empty() || password.is_empty() || confirm.is_empty() {
        return Err(ValidationError::IncompleteRegistration);
    }
    if password != confirm {
        return Err(ValidationError::PasswordMismatch);
    }
    if !NICKNAME_CHARS.contains(&trimmed.chars().count()) {
        return Err(ValidationError::NicknameLength);
    }
    if password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(ValidationError::PasswordTooShort);
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nickname_is_trimmed() {
        assert_eq!(validate_nickname("  alice \n"), Ok("alice"));
    }

    #[test]
    fn test_nickname_length_counts_characters() {
        assert_eq!(validate_nickname("川小"), Ok("川小"));
        assert_eq!(validate_nickname("a"), Err(ValidationError::NicknameLength));
        assert_eq!(
            validate_nickname("abcdefghijklmnop"),
            Err(ValidationError::NicknameLength)
        );
        assert_eq!(validate_nickname("   "), Err(ValidationError::EmptyNickname));
    }

    #[test]
    fn test_password_presence() {
        assert_eq!(validate_password(""), Err(ValidationError::EmptyPassword));
        assert_eq!(validate_password("x"), Ok(()));
    }

    #[test]
    fn test_server_presence() {
        assert_eq!(validate_server(" "), Err(ValidationError::MissingServer));
        assert_eq!(validate_server(" http://x "), Ok("http://x"));
    }

    #[test]
    fn test_registration_rule_order() {
        assert_eq!(
            validate_registration("alice", "", "secret1"),
            Err(ValidationError::IncompleteRegistration)
        );
        assert_eq!(
            validate_registration("a", "abc", "abd"),
            Err(ValidationError::PasswordMismatch)
        );
        assert_eq!(
            validate_registration("a", "abc", "abc"),
            Err(ValidationError::NicknameLength)
        );
        assert_eq!(
            validate_registration("alice", "abc", "abc"),
            Err(ValidationError::PasswordTooShort)
        );
        assert_eq!(
            validate_registration(" alice ", "secret1", "secret1"),
            Ok("alice")
        );
    }

    #[test]
    fn test_error_messages_are_user_facing() {
        assert_eq!(ValidationError::EmptyNickname.to_string(), "请输入昵称");
        assert_eq!(
            ValidationError::NicknameLength.to_string(),
            "昵称长度必须在2-15个字符之间"
        );
    }
}
