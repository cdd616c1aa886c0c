//! Human-readable messages for the platform's domain error codes.

pub const REFRESH_TOKEN_INVALID: &str = "FS_AU4021";
pub const ACCOUNT_SUSPENDED: &str = "FS_AU4030";
pub const FANCLUB_ONLY: &str = "FS_MD9000";

pub fn describe(code: &str) -> Option<&'static str> {
    match code {
        "FS_MD9000" => Some("Join or verify your fanclub to enjoy exclusive content"),
        "FS_MD1010" => Some("This is a deleted media"),
        "FS_ER4040" => Some("Service could not be found"),
        "FS_ER5030" => Some("Invalid request, please check again"),
        "FS_ER4020" => Some("Please log in again"),
        "FS_ER5010" => Some("An error occurred during the service"),
        "FS_AU4021" => Some("Refresh token is invalid or expired"),
        "FS_AU4030" => Some("Account is suspended"),
        "FS_CU9900" => Some("Fanclub-only content, fanclub not subscribed"),
        "FS_CU9999" => Some("Community info is invalid"),
        "FS_CJ1010" => Some("This nickname is already in use"),
        "FS_CJ1011" => Some("You are already a member of this community"),
        "FS_CJ1014" => Some("Invalid characters or spaces in input value"),
        "FS_CJ1017" => Some("You cannot rejoin within 24 hours of leaving"),
        "FS_CM1010" => Some("No content available, check community membership"),
        "FS_CU2050" => Some("Post not found or deleted"),
        _ => None,
    }
}

/// Falls back to the raw code when no mapping exists.
pub fn message_for(code: &str) -> String {
    describe(code)
        .map(str::to_string)
        .unwrap_or_else(|| code.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_code_maps_to_message() {
        assert!(describe("FS_MD9000").unwrap().contains("fanclub"));
    }

    #[test]
    fn unknown_code_passes_through() {
        assert_eq!(message_for("FS_XX0000"), "FS_XX0000");
    }
}
