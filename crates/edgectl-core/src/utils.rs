//! Common utility functions

/// Mask sensitive data for logging and display
pub fn mask_sensitive(data: &str) -> String {
    let chars: Vec<char> = data.chars().collect();
    if chars.len() <= 8 {
        "***".to_string()
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}***{}", head, tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_sensitive_short_values() {
        assert_eq!(mask_sensitive(""), "***");
        assert_eq!(mask_sensitive("12345678"), "***");
    }

    #[test]
    fn test_mask_sensitive_keeps_edges() {
        assert_eq!(mask_sensitive("abcd1234efgh"), "abcd***efgh");
    }
}
