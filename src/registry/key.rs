use std::fmt;

/// A public key in canonical `algorithm base64` form, as recorded at capture time.
///
/// Comments and any trailing fields are dropped, so two renderings of the same key
/// compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CapturedKey {
    algorithm: String,
    material: String,
}

impl CapturedKey {
    #[must_use]
    pub fn new(algorithm: impl Into<String>, material: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
            material: material.into(),
        }
    }

    /// Parse the `algorithm material [comment]` line format used by `authorized_keys`
    /// and by `ssh-key`'s OpenSSH encoder.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split_whitespace();
        let algorithm = fields.next()?;
        let material = fields.next()?;
        Some(Self::new(algorithm, material))
    }
}

impl fmt::Display for CapturedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.algorithm, self.material)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_drops_comment() {
        let key = CapturedKey::parse("ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIM alice@laptop");
        assert_eq!(
            key.map(|k| k.to_string()).as_deref(),
            Some("ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIM")
        );
    }

    #[test]
    fn parse_rejects_single_field() {
        assert!(CapturedKey::parse("ssh-ed25519").is_none());
        assert!(CapturedKey::parse("   ").is_none());
    }
}
