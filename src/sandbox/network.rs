//! Network policy for sandbox containers.

/// Network access policy for a session's container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NetworkPolicy {
    /// No network interface besides loopback
    #[default]
    Deny,
    /// Default bridge network with outbound access
    AllowAll,
}

impl NetworkPolicy {
    pub fn from_allowed(allow_network: bool) -> Self {
        if allow_network {
            Self::AllowAll
        } else {
            Self::Deny
        }
    }

    /// Docker `network_mode` for this policy.
    pub fn network_mode(self) -> &'static str {
        match self {
            Self::Deny => "none",
            Self::AllowAll => "bridge",
        }
    }
}

impl std::fmt::Display for NetworkPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AllowAll => write!(f, "allow-all"),
            Self::Deny => write!(f, "deny"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_policy_display() {
        assert_eq!(format!("{}", NetworkPolicy::AllowAll), "allow-all");
        assert_eq!(format!("{}", NetworkPolicy::Deny), "deny");
    }

    #[test]
    fn test_network_mode() {
        assert_eq!(NetworkPolicy::from_allowed(false).network_mode(), "none");
        assert_eq!(NetworkPolicy::from_allowed(true).network_mode(), "bridge");
        assert_eq!(NetworkPolicy::default(), NetworkPolicy::Deny);
    }
}
