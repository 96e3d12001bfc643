//! Local host identity.

use tracing::warn;

const FALLBACK_HOSTNAME: &str = "no-hostname";

/// The machine's hostname, or `"no-hostname"` if it cannot be read.
pub fn hostname() -> String {
    match nix::unistd::gethostname() {
        Ok(name) => match name.into_string() {
            Ok(name) if !name.is_empty() => name,
            _ => FALLBACK_HOSTNAME.to_string(),
        },
        Err(e) => {
            warn!(error = %e, "unable to read hostname");
            FALLBACK_HOSTNAME.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_is_never_empty() {
        let name = hostname();
        assert!(!name.is_empty());
        assert!(!name.contains('\0'));
    }

    #[test]
    fn matches_system_hostname() {
        let expected = std::fs::read_to_string("/proc/sys/kernel/hostname")
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        if !expected.is_empty() {
            assert_eq!(hostname(), expected);
        }
    }
}
