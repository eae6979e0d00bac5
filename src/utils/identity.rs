//! Host and user lookup for producer identity and connection labels.

/// Fallback when the OS cannot tell us.
const UNKNOWN: &str = "unknown";

/// Name of this host.
#[cfg(unix)]
pub fn hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| env_or_unknown(&["HOSTNAME", "COMPUTERNAME"]))
}

#[cfg(not(unix))]
pub fn hostname() -> String {
    env_or_unknown(&["COMPUTERNAME", "HOSTNAME"])
}

/// Login name of the user running this process.
#[cfg(unix)]
pub fn current_user() -> String {
    nix::unistd::User::from_uid(nix::unistd::getuid())
        .ok()
        .flatten()
        .map(|user| user.name)
        .unwrap_or_else(|| env_or_unknown(&["USER", "USERNAME"]))
}

#[cfg(not(unix))]
pub fn current_user() -> String {
    env_or_unknown(&["USERNAME", "USER"])
}

fn env_or_unknown(vars: &[&str]) -> String {
    vars.iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| UNKNOWN.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hostname_is_not_empty() {
        assert!(!hostname().is_empty());
    }

    #[test]
    fn test_current_user_is_not_empty() {
        assert!(!current_user().is_empty());
    }
}
