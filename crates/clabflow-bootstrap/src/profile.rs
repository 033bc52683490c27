//! Per-kind bootstrap profiles

use clabflow_core::NodeKind;

/// Where a kind keeps its TLS material and how it picks it up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapProfile {
    /// `(certificate, key)` destinations; `None` for kinds that take no
    /// pushed credential
    pub credential_paths: Option<(&'static str, &'static str)>,
    /// Run after the files are written, in order
    pub reload: Vec<&'static str>,
    /// Readiness probe
    pub probe: &'static str,
    /// Text the probe output must contain
    pub probe_expect: Option<&'static str>,
    /// See [`crate::shell::ShellTarget::posix_prefix`]
    pub posix_prefix: Option<&'static str>,
}

impl BootstrapProfile {
    pub fn for_kind(kind: &NodeKind) -> Self {
        match kind {
            NodeKind::SrLinux => Self {
                credential_paths: Some((
                    "/etc/opt/srlinux/tls/edaboot.crt",
                    "/etc/opt/srlinux/tls/edaboot.key",
                )),
                // the EDA server profile reads the files on connect
                reload: Vec::new(),
                probe: "info from state system grpc-server mgmt oper-state",
                probe_expect: Some("up"),
                posix_prefix: Some("bash "),
            },
            NodeKind::Ceos => Self {
                credential_paths: Some(("/mnt/flash/edaboot.crt", "/mnt/flash/edaboot.key")),
                reload: vec![
                    "copy file:/mnt/flash/edaboot.crt certificate:",
                    "copy file:/mnt/flash/edaboot.key sslkey:",
                    "bash Cli -p 15 -c $'configure terminal\\nmanagement api gnmi\\ntransport grpc mgmt\\nssl profile EDA\\nend\\nwrite memory'",
                ],
                probe: "show management api gnmi",
                probe_expect: Some("EDA"),
                posix_prefix: Some("bash "),
            },
            NodeKind::Sros => Self {
                credential_paths: None,
                reload: Vec::new(),
                probe: "show system information",
                probe_expect: Some("System Name"),
                posix_prefix: None,
            },
            NodeKind::Linux | NodeKind::Other(_) => Self {
                credential_paths: Some(("/etc/clabflow/tls/node.crt", "/etc/clabflow/tls/node.key")),
                reload: Vec::new(),
                probe: "test -s /etc/clabflow/tls/node.crt || uname -n",
                probe_expect: None,
                posix_prefix: None,
            },
        }
    }

    /// Whether probe output counts as ready
    pub fn probe_passed(&self, stdout: &str) -> bool {
        self.probe_expect
            .is_none_or(|expected| stdout.contains(expected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceos_profile() {
        let profile = BootstrapProfile::for_kind(&NodeKind::Ceos);
        assert_eq!(
            profile.credential_paths,
            Some(("/mnt/flash/edaboot.crt", "/mnt/flash/edaboot.key"))
        );
        assert_eq!(profile.reload[0], "copy file:/mnt/flash/edaboot.crt certificate:");
        assert_eq!(profile.reload[1], "copy file:/mnt/flash/edaboot.key sslkey:");
        assert!(profile.reload[2].contains("ssl profile EDA"));
    }

    #[test]
    fn test_probe_expectation() {
        let profile = BootstrapProfile::for_kind(&NodeKind::SrLinux);
        assert!(profile.probe_passed("    oper-state up\n"));
        assert!(!profile.probe_passed("    oper-state down\n"));

        let profile = BootstrapProfile::for_kind(&NodeKind::Linux);
        assert!(profile.probe_passed(""));
    }

    #[test]
    fn test_sros_takes_no_pushed_credential() {
        assert_eq!(
            BootstrapProfile::for_kind(&NodeKind::Sros).credential_paths,
            None
        );
    }
}
