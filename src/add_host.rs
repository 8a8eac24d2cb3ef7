//! `add_host`: parses `host[:port]` plus arbitrary host variables into an
//! inventory-mutation record. Trivial glue around the transport; kept here
//! only for its interface, per the scope note in the crate's module docs.

use std::collections::HashMap;

use serde_json::Value;

/// Arguments accepted by the `add_host` action.
///
/// Any key other than `name`/`hostname`/`groupname`/`groups` is treated as
/// an arbitrary host variable, mirroring the dynamic keyword-argument bag
/// the original action plugin accepts.
#[derive(Debug, Clone, Default)]
pub struct AddHostArgs {
    /// `name` or `hostname` keyword argument.
    pub name: Option<String>,
    /// `groupname` or `groups` keyword argument; comma-separated or a list.
    pub groups: Vec<String>,
    /// Everything else, taken verbatim as host variables.
    pub vars: HashMap<String, Value>,
}

/// Outcome of running `add_host`.
#[derive(Debug, Clone)]
pub enum AddHostResult {
    /// Check mode was requested; `add_host` cannot be previewed, so the
    /// mutation is skipped entirely.
    Skipped,
    /// The host was added to inventory.
    Changed {
        /// The resolved host name, with any `:port` suffix stripped.
        host_name: String,
        /// Target groups.
        groups: Vec<String>,
        /// Host variables, with `ansible_ssh_port` injected if the
        /// original `name`/`hostname` carried a `:port` suffix.
        host_vars: HashMap<String, Value>,
    },
}

/// Errors specific to `add_host` argument parsing.
#[derive(Debug)]
pub enum AddHostError {
    /// Neither `name` nor `hostname` was supplied.
    MissingHostName,
    /// The hostname (after stripping `:port`) is empty.
    InvalidHostName(String),
}

impl std::fmt::Display for AddHostError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddHostError::MissingHostName => {
                write!(f, "must pass 'name' or 'hostname' to add_host")
            }
            AddHostError::InvalidHostName(h) => write!(f, "invalid hostname: {h:?}"),
        }
    }
}

impl std::error::Error for AddHostError {}

/// Run `add_host`. Returns [`AddHostResult::Skipped`] unconditionally when
/// `check_mode` is set, since there is nothing meaningful to preview for an
/// inventory mutation.
pub fn add_host(args: AddHostArgs, check_mode: bool) -> Result<AddHostResult, AddHostError> {
    if check_mode {
        return Ok(AddHostResult::Skipped);
    }

    let raw = args.name.ok_or(AddHostError::MissingHostName)?;
    let (host_name, port) = split_host_port(&raw);
    if host_name.is_empty() {
        return Err(AddHostError::InvalidHostName(raw));
    }

    let mut host_vars = args.vars;
    if let Some(port) = port {
        host_vars.insert("ansible_ssh_port".to_owned(), Value::from(port));
    }

    Ok(AddHostResult::Changed {
        host_name,
        groups: args.groups,
        host_vars,
    })
}

/// Split `"host:port"` into `(host, Some(port))`, or `(host, None)` if
/// there is no `:port` suffix. IPv6 literals (which contain multiple
/// colons) are left untouched — only a single trailing `:digits` is
/// interpreted as a port.
fn split_host_port(raw: &str) -> (String, Option<u16>) {
    if let Some((host, port)) = raw.rsplit_once(':') {
        if let Ok(port) = port.parse::<u16>() {
            if !host.contains(':') {
                return (host.to_owned(), Some(port));
            }
        }
    }
    (raw.to_owned(), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_port() {
        let (host, port) = split_host_port("web1.example.com:2222");
        assert_eq!(host, "web1.example.com");
        assert_eq!(port, Some(2222));
    }

    #[test]
    fn leaves_bare_ipv6_untouched() {
        let (host, port) = split_host_port("::1");
        assert_eq!(host, "::1");
        assert_eq!(port, None);
    }

    #[test]
    fn add_host_injects_port_var() {
        let args = AddHostArgs {
            name: Some("web1.example.com:2222".to_owned()),
            groups: vec!["web".to_owned()],
            vars: HashMap::new(),
        };
        match add_host(args, false).unwrap() {
            AddHostResult::Changed {
                host_name,
                groups,
                host_vars,
            } => {
                assert_eq!(host_name, "web1.example.com");
                assert_eq!(groups, vec!["web".to_owned()]);
                assert_eq!(host_vars.get("ansible_ssh_port"), Some(&Value::from(2222)));
            }
            other => panic!("expected Changed, got {other:?}"),
        }
    }

    #[test]
    fn check_mode_skips() {
        let args = AddHostArgs {
            name: Some("host".to_owned()),
            ..Default::default()
        };
        assert!(matches!(add_host(args, true).unwrap(), AddHostResult::Skipped));
    }

    #[test]
    fn missing_name_errors() {
        assert!(matches!(
            add_host(AddHostArgs::default(), false),
            Err(AddHostError::MissingHostName)
        ));
    }
}
