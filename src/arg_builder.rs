//! Composes the `ssh`/`scp`/`sftp` argument vector from [`PlayContext`],
//! [`HostVars`], and [`GlobalConfig`], and manages the ControlMaster
//! directory.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use nix::unistd::{access, AccessFlags};
use tracing::trace;

use crate::config::{GlobalConfig, HostVars, PlayContext};
use crate::Error;

/// Ordered sequence of argv fragments shared by every command run over one
/// connection, composed exactly once per session.
///
/// The precedence order in which fragments are appended is load-bearing:
/// changing it changes which option wins when both a host override and a
/// global default are present, so [`ArgBuilder::build`] documents each step
/// with the field it reads from.
#[derive(Debug, Clone, Default)]
pub struct ArgBuilder {
    args: Vec<String>,
}

impl ArgBuilder {
    /// Compose `common_args` for one connection.
    ///
    /// `effective_user` is the local user ssh would otherwise connect as
    /// (used to decide whether `-o User=<u>` is redundant).
    pub fn build(
        play: &PlayContext,
        host_vars: &HostVars,
        config: &GlobalConfig,
        effective_user: &str,
    ) -> Result<Self, Error> {
        let mut b = ArgBuilder::default();

        // 1. Base args: host override, then global default.
        let base = host_vars
            .ansible_ssh_args
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(&config.ansible_ssh_args);
        b.extend_split("base args", base)?;

        // 2. ControlPath fix-up.
        if b.contains_option_key("ControlPersist") && !b.contains_option_key("ControlPath") {
            let cp_dir = control_path_dir()?;
            ensure_control_dir(&cp_dir)?;
            let template = config
                .ansible_ssh_control_path
                .replace("{directory}", &cp_dir.to_string_lossy());
            b.push_opt("controlpath fix-up", &format!("ControlPath=\"{template}\""));
        }

        // 3. Host-key checking.
        if !config.host_key_checking {
            b.push_opt("host key checking disabled", "StrictHostKeyChecking=no");
        }

        // 4. Port.
        if let Some(port) = play.port {
            b.push_opt("port", &format!("Port={port}"));
        }

        // 5. Identity file.
        if let Some(key) = &play.private_key_file {
            let expanded = shellexpand_tilde(key);
            b.push_opt("identity file", &format!("IdentityFile=\"{expanded}\""));
        }

        // 6. Auth restriction.
        if play.password.is_none() {
            b.push_opt("no password: restrict auth", "KbdInteractiveAuthentication=no");
            b.push_opt(
                "no password: restrict auth",
                "PreferredAuthentications=gssapi-with-mic,gssapi-keyex,hostbased,publickey",
            );
            b.push_opt("no password: restrict auth", "PasswordAuthentication=no");
        }

        // 7. Remote user.
        if let Some(user) = &play.remote_user {
            if user != effective_user {
                b.push_opt("remote user", &format!("User={user}"));
            }
        }

        // 8. Connect timeout.
        b.push_opt(
            "connect timeout",
            &format!("ConnectTimeout={}", play.timeout.as_secs()),
        );

        // 9. Extra args: play context, then host vars.
        let extra = play
            .ssh_extra_args
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| {
                host_vars
                    .ansible_ssh_extra_args
                    .as_deref()
                    .filter(|s| !s.is_empty())
            });
        if let Some(extra) = extra {
            b.extend_split("extra args", extra)?;
        }

        Ok(b)
    }

    /// The composed argv fragments, in precedence order.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Into the owned `Vec<String>`.
    pub fn into_args(self) -> Vec<String> {
        self.args
    }

    fn push_opt(&mut self, explanation: &str, opt: &str) {
        trace!(explanation, opt, "appending ssh option");
        self.args.push("-o".to_owned());
        self.args.push(opt.to_owned());
    }

    fn extend_split(&mut self, explanation: &str, s: &str) -> Result<(), Error> {
        let tokens = shlex::split(s)
            .ok_or_else(|| Error::Configuration(format!("unbalanced quoting in ssh args: {s:?}")))?;
        trace!(explanation, ?tokens, "appending split ssh args");
        self.args.extend(tokens);
        Ok(())
    }

    fn contains_option_key(&self, key: &str) -> bool {
        self.args
            .iter()
            .any(|a| a.starts_with(key) || a.starts_with(&format!("{key}=")))
    }
}

fn control_path_dir() -> Result<PathBuf, Error> {
    let home = dirs::home_dir()
        .ok_or_else(|| Error::Configuration("could not determine home directory".to_owned()))?;
    Ok(home.join(".ansible").join("cp"))
}

fn ensure_control_dir(dir: &PathBuf) -> Result<(), Error> {
    fs::create_dir_all(dir).map_err(|e| {
        Error::Configuration(format!("could not create ControlPath directory: {e}"))
    })?;
    let perms = fs::Permissions::from_mode(0o700);
    fs::set_permissions(dir, perms).map_err(|e| {
        Error::Configuration(format!("could not set ControlPath directory mode: {e}"))
    })?;
    // `create_dir_all` is a no-op if `dir` already existed under another
    // owner with a mode `set_permissions` above could not actually widen;
    // confirm it is genuinely writable rather than trusting the chmod call.
    access(dir, AccessFlags::W_OK).map_err(|e| {
        Error::Configuration(format!("ControlPath directory is not writable: {e}"))
    })?;
    Ok(())
}

fn shellexpand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).to_string_lossy().into_owned();
        }
    }
    path.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn play() -> PlayContext {
        PlayContext {
            remote_addr: "example.com".to_owned(),
            timeout: Duration::from_secs(10),
            ..Default::default()
        }
    }

    #[test]
    fn precedence_host_over_global() {
        let mut host_vars = HostVars::default();
        host_vars.ansible_ssh_args = Some("-o Foo=host".to_owned());
        let mut config = GlobalConfig::default();
        config.ansible_ssh_args = "-o Foo=global".to_owned();

        let b = ArgBuilder::build(&play(), &host_vars, &config, "me").unwrap();
        assert!(b.args().iter().any(|a| a == "Foo=host"));
        assert!(!b.args().iter().any(|a| a == "Foo=global"));
    }

    #[test]
    fn control_path_iff_control_persist() {
        let host_vars = HostVars::default();
        let mut config = GlobalConfig::default();
        config.ansible_ssh_args = "-o ControlMaster=auto".to_owned();

        let b = ArgBuilder::build(&play(), &host_vars, &config, "me").unwrap();
        assert!(!b.contains_option_key("ControlPath"));

        config.ansible_ssh_args = "-o ControlMaster=auto -o ControlPersist=60s".to_owned();
        let b = ArgBuilder::build(&play(), &host_vars, &config, "me").unwrap();
        assert!(b.contains_option_key("ControlPath"));
    }

    #[test]
    fn no_password_locks_down_auth() {
        let host_vars = HostVars::default();
        let config = GlobalConfig::default();

        let b = ArgBuilder::build(&play(), &host_vars, &config, "me").unwrap();
        assert!(b.args().iter().any(|a| a == "PasswordAuthentication=no"));

        let mut with_pass = play();
        with_pass.password = Some("hunter2".to_owned());
        let b = ArgBuilder::build(&with_pass, &host_vars, &config, "me").unwrap();
        assert!(!b.args().iter().any(|a| a == "PasswordAuthentication=no"));
        assert!(!b.args().iter().any(|a| a == "KbdInteractiveAuthentication=no"));
    }

    #[test]
    fn remote_user_omitted_when_same_as_effective() {
        let host_vars = HostVars::default();
        let config = GlobalConfig::default();

        let mut p = play();
        p.remote_user = Some("me".to_owned());
        let b = ArgBuilder::build(&p, &host_vars, &config, "me").unwrap();
        assert!(!b.args().iter().any(|a| a == "User=me"));

        p.remote_user = Some("other".to_owned());
        let b = ArgBuilder::build(&p, &host_vars, &config, "me").unwrap();
        assert!(b.args().iter().any(|a| a == "User=other"));
    }

    #[test]
    fn extra_args_precedence() {
        let mut host_vars = HostVars::default();
        host_vars.ansible_ssh_extra_args = Some("-o Bar=hostvar".to_owned());
        let config = GlobalConfig::default();

        let mut p = play();
        p.ssh_extra_args = Some("-o Bar=playcontext".to_owned());
        let b = ArgBuilder::build(&p, &host_vars, &config, "me").unwrap();
        assert!(b.args().iter().any(|a| a == "Bar=playcontext"));

        p.ssh_extra_args = None;
        let b = ArgBuilder::build(&p, &host_vars, &config, "me").unwrap();
        assert!(b.args().iter().any(|a| a == "Bar=hostvar"));
    }
}
