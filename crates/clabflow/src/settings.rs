//! Effective settings: command-line flags over the config file over defaults

use crate::GlobalArgs;
use anyhow::Context;
use clabflow_bootstrap::{BootstrapSettings, DEFAULT_SSH_PORT, DEFAULT_WORKERS, Login, SshOptions};
use clabflow_cloud::RetryPolicy;
use clabflow_config::Config;
use clabflow_core::DEFAULT_NAMESPACE_PREFIX;
use clabflow_eda::EdaConfig;

pub struct Settings {
    pub config: Config,
}

impl Settings {
    pub fn load(global: &GlobalArgs) -> anyhow::Result<Self> {
        let (config, path) = clabflow_config::load_config(global.config.as_deref())
            .context("failed to load clabflow config")?;
        if let Some(path) = path {
            tracing::info!(path = %path.display(), "Using config file");
        }
        Ok(Self { config })
    }

    pub fn namespace_prefix(&self, flag: Option<&str>) -> String {
        flag.map(String::from)
            .or_else(|| self.config.namespace_prefix.clone())
            .unwrap_or_else(|| DEFAULT_NAMESPACE_PREFIX.to_string())
    }

    pub fn eda(&self, global: &GlobalArgs) -> anyhow::Result<EdaConfig> {
        let file = &self.config.eda;
        let defaults = EdaConfig::default();
        let url = global
            .eda_url
            .clone()
            .or_else(|| file.url.clone())
            .context("EDA URL not set (use --eda-url, EDA_URL or eda.url in the config file)")?;
        Ok(EdaConfig {
            url,
            username: global
                .eda_user
                .clone()
                .or_else(|| file.username.clone())
                .unwrap_or(defaults.username),
            password: global
                .eda_password
                .clone()
                .or_else(|| file.password.clone())
                .unwrap_or(defaults.password),
            client_secret: global
                .client_secret
                .clone()
                .or_else(|| file.client_secret.clone()),
            verify_tls: !(global.insecure || file.insecure.unwrap_or(false)),
            timeout: defaults.timeout,
        })
    }

    pub fn reconcile_retry(&self) -> RetryPolicy {
        self.config.reconcile.retry.clone().unwrap_or_default()
    }

    pub fn ssh(&self) -> SshOptions {
        let file = &self.config.ssh;
        let defaults = SshOptions::default();
        SshOptions {
            connect_timeout: file.connect_timeout.unwrap_or(defaults.connect_timeout),
            identity_file: file.identity_file.clone(),
        }
    }

    pub fn bootstrap(&self, workers: Option<usize>) -> BootstrapSettings {
        let section = &self.config.bootstrap;
        let logins = self
            .config
            .ssh
            .logins
            .iter()
            .map(|entry| match &entry.password {
                Some(password) => Login::new(&entry.username).with_password(password),
                None => Login::new(&entry.username),
            })
            .collect();
        BootstrapSettings {
            retry: section.retry.clone().unwrap_or_default(),
            workers: workers.or(section.workers).unwrap_or(DEFAULT_WORKERS).max(1),
            port: self.config.ssh.port.unwrap_or(DEFAULT_SSH_PORT),
            logins,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clabflow_config::SshSettings;

    #[test]
    fn test_ssh_port_feeds_bootstrap_target() {
        let mut settings = Settings {
            config: Config::default(),
        };
        assert_eq!(settings.bootstrap(None).port, DEFAULT_SSH_PORT);

        settings.config.ssh = SshSettings {
            port: Some(2222),
            connect_timeout: Some(3),
            ..Default::default()
        };
        assert_eq!(settings.bootstrap(Some(0)).port, 2222);
        assert_eq!(settings.bootstrap(Some(0)).workers, 1);
        assert_eq!(settings.ssh().connect_timeout, 3);
    }
}
