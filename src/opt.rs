use std::path::PathBuf;

use anyhow::{anyhow, Result};
use const_format::concatcp;
use structopt::StructOpt;
use url::Url;

use crate::api::parse_url;
use crate::config::{
    Config, ConfigLoader, ConfigSaveFormat, HttpOptions, ServerSettings, DEFAULT_TLD,
};

#[derive(StructOpt, Debug)]
#[structopt(name = "tssci", about = "Secret Server ci client")]
pub struct Opt {
    #[structopt(
        long,
        env = "TSS_CI_CONFIG_PATH",
        parse(from_os_str),
        help = "Load server settings and http options from this toml file instead of flags"
    )]
    pub config_path: Option<PathBuf>,
    #[structopt(
        long,
        env = "TSS_CI_CONFIG",
        hide_env_values = true,
        help = "Load the whole config from a base58 encoded MessagePack string (see 'config pack')"
    )]
    pub config_packed: Option<String>,
    #[structopt(flatten)]
    pub server_settings: ServerSettingsOpt,
    #[structopt(flatten)]
    pub http_options: HttpOptions,
    #[structopt(subcommand)]
    pub command: Command,
}

impl Opt {
    /// Resolves the effective config: a packed config string wins over a
    /// config file, which wins over individual flags/env vars.
    pub fn to_config(&self) -> Result<Config> {
        if let Some(packed) = &self.config_packed {
            return ConfigLoader::from_str(packed, ConfigSaveFormat::Packed);
        }

        if let Some(path) = &self.config_path {
            return ConfigLoader::load(path, ConfigSaveFormat::Toml);
        }

        Ok(Config {
            server_settings: self.server_settings.to_settings()?,
            http_options: self.http_options.clone(),
        })
    }
}

#[derive(StructOpt, Debug)]
pub struct ServerSettingsOpt {
    #[structopt(long, env = "TSS_CI_USERNAME", help = "Secret Server api user name")]
    pub username: Option<String>,
    #[structopt(
        long,
        env = "TSS_CI_PASSWORD",
        hide_env_values = true,
        help = "Secret Server api user password"
    )]
    pub password: Option<String>,
    #[structopt(
        long,
        env = "TSS_CI_TENANT",
        help = "Secret Server Cloud tenant (the server url becomes https://<tenant>.secretservercloud.<tld>)"
    )]
    pub tenant: Option<String>,
    #[structopt(
        long,
        env = "TSS_CI_TLD",
        default_value = concatcp!(DEFAULT_TLD),
        help = "Top level domain of the Secret Server Cloud tenant"
    )]
    pub tld: String,
    #[structopt(
        long,
        env = "TSS_CI_SERVER_URL",
        parse(try_from_str = parse_url),
        help = "Base url of an on-premises Secret Server (takes precedence over --tenant)"
    )]
    pub server_url: Option<Url>,
}

impl ServerSettingsOpt {
    pub fn to_settings(&self) -> Result<ServerSettings> {
        let username = self
            .username
            .clone()
            .ok_or_else(|| anyhow!("--username (or TSS_CI_USERNAME) is required"))?;
        let password = self
            .password
            .clone()
            .ok_or_else(|| anyhow!("--password (or TSS_CI_PASSWORD) is required"))?;

        if self.tenant.is_none() && self.server_url.is_none() {
            return Err(anyhow!("either --tenant or --server-url must be set"));
        }

        Ok(ServerSettings {
            username,
            password,
            tenant: self.tenant.clone(),
            tld: self.tld.clone(),
            server_url: self.server_url.clone(),
        })
    }
}

#[derive(StructOpt, Debug)]
pub enum Command {
    #[structopt(about = "Secret Server secret commands (/api/v1/secrets)")]
    Secret(SecretCommand),
    #[structopt(about = "Inspect, save, and pack the config")]
    Config(ConfigCommand),
}

#[derive(StructOpt, Debug)]
pub enum SecretCommand {
    #[structopt(about = "Get a secret field value by the secret's numeric id")]
    Get {
        #[structopt(required = true, help = "The secret's numeric id")]
        secret_id: i64,
        #[structopt(required = true, help = "Field name or slug of the value to print")]
        field_name: String,
    },
    #[structopt(about = "Get a secret field value by the secret's name")]
    GetByName {
        #[structopt(required = true, help = "The secret's name")]
        name: String,
        #[structopt(required = true, help = "Field name or slug of the value to print")]
        field_name: String,
    },
    #[structopt(about = "Print the whole secret as json")]
    Json {
        #[structopt(required = true, help = "The secret's numeric id")]
        secret_id: i64,
    },
    #[structopt(about = "Look up the id of the secret with the given name")]
    LookupId {
        #[structopt(required = true, help = "The secret's name")]
        name: String,
    },
}

#[derive(StructOpt, Debug)]
pub enum ConfigCommand {
    #[structopt(about = "Save the resolved config to a file")]
    Save {
        #[structopt(required = true, parse(from_os_str), help = "Output path")]
        path: PathBuf,
        #[structopt(
            long,
            possible_values = &ConfigSaveFormat::variants(),
            case_insensitive = true,
            default_value = "toml",
            help = "Serialization format"
        )]
        format: ConfigSaveFormat,
        #[structopt(long, help = "Overwrite the output path if it already exists")]
        overwrite: bool,
    },
    #[structopt(about = "Print the config as a base58 encoded MessagePack string")]
    Pack,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Opt {
        Opt::from_iter_safe(args).expect("args should parse")
    }

    #[test]
    #[allow(non_snake_case)]
    fn opt__flags_resolve_to_config() {
        let opt = parse(&[
            "tssci",
            "--username",
            "app-user",
            "--password",
            "app-password",
            "--tenant",
            "acme",
            "secret",
            "get",
            "5",
            "password",
        ]);

        let config = opt.to_config().unwrap();

        assert_eq!(config.server_settings.username, "app-user");
        assert_eq!(config.server_settings.tenant, Some("acme".to_owned()));
        assert_eq!(config.server_settings.tld, DEFAULT_TLD);

        match opt.command {
            Command::Secret(SecretCommand::Get {
                secret_id,
                ref field_name,
            }) => {
                assert_eq!(secret_id, 5);
                assert_eq!(field_name, "password");
            }
            _ => panic!("expected secret get"),
        }
    }

    #[test]
    #[allow(non_snake_case)]
    fn opt__missing_username_fails_resolution() {
        let opt = parse(&[
            "tssci",
            "--password",
            "app-password",
            "--tenant",
            "acme",
            "secret",
            "lookup-id",
            "db-creds",
        ]);

        let result = opt.to_config();

        assert!(result.is_err());
    }

    #[test]
    #[allow(non_snake_case)]
    fn opt__tenant_or_server_url_required() {
        let opt = parse(&[
            "tssci",
            "--username",
            "app-user",
            "--password",
            "app-password",
            "secret",
            "json",
            "5",
        ]);

        let result = opt.to_config();

        assert!(result.is_err());
    }

    #[test]
    #[allow(non_snake_case)]
    fn opt__server_url_with_invalid_scheme_is_rejected() {
        let result = Opt::from_iter_safe(&[
            "tssci",
            "--username",
            "app-user",
            "--password",
            "app-password",
            "--server-url",
            "ftp://secrets.example.com",
            "secret",
            "json",
            "5",
        ]);

        assert!(result.is_err());
    }

    #[test]
    #[allow(non_snake_case)]
    fn opt__get_by_name_subcommand() {
        let opt = parse(&[
            "tssci",
            "--username",
            "app-user",
            "--password",
            "app-password",
            "--tenant",
            "acme",
            "secret",
            "get-by-name",
            "db-creds",
            "password",
        ]);

        match opt.command {
            Command::Secret(SecretCommand::GetByName {
                ref name,
                ref field_name,
            }) => {
                assert_eq!(name, "db-creds");
                assert_eq!(field_name, "password");
            }
            _ => panic!("expected secret get-by-name"),
        }
    }

    #[test]
    #[allow(non_snake_case)]
    fn opt__config_save_format_parses_case_insensitive() {
        let opt = parse(&[
            "tssci",
            "--username",
            "app-user",
            "--password",
            "app-password",
            "--tenant",
            "acme",
            "config",
            "save",
            "out.toml",
            "--format",
            "packed",
        ]);

        match opt.command {
            Command::Config(ConfigCommand::Save { format, .. }) => {
                assert!(matches!(format, ConfigSaveFormat::Packed));
            }
            _ => panic!("expected config save"),
        }
    }
}
